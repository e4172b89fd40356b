//! Answer synthesis.
//!
//! Assembles retrieved sources and verified claims into a cited,
//! JSON-structured answer. The prompt pins the model to the provided
//! sources; citation numbers map back to the source order. On LLM
//! failure the most relevant source excerpt stands in, at half its
//! relevance score.

use crate::llm::{GenerationRequest, LlmProvider, extract_json_from_response};
use crate::models::{AtomicClaim, DocumentId, QueryType, SectionId};
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;

/// Excerpts are truncated at a sentence boundary at or under this length.
pub const MAX_EXCERPT_CHARS: usize = 500;

/// A retrieved source handed to the synthesizer.
#[derive(Debug, Clone)]
pub struct ScoredSource {
    /// Source document.
    pub document_id: DocumentId,
    /// Source document title.
    pub document_title: String,
    /// Matched section, when the source is a section hit.
    pub section_id: Option<SectionId>,
    /// Matched section header.
    pub section_header: Option<String>,
    /// Truncated excerpt.
    pub excerpt: String,
    /// Retrieval relevance in `[0, 1]`.
    pub relevance: f32,
    /// Owning document authority.
    pub authority_level: u8,
}

/// A synthesized answer.
#[derive(Debug, Clone)]
pub struct SynthesizedAnswer {
    /// The answer text.
    pub answer: String,
    /// Confidence in `[0, 1]`; reflects degradation on fallback.
    pub confidence: f32,
    /// Information the corpus could not provide.
    pub knowledge_gaps: Vec<String>,
    /// Whether the rule-based fallback produced the answer.
    pub used_fallback: bool,
}

#[derive(Debug, Deserialize)]
struct LlmAnswer {
    #[serde(default)]
    answer: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    knowledge_gaps: Vec<String>,
}

/// Synthesizes answers from retrieved sources.
pub struct AnswerSynthesizer {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl AnswerSynthesizer {
    /// Creates a synthesizer.
    #[must_use]
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    /// Produces an answer for the query from the given sources.
    ///
    /// `related_entities` carries co-occurrence-graph neighbors of the
    /// claim subjects, as extra context the model may draw on.
    ///
    /// Never fails: LLM errors degrade to the top-source fallback.
    #[must_use]
    pub fn synthesize(
        &self,
        query: &str,
        query_type: QueryType,
        sources: &[ScoredSource],
        claims: &[AtomicClaim],
        related_entities: &[String],
    ) -> SynthesizedAnswer {
        if sources.is_empty() {
            return SynthesizedAnswer {
                answer: "No relevant sources were found for this query.".to_string(),
                confidence: 0.0,
                knowledge_gaps: vec![query.to_string()],
                used_fallback: true,
            };
        }

        if let Some(llm) = &self.llm {
            let prompt = build_prompt(query, query_type, sources, claims, related_entities);
            match llm.generate(&GenerationRequest::new(prompt)) {
                Ok(response) => {
                    if let Ok(parsed) = serde_json::from_str::<LlmAnswer>(
                        extract_json_from_response(&response),
                    ) {
                        if !parsed.answer.trim().is_empty() {
                            return SynthesizedAnswer {
                                answer: parsed.answer,
                                confidence: parsed.confidence.clamp(0.0, 1.0),
                                knowledge_gaps: parsed.knowledge_gaps,
                                used_fallback: false,
                            };
                        }
                    }
                    tracing::debug!("unusable synthesis response, falling back to excerpt");
                },
                Err(err) => {
                    tracing::debug!("answer synthesis degrading to excerpt: {err}");
                },
            }
        }

        fallback_answer(sources)
    }
}

/// The fixed-schema synthesis prompt.
fn build_prompt(
    query: &str,
    query_type: QueryType,
    sources: &[ScoredSource],
    claims: &[AtomicClaim],
    related_entities: &[String],
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Answer the {} question below using ONLY the numbered sources.\n\
         Cite sources as [n]. If something the question needs is not in the sources,\n\
         list it under knowledge_gaps instead of guessing.",
        query_type.as_str()
    );
    let _ = writeln!(prompt, "\nQuestion: {query}\n\nSources:");
    for (i, source) in sources.iter().enumerate() {
        let header = source.section_header.as_deref().unwrap_or("");
        let _ = writeln!(
            prompt,
            "[{}] {} {} — {}",
            i + 1,
            source.document_title,
            if header.is_empty() {
                String::new()
            } else {
                format!("/ {header}")
            },
            source.excerpt
        );
    }
    if !claims.is_empty() {
        let _ = writeln!(prompt, "\nExtracted claims:");
        for claim in claims {
            let _ = writeln!(
                prompt,
                "- {} (confidence {:.2})",
                claim.as_sentence(),
                claim.confidence
            );
        }
    }
    if !related_entities.is_empty() {
        let _ = writeln!(prompt, "\nRelated entities: {}", related_entities.join(", "));
    }
    let _ = writeln!(
        prompt,
        "\nRespond with ONLY JSON:\n\
         {{\"answer\": \"...\", \"confidence\": 0.0, \"knowledge_gaps\": [\"...\"]}}"
    );
    prompt
}

/// Most-relevant-excerpt fallback at half the source's relevance.
fn fallback_answer(sources: &[ScoredSource]) -> SynthesizedAnswer {
    let top = &sources[0];
    SynthesizedAnswer {
        answer: format!("From \"{}\": {}", top.document_title, top.excerpt),
        confidence: (top.relevance * 0.5).clamp(0.0, 1.0),
        knowledge_gaps: Vec::new(),
        used_fallback: true,
    }
}

/// Truncates text at a sentence boundary at or under
/// [`MAX_EXCERPT_CHARS`], suffixing `...` when trimmed.
#[must_use]
pub fn truncate_excerpt(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= MAX_EXCERPT_CHARS {
        return text.to_string();
    }

    let window: String = text.chars().take(MAX_EXCERPT_CHARS).collect();
    let sentence_end = window
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .next_back();

    let cut = sentence_end.unwrap_or_else(|| {
        window
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .next_back()
            .unwrap_or(window.len())
    });

    format!("{}...", window[..cut].trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    struct ScriptedLlm(String);

    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingLlm;

    impl LlmProvider for FailingLlm {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            Err(crate::Error::DependencyUnavailable {
                dependency: "llm".to_string(),
                cause: "down".to_string(),
            })
        }
    }

    fn source(title: &str, excerpt: &str, relevance: f32) -> ScoredSource {
        ScoredSource {
            document_id: DocumentId::new(),
            document_title: title.to_string(),
            section_id: None,
            section_header: Some("Retry Policy".to_string()),
            excerpt: excerpt.to_string(),
            relevance,
            authority_level: 5,
        }
    }

    #[test]
    fn test_llm_answer() {
        let llm = ScriptedLlm(
            r#"{"answer": "The service retries 3 times [1].", "confidence": 0.9, "knowledge_gaps": []}"#
                .to_string(),
        );
        let synthesizer = AnswerSynthesizer::new(Some(Arc::new(llm)));
        let answer = synthesizer.synthesize(
            "How many retries?",
            QueryType::Factual,
            &[source("Spec", "The service retries 3 times.", 0.8)],
            &[],
            &[],
        );
        assert!(!answer.used_fallback);
        assert!(answer.answer.contains('3'));
        assert!((answer.confidence - 0.9).abs() < f32::EPSILON);
        assert!(answer.knowledge_gaps.is_empty());
    }

    #[test]
    fn test_fallback_on_llm_failure() {
        let synthesizer = AnswerSynthesizer::new(Some(Arc::new(FailingLlm)));
        let answer = synthesizer.synthesize(
            "How many retries?",
            QueryType::Factual,
            &[source("Spec", "The service retries 3 times.", 0.8)],
            &[],
            &[],
        );
        assert!(answer.used_fallback);
        assert!(answer.answer.contains("retries 3 times"));
        assert!((answer.confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_no_sources() {
        let synthesizer = AnswerSynthesizer::new(None);
        let answer = synthesizer.synthesize("Anything?", QueryType::Factual, &[], &[], &[]);
        assert!(answer.answer.contains("No relevant sources"));
        assert!(answer.confidence.abs() < f32::EPSILON);
        assert_eq!(answer.knowledge_gaps, vec!["Anything?".to_string()]);
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_excerpt("short."), "short.");
    }

    #[test]
    fn test_truncate_cuts_at_sentence_boundary() {
        let text = format!("First sentence. {}", "word ".repeat(200));
        let excerpt = truncate_excerpt(&text);
        assert!(excerpt.chars().count() <= MAX_EXCERPT_CHARS + 3);
        assert!(excerpt.ends_with("..."));
        assert!(excerpt.starts_with("First sentence."));
    }

    #[test]
    fn test_prompt_numbers_sources_in_order() {
        let sources = vec![
            source("First Doc", "a", 0.9),
            source("Second Doc", "b", 0.8),
        ];
        let prompt = build_prompt("q", QueryType::Factual, &sources, &[], &[]);
        let first = prompt.find("[1] First Doc").unwrap();
        let second = prompt.find("[2] Second Doc").unwrap();
        assert!(first < second);
    }
}
