//! Atomic claim extraction.
//!
//! A rule-based sentence splitter feeds candidate spans to the LLM
//! under a fixed JSON schema; the response is validated and repaired
//! before anything reaches the store. Without an LLM the heuristic
//! extractor emits one claim per sentence from a subject-verb-rest
//! split at confidence 0.5.

use crate::llm::{GenerationRequest, LlmProvider, extract_json_from_response};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

/// Heuristic extraction confidence.
const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Fixed-schema extraction prompt.
const EXTRACTION_PROMPT: &str = "Extract atomic factual claims from the text below. \
Each claim is a single (subject, predicate, object) assertion.\n\
Respond with ONLY a JSON array, no other text:\n\
[{\"subject\": \"...\", \"predicate\": \"...\", \"object\": \"...\", \
\"original_text\": \"exact sentence from the input\", \"confidence\": 0.0}]\n\
Rules: subject/predicate/object must be non-empty; original_text must be copied \
verbatim from the input; confidence is between 0 and 1.\n\nText:\n";

static SUBJECT_VERB_REST: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    let re = Regex::new(
        r"(?i)^(?P<subject>.{1,100}?)\s+(?P<predicate>is|are|was|were|has|have|had|uses?|used|supports?|requires?|returns?|runs?|retries|provides?|contains?|allows?|defaults?|emits?|expects?|must|should|will|can)\s+(?P<object>.+)$",
    )
    .expect("static extraction regex");
    re
});

/// A claim before it receives store identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimDraft {
    /// Claim subject, lower-cased for matching.
    pub subject: String,
    /// Claim predicate, lower-cased.
    pub predicate: String,
    /// Claim object, lower-cased.
    pub object: String,
    /// Verbatim source span (original casing preserved).
    pub original_text: String,
    /// Whether `original_text` failed the verbatim check.
    pub paraphrased: bool,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Result of extracting claims from one section.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    /// Validated claims.
    pub claims: Vec<ClaimDraft>,
    /// Whether the heuristic path produced them.
    pub used_fallback: bool,
}

/// Raw LLM response claim shape.
#[derive(Debug, Deserialize)]
struct LlmClaim {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    predicate: String,
    #[serde(default)]
    object: String,
    #[serde(default)]
    original_text: String,
    #[serde(default = "default_llm_confidence")]
    confidence: f32,
}

const fn default_llm_confidence() -> f32 {
    0.7
}

/// Extracts atomic claims from section text.
pub struct ClaimExtractor {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl ClaimExtractor {
    /// Creates an extractor. Without an LLM every call takes the
    /// heuristic path.
    #[must_use]
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    /// Extracts claims from a section's text.
    ///
    /// Never fails: LLM errors degrade to the heuristic extractor.
    #[must_use]
    pub fn extract(&self, text: &str) -> ExtractionOutcome {
        if text.trim().is_empty() {
            return ExtractionOutcome::default();
        }

        if let Some(llm) = &self.llm {
            match self.extract_with_llm(llm.as_ref(), text) {
                Ok(claims) if !claims.is_empty() => {
                    return ExtractionOutcome {
                        claims,
                        used_fallback: false,
                    };
                },
                Ok(_) => {},
                Err(err) => {
                    tracing::debug!("claim extraction degrading to heuristics: {err}");
                },
            }
        }

        ExtractionOutcome {
            claims: heuristic_claims(text),
            used_fallback: true,
        }
    }

    fn extract_with_llm(
        &self,
        llm: &dyn LlmProvider,
        text: &str,
    ) -> crate::Result<Vec<ClaimDraft>> {
        let request =
            GenerationRequest::new(format!("{EXTRACTION_PROMPT}{text}")).with_temperature(0.0);
        let response = llm.generate(&request)?;
        let json = extract_json_from_response(&response);
        let raw: Vec<LlmClaim> = serde_json::from_str(json).map_err(|e| {
            crate::Error::internal("parse_extraction_response", format!("invalid JSON: {e}"))
        })?;
        Ok(repair_claims(raw, text))
    }
}

/// Validates and repairs LLM claims: drops incomplete triples, clamps
/// confidence, and flags paraphrased spans.
fn repair_claims(raw: Vec<LlmClaim>, section_text: &str) -> Vec<ClaimDraft> {
    let mut claims = Vec::with_capacity(raw.len());
    for claim in raw {
        let subject = claim.subject.trim().to_lowercase();
        let predicate = claim.predicate.trim().to_lowercase();
        let object = claim.object.trim().to_lowercase();
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            continue;
        }

        let mut original_text = claim.original_text.trim().to_string();
        let mut paraphrased = false;
        if original_text.is_empty() {
            original_text = format!("{} {} {}", claim.subject.trim(), claim.predicate.trim(), claim.object.trim());
            paraphrased = true;
        } else if !section_text.contains(&original_text) {
            paraphrased = true;
        }

        claims.push(ClaimDraft {
            subject,
            predicate,
            object,
            original_text,
            paraphrased,
            confidence: claim.confidence.clamp(0.0, 1.0),
        });
    }
    claims
}

/// Splits text into candidate sentences.
///
/// Sentence boundaries are `.`, `!`, or `?` followed by whitespace;
/// list bullets and heading markers are stripped first.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for line in text.lines() {
        let cleaned = line
            .trim_start_matches(['-', '*', '>', ' ', '\t'])
            .trim();
        if cleaned.is_empty() {
            continue;
        }

        let mut current = String::new();
        let mut chars = cleaned.chars().peekable();
        while let Some(ch) = chars.next() {
            current.push(ch);
            if matches!(ch, '.' | '!' | '?') && chars.peek().is_none_or(|next| next.is_whitespace())
            {
                let sentence = current.trim().to_string();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                current.clear();
            }
        }
        let tail = current.trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
    }
    sentences
}

/// One claim per sentence via a subject-verb-rest split.
fn heuristic_claims(text: &str) -> Vec<ClaimDraft> {
    let mut claims = Vec::new();
    for sentence in split_sentences(text) {
        let Some(captures) = SUBJECT_VERB_REST.captures(&sentence) else {
            continue;
        };
        let subject = captures["subject"].trim().to_lowercase();
        let predicate = captures["predicate"].trim().to_lowercase();
        let object = captures["object"]
            .trim()
            .trim_end_matches(['.', '!', '?'])
            .trim()
            .to_lowercase();
        if subject.is_empty() || object.is_empty() {
            continue;
        }
        claims.push(ClaimDraft {
            subject,
            predicate,
            object,
            original_text: sentence,
            paraphrased: false,
            confidence: FALLBACK_CONFIDENCE,
        });
    }
    claims
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

    #[test]
    fn test_split_sentences() {
        let text = "The service retries 3 times. Timeouts are 30s!\n- Bullet has a period.";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "The service retries 3 times.");
        assert_eq!(sentences[2], "Bullet has a period.");
    }

    #[test]
    fn test_heuristic_extraction() {
        let extractor = ClaimExtractor::new(None);
        let outcome = extractor.extract("The service retries 3 times.");
        assert!(outcome.used_fallback);
        assert_eq!(outcome.claims.len(), 1);
        let claim = &outcome.claims[0];
        assert_eq!(claim.subject, "the service");
        assert_eq!(claim.predicate, "retries");
        assert_eq!(claim.object, "3 times");
        assert_eq!(claim.original_text, "The service retries 3 times.");
        assert!(!claim.paraphrased);
        assert!((claim.confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_llm_extraction_with_repair() {
        let response = r#"[
            {"subject": "The Service", "predicate": "retries", "object": "3 Times",
             "original_text": "The service retries 3 times.", "confidence": 0.9},
            {"subject": "", "predicate": "is", "object": "dropped"},
            {"subject": "timeout", "predicate": "is", "object": "30s",
             "original_text": "something the model invented", "confidence": 1.7}
        ]"#;
        let extractor = ClaimExtractor::new(Some(Arc::new(ScriptedLlm(response.to_string()))));
        let outcome = extractor.extract("The service retries 3 times. Timeout is 30s.");

        assert!(!outcome.used_fallback);
        assert_eq!(outcome.claims.len(), 2);
        // Triple fields are lower-cased for matching.
        assert_eq!(outcome.claims[0].subject, "the service");
        assert_eq!(outcome.claims[0].object, "3 times");
        assert!(!outcome.claims[0].paraphrased);
        // Non-verbatim spans are kept but flagged.
        assert!(outcome.claims[1].paraphrased);
        // Confidence is clamped into [0, 1].
        assert!((outcome.claims[1].confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_llm_failure_degrades_to_heuristics() {
        let extractor = ClaimExtractor::new(Some(Arc::new(FailingLlm)));
        let outcome = extractor.extract("The cache uses redis.");
        assert!(outcome.used_fallback);
        assert_eq!(outcome.claims.len(), 1);
        assert_eq!(outcome.claims[0].predicate, "uses");
    }

    #[test]
    fn test_empty_text() {
        let extractor = ClaimExtractor::new(None);
        assert!(extractor.extract("   ").claims.is_empty());
    }
}
