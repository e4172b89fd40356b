//! Claim-pair conflict detection.
//!
//! Claims are bucketed by normalized subject; within a bucket every
//! unordered pair is classified as agreement, direct negation, or value
//! conflict. The detector is deterministic given fixed embeddings and
//! thresholds.

use crate::embedding::{Embedder, cosine_similarity};
use crate::llm::{GenerationRequest, LlmProvider, extract_json_from_response};
use crate::models::{AtomicClaim, Conflict, ConflictType, normalize_term};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Strength assigned when two claims disagree on a numeric value under
/// the same predicate. Surface forms like "3 times" vs "5 times" embed
/// nearly identically, so the numeric rule overrides the embedding
/// distance for these pairs.
const NUMERIC_MISMATCH_STRENGTH: f32 = 0.45;

/// Predicate pairs that negate each other.
///
/// The table is closed: lookups are exact on normalized predicates, in
/// either order.
static NEGATION_PAIRS: &[(&str, &str)] = &[
    ("is", "is not"),
    ("are", "are not"),
    ("was", "was not"),
    ("has", "does not have"),
    ("supports", "does not support"),
    ("allows", "forbids"),
    ("allows", "does not allow"),
    ("enables", "disables"),
    ("requires", "does not require"),
    ("must", "must not"),
    ("should", "should not"),
    ("can", "cannot"),
    ("will", "will not"),
    ("uses", "does not use"),
    ("includes", "excludes"),
];

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    let re = Regex::new(r"\d+(?:\.\d+)?").expect("static number regex");
    re
});

#[derive(Debug, Deserialize)]
struct NegationJudgement {
    #[serde(default)]
    negation: bool,
}

/// Detects conflicts across a set of claims.
pub struct ConflictDetector {
    embedder: Arc<dyn Embedder>,
    llm: Option<Arc<dyn LlmProvider>>,
    value_conflict_threshold: f32,
}

impl ConflictDetector {
    /// Creates a detector with the given value-conflict threshold.
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        llm: Option<Arc<dyn LlmProvider>>,
        value_conflict_threshold: f32,
    ) -> Self {
        Self {
            embedder,
            llm,
            value_conflict_threshold,
        }
    }

    /// Classifies every same-subject claim pair.
    ///
    /// Deprecated claims never participate. Pairs below the
    /// value-conflict threshold produce no record.
    #[must_use]
    pub fn detect(&self, claims: &[AtomicClaim]) -> Vec<Conflict> {
        let mut buckets: BTreeMap<String, Vec<&AtomicClaim>> = BTreeMap::new();
        for claim in claims.iter().filter(|c| !c.deprecated) {
            let subject = claim.normalized_subject();
            if subject.is_empty() {
                continue;
            }
            buckets.entry(subject).or_default().push(claim);
        }

        let mut conflicts = Vec::new();
        for bucket in buckets.values() {
            for (i, a) in bucket.iter().enumerate() {
                for b in &bucket[i + 1..] {
                    if a.document_id == b.document_id && a.id == b.id {
                        continue;
                    }
                    if let Some(conflict) = self.classify(a, b) {
                        conflicts.push(conflict);
                    }
                }
            }
        }
        conflicts
    }

    fn classify(&self, a: &AtomicClaim, b: &AtomicClaim) -> Option<Conflict> {
        let confidence = f32::midpoint(a.confidence, b.confidence);
        let pred_a = normalize_term(&a.predicate);
        let pred_b = normalize_term(&b.predicate);
        let obj_a = normalize_term(&a.object);
        let obj_b = normalize_term(&b.object);

        if pred_a == pred_b && obj_a == obj_b {
            return Some(Conflict::new(
                a.id,
                b.id,
                ConflictType::Agreement,
                0.0,
                confidence,
            ));
        }

        if self.is_negation(&pred_a, &pred_b) {
            return Some(Conflict::new(
                a.id,
                b.id,
                ConflictType::DirectNegation,
                1.0,
                confidence,
            ));
        }

        if pred_a == pred_b && numeric_mismatch(&obj_a, &obj_b) {
            return Some(Conflict::new(
                a.id,
                b.id,
                ConflictType::ValueConflict,
                NUMERIC_MISMATCH_STRENGTH,
                confidence,
            ));
        }

        let strength = self.embedding_strength(a, b)?;
        if strength >= self.value_conflict_threshold {
            return Some(Conflict::new(
                a.id,
                b.id,
                ConflictType::ValueConflict,
                strength,
                confidence,
            ));
        }
        None
    }

    /// Strength from embedding distance of `"{predicate} {object}"`.
    fn embedding_strength(&self, a: &AtomicClaim, b: &AtomicClaim) -> Option<f32> {
        let text_a = format!("{} {}", a.predicate, a.object);
        let text_b = format!("{} {}", b.predicate, b.object);
        let va = self.embedder.embed(&text_a).ok()?;
        let vb = self.embedder.embed(&text_b).ok()?;
        Some((1.0 - cosine_similarity(&va, &vb)).clamp(0.0, 1.0))
    }

    fn is_negation(&self, pred_a: &str, pred_b: &str) -> bool {
        if pred_a == pred_b {
            return false;
        }
        if NEGATION_PAIRS
            .iter()
            .any(|(x, y)| (pred_a == *x && pred_b == *y) || (pred_a == *y && pred_b == *x))
        {
            return true;
        }
        // "retries" vs "does not retry" style inserted negators.
        if negator_stripped(pred_a) == Some(pred_b.to_string())
            || negator_stripped(pred_b) == Some(pred_a.to_string())
        {
            return true;
        }

        if let Some(llm) = &self.llm {
            return llm_labels_negation(llm.as_ref(), pred_a, pred_b);
        }
        false
    }
}

/// Strips a leading negator from a predicate, if one is present.
fn negator_stripped(predicate: &str) -> Option<String> {
    for prefix in ["does not ", "do not ", "never ", "no longer ", "not "] {
        if let Some(rest) = predicate.strip_prefix(prefix) {
            return Some(rest.to_string());
        }
    }
    None
}

/// Whether both objects carry numbers and the numbers differ.
fn numeric_mismatch(obj_a: &str, obj_b: &str) -> bool {
    let numbers = |text: &str| -> Vec<String> {
        NUMBER.find_iter(text).map(|m| m.as_str().to_string()).collect()
    };
    let nums_a = numbers(obj_a);
    let nums_b = numbers(obj_b);
    !nums_a.is_empty() && !nums_b.is_empty() && nums_a != nums_b
}

fn llm_labels_negation(llm: &dyn LlmProvider, pred_a: &str, pred_b: &str) -> bool {
    let request = GenerationRequest::new(format!(
        "Do the predicates \"{pred_a}\" and \"{pred_b}\" negate each other?\n\
         Respond with ONLY JSON: {{\"negation\": true}} or {{\"negation\": false}}"
    ))
    .with_temperature(0.0)
    .with_max_tokens(32);

    match llm.generate(&request) {
        Ok(response) => serde_json::from_str::<NegationJudgement>(extract_json_from_response(
            &response,
        ))
        .map(|j| j.negation)
        .unwrap_or(false),
        Err(err) => {
            tracing::debug!("negation labeling degraded to table-only: {err}");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::TrigramEmbedder;
    use crate::models::{ClaimId, DocumentId, SectionId};
    use chrono::Utc;

    fn claim(subject: &str, predicate: &str, object: &str, confidence: f32) -> AtomicClaim {
        AtomicClaim {
            id: ClaimId::new(),
            document_id: DocumentId::new(),
            section_id: SectionId::new(),
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            original_text: format!("{subject} {predicate} {object}."),
            paraphrased: false,
            confidence,
            deprecated: false,
            deprecated_at: None,
            created_at: Utc::now(),
        }
    }

    fn detector() -> ConflictDetector {
        ConflictDetector::new(Arc::new(TrigramEmbedder::default()), None, 0.35)
    }

    #[test]
    fn test_agreement() {
        let conflicts = detector().detect(&[
            claim("the service", "retries", "3 times", 0.9),
            claim("The Service", "retries", "3 times", 0.8),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::Agreement);
        assert!(conflicts[0].strength.abs() < f32::EPSILON);
    }

    #[test]
    fn test_numeric_value_conflict() {
        let conflicts = detector().detect(&[
            claim("the service", "retries", "3 times", 0.9),
            claim("the service", "retries", "5 times", 0.6),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::ValueConflict);
        assert!((conflicts[0].strength - NUMERIC_MISMATCH_STRENGTH).abs() < f32::EPSILON);
        // Router confidence signal: mean of the claim confidences.
        assert!((conflicts[0].confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_direct_negation_from_table() {
        let conflicts = detector().detect(&[
            claim("tls", "supports", "renegotiation", 0.8),
            claim("TLS", "does not support", "renegotiation", 0.8),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::DirectNegation);
        assert!((conflicts[0].strength - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_different_subjects_never_pair() {
        let conflicts = detector().detect(&[
            claim("the cache", "retries", "3 times", 0.9),
            claim("the queue", "retries", "5 times", 0.9),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_deprecated_claims_skipped() {
        let mut old = claim("the service", "retries", "5 times", 0.9);
        old.deprecated = true;
        let conflicts = detector().detect(&[claim("the service", "retries", "3 times", 0.9), old]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_divergent_values_conflict_via_embeddings() {
        let conflicts = detector().detect(&[
            claim("storage backend", "is", "a postgresql cluster with streaming replication", 0.9),
            claim("storage backend", "is", "redis", 0.9),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::ValueConflict);
        assert!(conflicts[0].strength >= 0.35);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let claims = [
            claim("the service", "retries", "3 times", 0.9),
            claim("the service", "retries", "5 times", 0.6),
        ];
        let a = detector().detect(&claims);
        let b = detector().detect(&claims);
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].conflict_type, b[0].conflict_type);
        assert!((a[0].strength - b[0].strength).abs() < f32::EPSILON);
    }
}
