//! Core data model: documents, sections, claims, entities, conflicts,
//! and the consolidation record types.

mod claim;
mod conflict;
mod consolidation;
mod document;
mod entity;

pub use claim::{AtomicClaim, ClaimId};
pub use conflict::{Conflict, ConflictType};
pub use consolidation::{
    ConsolidationRecord, ConsolidationStatus, MergeStrategy, OverlapCluster, ProvenanceEvent,
    ProvenanceEventType, QueryType, Supersession,
};
pub use document::{Document, DocumentFormat, DocumentId, DocumentType, Section, SectionId};
pub use entity::{Entity, EntityId, EntityLink};

/// Normalizes a term for matching: lowercase, whitespace-collapse,
/// punctuation stripped.
///
/// Claim subjects, entity mentions, and section headers all compare
/// through this normalization so that "Retry-Policy" and "retry policy"
/// bucket together.
#[must_use]
pub fn normalize_term(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    let mut last_was_space = true;
    for ch in term.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Retry Policy", "retry policy"; "simple")]
    #[test_case("  Retry-Policy!  ", "retry policy"; "punctuation and padding")]
    #[test_case("HTTP/2 support", "http 2 support"; "slash")]
    #[test_case("", ""; "empty")]
    #[test_case("---", ""; "only punctuation")]
    fn test_normalize_term(input: &str, expected: &str) {
        assert_eq!(normalize_term(input), expected);
    }
}
