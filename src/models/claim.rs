//! Atomic claim types.

use super::{DocumentId, SectionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an atomic claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(Uuid);

impl ClaimId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClaimId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// An extracted subject-predicate-object assertion.
///
/// `subject`, `predicate`, and `object` are non-empty trimmed strings.
/// `original_text` is the verbatim span the claim was derived from, or
/// a paraphrase when `paraphrased` is set.
#[derive(Debug, Clone)]
pub struct AtomicClaim {
    /// Unique identifier.
    pub id: ClaimId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Source section.
    pub section_id: SectionId,
    /// Claim subject.
    pub subject: String,
    /// Claim predicate.
    pub predicate: String,
    /// Claim object.
    pub object: String,
    /// Verbatim span the claim was derived from.
    pub original_text: String,
    /// Whether `original_text` is a paraphrase rather than a verbatim span.
    pub paraphrased: bool,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f32,
    /// Whether the claim has been deprecated with its document.
    pub deprecated: bool,
    /// When the claim was deprecated, if ever.
    pub deprecated_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl AtomicClaim {
    /// The claim subject normalized for bucketing and matching.
    #[must_use]
    pub fn normalized_subject(&self) -> String {
        super::normalize_term(&self.subject)
    }

    /// Renders the claim as a single sentence for prompts and reports.
    #[must_use]
    pub fn as_sentence(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AtomicClaim {
        AtomicClaim {
            id: ClaimId::new(),
            document_id: DocumentId::new(),
            section_id: SectionId::new(),
            subject: "The Service".to_string(),
            predicate: "retries".to_string(),
            object: "3 times".to_string(),
            original_text: "The service retries 3 times.".to_string(),
            paraphrased: false,
            confidence: 0.9,
            deprecated: false,
            deprecated_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalized_subject() {
        assert_eq!(sample().normalized_subject(), "the service");
    }

    #[test]
    fn test_as_sentence() {
        assert_eq!(sample().as_sentence(), "The Service retries 3 times");
    }
}
