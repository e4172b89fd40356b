//! Conflict types.

use super::ClaimId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Classification of a claim-pair incompatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// The claims state the same thing.
    Agreement,
    /// The claims assign different values to the same subject-predicate.
    ValueConflict,
    /// The claims directly negate each other.
    DirectNegation,
}

impl ConflictType {
    /// Returns the conflict type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Agreement => "agreement",
            Self::ValueConflict => "value_conflict",
            Self::DirectNegation => "direct_negation",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConflictType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agreement" => Ok(Self::Agreement),
            "value_conflict" => Ok(Self::ValueConflict),
            "direct_negation" => Ok(Self::DirectNegation),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown conflict type: {other}"
            ))),
        }
    }
}

/// A detected incompatibility between two claims sharing a normalized
/// subject.
///
/// Conflicts are symmetric: the constructor orders the claim pair so
/// that `(a, b)` and `(b, a)` produce the same stored row.
#[derive(Debug, Clone)]
pub struct Conflict {
    /// Unique identifier.
    pub id: Uuid,
    /// First claim (the smaller id of the pair).
    pub claim_a: ClaimId,
    /// Second claim (the larger id of the pair).
    pub claim_b: ClaimId,
    /// Classification.
    pub conflict_type: ConflictType,
    /// Incompatibility strength in `[0, 1]`: 0 identical, 1 direct negation.
    pub strength: f32,
    /// Mean of the two claims' confidences; the router's confidence in
    /// the conflict itself.
    pub confidence: f32,
    /// Discovery timestamp.
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    /// Builds a conflict with the claim pair in canonical order.
    #[must_use]
    pub fn new(
        claim_a: ClaimId,
        claim_b: ClaimId,
        conflict_type: ConflictType,
        strength: f32,
        confidence: f32,
    ) -> Self {
        let (claim_a, claim_b) = if claim_a <= claim_b {
            (claim_a, claim_b)
        } else {
            (claim_b, claim_a)
        };
        Self {
            id: Uuid::new_v4(),
            claim_a,
            claim_b,
            conflict_type,
            strength: strength.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            detected_at: Utc::now(),
        }
    }

    /// Whether this conflict involves the given claim.
    #[must_use]
    pub fn involves(&self, claim: ClaimId) -> bool {
        self.claim_a == claim || self.claim_b == claim
    }

    /// The other endpoint of the pair, if `claim` is one of them.
    #[must_use]
    pub fn other(&self, claim: ClaimId) -> Option<ClaimId> {
        if self.claim_a == claim {
            Some(self.claim_b)
        } else if self.claim_b == claim {
            Some(self.claim_a)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_pair_order() {
        let a = ClaimId::new();
        let b = ClaimId::new();
        let c1 = Conflict::new(a, b, ConflictType::ValueConflict, 0.4, 0.8);
        let c2 = Conflict::new(b, a, ConflictType::ValueConflict, 0.4, 0.8);
        assert_eq!(c1.claim_a, c2.claim_a);
        assert_eq!(c1.claim_b, c2.claim_b);
        assert!(c1.claim_a <= c1.claim_b);
    }

    #[test]
    fn test_strength_clamped() {
        let c = Conflict::new(
            ClaimId::new(),
            ClaimId::new(),
            ConflictType::DirectNegation,
            1.7,
            -0.2,
        );
        assert!((c.strength - 1.0).abs() < f32::EPSILON);
        assert!(c.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn test_involves_and_other() {
        let a = ClaimId::new();
        let b = ClaimId::new();
        let c = Conflict::new(a, b, ConflictType::Agreement, 0.0, 0.5);
        assert!(c.involves(a));
        assert!(c.involves(b));
        assert_eq!(c.other(a), Some(b));
        assert_eq!(c.other(ClaimId::new()), None);
    }
}
