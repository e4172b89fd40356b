//! Canonical entities and the co-occurrence graph.

use super::{ClaimId, DocumentId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a canonical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
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

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A canonical referent for claim subjects and objects.
///
/// Entities do not own the claims that mention them; claims reference
/// entities through [`EntityLink`] edges.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Canonical identifier.
    pub canonical_id: EntityId,
    /// Canonical surface form.
    pub name: String,
    /// Equivalent mentions attached by the resolver.
    pub aliases: Vec<String>,
    /// Optional embedding of the canonical surface form.
    pub embedding: Option<Vec<f32>>,
}

impl Entity {
    /// Whether the given normalized mention matches this entity's
    /// canonical form or any alias.
    #[must_use]
    pub fn matches(&self, normalized_mention: &str) -> bool {
        if super::normalize_term(&self.name) == normalized_mention {
            return true;
        }
        self.aliases
            .iter()
            .any(|a| super::normalize_term(a) == normalized_mention)
    }
}

/// A directed co-occurrence edge: a claim mentions an entity within a
/// document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLink {
    /// The mentioned entity.
    pub entity_id: EntityId,
    /// The mentioning claim.
    pub claim_id: ClaimId,
    /// The document the mention originated from.
    pub document_id: DocumentId,
}
