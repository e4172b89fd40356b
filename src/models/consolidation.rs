//! Consolidation, supersession, cluster, and provenance record types.

use super::DocumentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Strategy used to merge a set of documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Pick the higher-confidence claim; tie-break on authority then recency.
    #[default]
    Smart,
    /// Pick the claim from the most recently updated document.
    NewestWins,
    /// Pick the claim from the higher-authority document.
    AuthorityWins,
    /// Retain both claims and surface the pair as unresolved.
    MergeAll,
}

impl MergeStrategy {
    /// Returns the strategy as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Smart => "smart",
            Self::NewestWins => "newest_wins",
            Self::AuthorityWins => "authority_wins",
            Self::MergeAll => "merge_all",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smart" => Ok(Self::Smart),
            "newest_wins" => Ok(Self::NewestWins),
            "authority_wins" => Ok(Self::AuthorityWins),
            "merge_all" => Ok(Self::MergeAll),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown merge strategy: {other}"
            ))),
        }
    }
}

/// Outcome status of a consolidation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStatus {
    /// All routed conflicts were resolved.
    Completed,
    /// Some conflicts await review.
    PendingReview,
    /// The merge could not produce an output document.
    Failed,
}

/// Classification of a natural-language query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// A question with a factual answer.
    #[default]
    Factual,
    /// A how-to question.
    Procedural,
    /// A question about concepts or rationale.
    Conceptual,
    /// A question comparing alternatives.
    Comparative,
}

impl QueryType {
    /// Returns the query type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Factual => "factual",
            Self::Procedural => "procedural",
            Self::Conceptual => "conceptual",
            Self::Comparative => "comparative",
        }
    }
}

/// A record that one document replaces another.
///
/// The supersession graph is acyclic; the store rejects edges that
/// would close a cycle.
#[derive(Debug, Clone)]
pub struct Supersession {
    /// Unique identifier.
    pub id: Uuid,
    /// The replaced document.
    pub old_document_id: DocumentId,
    /// The replacing document.
    pub new_document_id: DocumentId,
    /// Why the replacement happened.
    pub reason: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// The durable record emitted by a merge.
#[derive(Debug, Clone)]
pub struct ConsolidationRecord {
    /// Unique identifier.
    pub id: Uuid,
    /// Ordered source documents.
    pub source_document_ids: Vec<DocumentId>,
    /// The produced document, absent for dry runs.
    pub result_document_id: Option<DocumentId>,
    /// Strategy used.
    pub strategy: MergeStrategy,
    /// Number of conflicts auto-resolved.
    pub conflicts_resolved: u32,
    /// Number of conflicts left pending.
    pub conflicts_pending: u32,
    /// Originating overlap cluster, when consolidation targeted one.
    pub cluster_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A persisted overlap cluster.
///
/// Stored by `find_overlaps` so a later consolidation call can
/// reference the cluster instead of re-listing documents.
#[derive(Debug, Clone)]
pub struct OverlapCluster {
    /// Unique identifier.
    pub id: Uuid,
    /// Member documents.
    pub document_ids: Vec<DocumentId>,
    /// The similarity threshold the cluster was built with.
    pub similarity_threshold: f32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Kind of a provenance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceEventType {
    /// A document was ingested.
    Ingestion,
    /// A document took part in (or resulted from) a consolidation.
    Consolidation,
    /// A document was deprecated.
    Deprecation,
    /// A document superseded or was superseded by another.
    Supersession,
    /// Inbound references to a document were rewritten.
    ReferenceMigration,
}

impl ProvenanceEventType {
    /// Returns the event type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Consolidation => "consolidation",
            Self::Deprecation => "deprecation",
            Self::Supersession => "supersession",
            Self::ReferenceMigration => "reference_migration",
        }
    }
}

impl FromStr for ProvenanceEventType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingestion" => Ok(Self::Ingestion),
            "consolidation" => Ok(Self::Consolidation),
            "deprecation" => Ok(Self::Deprecation),
            "supersession" => Ok(Self::Supersession),
            "reference_migration" => Ok(Self::ReferenceMigration),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown provenance event type: {other}"
            ))),
        }
    }
}

/// An append-only audit log entry for a document.
#[derive(Debug, Clone)]
pub struct ProvenanceEvent {
    /// Unique identifier.
    pub id: Uuid,
    /// The document the event concerns.
    pub document_id: DocumentId,
    /// Event kind.
    pub event_type: ProvenanceEventType,
    /// Free-form structured details.
    pub details: serde_json::Value,
    /// Event timestamp.
    pub created_at: DateTime<Utc>,
}

impl ProvenanceEvent {
    /// Builds a new event for a document.
    #[must_use]
    pub fn new(
        document_id: DocumentId,
        event_type: ProvenanceEventType,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            event_type,
            details,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_round_trip() {
        for s in [
            MergeStrategy::Smart,
            MergeStrategy::NewestWins,
            MergeStrategy::AuthorityWins,
            MergeStrategy::MergeAll,
        ] {
            assert_eq!(s.as_str().parse::<MergeStrategy>().ok(), Some(s));
        }
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ConsolidationStatus::PendingReview);
        assert_eq!(json.ok().as_deref(), Some("\"pending_review\""));
    }

    #[test]
    fn test_query_type_default() {
        assert_eq!(QueryType::default(), QueryType::Factual);
    }
}
