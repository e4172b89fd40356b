//! Wire request and response types for the five operations.
//!
//! Field names and defaults are part of the external contract. Requests
//! with a union discriminator (`file_path | content | url`,
//! `document_ids | scope | cluster_id`) are validated to carry exactly
//! one arm.

use crate::models::{
    ConsolidationStatus, DocumentFormat, DocumentId, DocumentType, MergeStrategy, QueryType,
    SectionId,
};
use crate::services::overlap::ConflictsSummary;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

const fn default_true() -> bool {
    true
}

const fn default_authority() -> u8 {
    5
}

const fn default_min_cluster_size() -> usize {
    2
}

const fn default_conflict_threshold() -> f32 {
    0.7
}

const fn default_auto_resolve_below() -> f32 {
    0.3
}

const fn default_require_human_above() -> f32 {
    0.9
}

const fn default_confidence_threshold() -> f32 {
    0.7
}

const fn default_max_sources() -> usize {
    5
}

/// A document subset selector: explicit ids, path patterns, or `"all"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scope {
    /// Explicit document ids.
    Ids {
        /// The documents in scope.
        document_ids: Vec<DocumentId>,
    },
    /// `source_path` glob/substring patterns.
    Patterns {
        /// The patterns in scope.
        path_patterns: Vec<String>,
    },
    /// The literal keyword `"all"`.
    Keyword(String),
}

impl Scope {
    /// Validates the keyword arm.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a keyword other than `all`.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Keyword(word) if word != "all" => Err(Error::InvalidInput(format!(
                "unknown scope keyword: {word}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Input for `ingest_document`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    /// Filesystem source (exactly one of the three source arms).
    pub file_path: Option<String>,
    /// Inline content source.
    pub content: Option<String>,
    /// URL source.
    pub url: Option<String>,
    /// Declared format; sniffed when absent.
    pub format: Option<DocumentFormat>,
    /// Artifact kind (required).
    pub document_type: Option<DocumentType>,
    /// Tag set.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Authority level, 1..10.
    #[serde(default = "default_authority")]
    pub authority_level: u8,
    /// Documents this one supersedes.
    #[serde(default)]
    pub supersedes: Vec<DocumentId>,
    /// Whether to extract claims.
    #[serde(default = "default_true")]
    pub extract_claims: bool,
    /// Whether to generate embeddings.
    #[serde(default = "default_true")]
    pub generate_embeddings: bool,
    /// Whether to resolve entities into the co-occurrence graph.
    #[serde(default = "default_true")]
    pub build_entity_graph: bool,
}

impl Default for IngestRequest {
    fn default() -> Self {
        Self {
            file_path: None,
            content: None,
            url: None,
            format: None,
            document_type: None,
            tags: Vec::new(),
            authority_level: default_authority(),
            supersedes: Vec::new(),
            extract_claims: true,
            generate_embeddings: true,
            build_entity_graph: true,
        }
    }
}

impl IngestRequest {
    /// Validates the one-of source union, the document type, and the
    /// authority range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on violations.
    pub fn validate(&self) -> Result<DocumentType> {
        let arms = [
            self.file_path.is_some(),
            self.content.is_some(),
            self.url.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();
        if arms != 1 {
            return Err(Error::InvalidInput(
                "exactly one of file_path, content, url is required".to_string(),
            ));
        }
        if !(1..=10).contains(&self.authority_level) {
            return Err(Error::InvalidInput(format!(
                "authority_level {} outside 1..10",
                self.authority_level
            )));
        }
        self.document_type
            .ok_or_else(|| Error::InvalidInput("document_type is required".to_string()))
    }
}

/// A similar document in the ingest response.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarDocument {
    /// The similar document.
    pub document_id: DocumentId,
    /// Its title.
    pub title: String,
    /// Cosine similarity, clamped non-negative.
    pub similarity: f32,
}

/// Output of `ingest_document`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    /// The ingested document.
    pub document_id: DocumentId,
    /// Derived title.
    pub title: String,
    /// Sections persisted.
    pub sections_extracted: u32,
    /// Claims persisted.
    pub claims_extracted: u32,
    /// Entities resolved.
    pub entities_identified: u32,
    /// Embeddings written (sections + document).
    pub embeddings_generated: u32,
    /// Up to five most similar existing documents.
    pub similar_documents: Vec<SimilarDocument>,
    /// Claims elsewhere sharing a subject with this document's claims.
    pub potential_conflicts: u64,
    /// Wall time spent in the handler.
    pub processing_time_ms: u64,
}

/// Input for `find_overlaps`.
#[derive(Debug, Clone, Deserialize)]
pub struct FindOverlapsRequest {
    /// Document subset; defaults to all.
    pub scope: Option<Scope>,
    /// Minimum cluster size.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Clustering similarity threshold; config default when absent.
    pub similarity_threshold: Option<f32>,
    /// Whether to aggregate claim conflicts per cluster.
    #[serde(default = "default_true")]
    pub include_claim_conflicts: bool,
}

impl Default for FindOverlapsRequest {
    fn default() -> Self {
        Self {
            scope: None,
            min_cluster_size: default_min_cluster_size(),
            similarity_threshold: None,
            include_claim_conflicts: true,
        }
    }
}

/// A pairwise similarity entry.
#[derive(Debug, Clone, Serialize)]
pub struct PairwiseSimilarity {
    /// First document.
    pub document_a: DocumentId,
    /// Second document.
    pub document_b: DocumentId,
    /// Cosine similarity.
    pub similarity: f32,
}

/// One cluster in the overlaps response.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    /// Persisted cluster id, usable by `consolidate_documents`.
    pub cluster_id: Uuid,
    /// Member documents.
    pub document_ids: Vec<DocumentId>,
    /// Similarities of connected member pairs.
    pub pairwise_similarities: Vec<PairwiseSimilarity>,
    /// Headers shared across members.
    pub shared_headers: Vec<String>,
    /// Conflict counts by type.
    pub conflicts_summary: ConflictsSummary,
}

/// Output of `find_overlaps`.
#[derive(Debug, Clone, Serialize)]
pub struct FindOverlapsResponse {
    /// Clusters, largest first.
    pub clusters: Vec<ClusterSummary>,
    /// Wall time spent in the handler.
    pub processing_time_ms: u64,
}

/// Input for `consolidate_documents`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidateRequest {
    /// Explicit source documents (one of the three target arms).
    pub document_ids: Option<Vec<DocumentId>>,
    /// Scope-selected source documents.
    pub scope: Option<Scope>,
    /// A persisted overlap cluster.
    pub cluster_id: Option<Uuid>,
    /// Merge strategy.
    #[serde(default)]
    pub strategy: MergeStrategy,
    /// Explicit document priority for `authority_wins`.
    pub authority_order: Option<Vec<DocumentId>>,
    /// Minimum conflict confidence for auto resolution.
    #[serde(default = "default_conflict_threshold")]
    pub conflict_threshold: f32,
    /// Conflicts below this strength auto-resolve.
    #[serde(default = "default_auto_resolve_below")]
    pub auto_resolve_below: f32,
    /// Conflicts above this strength require human review.
    #[serde(default = "default_require_human_above")]
    pub require_human_above: f32,
    /// Output rendering format.
    #[serde(default)]
    pub output_format: DocumentFormat,
    /// Whether rendered output carries source annotations.
    #[serde(default = "default_true")]
    pub include_provenance: bool,
    /// When set, nothing is persisted.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ConsolidateRequest {
    fn default() -> Self {
        Self {
            document_ids: None,
            scope: None,
            cluster_id: None,
            strategy: MergeStrategy::default(),
            authority_order: None,
            conflict_threshold: default_conflict_threshold(),
            auto_resolve_below: default_auto_resolve_below(),
            require_human_above: default_require_human_above(),
            output_format: DocumentFormat::default(),
            include_provenance: true,
            dry_run: false,
        }
    }
}

impl ConsolidateRequest {
    /// Validates the one-of target union.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on zero or multiple arms.
    pub fn validate(&self) -> Result<()> {
        let arms = [
            self.document_ids.is_some(),
            self.scope.is_some(),
            self.cluster_id.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();
        if arms != 1 {
            return Err(Error::InvalidInput(
                "exactly one of document_ids, scope, cluster_id is required".to_string(),
            ));
        }
        if let Some(scope) = &self.scope {
            scope.validate()?;
        }
        Ok(())
    }
}

/// The rendered output document of a consolidation.
#[derive(Debug, Clone, Serialize)]
pub struct OutputDocument {
    /// Persisted id; absent for dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    /// Output title.
    pub title: String,
    /// Rendered content.
    pub content: String,
    /// Rendering format.
    pub format: DocumentFormat,
}

/// Per-source contribution summary.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDocumentSummary {
    /// Source document.
    pub document_id: DocumentId,
    /// Its title.
    pub title: String,
    /// Sections it contributed.
    pub sections_used: u32,
    /// Claims it carried into the output.
    pub claims_included: u32,
}

/// One side of a pending conflict.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictOption {
    /// The claim's document.
    pub source_document: DocumentId,
    /// The claim as a sentence.
    pub claim: String,
    /// The claim's confidence.
    pub confidence: f32,
}

/// A conflict awaiting review.
#[derive(Debug, Clone, Serialize)]
pub struct PendingConflictView {
    /// The stored conflict.
    pub conflict_id: Uuid,
    /// Human-readable description.
    pub description: String,
    /// The competing claims.
    pub options: Vec<ConflictOption>,
}

/// Output of `consolidate_documents`.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidateResponse {
    /// The consolidation record id.
    pub consolidation_id: Uuid,
    /// Outcome status.
    pub status: ConsolidationStatus,
    /// The merged document, when the merge produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_document: Option<OutputDocument>,
    /// Per-source contribution summaries.
    pub source_documents: Vec<SourceDocumentSummary>,
    /// Conflicts auto-resolved.
    pub conflicts_resolved: u32,
    /// Conflicts surfaced for review.
    pub conflicts_pending: Vec<PendingConflictView>,
    /// Section header → contributing documents.
    pub provenance_map: BTreeMap<String, Vec<DocumentId>>,
    /// Wall time spent in the handler.
    pub processing_time_ms: u64,
}

/// Input for `get_source_of_truth`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    /// The natural-language query (required).
    pub query: Option<String>,
    /// Query classification.
    #[serde(default)]
    pub query_type: QueryType,
    /// Document subset; defaults to all.
    pub scope: Option<Scope>,
    /// Whether deprecated documents may be surfaced.
    #[serde(default)]
    pub include_deprecated: bool,
    /// Minimum claim confidence for supporting claims.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Source cap, 1..20.
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    /// Whether to run claim verification.
    #[serde(default = "default_true")]
    pub verify_claims: bool,
    /// Code tree root for verification.
    pub codebase_path: Option<String>,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            query: None,
            query_type: QueryType::default(),
            scope: None,
            include_deprecated: false,
            confidence_threshold: default_confidence_threshold(),
            max_sources: default_max_sources(),
            verify_claims: true,
            codebase_path: None,
        }
    }
}

impl QueryRequest {
    /// Validates the query string and source cap.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on violations.
    pub fn validate(&self) -> Result<&str> {
        if let Some(scope) = &self.scope {
            scope.validate()?;
        }
        if !(1..=20).contains(&self.max_sources) {
            return Err(Error::InvalidInput(format!(
                "max_sources {} outside 1..20",
                self.max_sources
            )));
        }
        match self.query.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => Ok(query),
            _ => Err(Error::InvalidInput("query is required".to_string())),
        }
    }
}

/// A cited source in the query response.
#[derive(Debug, Clone, Serialize)]
pub struct SourceView {
    /// Source document.
    pub document_id: DocumentId,
    /// Its title.
    pub document_title: String,
    /// Matched section, when section-level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    /// Matched section header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_header: Option<String>,
    /// Retrieval relevance.
    pub relevance_score: f32,
    /// Sentence-bounded excerpt.
    pub excerpt: String,
    /// Owning document authority.
    pub authority_level: u8,
}

/// A supporting claim in the query response.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimView {
    /// The claim.
    pub claim_id: crate::models::ClaimId,
    /// The claim as a sentence.
    pub text: String,
    /// Extraction confidence.
    pub confidence: f32,
    /// Verification verdict, when verification ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    /// Strongest verification signal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_method: Option<String>,
}

/// A conflicting claim pair in the query response.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictView {
    /// First claim as a sentence.
    pub claim_a: String,
    /// Second claim as a sentence.
    pub claim_b: String,
    /// Conflict classification.
    pub conflict_type: crate::models::ConflictType,
}

/// Output of `get_source_of_truth`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    /// The synthesized answer.
    pub answer: String,
    /// Answer confidence; reflects fallback degradation.
    pub confidence: f32,
    /// Cited sources, citation order.
    pub sources: Vec<SourceView>,
    /// Supporting claims above the confidence threshold.
    pub supporting_claims: Vec<ClaimView>,
    /// Conflicting claim pairs among the retrieved claims.
    pub conflicting_claims: Vec<ConflictView>,
    /// Information the corpus could not provide.
    pub knowledge_gaps: Vec<String>,
    /// Identifier for this query invocation.
    pub query_id: Uuid,
    /// Wall time spent in the handler.
    pub processing_time_ms: u64,
}

/// Input for `deprecate_document`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeprecateRequest {
    /// The document to retire.
    pub document_id: DocumentId,
    /// Why it is being retired.
    pub reason: String,
    /// The replacing document, if any.
    pub superseded_by: Option<DocumentId>,
    /// Whether inbound references are rewritten.
    #[serde(default = "default_true")]
    pub migrate_references: bool,
    /// Whether the document becomes an archive.
    #[serde(default)]
    pub archive: bool,
}

impl DeprecateRequest {
    /// Validates the reason string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the reason is empty.
    pub fn validate(&self) -> Result<()> {
        if self.reason.trim().is_empty() {
            return Err(Error::InvalidInput("reason is required".to_string()));
        }
        Ok(())
    }
}

/// Post-deprecation document status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeprecationStatus {
    /// Frontmatter records the deprecation.
    Deprecated,
    /// The document's type became `archive`.
    Archived,
}

/// Migration outcome for one referencing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// References were rewritten to the superseding document.
    Migrated,
    /// Awaiting a superseding document or a migration pass.
    Pending,
    /// The referencing document needs human attention.
    ManualReviewNeeded,
}

/// One referencing document in the deprecate response.
#[derive(Debug, Clone, Serialize)]
pub struct AffectedReference {
    /// The referencing document.
    pub referencing_document_id: DocumentId,
    /// Its title.
    pub referencing_document_title: String,
    /// How many references it held.
    pub reference_count: u32,
    /// What happened to them.
    pub migration_status: MigrationStatus,
}

/// Output of `deprecate_document`.
#[derive(Debug, Clone, Serialize)]
pub struct DeprecateResponse {
    /// The retired document.
    pub document_id: DocumentId,
    /// Its title.
    pub title: String,
    /// Resulting status.
    pub status: DeprecationStatus,
    /// The replacing document, when superseded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<DocumentId>,
    /// Referencing documents and their migration outcomes.
    pub affected_references: Vec<AffectedReference>,
    /// Claims marked deprecated.
    pub claims_affected: u64,
    /// Sections owned by the document.
    pub sections_affected: u32,
    /// The deprecation provenance event id.
    pub deprecation_id: Uuid,
    /// Wall time spent in the handler.
    pub processing_time_ms: u64,
}

/// The common error shape.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Wire error code.
    pub error_code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for ErrorResponse {
    fn from(error: &Error) -> Self {
        Self {
            error_code: error.error_code().to_string(),
            message: error.to_string(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_union_rejects_zero_and_many() {
        let empty = IngestRequest {
            document_type: Some(DocumentType::Spec),
            ..IngestRequest::default()
        };
        assert!(empty.validate().is_err());

        let both = IngestRequest {
            file_path: Some("a.md".to_string()),
            content: Some("x".to_string()),
            document_type: Some(DocumentType::Spec),
            ..IngestRequest::default()
        };
        assert!(both.validate().is_err());

        let one = IngestRequest {
            content: Some("x".to_string()),
            document_type: Some(DocumentType::Spec),
            ..IngestRequest::default()
        };
        assert_eq!(one.validate().ok(), Some(DocumentType::Spec));
    }

    #[test]
    fn test_ingest_requires_document_type() {
        let request = IngestRequest {
            content: Some("x".to_string()),
            ..IngestRequest::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_ingest_defaults_from_json() {
        let request: IngestRequest =
            serde_json::from_str(r#"{"content": "x", "document_type": "spec"}"#).unwrap();
        assert_eq!(request.authority_level, 5);
        assert!(request.extract_claims);
        assert!(request.generate_embeddings);
        assert!(request.build_entity_graph);
        assert!(request.tags.is_empty());
    }

    #[test]
    fn test_scope_deserialization() {
        let all: Scope = serde_json::from_str("\"all\"").unwrap();
        assert!(all.validate().is_ok());

        let bad: Scope = serde_json::from_str("\"everything\"").unwrap();
        assert!(bad.validate().is_err());

        let patterns: Scope =
            serde_json::from_str(r#"{"path_patterns": ["docs/*"]}"#).unwrap();
        assert!(matches!(patterns, Scope::Patterns { .. }));
    }

    #[test]
    fn test_consolidate_union() {
        let none = ConsolidateRequest::default();
        assert!(none.validate().is_err());

        let cluster = ConsolidateRequest {
            cluster_id: Some(Uuid::new_v4()),
            ..ConsolidateRequest::default()
        };
        assert!(cluster.validate().is_ok());
    }

    #[test]
    fn test_query_validation() {
        let missing = QueryRequest::default();
        assert!(missing.validate().is_err());

        let too_many = QueryRequest {
            query: Some("q".to_string()),
            max_sources: 25,
            ..QueryRequest::default()
        };
        assert!(too_many.validate().is_err());

        let ok = QueryRequest {
            query: Some("How many retries?".to_string()),
            max_sources: 5,
            ..QueryRequest::default()
        };
        assert_eq!(ok.validate().ok(), Some("How many retries?"));
    }

    #[test]
    fn test_error_response_shape() {
        let response = ErrorResponse::from(&Error::NotFound("document x".to_string()));
        assert_eq!(response.error_code, "NotFound");
        assert!(response.message.contains("document x"));
    }
}
