//! Repository traits for the persistence layer.
//!
//! The pipeline consumes storage exclusively through these traits; the
//! bundled implementation is [`crate::storage::SqliteStore`]. Backends
//! enforce the store-boundary invariants: referential integrity across
//! owning entities, fixed embedding width, and idempotent claim and
//! conflict writes.

use crate::Result;
use crate::models::{
    AtomicClaim, ClaimId, Conflict, ConsolidationRecord, Document, DocumentId, DocumentType,
    Entity, EntityId, EntityLink, OverlapCluster, ProvenanceEvent, Section, SectionId,
    Supersession,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A partial update to a document.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    /// New document type.
    pub document_type: Option<DocumentType>,
    /// New title.
    pub title: Option<String>,
    /// New authority level.
    pub authority_level: Option<u8>,
    /// Replacement raw content.
    pub raw_content: Option<String>,
    /// Replacement frontmatter mapping.
    pub frontmatter: Option<std::collections::BTreeMap<String, serde_json::Value>>,
    /// Explicit update timestamp; defaults to now.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A section matched by semantic search.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    /// Matched section.
    pub section_id: SectionId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Section header.
    pub header: String,
    /// Section content.
    pub content: String,
    /// Similarity in `[0, 1]`.
    pub similarity: f32,
}

/// Typed repository over documents.
pub trait DocumentStore: Send + Sync {
    /// Persists a new document.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the embedding width is wrong.
    fn create_document(&self, document: &Document) -> Result<()>;

    /// Retrieves a document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] when the document does not exist.
    fn update_document(&self, id: DocumentId, patch: &DocumentPatch) -> Result<()>;

    /// Lists all documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn list_documents(&self) -> Result<Vec<Document>>;

    /// Finds documents whose `source_path` matches a glob or substring
    /// pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn find_by_path_pattern(&self, pattern: &str) -> Result<Vec<Document>>;

    /// Finds the document with this exact `source_path`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn find_by_source_path(&self, source_path: &str) -> Result<Option<Document>>;

    /// Stores the whole-document embedding.
    ///
    /// # Errors
    ///
    /// Returns an error on width mismatch or write failure.
    fn update_document_embedding(&self, id: DocumentId, embedding: &[f32]) -> Result<()>;

    /// Returns up to `k` documents ranked by similarity to the query
    /// vector, excluding `exclude` and quarantined documents.
    ///
    /// Similarity is cosine clamped non-negative; ties break on higher
    /// authority then newer creation.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn find_similar_documents(
        &self,
        query: &[f32],
        k: usize,
        exclude: Option<DocumentId>,
    ) -> Result<Vec<(Document, f32)>>;

    /// Marks a partially-ingested document as quarantined.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn mark_quarantined(&self, id: DocumentId) -> Result<()>;

    /// Lists quarantined documents for operator cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn quarantined_documents(&self) -> Result<Vec<Document>>;
}

/// Typed repository over sections.
pub trait SectionStore: Send + Sync {
    /// Persists sections for a document.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate `(document_id, section_order)` or
    /// write failure.
    fn create_sections(&self, sections: &[Section]) -> Result<()>;

    /// Removes all sections of a document (re-ingest path).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete_sections_for_document(&self, id: DocumentId) -> Result<()>;

    /// Lists a document's sections in `section_order`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn sections_by_document(&self, id: DocumentId) -> Result<Vec<Section>>;

    /// Retrieves a section by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_section(&self, id: SectionId) -> Result<Option<Section>>;

    /// Stores a section embedding.
    ///
    /// # Errors
    ///
    /// Returns an error on width mismatch or write failure.
    fn update_section_embedding(&self, id: SectionId, embedding: &[f32]) -> Result<()>;

    /// Returns up to `k` sections ranked by similarity to the query
    /// vector. When `scope` is given only sections of those documents
    /// are considered.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn semantic_search(
        &self,
        query: &[f32],
        k: usize,
        scope: Option<&[DocumentId]>,
    ) -> Result<Vec<SemanticHit>>;

    /// Rewrites occurrences of `from` to `to` inside a document's
    /// section contents (reference migration).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn rewrite_section_references(&self, id: DocumentId, from: &str, to: &str) -> Result<()>;
}

/// Typed repository over atomic claims.
pub trait ClaimStore: Send + Sync {
    /// Inserts or replaces a claim; idempotent on `id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the claim's section does not belong to its
    /// document, or the write fails.
    fn upsert_claim(&self, claim: &AtomicClaim) -> Result<()>;

    /// Removes all claims of a document (re-ingest path).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete_claims_for_document(&self, id: DocumentId) -> Result<()>;

    /// Retrieves a claim by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_claim(&self, id: ClaimId) -> Result<Option<AtomicClaim>>;

    /// Lists a document's claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn claims_by_document(&self, id: DocumentId) -> Result<Vec<AtomicClaim>>;

    /// Lists a section's claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn claims_by_section(&self, id: SectionId) -> Result<Vec<AtomicClaim>>;

    /// Lists claims whose subject matches case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn claims_by_subject(&self, subject: &str) -> Result<Vec<AtomicClaim>>;

    /// Lists all claims across the given documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn claims_for_documents(&self, ids: &[DocumentId]) -> Result<Vec<AtomicClaim>>;

    /// Counts claims outside `exclude` sharing any of the normalized
    /// subjects.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn count_claims_matching_subjects(
        &self,
        normalized_subjects: &[String],
        exclude: DocumentId,
    ) -> Result<u64>;

    /// Marks all claims of a document deprecated.
    ///
    /// Returns the number of claims affected.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn deprecate_claims_for_document(
        &self,
        id: DocumentId,
        at: DateTime<Utc>,
    ) -> Result<u64>;
}

/// Typed repository over conflicts.
pub trait ConflictStore: Send + Sync {
    /// Inserts a conflict; idempotent on `id` and on the claim pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_conflict(&self, conflict: &Conflict) -> Result<()>;

    /// Finds the stored conflict for a claim pair, in either order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn find_by_claim_ids(&self, a: ClaimId, b: ClaimId) -> Result<Option<Conflict>>;

    /// Lists conflicts touching any of the given claims. Conflicts with
    /// a deprecated endpoint are filtered out.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn conflicts_for_claims(&self, claim_ids: &[ClaimId]) -> Result<Vec<Conflict>>;
}

/// Typed repository over the entity co-occurrence graph.
pub trait GraphStore: Send + Sync {
    /// Inserts or replaces an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_entity(&self, entity: &Entity) -> Result<()>;

    /// Finds an entity whose canonical form or alias normalizes to the
    /// given term.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn find_entity(&self, normalized: &str) -> Result<Option<Entity>>;

    /// Attaches an alias to an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn add_entity_alias(&self, id: EntityId, alias: &str) -> Result<()>;

    /// Lists all entities (for embedding nearest-neighbor scans).
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn all_entities(&self) -> Result<Vec<Entity>>;

    /// Records a claim→entity co-occurrence edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn link_claim_to_entity(&self, link: &EntityLink) -> Result<()>;

    /// Lists entities co-occurring with the given entity through shared
    /// claims or documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn entity_neighbors(&self, id: EntityId) -> Result<Vec<Entity>>;
}

/// Typed repository over supersessions, consolidations, clusters,
/// provenance events, and tags.
pub trait RecordStore: Send + Sync {
    /// Records a supersession; rejects edges that would close a cycle.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Conflict`] on a cyclic supersession.
    fn create_supersession(&self, supersession: &Supersession) -> Result<()>;

    /// Lists all supersessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn supersessions(&self) -> Result<Vec<Supersession>>;

    /// Lists supersessions touching a document (either side).
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn supersessions_for_document(&self, id: DocumentId) -> Result<Vec<Supersession>>;

    /// Records a consolidation.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn create_consolidation(&self, record: &ConsolidationRecord) -> Result<()>;

    /// Finds consolidations that referenced a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn consolidations_by_cluster(&self, cluster_id: Uuid) -> Result<Vec<ConsolidationRecord>>;

    /// Persists an overlap cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn create_cluster(&self, cluster: &OverlapCluster) -> Result<()>;

    /// Retrieves a cluster by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_cluster(&self, id: Uuid) -> Result<Option<OverlapCluster>>;

    /// Appends a provenance event.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn record_event(&self, event: &ProvenanceEvent) -> Result<()>;

    /// Lists a document's provenance events, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn events_for_document(&self, id: DocumentId) -> Result<Vec<ProvenanceEvent>>;

    /// Replaces a document's tag set.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set_tags(&self, id: DocumentId, tags: &[String]) -> Result<()>;

    /// Lists documents carrying a tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn documents_by_tag(&self, tag: &str) -> Result<Vec<DocumentId>>;
}

/// Umbrella trait: everything the pipeline needs from a backend.
pub trait Store:
    DocumentStore + SectionStore + ClaimStore + ConflictStore + GraphStore + RecordStore
{
}

impl<T> Store for T where
    T: DocumentStore + SectionStore + ClaimStore + ConflictStore + GraphStore + RecordStore
{
}
