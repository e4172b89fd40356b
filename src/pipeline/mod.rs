//! The pipeline orchestrator: the five tool handlers.
//!
//! Each handler is linear and stateless; everything durable lives in
//! the store, and all mutable counters are per-call locals. Transient
//! embedding/LLM failures degrade to rule-based fallbacks inside the
//! services; store failures propagate to the caller unchanged.

mod consolidate;
mod deprecate;
mod ingest;
mod overlaps;
mod query;
pub mod types;

pub use types::{
    AffectedReference, ClaimView, ClusterSummary, ConflictOption, ConflictView,
    ConsolidateRequest, ConsolidateResponse, DeprecateRequest, DeprecateResponse,
    DeprecationStatus, ErrorResponse, FindOverlapsRequest, FindOverlapsResponse, IngestRequest,
    IngestResponse, MigrationStatus, OutputDocument, PairwiseSimilarity, PendingConflictView,
    QueryRequest, QueryResponse, Scope, SimilarDocument, SourceDocumentSummary, SourceView,
};

use crate::config::DoctrineConfig;
use crate::embedding::{Embedder, TrigramEmbedder};
use crate::llm::LlmProvider;
use crate::models::{Document, DocumentId};
use crate::storage::{SqliteStore, Store};
use crate::services::ConflictDetector;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// The consolidation pipeline.
///
/// Generic over the store so tests can substitute backends; the
/// embedder and LLM are constructor dependencies so tests can swap in
/// deterministic stubs.
pub struct Pipeline<S: Store = SqliteStore> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
    llm: Option<Arc<dyn LlmProvider>>,
    config: DoctrineConfig,
}

impl<S: Store> Pipeline<S> {
    /// Creates a pipeline from its parts.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        embedder: Arc<dyn Embedder>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: DoctrineConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            config,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &DoctrineConfig {
        &self.config
    }

    /// Builds a conflict detector wired to this pipeline's capabilities.
    pub(crate) fn detector(&self) -> ConflictDetector {
        ConflictDetector::new(
            Arc::clone(&self.embedder),
            self.llm.clone(),
            self.config.thresholds.value_conflict,
        )
    }

    pub(crate) fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub(crate) fn llm(&self) -> Option<Arc<dyn LlmProvider>> {
        self.llm.clone()
    }

    /// Loads the document a handler requires, or fails with `NotFound`.
    pub(crate) fn require_document(&self, id: DocumentId) -> Result<Document> {
        self.store
            .get_document(id)?
            .ok_or_else(|| Error::NotFound(format!("document {id}")))
    }

    /// Resolves a scope selector to concrete documents.
    ///
    /// Quarantined documents are never included; deprecated documents
    /// only when `include_deprecated` is set. Explicitly-listed ids must
    /// exist.
    pub(crate) fn resolve_scope(
        &self,
        scope: Option<&Scope>,
        include_deprecated: bool,
    ) -> Result<Vec<Document>> {
        let documents = match scope {
            None | Some(Scope::Keyword(_)) => self.store.list_documents()?,
            Some(Scope::Ids { document_ids }) => {
                let mut documents = Vec::with_capacity(document_ids.len());
                for &id in document_ids {
                    documents.push(self.require_document(id)?);
                }
                documents
            },
            Some(Scope::Patterns { path_patterns }) => {
                let mut seen = HashSet::new();
                let mut documents = Vec::new();
                for pattern in path_patterns {
                    for document in self.store.find_by_path_pattern(pattern)? {
                        if seen.insert(document.id) {
                            documents.push(document);
                        }
                    }
                }
                documents
            },
        };
        Ok(documents
            .into_iter()
            .filter(|d| d.is_queryable(include_deprecated))
            .collect())
    }
}

impl Pipeline<SqliteStore> {
    /// Builds a pipeline from configuration: SQLite store at the
    /// configured path, the configured embedder, and the configured LLM
    /// provider (if any).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn from_config(config: &DoctrineConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(
            config.storage.resolved_db_path(),
            config.embedding.dimensions,
        )?);
        let embedder = build_embedder(config)?;
        let llm = crate::llm::provider_from_config(config);
        Ok(Self::new(store, embedder, llm, config.clone()))
    }
}

fn build_embedder(config: &DoctrineConfig) -> Result<Arc<dyn Embedder>> {
    match config.embedding.provider.as_str() {
        #[cfg(feature = "fastembed-embeddings")]
        "fastembed" => Ok(Arc::new(crate::embedding::FastEmbedEmbedder::new()?)),
        #[cfg(not(feature = "fastembed-embeddings"))]
        "fastembed" => {
            tracing::warn!(
                "fastembed provider requested without the fastembed-embeddings feature; \
                 using the trigram embedder"
            );
            Ok(Arc::new(TrigramEmbedder::new(config.embedding.dimensions)))
        },
        _ => Ok(Arc::new(TrigramEmbedder::new(config.embedding.dimensions))),
    }
}
