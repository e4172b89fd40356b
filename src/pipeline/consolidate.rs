//! The `consolidate_documents` handler.

use super::types::{
    ConflictOption, ConsolidateRequest, ConsolidateResponse, IngestRequest, OutputDocument,
    PendingConflictView, SourceDocumentSummary,
};
use super::Pipeline;
use crate::models::{
    AtomicClaim, ConsolidationRecord, ConsolidationStatus, Document, DocumentId, ProvenanceEvent,
    ProvenanceEventType, Section,
};
use crate::services::merge::{MergeEngine, MergeInput, PendingConflict};
use crate::storage::{DocumentPatch, Store};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use uuid::Uuid;

impl<S: Store> Pipeline<S> {
    /// Merges a set of documents into one authoritative artifact.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for malformed requests or fewer than two
    /// sources, `NotFound` for missing documents or clusters, and store
    /// errors unchanged.
    pub fn consolidate_documents(
        &self,
        request: &ConsolidateRequest,
    ) -> Result<ConsolidateResponse> {
        let started = Instant::now();
        request.validate()?;

        let (sources, cluster_id) = self.resolve_targets(request)?;
        if sources.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "consolidation needs at least two documents, got {}",
                sources.len()
            )));
        }

        let mut sections: HashMap<DocumentId, Vec<Section>> = HashMap::new();
        for source in &sources {
            sections.insert(source.id, self.store().sections_by_document(source.id)?);
        }
        let source_ids: Vec<DocumentId> = sources.iter().map(|d| d.id).collect();
        let claims = self.store().claims_for_documents(&source_ids)?;

        let conflicts = self.detector().detect(&claims);
        for conflict in &conflicts {
            self.store().upsert_conflict(conflict)?;
        }

        let outcome = MergeEngine::merge(&MergeInput {
            sources: &sources,
            sections: &sections,
            claims: &claims,
            conflicts: &conflicts,
            strategy: request.strategy,
            authority_order: request.authority_order.as_deref(),
            conflict_confidence_threshold: request.conflict_threshold,
            auto_resolve_below: request.auto_resolve_below,
            require_human_above: request.require_human_above,
            output_format: request.output_format,
            include_provenance: request.include_provenance,
        })?;

        let consolidation_id = Uuid::new_v4();
        let status = if outcome.sections.is_empty() {
            ConsolidationStatus::Failed
        } else if outcome.pending.is_empty() {
            ConsolidationStatus::Completed
        } else {
            ConsolidationStatus::PendingReview
        };

        let result_document_id = if request.dry_run || outcome.sections.is_empty() {
            None
        } else {
            Some(self.persist_result(request, &sources, &outcome, consolidation_id, cluster_id)?)
        };

        self.store().create_consolidation(&ConsolidationRecord {
            id: consolidation_id,
            source_document_ids: source_ids.clone(),
            result_document_id,
            strategy: request.strategy,
            conflicts_resolved: u32::try_from(outcome.resolved.len()).unwrap_or(u32::MAX),
            conflicts_pending: u32::try_from(outcome.pending.len()).unwrap_or(u32::MAX),
            cluster_id,
            created_at: Utc::now(),
        })?;

        if let Some(result_id) = result_document_id {
            for source in &sources {
                self.store().record_event(&ProvenanceEvent::new(
                    source.id,
                    ProvenanceEventType::Consolidation,
                    serde_json::json!({
                        "consolidation_id": consolidation_id.to_string(),
                        "result_document_id": result_id.to_string(),
                    }),
                ))?;
            }
        }

        let source_documents = sources
            .iter()
            .map(|source| SourceDocumentSummary {
                document_id: source.id,
                title: source.title.clone(),
                sections_used: outcome.sections_used.get(&source.id).copied().unwrap_or(0),
                claims_included: outcome
                    .claims_included
                    .get(&source.id)
                    .copied()
                    .unwrap_or(0),
            })
            .collect();

        let conflicts_pending = pending_views(&outcome.pending, &claims);
        let provenance_map: BTreeMap<String, Vec<DocumentId>> = outcome.provenance_map.clone();

        Ok(ConsolidateResponse {
            consolidation_id,
            status,
            output_document: (!outcome.sections.is_empty()).then(|| OutputDocument {
                document_id: result_document_id,
                title: outcome.title.clone(),
                content: outcome.content.clone(),
                format: outcome.format,
            }),
            source_documents,
            conflicts_resolved: u32::try_from(outcome.resolved.len()).unwrap_or(u32::MAX),
            conflicts_pending,
            provenance_map,
            processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Resolves the one-of target union to source documents.
    fn resolve_targets(
        &self,
        request: &ConsolidateRequest,
    ) -> Result<(Vec<Document>, Option<Uuid>)> {
        if let Some(ids) = &request.document_ids {
            let mut sources = Vec::with_capacity(ids.len());
            for &id in ids {
                let document = self.require_document(id)?;
                if document.document_type != crate::models::DocumentType::Quarantined {
                    sources.push(document);
                }
            }
            return Ok((sources, None));
        }
        if let Some(cluster_id) = request.cluster_id {
            let cluster = self
                .store()
                .get_cluster(cluster_id)?
                .ok_or_else(|| Error::NotFound(format!("cluster {cluster_id}")))?;
            let mut sources = Vec::with_capacity(cluster.document_ids.len());
            for &id in &cluster.document_ids {
                let document = self.require_document(id)?;
                if document.is_queryable(false) {
                    sources.push(document);
                }
            }
            return Ok((sources, Some(cluster_id)));
        }
        Ok((self.resolve_scope(request.scope.as_ref(), false)?, None))
    }

    /// Persists the merged output as a new document through the normal
    /// ingest path, then stamps its consolidation metadata.
    fn persist_result(
        &self,
        request: &ConsolidateRequest,
        sources: &[Document],
        outcome: &crate::services::MergeOutcome,
        consolidation_id: Uuid,
        cluster_id: Option<Uuid>,
    ) -> Result<DocumentId> {
        let primary_type = sources
            .iter()
            .max_by_key(|d| d.authority_level)
            .map_or(crate::models::DocumentType::Report, |d| d.document_type);
        let authority = sources
            .iter()
            .map(|d| d.authority_level)
            .max()
            .unwrap_or(5);

        let ingest = self.ingest_document(&IngestRequest {
            content: Some(outcome.content.clone()),
            format: Some(outcome.format),
            document_type: Some(primary_type),
            authority_level: authority,
            tags: vec!["consolidated".to_string()],
            ..IngestRequest::default()
        })?;

        let mut frontmatter = BTreeMap::new();
        frontmatter.insert(
            "consolidated_from".to_string(),
            serde_json::json!(
                sources.iter().map(|d| d.id.to_string()).collect::<Vec<_>>()
            ),
        );
        frontmatter.insert(
            "consolidation_id".to_string(),
            serde_json::json!(consolidation_id.to_string()),
        );
        frontmatter.insert(
            "strategy".to_string(),
            serde_json::json!(request.strategy.as_str()),
        );
        if let Some(cluster_id) = cluster_id {
            frontmatter.insert(
                "cluster_id".to_string(),
                serde_json::json!(cluster_id.to_string()),
            );
        }

        self.store().update_document(
            ingest.document_id,
            &DocumentPatch {
                title: Some(outcome.title.clone()),
                frontmatter: Some(frontmatter),
                ..DocumentPatch::default()
            },
        )?;

        self.store().record_event(&ProvenanceEvent::new(
            ingest.document_id,
            ProvenanceEventType::Consolidation,
            serde_json::json!({
                "consolidation_id": consolidation_id.to_string(),
                "sources": sources.iter().map(|d| d.id.to_string()).collect::<Vec<_>>(),
            }),
        ))?;

        Ok(ingest.document_id)
    }
}

/// Builds the review views for pending conflicts.
fn pending_views(pending: &[PendingConflict], claims: &[AtomicClaim]) -> Vec<PendingConflictView> {
    let by_id: HashMap<_, _> = claims.iter().map(|c| (c.id, c)).collect();
    pending
        .iter()
        .map(|p| {
            let mut options = Vec::new();
            let mut sentences = Vec::new();
            for claim_id in [p.conflict.claim_a, p.conflict.claim_b] {
                if let Some(claim) = by_id.get(&claim_id) {
                    sentences.push(format!("\"{}\"", claim.as_sentence()));
                    options.push(ConflictOption {
                        source_document: claim.document_id,
                        claim: claim.as_sentence(),
                        confidence: claim.confidence,
                    });
                }
            }
            let description = format!(
                "{} ({}, strength {:.2})",
                sentences.join(" vs "),
                p.conflict.conflict_type,
                p.conflict.strength
            );
            PendingConflictView {
                conflict_id: p.conflict.id,
                description,
                options,
            }
        })
        .collect()
}
