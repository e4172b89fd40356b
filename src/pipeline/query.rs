//! The `get_source_of_truth` handler.

use super::types::{ClaimView, ConflictView, QueryRequest, QueryResponse, SourceView};
use super::Pipeline;
use crate::models::{AtomicClaim, Document, DocumentId};
use crate::services::{AnswerSynthesizer, ClaimVerifier, ScoredSource, truncate_excerpt};
use crate::storage::Store;
use crate::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

impl<S: Store> Pipeline<S> {
    /// Retrieves, ranks, verifies, and synthesizes an answer from the
    /// corpus with supporting and conflicting claims.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for malformed requests and store errors
    /// unchanged. Embedding and LLM failures degrade: the response's
    /// `knowledge_gaps` and `confidence` reflect the degradation.
    pub fn get_source_of_truth(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let query = request.validate()?;

        let scope_documents = self.resolve_scope(request.scope.as_ref(), request.include_deprecated)?;
        let doc_by_id: HashMap<DocumentId, &Document> =
            scope_documents.iter().map(|d| (d.id, d)).collect();
        let scope_ids: Vec<DocumentId> = scope_documents.iter().map(|d| d.id).collect();

        let mut knowledge_gaps = Vec::new();
        let hits = match self.embedder().embed(query) {
            Ok(query_embedding) => {
                // The scope filter always applies: it carries both the
                // caller's selection and the deprecation filtering.
                self.store()
                    .semantic_search(&query_embedding, request.max_sources, Some(&scope_ids))?
            },
            Err(err) => {
                tracing::debug!("query embedding unavailable: {err}");
                knowledge_gaps.push("semantic retrieval was unavailable for this query".to_string());
                Vec::new()
            },
        };

        let mut sources = Vec::with_capacity(hits.len());
        let mut scored = Vec::with_capacity(hits.len());
        let mut claims: Vec<AtomicClaim> = Vec::new();
        for hit in &hits {
            let Some(document) = doc_by_id.get(&hit.document_id) else {
                continue;
            };
            let excerpt = truncate_excerpt(&hit.content);
            sources.push(SourceView {
                document_id: hit.document_id,
                document_title: document.title.clone(),
                section_id: Some(hit.section_id),
                section_header: (!hit.header.is_empty()).then(|| hit.header.clone()),
                relevance_score: hit.similarity,
                excerpt: excerpt.clone(),
                authority_level: document.authority_level,
            });
            scored.push(ScoredSource {
                document_id: hit.document_id,
                document_title: document.title.clone(),
                section_id: Some(hit.section_id),
                section_header: (!hit.header.is_empty()).then(|| hit.header.clone()),
                excerpt,
                relevance: hit.similarity,
                authority_level: document.authority_level,
            });

            for claim in self.store().claims_by_section(hit.section_id)? {
                if claim.deprecated && !request.include_deprecated {
                    continue;
                }
                claims.push(claim);
            }
        }

        let supporting: Vec<AtomicClaim> = claims
            .iter()
            .filter(|c| c.confidence >= request.confidence_threshold)
            .cloned()
            .collect();

        let verifications = if request.verify_claims && !supporting.is_empty() {
            let verifier = ClaimVerifier::new(self.llm());
            let root = request.codebase_path.as_ref().map(PathBuf::from);
            Some(verifier.verify(&supporting, root.as_deref()))
        } else {
            None
        };

        let supporting_claims: Vec<ClaimView> = supporting
            .iter()
            .enumerate()
            .map(|(i, claim)| {
                let verification = verifications.as_ref().map(|v| &v[i]);
                ClaimView {
                    claim_id: claim.id,
                    text: claim.as_sentence(),
                    confidence: claim.confidence,
                    verified: verification.map(|v| v.verified),
                    verification_method: verification.map(|v| v.method.clone()),
                }
            })
            .collect();

        let conflicting_claims = self.conflicting_views(&claims)?;
        let related_entities = self.related_entities(&supporting)?;

        let synthesizer = AnswerSynthesizer::new(self.llm());
        let answer = synthesizer.synthesize(
            query,
            request.query_type,
            &scored,
            &supporting,
            &related_entities,
        );
        knowledge_gaps.extend(answer.knowledge_gaps);

        Ok(QueryResponse {
            answer: answer.answer,
            confidence: answer.confidence,
            sources,
            supporting_claims,
            conflicting_claims,
            knowledge_gaps,
            query_id: Uuid::new_v4(),
            processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Co-occurrence-graph neighbors of the supporting claims' subjects,
    /// as extra synthesis context. Empty when the graph is disabled.
    fn related_entities(&self, supporting: &[AtomicClaim]) -> Result<Vec<String>> {
        if !self.config().entity_graph_enabled {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut subjects: Vec<String> = supporting
            .iter()
            .map(AtomicClaim::normalized_subject)
            .collect();
        subjects.sort();
        subjects.dedup();
        for subject in subjects {
            let Some(entity) = self.store().find_entity(&subject)? else {
                continue;
            };
            for neighbor in self.store().entity_neighbors(entity.canonical_id)? {
                if !names.contains(&neighbor.name) {
                    names.push(neighbor.name);
                }
            }
        }
        names.truncate(16);
        Ok(names)
    }

    /// Stored conflicts among the retrieved claims, as sentence pairs.
    fn conflicting_views(&self, claims: &[AtomicClaim]) -> Result<Vec<ConflictView>> {
        let claim_ids: Vec<_> = claims.iter().map(|c| c.id).collect();
        let conflicts = self.store().conflicts_for_claims(&claim_ids)?;
        let mut views = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            if conflict.conflict_type == crate::models::ConflictType::Agreement {
                continue;
            }
            let sentence = |id| -> Result<Option<String>> {
                Ok(self.store().get_claim(id)?.map(|c| c.as_sentence()))
            };
            let (Some(claim_a), Some(claim_b)) =
                (sentence(conflict.claim_a)?, sentence(conflict.claim_b)?)
            else {
                continue;
            };
            views.push(ConflictView {
                claim_a,
                claim_b,
                conflict_type: conflict.conflict_type,
            });
        }
        Ok(views)
    }
}
