//! The `ingest_document` handler.

use super::types::{IngestRequest, IngestResponse, SimilarDocument};
use super::Pipeline;
use crate::models::{
    AtomicClaim, ClaimId, Document, DocumentId, ProvenanceEvent, ProvenanceEventType, Section,
    SectionId, Supersession, normalize_term,
};
use crate::parser;
use crate::services::{ClaimExtractor, EntityResolver};
use crate::storage::{DocumentPatch, Store};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;

impl<S: Store> Pipeline<S> {
    /// Ingests a document: parse, section, extract claims, embed,
    /// resolve entities, record supersessions, and persist.
    ///
    /// Ingestion is atomic at the document level: if any artifact write
    /// fails after the document row lands, the document is marked
    /// quarantined so no query ever surfaces it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for malformed requests or content,
    /// `NotFound` for missing superseded documents, `Conflict` for
    /// cyclic supersessions, and store errors unchanged.
    pub fn ingest_document(&self, request: &IngestRequest) -> Result<IngestResponse> {
        let started = Instant::now();
        let document_type = request.validate()?;

        let (raw, path_hint) = self.fetch_source(request)?;
        let format = request
            .format
            .unwrap_or_else(|| parser::sniff_format(path_hint.as_deref(), &raw));
        let parsed = parser::parse(&raw, format, path_hint.as_deref())?;
        let source_path = path_hint
            .clone()
            .unwrap_or_else(|| format!("inline:{}", parsed.content_hash));

        let existing = self.store().find_by_source_path(&source_path)?;
        let now = Utc::now();

        // Unchanged body under a known path: refresh metadata only.
        if let Some(existing) = &existing {
            if existing.content_hash == parsed.content_hash {
                return self.refresh_unchanged(existing, request, document_type, started);
            }
        }

        let document_id = existing.as_ref().map_or_else(DocumentId::new, |d| d.id);
        let created_at = existing.as_ref().map_or(now, |d| d.created_at);

        let document = Document {
            id: document_id,
            source_path: source_path.clone(),
            content_hash: parsed.content_hash.clone(),
            format,
            document_type,
            title: parsed.title.clone(),
            authority_level: request.authority_level,
            raw_content: raw,
            frontmatter: parsed.frontmatter.clone(),
            embedding: None,
            created_at,
            updated_at: now,
            tags: request.tags.clone(),
        };

        if existing.is_some() {
            // Re-ingest: replace the row's content and artifacts under
            // the same identity.
            self.store().delete_claims_for_document(document_id)?;
            self.store().delete_sections_for_document(document_id)?;
            self.store().update_document(
                document_id,
                &DocumentPatch {
                    document_type: Some(document_type),
                    title: Some(document.title.clone()),
                    authority_level: Some(request.authority_level),
                    raw_content: Some(document.raw_content.clone()),
                    frontmatter: Some(document.frontmatter.clone()),
                    updated_at: Some(now),
                },
            )?;
            self.store().set_tags(document_id, &request.tags)?;
        } else {
            self.store().create_document(&document)?;
        }

        // From here on the document row exists; any failure quarantines
        // it rather than leaving a half-ingested artifact visible.
        match self.ingest_artifacts(&document, &parsed, request) {
            Ok(mut response) => {
                response.processing_time_ms =
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                Ok(response)
            },
            Err(err) => {
                tracing::warn!(document = %document_id, "ingest failed, quarantining: {err}");
                self.store().mark_quarantined(document_id)?;
                Err(err)
            },
        }
    }

    /// Resolves the one-of source union to raw content and a path hint.
    fn fetch_source(&self, request: &IngestRequest) -> Result<(String, Option<String>)> {
        if let Some(path) = &request.file_path {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                Error::InvalidInput(format!("cannot read file {path}: {e}"))
            })?;
            return Ok((raw, Some(path.clone())));
        }
        if let Some(url) = &request.url {
            let raw = reqwest::blocking::get(url)
                .and_then(reqwest::blocking::Response::error_for_status)
                .and_then(reqwest::blocking::Response::text)
                .map_err(|e| Error::DependencyUnavailable {
                    dependency: "fetch".to_string(),
                    cause: format!("{url}: {e}"),
                })?;
            return Ok((raw, Some(url.clone())));
        }
        if let Some(content) = &request.content {
            return Ok((content.clone(), None));
        }
        Err(Error::InvalidInput(
            "exactly one of file_path, content, url is required".to_string(),
        ))
    }

    /// Short-circuit for an unchanged body: metadata refresh, counts
    /// from the store.
    fn refresh_unchanged(
        &self,
        existing: &Document,
        request: &IngestRequest,
        document_type: crate::models::DocumentType,
        started: Instant,
    ) -> Result<IngestResponse> {
        self.store().update_document(
            existing.id,
            &DocumentPatch {
                document_type: Some(document_type),
                authority_level: Some(request.authority_level),
                updated_at: Some(Utc::now()),
                ..DocumentPatch::default()
            },
        )?;
        if !request.tags.is_empty() {
            self.store().set_tags(existing.id, &request.tags)?;
        }
        self.record_supersessions(existing.id, request)?;

        let sections = self.store().sections_by_document(existing.id)?;
        let claims = self.store().claims_by_document(existing.id)?;
        let subjects: Vec<String> = claims
            .iter()
            .map(AtomicClaim::normalized_subject)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let potential_conflicts = self
            .store()
            .count_claims_matching_subjects(&subjects, existing.id)?;
        let similar_documents = match &existing.embedding {
            Some(embedding) => self.similar_documents(existing.id, embedding)?,
            None => Vec::new(),
        };

        Ok(IngestResponse {
            document_id: existing.id,
            title: existing.title.clone(),
            sections_extracted: u32::try_from(sections.len()).unwrap_or(u32::MAX),
            claims_extracted: u32::try_from(claims.len()).unwrap_or(u32::MAX),
            entities_identified: 0,
            embeddings_generated: 0,
            similar_documents,
            potential_conflicts,
            processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Writes sections, embeddings, claims, entity edges, supersessions,
    /// and the ingestion event.
    fn ingest_artifacts(
        &self,
        document: &Document,
        parsed: &parser::ParsedDocument,
        request: &IngestRequest,
    ) -> Result<IngestResponse> {
        let sections: Vec<Section> = parsed
            .sections
            .iter()
            .enumerate()
            .map(|(order, section)| Section {
                id: SectionId::new(),
                document_id: document.id,
                header: section.header.clone(),
                content: section.content.clone(),
                level: section.level,
                section_order: u32::try_from(order).unwrap_or(u32::MAX),
                start_line: section.start_line,
                end_line: section.end_line,
                embedding: None,
            })
            .collect();
        self.store().create_sections(&sections)?;

        let mut embeddings_generated = 0_u32;
        let mut document_embedding: Option<Vec<f32>> = None;
        if request.generate_embeddings {
            embeddings_generated = self.embed_sections(&sections)?;
            match self.embedder().embed(bounded(&parsed.body)) {
                Ok(embedding) => {
                    self.store()
                        .update_document_embedding(document.id, &embedding)?;
                    embeddings_generated += 1;
                    document_embedding = Some(embedding);
                },
                Err(err) => {
                    tracing::debug!("document embedding skipped: {err}");
                },
            }
        }

        let mut claims: Vec<AtomicClaim> = Vec::new();
        if request.extract_claims {
            let extractor = ClaimExtractor::new(self.llm());
            for section in &sections {
                let content = parser::strip_html_comments(&section.content);
                let text = if section.header.is_empty() {
                    content
                } else {
                    format!("{}\n{}", section.header, content)
                };
                for draft in extractor.extract(&text).claims {
                    let claim = AtomicClaim {
                        id: ClaimId::new(),
                        document_id: document.id,
                        section_id: section.id,
                        subject: draft.subject,
                        predicate: draft.predicate,
                        object: draft.object,
                        original_text: draft.original_text,
                        paraphrased: draft.paraphrased,
                        confidence: draft.confidence,
                        deprecated: false,
                        deprecated_at: None,
                        created_at: Utc::now(),
                    };
                    self.store().upsert_claim(&claim)?;
                    claims.push(claim);
                }
            }
        }

        let mut entities_identified = 0_u32;
        if request.build_entity_graph && self.config().entity_graph_enabled {
            entities_identified = self.link_entities(&claims)?;
        }

        self.record_supersessions(document.id, request)?;

        let subjects: Vec<String> = claims
            .iter()
            .map(AtomicClaim::normalized_subject)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let potential_conflicts = self
            .store()
            .count_claims_matching_subjects(&subjects, document.id)?;

        let similar_documents = match &document_embedding {
            Some(embedding) => self.similar_documents(document.id, embedding)?,
            None => Vec::new(),
        };

        self.store().record_event(&ProvenanceEvent::new(
            document.id,
            ProvenanceEventType::Ingestion,
            serde_json::json!({
                "source_path": document.source_path,
                "content_hash": document.content_hash,
                "sections": sections.len(),
                "claims": claims.len(),
            }),
        ))?;

        Ok(IngestResponse {
            document_id: document.id,
            title: document.title.clone(),
            sections_extracted: u32::try_from(sections.len()).unwrap_or(u32::MAX),
            claims_extracted: u32::try_from(claims.len()).unwrap_or(u32::MAX),
            entities_identified,
            embeddings_generated,
            similar_documents,
            potential_conflicts,
            processing_time_ms: 0,
        })
    }

    /// Embeds sections in configured batches; a failed batch degrades
    /// silently to unembedded sections.
    fn embed_sections(&self, sections: &[Section]) -> Result<u32> {
        let batch_size = self.config().embedding.batch_size.max(1);
        let mut generated = 0_u32;
        for chunk in sections.chunks(batch_size) {
            let texts: Vec<String> = chunk
                .iter()
                .map(|s| {
                    let content = parser::strip_html_comments(&s.content);
                    if s.header.is_empty() {
                        content
                    } else {
                        format!("{}\n{}", s.header, content)
                    }
                })
                .collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            match self.embedder().embed_batch(&refs) {
                Ok(embeddings) => {
                    for (section, embedding) in chunk.iter().zip(embeddings) {
                        self.store()
                            .update_section_embedding(section.id, &embedding)?;
                        generated += 1;
                    }
                },
                Err(err) => {
                    tracing::debug!("section embedding batch skipped: {err}");
                },
            }
        }
        Ok(generated)
    }

    /// Resolves claim subjects and objects to entities and records
    /// co-occurrence edges. Returns the number of distinct entities.
    fn link_entities(&self, claims: &[AtomicClaim]) -> Result<u32> {
        let resolver = EntityResolver::new(
            self.store().as_ref(),
            self.embedder(),
            self.config().thresholds.entity_alias,
        );
        let mut distinct = HashSet::new();
        for claim in claims {
            for mention in [&claim.subject, &claim.object] {
                if normalize_term(mention).is_empty() {
                    continue;
                }
                let entity_id = resolver.resolve_mention(mention)?;
                resolver.link_claim_to_entity(claim.id, entity_id, claim.document_id)?;
                distinct.insert(entity_id);
            }
        }
        Ok(u32::try_from(distinct.len()).unwrap_or(u32::MAX))
    }

    fn record_supersessions(&self, document_id: DocumentId, request: &IngestRequest) -> Result<()> {
        for &old_id in &request.supersedes {
            let old = self.require_document(old_id)?;
            self.store().create_supersession(&Supersession {
                id: Uuid::new_v4(),
                old_document_id: old.id,
                new_document_id: document_id,
                reason: "superseded at ingest".to_string(),
                created_at: Utc::now(),
            })?;
            self.store().record_event(&ProvenanceEvent::new(
                old.id,
                ProvenanceEventType::Supersession,
                serde_json::json!({ "superseded_by": document_id.to_string() }),
            ))?;
        }
        Ok(())
    }

    fn similar_documents(
        &self,
        exclude: DocumentId,
        embedding: &[f32],
    ) -> Result<Vec<SimilarDocument>> {
        let hits = self
            .store()
            .find_similar_documents(embedding, 5, Some(exclude))?;
        Ok(hits
            .into_iter()
            .map(|(document, similarity)| SimilarDocument {
                document_id: document.id,
                title: document.title,
                similarity,
            })
            .collect())
    }
}

/// Bounds embedding input so giant bodies stay cheap.
fn bounded(text: &str) -> &str {
    let limit = 8_192;
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
