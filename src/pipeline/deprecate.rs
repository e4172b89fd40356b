//! The `deprecate_document` handler.

use super::types::{AffectedReference, DeprecateRequest, DeprecateResponse, DeprecationStatus, MigrationStatus};
use super::Pipeline;
use crate::models::{
    Document, DocumentType, ProvenanceEvent, ProvenanceEventType, Supersession,
};
use crate::storage::{DocumentPatch, Store};
use crate::Result;
use chrono::Utc;
use std::time::Instant;
use uuid::Uuid;

impl<S: Store> Pipeline<S> {
    /// Retires a document: records the deprecation (or archives),
    /// optionally supersedes it, migrates inbound references, and
    /// cascades deprecation to its claims.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing document or successor,
    /// `Conflict` for a cyclic supersession, and store errors unchanged.
    pub fn deprecate_document(&self, request: &DeprecateRequest) -> Result<DeprecateResponse> {
        let started = Instant::now();
        request.validate()?;

        let document = self.require_document(request.document_id)?;
        let now = Utc::now();

        if let Some(successor_id) = request.superseded_by {
            let successor = self.require_document(successor_id)?;
            self.store().create_supersession(&Supersession {
                id: Uuid::new_v4(),
                old_document_id: document.id,
                new_document_id: successor.id,
                reason: request.reason.clone(),
                created_at: now,
            })?;
            self.store().record_event(&ProvenanceEvent::new(
                document.id,
                ProvenanceEventType::Supersession,
                serde_json::json!({
                    "superseded_by": successor.id.to_string(),
                    "reason": request.reason,
                }),
            ))?;
        }

        let status = if request.archive {
            self.store().update_document(
                document.id,
                &DocumentPatch {
                    document_type: Some(DocumentType::Archive),
                    updated_at: Some(now),
                    ..DocumentPatch::default()
                },
            )?;
            DeprecationStatus::Archived
        } else {
            let mut frontmatter = document.frontmatter.clone();
            frontmatter.insert("deprecated".to_string(), serde_json::json!(true));
            frontmatter.insert(
                "deprecated_at".to_string(),
                serde_json::json!(now.to_rfc3339()),
            );
            frontmatter.insert(
                "deprecation_reason".to_string(),
                serde_json::json!(request.reason),
            );
            if let Some(successor_id) = request.superseded_by {
                frontmatter.insert(
                    "superseded_by".to_string(),
                    serde_json::json!(successor_id.to_string()),
                );
            }
            self.store().update_document(
                document.id,
                &DocumentPatch {
                    frontmatter: Some(frontmatter),
                    updated_at: Some(now),
                    ..DocumentPatch::default()
                },
            )?;
            DeprecationStatus::Deprecated
        };

        let affected_references = self.migrate_references(&document, request)?;

        let claims_affected = self
            .store()
            .deprecate_claims_for_document(document.id, now)?;
        let sections_affected = u32::try_from(
            self.store().sections_by_document(document.id)?.len(),
        )
        .unwrap_or(u32::MAX);

        let deprecation_event = ProvenanceEvent::new(
            document.id,
            ProvenanceEventType::Deprecation,
            serde_json::json!({
                "reason": request.reason,
                "archive": request.archive,
                "superseded_by": request.superseded_by.map(|id| id.to_string()),
                "claims_affected": claims_affected,
            }),
        );
        self.store().record_event(&deprecation_event)?;

        Ok(DeprecateResponse {
            document_id: document.id,
            title: document.title.clone(),
            status,
            superseded_by: request.superseded_by,
            affected_references,
            claims_affected,
            sections_affected,
            deprecation_id: deprecation_event.id,
            processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Finds documents referencing the deprecated one by id and, when a
    /// successor exists, rewrites those references in place.
    fn migrate_references(
        &self,
        document: &Document,
        request: &DeprecateRequest,
    ) -> Result<Vec<AffectedReference>> {
        let needle = document.id.to_string();
        let mut affected = Vec::new();

        for other in self.store().list_documents()? {
            if other.id == document.id {
                continue;
            }
            let reference_count =
                u32::try_from(other.raw_content.matches(&needle).count()).unwrap_or(u32::MAX);
            if reference_count == 0 {
                continue;
            }

            let migration_status = if other.is_deprecated() {
                MigrationStatus::ManualReviewNeeded
            } else if request.migrate_references {
                match request.superseded_by {
                    Some(successor_id) => {
                        let replacement = successor_id.to_string();
                        self.store().update_document(
                            other.id,
                            &DocumentPatch {
                                raw_content: Some(
                                    other.raw_content.replace(&needle, &replacement),
                                ),
                                ..DocumentPatch::default()
                            },
                        )?;
                        self.store()
                            .rewrite_section_references(other.id, &needle, &replacement)?;
                        self.store().record_event(&ProvenanceEvent::new(
                            other.id,
                            ProvenanceEventType::ReferenceMigration,
                            serde_json::json!({
                                "from": needle,
                                "to": replacement,
                                "references": reference_count,
                            }),
                        ))?;
                        MigrationStatus::Migrated
                    },
                    None => MigrationStatus::Pending,
                }
            } else {
                MigrationStatus::Pending
            };

            affected.push(AffectedReference {
                referencing_document_id: other.id,
                referencing_document_title: other.title,
                reference_count,
                migration_status,
            });
        }

        Ok(affected)
    }
}
