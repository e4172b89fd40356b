//! Claim and conflict repository implementations.

use super::rows::{CLAIM_COLUMNS, claim_from_row, conflict_from_row};
use super::{SqliteStore, db_err, to_ms};
use crate::models::{AtomicClaim, ClaimId, Conflict, DocumentId, SectionId, normalize_term};
use crate::storage::traits::{ClaimStore, ConflictStore};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params, params_from_iter};

const CONFLICT_COLUMNS: &str =
    "id, claim_a, claim_b, conflict_type, strength, confidence, detected_at";

impl ClaimStore for SqliteStore {
    fn upsert_claim(&self, claim: &AtomicClaim) -> Result<()> {
        let conn = self.lock();

        // Claim locality: the section must exist and belong to the
        // claim's document.
        let owner: Option<String> = conn
            .query_row(
                "SELECT document_id FROM sections WHERE id = ?1",
                [claim.section_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("upsert_claim", e))?;
        match owner {
            None => {
                return Err(Error::InvalidInput(format!(
                    "claim section {} does not exist",
                    claim.section_id
                )));
            },
            Some(owner) if owner != claim.document_id.to_string() => {
                return Err(Error::InvalidInput(format!(
                    "claim section {} belongs to document {owner}, not {}",
                    claim.section_id, claim.document_id
                )));
            },
            Some(_) => {},
        }

        for (field, value) in [
            ("subject", &claim.subject),
            ("predicate", &claim.predicate),
            ("object", &claim.object),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidInput(format!("claim {field} is empty")));
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO claims (id, document_id, section_id, subject, predicate, \
             object, normalized_subject, original_text, paraphrased, confidence, deprecated, \
             deprecated_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                claim.id.to_string(),
                claim.document_id.to_string(),
                claim.section_id.to_string(),
                claim.subject.trim(),
                claim.predicate.trim(),
                claim.object.trim(),
                normalize_term(&claim.subject),
                claim.original_text,
                claim.paraphrased,
                f64::from(claim.confidence.clamp(0.0, 1.0)),
                claim.deprecated,
                claim.deprecated_at.map(to_ms),
                to_ms(claim.created_at),
            ],
        )
        .map_err(|e| db_err("upsert_claim", e))?;
        Ok(())
    }

    fn delete_claims_for_document(&self, id: DocumentId) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM claims WHERE document_id = ?1",
            [id.to_string()],
        )
        .map_err(|e| db_err("delete_claims_for_document", e))?;
        Ok(())
    }

    fn get_claim(&self, id: ClaimId) -> Result<Option<AtomicClaim>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE id = ?1"),
                [id.to_string()],
                claim_from_row,
            )
            .optional()
            .map_err(|e| db_err("get_claim", e))?;
        row.map(super::rows::ClaimRow::into_claim).transpose()
    }

    fn claims_by_document(&self, id: DocumentId) -> Result<Vec<AtomicClaim>> {
        self.claims_where("document_id = ?1", &[&id.to_string()])
    }

    fn claims_by_section(&self, id: SectionId) -> Result<Vec<AtomicClaim>> {
        self.claims_where("section_id = ?1", &[&id.to_string()])
    }

    fn claims_by_subject(&self, subject: &str) -> Result<Vec<AtomicClaim>> {
        self.claims_where("normalized_subject = ?1", &[&normalize_term(subject)])
    }

    fn claims_for_documents(&self, ids: &[DocumentId]) -> Result<Vec<AtomicClaim>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CLAIM_COLUMNS} FROM claims WHERE document_id IN ({placeholders}) \
                 ORDER BY created_at"
            ))
            .map_err(|e| db_err("claims_for_documents", e))?;
        let rows = stmt
            .query_map(
                params_from_iter(ids.iter().map(ToString::to_string)),
                claim_from_row,
            )
            .map_err(|e| db_err("claims_for_documents", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("claims_for_documents", e))?;
        rows.into_iter()
            .map(super::rows::ClaimRow::into_claim)
            .collect()
    }

    fn count_claims_matching_subjects(
        &self,
        normalized_subjects: &[String],
        exclude: DocumentId,
    ) -> Result<u64> {
        if normalized_subjects.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; normalized_subjects.len()].join(",");
        let conn = self.lock();
        let mut params: Vec<String> = vec![exclude.to_string()];
        params.extend(normalized_subjects.iter().cloned());
        let count: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM claims WHERE document_id != ?1 AND deprecated = 0 \
                     AND normalized_subject IN ({placeholders})"
                ),
                params_from_iter(params),
                |row| row.get(0),
            )
            .map_err(|e| db_err("count_claims_matching_subjects", e))?;
        Ok(u64::try_from(count.max(0)).unwrap_or(0))
    }

    fn deprecate_claims_for_document(
        &self,
        id: DocumentId,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let conn = self.lock();
        let touched = conn
            .execute(
                "UPDATE claims SET deprecated = 1, deprecated_at = ?2 \
                 WHERE document_id = ?1 AND deprecated = 0",
                params![id.to_string(), to_ms(at)],
            )
            .map_err(|e| db_err("deprecate_claims_for_document", e))?;
        Ok(u64::try_from(touched).unwrap_or(0))
    }
}

impl SqliteStore {
    fn claims_where(&self, predicate: &str, args: &[&String]) -> Result<Vec<AtomicClaim>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CLAIM_COLUMNS} FROM claims WHERE {predicate} ORDER BY created_at"
            ))
            .map_err(|e| db_err("claims_where", e))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), claim_from_row)
            .map_err(|e| db_err("claims_where", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("claims_where", e))?;
        rows.into_iter()
            .map(super::rows::ClaimRow::into_claim)
            .collect()
    }
}

impl ConflictStore for SqliteStore {
    fn upsert_conflict(&self, conflict: &Conflict) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO conflicts (id, claim_a, claim_b, conflict_type, strength, confidence, \
             detected_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT (claim_a, claim_b) DO UPDATE SET \
             conflict_type = excluded.conflict_type, strength = excluded.strength, \
             confidence = excluded.confidence",
            params![
                conflict.id.to_string(),
                conflict.claim_a.to_string(),
                conflict.claim_b.to_string(),
                conflict.conflict_type.as_str(),
                f64::from(conflict.strength),
                f64::from(conflict.confidence),
                to_ms(conflict.detected_at),
            ],
        )
        .map_err(|e| db_err("upsert_conflict", e))?;
        Ok(())
    }

    fn find_by_claim_ids(&self, a: ClaimId, b: ClaimId) -> Result<Option<Conflict>> {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE claim_a = ?1 AND claim_b = ?2"
                ),
                params![first.to_string(), second.to_string()],
                conflict_from_row,
            )
            .optional()
            .map_err(|e| db_err("find_by_claim_ids", e))?;
        row.map(super::rows::ConflictRow::into_conflict).transpose()
    }

    fn conflicts_for_claims(&self, claim_ids: &[ClaimId]) -> Result<Vec<Conflict>> {
        if claim_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; claim_ids.len()].join(",");
        let conn = self.lock();
        // Conflicts with a deprecated endpoint are invalidated lazily:
        // the join filters them out of every read.
        let mut stmt = conn
            .prepare(&format!(
                "SELECT c.id, c.claim_a, c.claim_b, c.conflict_type, c.strength, c.confidence, \
                        c.detected_at \
                 FROM conflicts c \
                 JOIN claims ca ON ca.id = c.claim_a AND ca.deprecated = 0 \
                 JOIN claims cb ON cb.id = c.claim_b AND cb.deprecated = 0 \
                 WHERE c.claim_a IN ({placeholders}) OR c.claim_b IN ({placeholders})"
            ))
            .map_err(|e| db_err("conflicts_for_claims", e))?;

        let ids: Vec<String> = claim_ids.iter().map(ToString::to_string).collect();
        let mut params: Vec<String> = ids.clone();
        params.extend(ids);
        let rows = stmt
            .query_map(params_from_iter(params), conflict_from_row)
            .map_err(|e| db_err("conflicts_for_claims", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("conflicts_for_claims", e))?;
        rows.into_iter()
            .map(super::rows::ConflictRow::into_conflict)
            .collect()
    }
}
