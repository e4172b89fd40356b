//! Supersession, consolidation, cluster, provenance, and tag
//! repository implementations.

use super::rows::{
    cluster_from_row, consolidation_from_row, encode_document_ids, event_from_row, finish_cluster,
    supersession_from_row,
};
use super::{SqliteStore, db_err, to_ms};
use crate::models::{
    ConsolidationRecord, DocumentId, OverlapCluster, ProvenanceEvent, Supersession,
};
use crate::storage::traits::RecordStore;
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

const SUPERSESSION_COLUMNS: &str = "id, old_document_id, new_document_id, reason, created_at";
const CONSOLIDATION_COLUMNS: &str = "id, source_document_ids, result_document_id, strategy, \
     conflicts_resolved, conflicts_pending, cluster_id, created_at";
const EVENT_COLUMNS: &str = "id, document_id, event_type, details, created_at";

/// Whether adding `new -> old` closes a cycle in the supersession graph:
/// true when `new` is already reachable from `old` along replacement
/// edges.
fn would_create_cycle(conn: &Connection, new_id: &str, old_id: &str) -> Result<bool> {
    if new_id == old_id {
        return Ok(true);
    }

    let mut stmt = conn
        .prepare("SELECT new_document_id, old_document_id FROM supersessions")
        .map_err(|e| db_err("supersession_cycle_check", e))?;
    let edges: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| db_err("supersession_cycle_check", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| db_err("supersession_cycle_check", e))?;

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (new, old) in &edges {
        adjacency.entry(new.as_str()).or_default().push(old.as_str());
    }

    let mut queue = VecDeque::from([old_id]);
    let mut seen = HashSet::new();
    while let Some(current) = queue.pop_front() {
        if current == new_id {
            return Ok(true);
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(next) = adjacency.get(current) {
            queue.extend(next.iter().copied());
        }
    }
    Ok(false)
}

impl RecordStore for SqliteStore {
    fn create_supersession(&self, supersession: &Supersession) -> Result<()> {
        let conn = self.lock();
        let new_id = supersession.new_document_id.to_string();
        let old_id = supersession.old_document_id.to_string();
        if would_create_cycle(&conn, &new_id, &old_id)? {
            return Err(Error::Conflict(format!(
                "supersession {new_id} -> {old_id} would create a cycle"
            )));
        }
        conn.execute(
            "INSERT OR IGNORE INTO supersessions (id, old_document_id, new_document_id, reason, \
             created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                supersession.id.to_string(),
                old_id,
                new_id,
                supersession.reason,
                to_ms(supersession.created_at),
            ],
        )
        .map_err(|e| db_err("create_supersession", e))?;
        Ok(())
    }

    fn supersessions(&self) -> Result<Vec<Supersession>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SUPERSESSION_COLUMNS} FROM supersessions ORDER BY created_at"
            ))
            .map_err(|e| db_err("supersessions", e))?;
        let rows = stmt
            .query_map([], supersession_from_row)
            .map_err(|e| db_err("supersessions", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("supersessions", e))?;
        rows.into_iter()
            .map(super::rows::SupersessionRow::into_supersession)
            .collect()
    }

    fn supersessions_for_document(&self, id: DocumentId) -> Result<Vec<Supersession>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SUPERSESSION_COLUMNS} FROM supersessions \
                 WHERE old_document_id = ?1 OR new_document_id = ?1 ORDER BY created_at"
            ))
            .map_err(|e| db_err("supersessions_for_document", e))?;
        let rows = stmt
            .query_map([id.to_string()], supersession_from_row)
            .map_err(|e| db_err("supersessions_for_document", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("supersessions_for_document", e))?;
        rows.into_iter()
            .map(super::rows::SupersessionRow::into_supersession)
            .collect()
    }

    fn create_consolidation(&self, record: &ConsolidationRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO consolidations (id, source_document_ids, result_document_id, \
             strategy, conflicts_resolved, conflicts_pending, cluster_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id.to_string(),
                encode_document_ids(&record.source_document_ids)?,
                record.result_document_id.map(|id| id.to_string()),
                record.strategy.as_str(),
                i64::from(record.conflicts_resolved),
                i64::from(record.conflicts_pending),
                record.cluster_id.map(|id| id.to_string()),
                to_ms(record.created_at),
            ],
        )
        .map_err(|e| db_err("create_consolidation", e))?;
        Ok(())
    }

    fn consolidations_by_cluster(&self, cluster_id: Uuid) -> Result<Vec<ConsolidationRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONSOLIDATION_COLUMNS} FROM consolidations WHERE cluster_id = ?1 \
                 ORDER BY created_at"
            ))
            .map_err(|e| db_err("consolidations_by_cluster", e))?;
        let rows = stmt
            .query_map([cluster_id.to_string()], consolidation_from_row)
            .map_err(|e| db_err("consolidations_by_cluster", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("consolidations_by_cluster", e))?;
        rows.into_iter()
            .map(super::rows::ConsolidationRow::into_record)
            .collect()
    }

    fn create_cluster(&self, cluster: &OverlapCluster) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO clusters (id, document_ids, similarity_threshold, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                cluster.id.to_string(),
                encode_document_ids(&cluster.document_ids)?,
                f64::from(cluster.similarity_threshold),
                to_ms(cluster.created_at),
            ],
        )
        .map_err(|e| db_err("create_cluster", e))?;
        Ok(())
    }

    fn get_cluster(&self, id: Uuid) -> Result<Option<OverlapCluster>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, document_ids, similarity_threshold, created_at FROM clusters \
                 WHERE id = ?1",
                [id.to_string()],
                cluster_from_row,
            )
            .optional()
            .map_err(|e| db_err("get_cluster", e))?;
        row.map(|(id, ids, threshold, created)| finish_cluster(&id, &ids, threshold, created))
            .transpose()
    }

    fn record_event(&self, event: &ProvenanceEvent) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO provenance_events (id, document_id, event_type, details, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                event.document_id.to_string(),
                event.event_type.as_str(),
                serde_json::to_string(&event.details).map_err(|e| db_err("record_event", e))?,
                to_ms(event.created_at),
            ],
        )
        .map_err(|e| db_err("record_event", e))?;
        Ok(())
    }

    fn events_for_document(&self, id: DocumentId) -> Result<Vec<ProvenanceEvent>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM provenance_events WHERE document_id = ?1 \
                 ORDER BY created_at"
            ))
            .map_err(|e| db_err("events_for_document", e))?;
        let rows = stmt
            .query_map([id.to_string()], event_from_row)
            .map_err(|e| db_err("events_for_document", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("events_for_document", e))?;
        rows.into_iter()
            .map(super::rows::EventRow::into_event)
            .collect()
    }

    fn set_tags(&self, id: DocumentId, tags: &[String]) -> Result<()> {
        self.set_tags_impl(id, tags)
    }

    fn documents_by_tag(&self, tag: &str) -> Result<Vec<DocumentId>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT document_id FROM document_tags WHERE tag = ?1 ORDER BY document_id")
            .map_err(|e| db_err("documents_by_tag", e))?;
        let ids = stmt
            .query_map([tag], |row| row.get::<_, String>(0))
            .map_err(|e| db_err("documents_by_tag", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("documents_by_tag", e))?;
        ids.iter()
            .map(|s| {
                Ok(DocumentId::from_uuid(super::rows::parse_uuid(
                    "documents_by_tag",
                    s,
                )?))
            })
            .collect()
    }
}

impl SqliteStore {
    pub(crate) fn set_tags_impl(&self, id: DocumentId, tags: &[String]) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM document_tags WHERE document_id = ?1",
            [id.to_string()],
        )
        .map_err(|e| db_err("set_tags", e))?;
        for tag in tags {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            conn.execute(
                "INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?1, ?2)",
                params![id.to_string(), tag],
            )
            .map_err(|e| db_err("set_tags", e))?;
        }
        Ok(())
    }
}
