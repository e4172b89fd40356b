//! Row-to-model converters.

use super::{db_err, from_ms};
use crate::models::{
    AtomicClaim, ClaimId, Conflict, ConflictType, ConsolidationRecord, Document, DocumentFormat,
    DocumentId, DocumentType, Entity, EntityId, MergeStrategy, OverlapCluster, ProvenanceEvent,
    ProvenanceEventType, Section, SectionId, Supersession,
};
use crate::storage::vector::decode_embedding;
use crate::{Error, Result};
use rusqlite::{Connection, Row};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

pub(crate) fn parse_uuid(operation: &str, text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| db_err(operation, format!("bad uuid '{text}': {e}")))
}

fn optional_embedding(blob: Option<Vec<u8>>) -> Result<Option<Vec<f32>>> {
    blob.map(|bytes| decode_embedding(&bytes)).transpose()
}

/// Columns: id, source_path, content_hash, format, document_type, title,
/// authority_level, raw_content, frontmatter, embedding, created_at,
/// updated_at.
pub(crate) const DOCUMENT_COLUMNS: &str = "id, source_path, content_hash, format, document_type, \
     title, authority_level, raw_content, frontmatter, embedding, created_at, updated_at";

pub(crate) fn document_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        source_path: row.get(1)?,
        content_hash: row.get(2)?,
        format: row.get(3)?,
        document_type: row.get(4)?,
        title: row.get(5)?,
        authority_level: row.get(6)?,
        raw_content: row.get(7)?,
        frontmatter: row.get(8)?,
        embedding: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Intermediate document row before enum/JSON decoding.
pub(crate) struct DocumentRow {
    id: String,
    source_path: String,
    content_hash: String,
    format: String,
    document_type: String,
    title: String,
    authority_level: i64,
    raw_content: String,
    frontmatter: String,
    embedding: Option<Vec<u8>>,
    created_at: i64,
    updated_at: i64,
}

impl DocumentRow {
    /// Finishes decoding, loading the tag set from the connection.
    pub(crate) fn into_document(self, conn: &Connection) -> Result<Document> {
        let id = DocumentId::from_uuid(parse_uuid("load_document", &self.id)?);
        let frontmatter: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&self.frontmatter)
                .map_err(|e| db_err("load_document", format!("bad frontmatter: {e}")))?;
        let tags = load_tags(conn, &self.id)?;
        Ok(Document {
            id,
            source_path: self.source_path,
            content_hash: self.content_hash,
            format: DocumentFormat::from_str(&self.format)?,
            document_type: DocumentType::from_str(&self.document_type)?,
            title: self.title,
            authority_level: u8::try_from(self.authority_level.clamp(1, 10))
                .map_err(|e| db_err("load_document", e))?,
            raw_content: self.raw_content,
            frontmatter,
            embedding: optional_embedding(self.embedding)?,
            created_at: from_ms(self.created_at),
            updated_at: from_ms(self.updated_at),
            tags,
        })
    }

    /// Creation time in epoch millis, for ranking without full decode.
    pub(crate) const fn created_at_ms(&self) -> i64 {
        self.created_at
    }

    /// Authority level, for ranking without full decode.
    pub(crate) fn authority(&self) -> u8 {
        u8::try_from(self.authority_level.clamp(1, 10)).unwrap_or(5)
    }

    /// Raw embedding blob, for ranking without full decode.
    pub(crate) fn take_embedding(&mut self) -> Option<Vec<u8>> {
        self.embedding.take()
    }
}

fn load_tags(conn: &Connection, document_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT tag FROM document_tags WHERE document_id = ?1 ORDER BY tag")
        .map_err(|e| db_err("load_tags", e))?;
    let tags = stmt
        .query_map([document_id], |row| row.get::<_, String>(0))
        .map_err(|e| db_err("load_tags", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| db_err("load_tags", e))?;
    Ok(tags)
}

/// Columns: id, document_id, header, content, level, section_order,
/// start_line, end_line, embedding.
pub(crate) const SECTION_COLUMNS: &str =
    "id, document_id, header, content, level, section_order, start_line, end_line, embedding";

pub(crate) fn section_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, Section)> {
    let id: String = row.get(0)?;
    let document_id: String = row.get(1)?;
    let section = Section {
        id: SectionId::from_uuid(Uuid::nil()),
        document_id: DocumentId::from_uuid(Uuid::nil()),
        header: row.get(2)?,
        content: row.get(3)?,
        level: row.get::<_, i64>(4)?.clamp(0, 6).try_into().unwrap_or(0),
        section_order: row.get::<_, i64>(5)?.try_into().unwrap_or(0),
        start_line: row.get::<_, i64>(6)?.try_into().unwrap_or(1),
        end_line: row.get::<_, i64>(7)?.try_into().unwrap_or(1),
        embedding: None,
    };
    let blob: Option<Vec<u8>> = row.get(8)?;
    Ok((id, document_id, section_with_blob(section, blob)))
}

fn section_with_blob(mut section: Section, blob: Option<Vec<u8>>) -> Section {
    // Decoding failures surface when the caller resolves ids.
    section.embedding = blob.and_then(|bytes| decode_embedding(&bytes).ok());
    section
}

pub(crate) fn finish_section(id: &str, document_id: &str, mut section: Section) -> Result<Section> {
    section.id = SectionId::from_uuid(parse_uuid("load_section", id)?);
    section.document_id = DocumentId::from_uuid(parse_uuid("load_section", document_id)?);
    Ok(section)
}

/// Columns: id, document_id, section_id, subject, predicate, object,
/// original_text, paraphrased, confidence, deprecated, deprecated_at,
/// created_at.
pub(crate) const CLAIM_COLUMNS: &str = "id, document_id, section_id, subject, predicate, object, \
     original_text, paraphrased, confidence, deprecated, deprecated_at, created_at";

pub(crate) fn claim_from_row(row: &Row<'_>) -> rusqlite::Result<ClaimRow> {
    Ok(ClaimRow {
        id: row.get(0)?,
        document_id: row.get(1)?,
        section_id: row.get(2)?,
        subject: row.get(3)?,
        predicate: row.get(4)?,
        object: row.get(5)?,
        original_text: row.get(6)?,
        paraphrased: row.get(7)?,
        confidence: row.get(8)?,
        deprecated: row.get(9)?,
        deprecated_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

/// Intermediate claim row before id decoding.
pub(crate) struct ClaimRow {
    id: String,
    document_id: String,
    section_id: String,
    subject: String,
    predicate: String,
    object: String,
    original_text: String,
    paraphrased: bool,
    confidence: f64,
    deprecated: bool,
    deprecated_at: Option<i64>,
    created_at: i64,
}

impl ClaimRow {
    pub(crate) fn into_claim(self) -> Result<AtomicClaim> {
        Ok(AtomicClaim {
            id: ClaimId::from_uuid(parse_uuid("load_claim", &self.id)?),
            document_id: DocumentId::from_uuid(parse_uuid("load_claim", &self.document_id)?),
            section_id: SectionId::from_uuid(parse_uuid("load_claim", &self.section_id)?),
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
            original_text: self.original_text,
            paraphrased: self.paraphrased,
            #[allow(clippy::cast_possible_truncation)]
            confidence: self.confidence as f32,
            deprecated: self.deprecated,
            deprecated_at: self.deprecated_at.map(from_ms),
            created_at: from_ms(self.created_at),
        })
    }
}

pub(crate) fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<ConflictRow> {
    Ok(ConflictRow {
        id: row.get(0)?,
        claim_a: row.get(1)?,
        claim_b: row.get(2)?,
        conflict_type: row.get(3)?,
        strength: row.get(4)?,
        confidence: row.get(5)?,
        detected_at: row.get(6)?,
    })
}

/// Intermediate conflict row.
pub(crate) struct ConflictRow {
    id: String,
    claim_a: String,
    claim_b: String,
    conflict_type: String,
    strength: f64,
    confidence: f64,
    detected_at: i64,
}

impl ConflictRow {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn into_conflict(self) -> Result<Conflict> {
        Ok(Conflict {
            id: parse_uuid("load_conflict", &self.id)?,
            claim_a: ClaimId::from_uuid(parse_uuid("load_conflict", &self.claim_a)?),
            claim_b: ClaimId::from_uuid(parse_uuid("load_conflict", &self.claim_b)?),
            conflict_type: ConflictType::from_str(&self.conflict_type)?,
            strength: self.strength as f32,
            confidence: self.confidence as f32,
            detected_at: from_ms(self.detected_at),
        })
    }
}

pub(crate) fn entity_from_parts(
    canonical_id: &str,
    name: String,
    embedding: Option<Vec<u8>>,
    aliases: Vec<String>,
) -> Result<Entity> {
    Ok(Entity {
        canonical_id: EntityId::from_uuid(parse_uuid("load_entity", canonical_id)?),
        name,
        aliases,
        embedding: optional_embedding(embedding)?,
    })
}

pub(crate) fn supersession_from_row(row: &Row<'_>) -> rusqlite::Result<SupersessionRow> {
    Ok(SupersessionRow {
        id: row.get(0)?,
        old_document_id: row.get(1)?,
        new_document_id: row.get(2)?,
        reason: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Intermediate supersession row.
pub(crate) struct SupersessionRow {
    id: String,
    old_document_id: String,
    new_document_id: String,
    reason: String,
    created_at: i64,
}

impl SupersessionRow {
    pub(crate) fn into_supersession(self) -> Result<Supersession> {
        Ok(Supersession {
            id: parse_uuid("load_supersession", &self.id)?,
            old_document_id: DocumentId::from_uuid(parse_uuid(
                "load_supersession",
                &self.old_document_id,
            )?),
            new_document_id: DocumentId::from_uuid(parse_uuid(
                "load_supersession",
                &self.new_document_id,
            )?),
            reason: self.reason,
            created_at: from_ms(self.created_at),
        })
    }
}

pub(crate) fn decode_document_ids(json: &str) -> Result<Vec<DocumentId>> {
    let ids: Vec<String> = serde_json::from_str(json)
        .map_err(|e| db_err("decode_document_ids", e))?;
    ids.iter()
        .map(|s| Ok(DocumentId::from_uuid(parse_uuid("decode_document_ids", s)?)))
        .collect()
}

pub(crate) fn encode_document_ids(ids: &[DocumentId]) -> Result<String> {
    let strings: Vec<String> = ids.iter().map(ToString::to_string).collect();
    serde_json::to_string(&strings).map_err(|e| db_err("encode_document_ids", e))
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn consolidation_from_row(row: &Row<'_>) -> rusqlite::Result<ConsolidationRow> {
    Ok(ConsolidationRow {
        id: row.get(0)?,
        source_document_ids: row.get(1)?,
        result_document_id: row.get(2)?,
        strategy: row.get(3)?,
        conflicts_resolved: row.get(4)?,
        conflicts_pending: row.get(5)?,
        cluster_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Intermediate consolidation row.
pub(crate) struct ConsolidationRow {
    id: String,
    source_document_ids: String,
    result_document_id: Option<String>,
    strategy: String,
    conflicts_resolved: i64,
    conflicts_pending: i64,
    cluster_id: Option<String>,
    created_at: i64,
}

impl ConsolidationRow {
    pub(crate) fn into_record(self) -> Result<ConsolidationRecord> {
        Ok(ConsolidationRecord {
            id: parse_uuid("load_consolidation", &self.id)?,
            source_document_ids: decode_document_ids(&self.source_document_ids)?,
            result_document_id: self
                .result_document_id
                .as_deref()
                .map(|s| Ok::<_, Error>(DocumentId::from_uuid(parse_uuid("load_consolidation", s)?)))
                .transpose()?,
            strategy: MergeStrategy::from_str(&self.strategy)?,
            conflicts_resolved: u32::try_from(self.conflicts_resolved.max(0)).unwrap_or(0),
            conflicts_pending: u32::try_from(self.conflicts_pending.max(0)).unwrap_or(0),
            cluster_id: self
                .cluster_id
                .as_deref()
                .map(|s| parse_uuid("load_consolidation", s))
                .transpose()?,
            created_at: from_ms(self.created_at),
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn cluster_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, f64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn finish_cluster(
    id: &str,
    document_ids_json: &str,
    threshold: f64,
    created_at: i64,
) -> Result<OverlapCluster> {
    Ok(OverlapCluster {
        id: parse_uuid("load_cluster", id)?,
        document_ids: decode_document_ids(document_ids_json)?,
        similarity_threshold: threshold as f32,
        created_at: from_ms(created_at),
    })
}

pub(crate) fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        document_id: row.get(1)?,
        event_type: row.get(2)?,
        details: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Intermediate provenance event row.
pub(crate) struct EventRow {
    id: String,
    document_id: String,
    event_type: String,
    details: String,
    created_at: i64,
}

impl EventRow {
    pub(crate) fn into_event(self) -> Result<ProvenanceEvent> {
        Ok(ProvenanceEvent {
            id: parse_uuid("load_event", &self.id)?,
            document_id: DocumentId::from_uuid(parse_uuid("load_event", &self.document_id)?),
            event_type: ProvenanceEventType::from_str(&self.event_type)?,
            details: serde_json::from_str(&self.details)
                .map_err(|e| db_err("load_event", format!("bad details: {e}")))?,
            created_at: from_ms(self.created_at),
        })
    }
}
