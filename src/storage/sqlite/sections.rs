//! Section repository implementation.

use super::rows::{SECTION_COLUMNS, finish_section, section_from_row};
use super::{SqliteStore, db_err};
use crate::models::{DocumentId, Section, SectionId};
use crate::storage::traits::{SectionStore, SemanticHit};
use crate::storage::vector::{check_width, decode_embedding, encode_embedding, rank};
use crate::{Error, Result};
use rusqlite::{OptionalExtension, params};
use std::collections::HashSet;

impl SectionStore for SqliteStore {
    fn create_sections(&self, sections: &[Section]) -> Result<()> {
        for section in sections {
            if let Some(embedding) = &section.embedding {
                check_width(embedding, self.dimensions())?;
            }
        }
        let conn = self.lock();
        for section in sections {
            conn.execute(
                "INSERT INTO sections (id, document_id, header, content, level, section_order, \
                 start_line, end_line, embedding) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    section.id.to_string(),
                    section.document_id.to_string(),
                    section.header,
                    section.content,
                    i64::from(section.level),
                    i64::from(section.section_order),
                    i64::from(section.start_line),
                    i64::from(section.end_line),
                    section.embedding.as_deref().map(encode_embedding),
                ],
            )
            .map_err(|e| db_err("create_sections", e))?;
        }
        Ok(())
    }

    fn delete_sections_for_document(&self, id: DocumentId) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM sections WHERE document_id = ?1",
            [id.to_string()],
        )
        .map_err(|e| db_err("delete_sections_for_document", e))?;
        Ok(())
    }

    fn sections_by_document(&self, id: DocumentId) -> Result<Vec<Section>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SECTION_COLUMNS} FROM sections WHERE document_id = ?1 \
                 ORDER BY section_order"
            ))
            .map_err(|e| db_err("sections_by_document", e))?;
        let rows = stmt
            .query_map([id.to_string()], section_from_row)
            .map_err(|e| db_err("sections_by_document", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("sections_by_document", e))?;
        rows.into_iter()
            .map(|(sid, did, section)| finish_section(&sid, &did, section))
            .collect()
    }

    fn get_section(&self, id: SectionId) -> Result<Option<Section>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT {SECTION_COLUMNS} FROM sections WHERE id = ?1"),
                [id.to_string()],
                section_from_row,
            )
            .optional()
            .map_err(|e| db_err("get_section", e))?;
        row.map(|(sid, did, section)| finish_section(&sid, &did, section))
            .transpose()
    }

    fn update_section_embedding(&self, id: SectionId, embedding: &[f32]) -> Result<()> {
        check_width(embedding, self.dimensions())?;
        let conn = self.lock();
        let touched = conn
            .execute(
                "UPDATE sections SET embedding = ?2 WHERE id = ?1",
                params![id.to_string(), encode_embedding(embedding)],
            )
            .map_err(|e| db_err("update_section_embedding", e))?;
        if touched == 0 {
            return Err(Error::NotFound(format!("section {id}")));
        }
        Ok(())
    }

    fn rewrite_section_references(&self, id: DocumentId, from: &str, to: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE sections SET content = REPLACE(content, ?2, ?3) WHERE document_id = ?1",
            params![id.to_string(), from, to],
        )
        .map_err(|e| db_err("rewrite_section_references", e))?;
        Ok(())
    }

    fn semantic_search(
        &self,
        query: &[f32],
        k: usize,
        scope: Option<&[DocumentId]>,
    ) -> Result<Vec<SemanticHit>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT s.id, s.document_id, s.header, s.content, s.embedding, \
                        d.authority_level, d.created_at \
                 FROM sections s JOIN documents d ON d.id = s.document_id \
                 WHERE s.embedding IS NOT NULL AND d.document_type != 'quarantined'",
            )
            .map_err(|e| db_err("semantic_search", e))?;

        let scope_set: Option<HashSet<String>> =
            scope.map(|ids| ids.iter().map(ToString::to_string).collect());

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(|e| db_err("semantic_search", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("semantic_search", e))?;

        let mut candidates = Vec::new();
        for (section_id, document_id, header, content, blob, authority, created) in rows {
            if let Some(scope) = &scope_set {
                if !scope.contains(&document_id) {
                    continue;
                }
            }
            let embedding = decode_embedding(&blob)?;
            let authority = u8::try_from(authority.clamp(1, 10)).unwrap_or(5);
            candidates.push(((section_id, document_id, header, content), embedding, authority, created));
        }

        rank(query, candidates, k)
            .into_iter()
            .map(|c| {
                let (section_id, document_id, header, content) = c.item;
                Ok(SemanticHit {
                    section_id: SectionId::from_uuid(super::rows::parse_uuid(
                        "semantic_search",
                        &section_id,
                    )?),
                    document_id: DocumentId::from_uuid(super::rows::parse_uuid(
                        "semantic_search",
                        &document_id,
                    )?),
                    header,
                    content,
                    similarity: c.similarity,
                })
            })
            .collect()
    }
}
