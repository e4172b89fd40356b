//! Document repository implementation.

use super::rows::{DOCUMENT_COLUMNS, document_from_row};
use super::{SqliteStore, db_err, to_ms};
use crate::models::{Document, DocumentId, DocumentType};
use crate::storage::traits::{DocumentPatch, DocumentStore};
use crate::storage::vector::{check_width, encode_embedding, rank};
use crate::{Error, Result};
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

impl DocumentStore for SqliteStore {
    fn create_document(&self, document: &Document) -> Result<()> {
        if let Some(embedding) = &document.embedding {
            check_width(embedding, self.dimensions())?;
        }
        let conn = self.lock();
        let frontmatter = serde_json::to_string(&document.frontmatter)
            .map_err(|e| db_err("create_document", e))?;
        conn.execute(
            "INSERT INTO documents (id, source_path, content_hash, format, document_type, title, \
             authority_level, raw_content, frontmatter, embedding, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                document.id.to_string(),
                document.source_path,
                document.content_hash,
                document.format.as_str(),
                document.document_type.as_str(),
                document.title,
                i64::from(document.authority_level),
                document.raw_content,
                frontmatter,
                document.embedding.as_deref().map(encode_embedding),
                to_ms(document.created_at),
                to_ms(document.updated_at),
            ],
        )
        .map_err(|e| db_err("create_document", e))?;

        drop(conn);
        self.set_tags_impl(document.id, &document.tags)
    }

    fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                [id.to_string()],
                document_from_row,
            )
            .optional()
            .map_err(|e| db_err("get_document", e))?;
        row.map(|r| r.into_document(&conn)).transpose()
    }

    fn update_document(&self, id: DocumentId, patch: &DocumentPatch) -> Result<()> {
        let conn = self.lock();
        let updated_at = to_ms(patch.updated_at.unwrap_or_else(Utc::now));

        // Column-at-a-time updates keep the partial-update surface simple.
        if let Some(document_type) = patch.document_type {
            conn.execute(
                "UPDATE documents SET document_type = ?2 WHERE id = ?1",
                params![id.to_string(), document_type.as_str()],
            )
            .map_err(|e| db_err("update_document", e))?;
        }
        if let Some(title) = &patch.title {
            conn.execute(
                "UPDATE documents SET title = ?2 WHERE id = ?1",
                params![id.to_string(), title],
            )
            .map_err(|e| db_err("update_document", e))?;
        }
        if let Some(authority_level) = patch.authority_level {
            conn.execute(
                "UPDATE documents SET authority_level = ?2 WHERE id = ?1",
                params![id.to_string(), i64::from(authority_level)],
            )
            .map_err(|e| db_err("update_document", e))?;
        }
        if let Some(raw_content) = &patch.raw_content {
            conn.execute(
                "UPDATE documents SET raw_content = ?2 WHERE id = ?1",
                params![id.to_string(), raw_content],
            )
            .map_err(|e| db_err("update_document", e))?;
        }
        if let Some(frontmatter) = &patch.frontmatter {
            let encoded =
                serde_json::to_string(frontmatter).map_err(|e| db_err("update_document", e))?;
            conn.execute(
                "UPDATE documents SET frontmatter = ?2 WHERE id = ?1",
                params![id.to_string(), encoded],
            )
            .map_err(|e| db_err("update_document", e))?;
        }

        let touched = conn
            .execute(
                "UPDATE documents SET updated_at = ?2 WHERE id = ?1",
                params![id.to_string(), updated_at],
            )
            .map_err(|e| db_err("update_document", e))?;
        if touched == 0 {
            return Err(Error::NotFound(format!("document {id}")));
        }
        Ok(())
    }

    fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY created_at"
            ))
            .map_err(|e| db_err("list_documents", e))?;
        let rows = stmt
            .query_map([], document_from_row)
            .map_err(|e| db_err("list_documents", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list_documents", e))?;
        rows.into_iter().map(|r| r.into_document(&conn)).collect()
    }

    fn find_by_path_pattern(&self, pattern: &str) -> Result<Vec<Document>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents \
                 WHERE source_path GLOB ?1 OR instr(source_path, ?1) > 0 \
                 ORDER BY created_at"
            ))
            .map_err(|e| db_err("find_by_path_pattern", e))?;
        let rows = stmt
            .query_map([pattern], document_from_row)
            .map_err(|e| db_err("find_by_path_pattern", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("find_by_path_pattern", e))?;
        rows.into_iter().map(|r| r.into_document(&conn)).collect()
    }

    fn find_by_source_path(&self, source_path: &str) -> Result<Option<Document>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE source_path = ?1 \
                     ORDER BY created_at LIMIT 1"
                ),
                [source_path],
                document_from_row,
            )
            .optional()
            .map_err(|e| db_err("find_by_source_path", e))?;
        row.map(|r| r.into_document(&conn)).transpose()
    }

    fn update_document_embedding(&self, id: DocumentId, embedding: &[f32]) -> Result<()> {
        check_width(embedding, self.dimensions())?;
        let conn = self.lock();
        let touched = conn
            .execute(
                "UPDATE documents SET embedding = ?2 WHERE id = ?1",
                params![id.to_string(), encode_embedding(embedding)],
            )
            .map_err(|e| db_err("update_document_embedding", e))?;
        if touched == 0 {
            return Err(Error::NotFound(format!("document {id}")));
        }
        Ok(())
    }

    fn find_similar_documents(
        &self,
        query: &[f32],
        k: usize,
        exclude: Option<DocumentId>,
    ) -> Result<Vec<(Document, f32)>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents \
                 WHERE embedding IS NOT NULL AND document_type != ?1"
            ))
            .map_err(|e| db_err("find_similar_documents", e))?;
        let rows = stmt
            .query_map([DocumentType::Quarantined.as_str()], document_from_row)
            .map_err(|e| db_err("find_similar_documents", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("find_similar_documents", e))?;

        let exclude = exclude.map(|id| id.to_string());
        let mut candidates = Vec::new();
        for mut row in rows {
            let blob = row.take_embedding();
            let authority = row.authority();
            let created = row.created_at_ms();
            let document = row.into_document(&conn)?;
            if exclude.as_deref() == Some(document.id.to_string().as_str()) {
                continue;
            }
            let Some(blob) = blob else { continue };
            let embedding = crate::storage::vector::decode_embedding(&blob)?;
            candidates.push((document, embedding, authority, created));
        }

        let ranked = rank(query, candidates, k);
        Ok(ranked
            .into_iter()
            .map(|c| (c.item, c.similarity))
            .collect())
    }

    fn mark_quarantined(&self, id: DocumentId) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE documents SET document_type = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                DocumentType::Quarantined.as_str(),
                to_ms(Utc::now())
            ],
        )
        .map_err(|e| db_err("mark_quarantined", e))?;
        Ok(())
    }

    fn quarantined_documents(&self) -> Result<Vec<Document>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_type = ?1 \
                 ORDER BY created_at"
            ))
            .map_err(|e| db_err("quarantined_documents", e))?;
        let rows = stmt
            .query_map([DocumentType::Quarantined.as_str()], document_from_row)
            .map_err(|e| db_err("quarantined_documents", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("quarantined_documents", e))?;
        rows.into_iter().map(|r| r.into_document(&conn)).collect()
    }
}
