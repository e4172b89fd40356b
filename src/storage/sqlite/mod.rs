//! SQLite-backed store.
//!
//! A single-database implementation of every repository trait. Uses a
//! `Mutex<Connection>` because `rusqlite::Connection` is not `Sync`;
//! WAL mode and a busy timeout keep concurrent tool calls from
//! tripping over each other.

mod claims;
mod documents;
mod graph;
mod records;
mod rows;
mod sections;

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed implementation of the full [`crate::storage::Store`]
/// surface.
pub struct SqliteStore {
    /// Protected by Mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the database file (None for in-memory).
    db_path: Option<PathBuf>,
    /// Configured embedding width, enforced on every embedding write.
    dimensions: usize,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl Into<PathBuf>, dimensions: usize) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::internal("create_data_dir", e))?;
            }
        }
        let conn =
            Connection::open(&db_path).map_err(|e| Error::internal("open_sqlite", e))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
            dimensions,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory(dimensions: usize) -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::internal("open_sqlite_in_memory", e))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
            dimensions,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Returns the configured embedding width.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Acquires the connection lock, recovering from poisoning.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Initializes pragmas and schema.
    fn initialize(&self) -> Result<()> {
        let conn = self.lock();
        configure_connection(&conn)?;
        create_schema(&conn)?;
        Ok(())
    }
}

/// Converts a `rusqlite` failure into the crate error shape.
pub(crate) fn db_err(operation: &str, e: impl std::fmt::Display) -> Error {
    Error::internal(operation, e)
}

/// Epoch milliseconds for a UTC instant.
pub(crate) fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// UTC instant from epoch milliseconds; clamps corrupt values to epoch.
pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(|| DateTime::from_timestamp_millis(0).unwrap_or_default())
}

/// Applies connection pragmas: WAL, busy timeout, foreign keys.
fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| db_err("pragma_synchronous", e))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| db_err("pragma_busy_timeout", e))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| db_err("pragma_foreign_keys", e))?;
    Ok(())
}

/// Creates all tables and indexes.
fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            format TEXT NOT NULL,
            document_type TEXT NOT NULL,
            title TEXT NOT NULL,
            authority_level INTEGER NOT NULL,
            raw_content TEXT NOT NULL,
            frontmatter TEXT NOT NULL,
            embedding BLOB,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_source_path ON documents(source_path);
        CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(document_type);
        CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC);

        CREATE TABLE IF NOT EXISTS document_tags (
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            tag TEXT NOT NULL,
            PRIMARY KEY (document_id, tag)
        );
        CREATE INDEX IF NOT EXISTS idx_document_tags_tag ON document_tags(tag);

        CREATE TABLE IF NOT EXISTS sections (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            header TEXT NOT NULL,
            content TEXT NOT NULL,
            level INTEGER NOT NULL,
            section_order INTEGER NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            embedding BLOB,
            UNIQUE (document_id, section_order)
        );
        CREATE INDEX IF NOT EXISTS idx_sections_document ON sections(document_id);

        CREATE TABLE IF NOT EXISTS claims (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            section_id TEXT NOT NULL REFERENCES sections(id) ON DELETE CASCADE,
            subject TEXT NOT NULL,
            predicate TEXT NOT NULL,
            object TEXT NOT NULL,
            normalized_subject TEXT NOT NULL,
            original_text TEXT NOT NULL,
            paraphrased INTEGER NOT NULL DEFAULT 0,
            confidence REAL NOT NULL,
            deprecated INTEGER NOT NULL DEFAULT 0,
            deprecated_at INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_claims_document ON claims(document_id);
        CREATE INDEX IF NOT EXISTS idx_claims_section ON claims(section_id);
        CREATE INDEX IF NOT EXISTS idx_claims_subject ON claims(normalized_subject);

        CREATE TABLE IF NOT EXISTS conflicts (
            id TEXT PRIMARY KEY,
            claim_a TEXT NOT NULL REFERENCES claims(id) ON DELETE CASCADE,
            claim_b TEXT NOT NULL REFERENCES claims(id) ON DELETE CASCADE,
            conflict_type TEXT NOT NULL,
            strength REAL NOT NULL,
            confidence REAL NOT NULL,
            detected_at INTEGER NOT NULL,
            UNIQUE (claim_a, claim_b)
        );

        CREATE TABLE IF NOT EXISTS entities (
            canonical_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            embedding BLOB
        );
        CREATE INDEX IF NOT EXISTS idx_entities_normalized ON entities(normalized_name);

        CREATE TABLE IF NOT EXISTS entity_aliases (
            entity_id TEXT NOT NULL REFERENCES entities(canonical_id) ON DELETE CASCADE,
            alias TEXT NOT NULL,
            normalized_alias TEXT NOT NULL,
            PRIMARY KEY (entity_id, normalized_alias)
        );
        CREATE INDEX IF NOT EXISTS idx_entity_aliases_norm ON entity_aliases(normalized_alias);

        CREATE TABLE IF NOT EXISTS entity_links (
            entity_id TEXT NOT NULL REFERENCES entities(canonical_id) ON DELETE CASCADE,
            claim_id TEXT NOT NULL REFERENCES claims(id) ON DELETE CASCADE,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            PRIMARY KEY (entity_id, claim_id)
        );
        CREATE INDEX IF NOT EXISTS idx_entity_links_claim ON entity_links(claim_id);

        CREATE TABLE IF NOT EXISTS supersessions (
            id TEXT PRIMARY KEY,
            old_document_id TEXT NOT NULL REFERENCES documents(id),
            new_document_id TEXT NOT NULL REFERENCES documents(id),
            reason TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (old_document_id, new_document_id)
        );

        CREATE TABLE IF NOT EXISTS consolidations (
            id TEXT PRIMARY KEY,
            source_document_ids TEXT NOT NULL,
            result_document_id TEXT,
            strategy TEXT NOT NULL,
            conflicts_resolved INTEGER NOT NULL,
            conflicts_pending INTEGER NOT NULL,
            cluster_id TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_consolidations_cluster ON consolidations(cluster_id);

        CREATE TABLE IF NOT EXISTS clusters (
            id TEXT PRIMARY KEY,
            document_ids TEXT NOT NULL,
            similarity_threshold REAL NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS provenance_events (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id),
            event_type TEXT NOT NULL,
            details TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_provenance_document ON provenance_events(document_id);",
    )
    .map_err(|e| db_err("create_schema", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_initializes() {
        let store = SqliteStore::in_memory(8).unwrap();
        assert_eq!(store.dimensions(), 8);
        assert!(store.db_path().is_none());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doctrine.db");
        let store = SqliteStore::open(&path, 8).unwrap();
        assert!(store.db_path().is_some());
        assert!(path.exists());
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let back = from_ms(to_ms(now));
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
