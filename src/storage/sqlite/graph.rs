//! Entity co-occurrence graph implementation.

use super::rows::entity_from_parts;
use super::{SqliteStore, db_err};
use crate::models::{Entity, EntityId, EntityLink, normalize_term};
use crate::storage::traits::GraphStore;
use crate::storage::vector::{check_width, encode_embedding};
use crate::Result;
use rusqlite::{Connection, OptionalExtension, params};

fn load_aliases(conn: &Connection, entity_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT alias FROM entity_aliases WHERE entity_id = ?1 ORDER BY alias")
        .map_err(|e| db_err("load_aliases", e))?;
    let aliases = stmt
        .query_map([entity_id], |row| row.get::<_, String>(0))
        .map_err(|e| db_err("load_aliases", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| db_err("load_aliases", e))?;
    Ok(aliases)
}

fn load_entity(conn: &Connection, canonical_id: &str) -> Result<Option<Entity>> {
    let row = conn
        .query_row(
            "SELECT name, embedding FROM entities WHERE canonical_id = ?1",
            [canonical_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<Vec<u8>>>(1)?)),
        )
        .optional()
        .map_err(|e| db_err("load_entity", e))?;
    let Some((name, embedding)) = row else {
        return Ok(None);
    };
    let aliases = load_aliases(conn, canonical_id)?;
    entity_from_parts(canonical_id, name, embedding, aliases).map(Some)
}

impl GraphStore for SqliteStore {
    fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        if let Some(embedding) = &entity.embedding {
            check_width(embedding, self.dimensions())?;
        }
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO entities (canonical_id, name, normalized_name, embedding) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entity.canonical_id.to_string(),
                entity.name,
                normalize_term(&entity.name),
                entity.embedding.as_deref().map(encode_embedding),
            ],
        )
        .map_err(|e| db_err("upsert_entity", e))?;

        for alias in &entity.aliases {
            conn.execute(
                "INSERT OR IGNORE INTO entity_aliases (entity_id, alias, normalized_alias) \
                 VALUES (?1, ?2, ?3)",
                params![entity.canonical_id.to_string(), alias, normalize_term(alias)],
            )
            .map_err(|e| db_err("upsert_entity", e))?;
        }
        Ok(())
    }

    fn find_entity(&self, normalized: &str) -> Result<Option<Entity>> {
        let conn = self.lock();
        let canonical: Option<String> = conn
            .query_row(
                "SELECT canonical_id FROM entities WHERE normalized_name = ?1",
                [normalized],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("find_entity", e))?;
        if let Some(id) = canonical {
            return load_entity(&conn, &id);
        }

        let via_alias: Option<String> = conn
            .query_row(
                "SELECT entity_id FROM entity_aliases WHERE normalized_alias = ?1",
                [normalized],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("find_entity", e))?;
        match via_alias {
            Some(id) => load_entity(&conn, &id),
            None => Ok(None),
        }
    }

    fn add_entity_alias(&self, id: EntityId, alias: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO entity_aliases (entity_id, alias, normalized_alias) \
             VALUES (?1, ?2, ?3)",
            params![id.to_string(), alias, normalize_term(alias)],
        )
        .map_err(|e| db_err("add_entity_alias", e))?;
        Ok(())
    }

    fn all_entities(&self) -> Result<Vec<Entity>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT canonical_id, name, embedding FROM entities ORDER BY name")
            .map_err(|e| db_err("all_entities", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                ))
            })
            .map_err(|e| db_err("all_entities", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("all_entities", e))?;

        rows.into_iter()
            .map(|(id, name, embedding)| {
                let aliases = load_aliases(&conn, &id)?;
                entity_from_parts(&id, name, embedding, aliases)
            })
            .collect()
    }

    fn link_claim_to_entity(&self, link: &EntityLink) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO entity_links (entity_id, claim_id, document_id) \
             VALUES (?1, ?2, ?3)",
            params![
                link.entity_id.to_string(),
                link.claim_id.to_string(),
                link.document_id.to_string(),
            ],
        )
        .map_err(|e| db_err("link_claim_to_entity", e))?;
        Ok(())
    }

    fn entity_neighbors(&self, id: EntityId) -> Result<Vec<Entity>> {
        let conn = self.lock();
        // Neighbors share a claim or a document with the given entity.
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT other.entity_id \
                 FROM entity_links own \
                 JOIN entity_links other \
                   ON (other.claim_id = own.claim_id OR other.document_id = own.document_id) \
                  AND other.entity_id != own.entity_id \
                 WHERE own.entity_id = ?1",
            )
            .map_err(|e| db_err("entity_neighbors", e))?;
        let ids = stmt
            .query_map([id.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| db_err("entity_neighbors", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("entity_neighbors", e))?;

        let mut neighbors = Vec::with_capacity(ids.len());
        for entity_id in ids {
            if let Some(entity) = load_entity(&conn, &entity_id)? {
                neighbors.push(entity);
            }
        }
        Ok(neighbors)
    }
}
