//! Entity resolution.
//!
//! Maps mention strings to canonical entities: exact canonical lookup,
//! then alias lookup, then embedding nearest-neighbor. A near miss
//! above the alias threshold attaches the mention as a new alias;
//! anything else mints a fresh canonical entity.

use crate::embedding::{Embedder, cosine_similarity};
use crate::models::{ClaimId, DocumentId, Entity, EntityId, EntityLink, normalize_term};
use crate::storage::GraphStore;
use crate::Result;

/// Resolves mentions against the entity co-occurrence graph.
pub struct EntityResolver<'a> {
    graph: &'a dyn GraphStore,
    embedder: &'a dyn Embedder,
    alias_threshold: f32,
}

impl<'a> EntityResolver<'a> {
    /// Creates a resolver with the given alias-attachment threshold.
    #[must_use]
    pub fn new(
        graph: &'a dyn GraphStore,
        embedder: &'a dyn Embedder,
        alias_threshold: f32,
    ) -> Self {
        Self {
            graph,
            embedder,
            alias_threshold,
        }
    }

    /// Resolves a batch of mentions to canonical entity ids.
    ///
    /// Unresolvable (empty after normalization) mentions are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph store fails.
    pub fn resolve(&self, mentions: &[String]) -> Result<Vec<(String, EntityId)>> {
        let mut resolved = Vec::with_capacity(mentions.len());
        for mention in mentions {
            if normalize_term(mention).is_empty() {
                continue;
            }
            let id = self.resolve_mention(mention)?;
            resolved.push((mention.clone(), id));
        }
        Ok(resolved)
    }

    /// Resolves one mention, minting a canonical entity when nothing
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph store fails.
    pub fn resolve_mention(&self, mention: &str) -> Result<EntityId> {
        let normalized = normalize_term(mention);

        // Canonical and alias lookups share one store call.
        if let Some(entity) = self.graph.find_entity(&normalized)? {
            return Ok(entity.canonical_id);
        }

        // Embedding nearest-neighbor over the known entities.
        if let Ok(query) = self.embedder.embed(&normalized) {
            let mut best: Option<(EntityId, f32)> = None;
            for entity in self.graph.all_entities()? {
                let Some(embedding) = &entity.embedding else {
                    continue;
                };
                let similarity = cosine_similarity(&query, embedding);
                if best.is_none_or(|(_, b)| similarity > b) {
                    best = Some((entity.canonical_id, similarity));
                }
            }
            if let Some((id, similarity)) = best {
                if similarity >= self.alias_threshold {
                    self.graph.add_entity_alias(id, mention)?;
                    return Ok(id);
                }
            }
        }

        let entity = Entity {
            canonical_id: EntityId::new(),
            name: mention.trim().to_string(),
            aliases: Vec::new(),
            embedding: self.embedder.embed(&normalized).ok(),
        };
        self.graph.upsert_entity(&entity)?;
        Ok(entity.canonical_id)
    }

    /// Records a claim→entity co-occurrence edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph store fails.
    pub fn link_claim_to_entity(
        &self,
        claim_id: ClaimId,
        canonical_id: EntityId,
        document_id: DocumentId,
    ) -> Result<()> {
        self.graph.link_claim_to_entity(&EntityLink {
            entity_id: canonical_id,
            claim_id,
            document_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::TrigramEmbedder;
    use crate::storage::SqliteStore;

    fn setup() -> (SqliteStore, TrigramEmbedder) {
        (
            SqliteStore::in_memory(TrigramEmbedder::DEFAULT_DIMENSIONS).unwrap(),
            TrigramEmbedder::default(),
        )
    }

    #[test]
    fn test_mints_then_reuses_canonical() {
        let (store, embedder) = setup();
        let resolver = EntityResolver::new(&store, &embedder, 0.88);

        let first = resolver.resolve_mention("PostgreSQL").unwrap();
        let second = resolver.resolve_mention("postgresql").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_near_identical_mention_becomes_alias() {
        let (store, embedder) = setup();
        let resolver = EntityResolver::new(&store, &embedder, 0.88);

        let canonical = resolver.resolve_mention("retry policy").unwrap();
        // Punctuation variants normalize to the same term.
        let variant = resolver.resolve_mention("Retry-Policy").unwrap();
        assert_eq!(canonical, variant);
    }

    #[test]
    fn test_distinct_mentions_mint_distinct_entities() {
        let (store, embedder) = setup();
        let resolver = EntityResolver::new(&store, &embedder, 0.88);

        let a = resolver.resolve_mention("postgresql").unwrap();
        let b = resolver.resolve_mention("kafka ingestion topology").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.all_entities().unwrap().len(), 2);
    }

    #[test]
    fn test_batch_resolution_skips_empty() {
        let (store, embedder) = setup();
        let resolver = EntityResolver::new(&store, &embedder, 0.88);
        let resolved = resolver
            .resolve(&["redis".to_string(), "--".to_string()])
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "redis");
    }
}
