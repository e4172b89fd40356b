//! Overlap analysis.
//!
//! Builds an undirected document similarity graph (edges at cosine ≥
//! threshold), takes connected components of the configured minimum
//! size as clusters, persists them, and summarizes claim-level
//! conflicts per cluster.

use crate::embedding::{Embedder, display_similarity};
use crate::models::{Conflict, ConflictType, Document, DocumentId, OverlapCluster, normalize_term};
use crate::services::ConflictDetector;
use crate::storage::Store;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Conflict counts by type for a cluster.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ConflictsSummary {
    /// Agreement pairs.
    pub agreement: u32,
    /// Value-conflict pairs.
    pub value_conflict: u32,
    /// Direct-negation pairs.
    pub direct_negation: u32,
}

impl ConflictsSummary {
    /// Tallies a batch of conflicts.
    #[must_use]
    pub fn tally(conflicts: &[Conflict]) -> Self {
        let mut summary = Self::default();
        for conflict in conflicts {
            match conflict.conflict_type {
                ConflictType::Agreement => summary.agreement += 1,
                ConflictType::ValueConflict => summary.value_conflict += 1,
                ConflictType::DirectNegation => summary.direct_negation += 1,
            }
        }
        summary
    }
}

/// One overlap cluster, ready for the tool response.
#[derive(Debug, Clone)]
pub struct ClusterReport {
    /// Persisted cluster id.
    pub cluster_id: Uuid,
    /// Member documents.
    pub document_ids: Vec<DocumentId>,
    /// Similarity per unordered member pair.
    pub pairwise_similarities: Vec<(DocumentId, DocumentId, f32)>,
    /// Headers shared by at least two members (original casing).
    pub shared_headers: Vec<String>,
    /// Conflict counts across the cluster's claims.
    pub conflicts_summary: ConflictsSummary,
}

/// Disjoint-set union over document indexes.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Clusters documents by embedding similarity.
pub struct OverlapAnalyzer<'a, S: Store> {
    store: &'a S,
    embedder: &'a dyn Embedder,
    detector: &'a ConflictDetector,
}

impl<'a, S: Store> OverlapAnalyzer<'a, S> {
    /// Creates an analyzer.
    #[must_use]
    pub fn new(store: &'a S, embedder: &'a dyn Embedder, detector: &'a ConflictDetector) -> Self {
        Self {
            store,
            embedder,
            detector,
        }
    }

    /// Analyzes a scoped document set and persists the clusters found.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn analyze(
        &self,
        documents: &[Document],
        min_cluster_size: usize,
        similarity_threshold: f32,
        include_claim_conflicts: bool,
    ) -> Result<Vec<ClusterReport>> {
        let embeddings = self.resolve_embeddings(documents)?;
        let min_cluster_size = min_cluster_size.max(2);

        // Similarity graph: edge per pair at or above the threshold.
        let mut uf = UnionFind::new(documents.len());
        let mut similarities: HashMap<(usize, usize), f32> = HashMap::new();
        for i in 0..documents.len() {
            for j in i + 1..documents.len() {
                let (Some(a), Some(b)) = (&embeddings[i], &embeddings[j]) else {
                    continue;
                };
                let similarity = display_similarity(a, b);
                if similarity >= similarity_threshold {
                    uf.union(i, j);
                    similarities.insert((i, j), similarity);
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..documents.len() {
            let root = uf.find(i);
            components.entry(root).or_default().push(i);
        }

        let mut reports = Vec::new();
        for members in components.into_values() {
            if members.len() < min_cluster_size {
                continue;
            }
            reports.push(self.build_report(
                documents,
                &members,
                &similarities,
                similarity_threshold,
                include_claim_conflicts,
            )?);
        }
        Ok(reports)
    }

    /// Reuses stored document embeddings, computing and persisting any
    /// that are missing.
    fn resolve_embeddings(&self, documents: &[Document]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut embeddings = Vec::with_capacity(documents.len());
        for document in documents {
            if let Some(embedding) = &document.embedding {
                embeddings.push(Some(embedding.clone()));
                continue;
            }
            match self.embedder.embed(embed_text(document)) {
                Ok(embedding) => {
                    self.store
                        .update_document_embedding(document.id, &embedding)?;
                    embeddings.push(Some(embedding));
                },
                Err(err) => {
                    tracing::debug!(document = %document.id, "skipping unembeddable document: {err}");
                    embeddings.push(None);
                },
            }
        }
        Ok(embeddings)
    }

    fn build_report(
        &self,
        documents: &[Document],
        members: &[usize],
        similarities: &HashMap<(usize, usize), f32>,
        similarity_threshold: f32,
        include_claim_conflicts: bool,
    ) -> Result<ClusterReport> {
        let document_ids: Vec<DocumentId> = members.iter().map(|&i| documents[i].id).collect();

        let mut pairwise = Vec::new();
        for (x, &i) in members.iter().enumerate() {
            for &j in &members[x + 1..] {
                let key = if i < j { (i, j) } else { (j, i) };
                if let Some(&similarity) = similarities.get(&key) {
                    pairwise.push((documents[i].id, documents[j].id, similarity));
                }
            }
        }

        let conflicts_summary = if include_claim_conflicts {
            let claims = self.store.claims_for_documents(&document_ids)?;
            let conflicts = self.detector.detect(&claims);
            for conflict in &conflicts {
                self.store.upsert_conflict(conflict)?;
            }
            ConflictsSummary::tally(&conflicts)
        } else {
            ConflictsSummary::default()
        };

        let cluster = OverlapCluster {
            id: Uuid::new_v4(),
            document_ids: document_ids.clone(),
            similarity_threshold,
            created_at: Utc::now(),
        };
        self.store.create_cluster(&cluster)?;

        let shared_headers = self.shared_headers(&document_ids)?;
        Ok(ClusterReport {
            cluster_id: cluster.id,
            document_ids,
            pairwise_similarities: pairwise,
            shared_headers,
            conflicts_summary,
        })
    }

    /// Headers present in at least two member documents.
    fn shared_headers(&self, document_ids: &[DocumentId]) -> Result<Vec<String>> {
        let mut seen: HashMap<String, (String, HashSet<DocumentId>)> = HashMap::new();
        for &doc_id in document_ids {
            for section in self.store.sections_by_document(doc_id)? {
                if section.header.is_empty() {
                    continue;
                }
                let normalized = normalize_term(&section.header);
                let entry = seen
                    .entry(normalized)
                    .or_insert_with(|| (section.header.clone(), HashSet::new()));
                entry.1.insert(doc_id);
            }
        }
        let mut shared: Vec<String> = seen
            .into_values()
            .filter(|(_, docs)| docs.len() >= 2)
            .map(|(header, _)| header)
            .collect();
        shared.sort();
        Ok(shared)
    }
}

/// The text a document-level embedding is computed over, bounded so
/// giant documents stay cheap.
fn embed_text(document: &Document) -> &str {
    let text = document.raw_content.as_str();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::TrigramEmbedder;
    use crate::models::{ClaimId, ConflictType};

    #[test]
    fn test_union_find_components() {
        let mut uf = UnionFind::new(4);
        uf.union(0, 1);
        uf.union(2, 3);
        assert_eq!(uf.find(0), uf.find(1));
        assert_eq!(uf.find(2), uf.find(3));
        assert_ne!(uf.find(0), uf.find(2));
    }

    #[test]
    fn test_conflicts_summary_tally() {
        let a = ClaimId::new();
        let b = ClaimId::new();
        let conflicts = vec![
            Conflict::new(a, b, ConflictType::Agreement, 0.0, 0.5),
            Conflict::new(a, b, ConflictType::ValueConflict, 0.45, 0.5),
            Conflict::new(a, b, ConflictType::ValueConflict, 0.6, 0.5),
        ];
        let summary = ConflictsSummary::tally(&conflicts);
        assert_eq!(summary.agreement, 1);
        assert_eq!(summary.value_conflict, 2);
        assert_eq!(summary.direct_negation, 0);
    }

    #[test]
    fn test_embed_text_bounds_large_documents() {
        let doc_text = "x".repeat(10_000);
        assert_eq!(doc_text.len(), 10_000);
        let embedder = TrigramEmbedder::new(16);
        // Bounded embedding input still produces a full-width vector.
        let v = embedder.embed(&doc_text[..8_192]).unwrap();
        assert_eq!(v.len(), 16);
    }
}
