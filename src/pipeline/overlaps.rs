//! The `find_overlaps` handler.

use super::types::{ClusterSummary, FindOverlapsRequest, FindOverlapsResponse, PairwiseSimilarity};
use super::Pipeline;
use crate::services::OverlapAnalyzer;
use crate::storage::Store;
use crate::Result;
use std::time::Instant;

impl<S: Store> Pipeline<S> {
    /// Clusters the scoped documents by embedding similarity and
    /// summarizes claim conflicts per cluster.
    ///
    /// Clusters are persisted so a later `consolidate_documents` call
    /// can target one by id.
    ///
    /// # Errors
    ///
    /// Returns store errors unchanged.
    pub fn find_overlaps(&self, request: &FindOverlapsRequest) -> Result<FindOverlapsResponse> {
        let started = Instant::now();
        if let Some(scope) = &request.scope {
            scope.validate()?;
        }

        let documents = self.resolve_scope(request.scope.as_ref(), false)?;
        let threshold = request
            .similarity_threshold
            .unwrap_or(self.config().thresholds.similarity)
            .clamp(0.0, 1.0);

        let detector = self.detector();
        let analyzer = OverlapAnalyzer::new(self.store().as_ref(), self.embedder(), &detector);
        let reports = analyzer.analyze(
            &documents,
            request.min_cluster_size,
            threshold,
            request.include_claim_conflicts,
        )?;

        let mut clusters: Vec<ClusterSummary> = reports
            .into_iter()
            .map(|report| ClusterSummary {
                cluster_id: report.cluster_id,
                document_ids: report.document_ids,
                pairwise_similarities: report
                    .pairwise_similarities
                    .into_iter()
                    .map(|(document_a, document_b, similarity)| PairwiseSimilarity {
                        document_a,
                        document_b,
                        similarity,
                    })
                    .collect(),
                shared_headers: report.shared_headers,
                conflicts_summary: report.conflicts_summary,
            })
            .collect();
        clusters.sort_by(|a, b| b.document_ids.len().cmp(&a.document_ids.len()));

        Ok(FindOverlapsResponse {
            clusters,
            processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}
