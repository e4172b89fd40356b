//! End-to-end consolidation scenarios.

mod common;

use common::{DOC_A, DOC_B, ingest_content, scenario_pipeline};
use doctrine::models::{ConsolidationStatus, DocumentFormat, MergeStrategy};
use doctrine::pipeline::{ConsolidateRequest, FindOverlapsRequest, Pipeline};
use doctrine::storage::{DocumentStore, SqliteStore};
use uuid::Uuid;

struct Corpus {
    pipeline: Pipeline<SqliteStore>,
    doc_a: doctrine::models::DocumentId,
    doc_b: doctrine::models::DocumentId,
    cluster_id: Uuid,
}

fn corpus() -> Corpus {
    let pipeline = scenario_pipeline();
    let a = ingest_content(&pipeline, DOC_A, 7);
    let b = ingest_content(&pipeline, DOC_B, 5);
    let overlaps = pipeline
        .find_overlaps(&FindOverlapsRequest {
            similarity_threshold: Some(0.70),
            ..FindOverlapsRequest::default()
        })
        .unwrap();
    Corpus {
        pipeline,
        doc_a: a.document_id,
        doc_b: b.document_id,
        cluster_id: overlaps.clusters[0].cluster_id,
    }
}

#[test]
fn test_smart_consolidation_resolves_toward_confidence() {
    let corpus = corpus();
    let response = corpus
        .pipeline
        .consolidate_documents(&ConsolidateRequest {
            cluster_id: Some(corpus.cluster_id),
            strategy: MergeStrategy::Smart,
            auto_resolve_below: 0.5,
            require_human_above: 0.95,
            ..ConsolidateRequest::default()
        })
        .unwrap();

    assert_eq!(response.status, ConsolidationStatus::Completed);
    assert_eq!(response.conflicts_resolved, 1);
    assert!(response.conflicts_pending.is_empty());

    let output = response.output_document.expect("output document");
    assert!(output.document_id.is_some());
    assert!(output.content.contains("Retry Policy"));
    // The 0.9-confidence claim wins over the 0.6 one.
    assert!(output.content.contains("3 times"));
    assert!(!output.content.contains("5 times"));
    assert!(output.title.starts_with("Consolidated:"));

    let provenance = response
        .provenance_map
        .get("Retry Policy")
        .expect("retry policy provenance");
    assert!(provenance.contains(&corpus.doc_a));
}

#[test]
fn test_authority_consolidation_prefers_doc_a() {
    let corpus = corpus();
    let response = corpus
        .pipeline
        .consolidate_documents(&ConsolidateRequest {
            cluster_id: Some(corpus.cluster_id),
            strategy: MergeStrategy::AuthorityWins,
            auto_resolve_below: 0.5,
            require_human_above: 0.95,
            dry_run: true,
            ..ConsolidateRequest::default()
        })
        .unwrap();

    let output = response.output_document.expect("output document");
    // Authority 7 beats authority 5.
    assert!(output.content.contains("3 times"));
    assert_eq!(
        response.provenance_map.get("Retry Policy"),
        Some(&vec![corpus.doc_a])
    );
}

#[test]
fn test_merge_all_surfaces_pending_conflicts() {
    let corpus = corpus();
    let response = corpus
        .pipeline
        .consolidate_documents(&ConsolidateRequest {
            cluster_id: Some(corpus.cluster_id),
            strategy: MergeStrategy::MergeAll,
            dry_run: true,
            ..ConsolidateRequest::default()
        })
        .unwrap();

    assert_eq!(response.status, ConsolidationStatus::PendingReview);
    assert_eq!(response.conflicts_resolved, 0);
    assert_eq!(response.conflicts_pending.len(), 1);
    let pending = &response.conflicts_pending[0];
    assert_eq!(pending.options.len(), 2);
    assert!(pending.description.contains("retries"));

    let output = response.output_document.expect("output document");
    assert!(output.content.contains("3 times"));
    assert!(output.content.contains("5 times"));
}

#[test]
fn test_dry_run_persists_nothing() {
    let corpus = corpus();
    let before = corpus.pipeline.store().list_documents().unwrap().len();

    let response = corpus
        .pipeline
        .consolidate_documents(&ConsolidateRequest {
            cluster_id: Some(corpus.cluster_id),
            dry_run: true,
            auto_resolve_below: 0.5,
            ..ConsolidateRequest::default()
        })
        .unwrap();

    let output = response.output_document.expect("output document");
    assert!(output.document_id.is_none());
    assert!(!output.content.is_empty());
    assert_eq!(corpus.pipeline.store().list_documents().unwrap().len(), before);

    // A fresh overlap pass still sees exactly the two source documents.
    let overlaps = corpus
        .pipeline
        .find_overlaps(&FindOverlapsRequest {
            similarity_threshold: Some(0.70),
            ..FindOverlapsRequest::default()
        })
        .unwrap();
    assert_eq!(overlaps.clusters.len(), 1);
    let mut members = overlaps.clusters[0].document_ids.clone();
    members.sort();
    let mut expected = vec![corpus.doc_a, corpus.doc_b];
    expected.sort();
    assert_eq!(members, expected);
}

#[test]
fn test_consolidation_completeness_and_provenance_coverage() {
    let corpus = corpus();
    let response = corpus
        .pipeline
        .consolidate_documents(&ConsolidateRequest {
            cluster_id: Some(corpus.cluster_id),
            auto_resolve_below: 0.5,
            ..ConsolidateRequest::default()
        })
        .unwrap();

    // Every header present in a source appears in the output.
    for header in ["Overview", "Retry Policy"] {
        assert!(
            response.provenance_map.contains_key(header),
            "missing header {header}"
        );
        let output = response.output_document.as_ref().expect("output");
        assert!(output.content.contains(header));
    }

    // Every provenance entry points at a source document.
    let sources = [corpus.doc_a, corpus.doc_b];
    for (header, docs) in &response.provenance_map {
        assert!(!docs.is_empty(), "empty provenance for {header}");
        for doc in docs {
            assert!(sources.contains(doc));
        }
    }

    // Per-source contribution stats cover the bases.
    let a_summary = response
        .source_documents
        .iter()
        .find(|s| s.document_id == corpus.doc_a)
        .expect("doc A summary");
    assert!(a_summary.sections_used >= 1);
    assert!(a_summary.claims_included >= 1);
}

#[test]
fn test_consolidated_document_is_reingested_with_claims() {
    let corpus = corpus();
    let response = corpus
        .pipeline
        .consolidate_documents(&ConsolidateRequest {
            cluster_id: Some(corpus.cluster_id),
            auto_resolve_below: 0.5,
            ..ConsolidateRequest::default()
        })
        .unwrap();

    let result_id = response
        .output_document
        .and_then(|o| o.document_id)
        .expect("persisted result");
    let document = corpus
        .pipeline
        .store()
        .get_document(result_id)
        .unwrap()
        .expect("stored consolidated document");

    assert!(document.title.starts_with("Consolidated:"));
    assert_eq!(document.authority_level, 7);
    assert!(document.tags.contains(&"consolidated".to_string()));
    assert!(document.frontmatter.contains_key("consolidated_from"));

    use doctrine::storage::ClaimStore;
    let claims = corpus.pipeline.store().claims_by_document(result_id).unwrap();
    assert!(!claims.is_empty());
}

#[test]
fn test_yaml_output_round_trips_headers() {
    let corpus = corpus();
    let response = corpus
        .pipeline
        .consolidate_documents(&ConsolidateRequest {
            cluster_id: Some(corpus.cluster_id),
            output_format: DocumentFormat::Yaml,
            dry_run: true,
            auto_resolve_below: 0.5,
            ..ConsolidateRequest::default()
        })
        .unwrap();

    let output = response.output_document.expect("output");
    let parsed =
        doctrine::parser::parse(&output.content, DocumentFormat::Yaml, None).unwrap();
    assert!(parsed.sections.iter().any(|s| s.header == "Retry Policy"));
}

#[test]
fn test_unknown_cluster_is_not_found() {
    let corpus = corpus();
    let err = corpus
        .pipeline
        .consolidate_documents(&ConsolidateRequest {
            cluster_id: Some(Uuid::new_v4()),
            ..ConsolidateRequest::default()
        })
        .unwrap_err();
    assert_eq!(err.error_code(), "NotFound");
}

#[test]
fn test_target_union_validation() {
    let corpus = corpus();
    let err = corpus
        .pipeline
        .consolidate_documents(&ConsolidateRequest::default())
        .unwrap_err();
    assert_eq!(err.error_code(), "InvalidInput");

    let err = corpus
        .pipeline
        .consolidate_documents(&ConsolidateRequest {
            cluster_id: Some(corpus.cluster_id),
            document_ids: Some(vec![corpus.doc_a]),
            ..ConsolidateRequest::default()
        })
        .unwrap_err();
    assert_eq!(err.error_code(), "InvalidInput");
}
