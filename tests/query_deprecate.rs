//! End-to-end query and deprecation scenarios.

mod common;

use common::{DOC_A, DOC_B, ingest_content, scenario_pipeline};
use doctrine::models::{DocumentId, MergeStrategy};
use doctrine::pipeline::{
    ConsolidateRequest, DeprecateRequest, DeprecationStatus, FindOverlapsRequest,
    MigrationStatus, Pipeline, QueryRequest,
};
use doctrine::storage::{ClaimStore, DocumentStore, RecordStore, SqliteStore};

struct ConsolidatedCorpus {
    pipeline: Pipeline<SqliteStore>,
    doc_a: DocumentId,
    doc_b: DocumentId,
    consolidated: DocumentId,
}

/// Ingests the retry docs, clusters them, and consolidates with the
/// smart strategy.
fn consolidated_corpus() -> ConsolidatedCorpus {
    let pipeline = scenario_pipeline();
    let a = ingest_content(&pipeline, DOC_A, 7);
    let b = ingest_content(&pipeline, DOC_B, 5);
    let overlaps = pipeline
        .find_overlaps(&FindOverlapsRequest {
            similarity_threshold: Some(0.70),
            ..FindOverlapsRequest::default()
        })
        .unwrap();
    let response = pipeline
        .consolidate_documents(&ConsolidateRequest {
            cluster_id: Some(overlaps.clusters[0].cluster_id),
            strategy: MergeStrategy::Smart,
            auto_resolve_below: 0.5,
            require_human_above: 0.95,
            ..ConsolidateRequest::default()
        })
        .unwrap();
    let consolidated = response
        .output_document
        .and_then(|o| o.document_id)
        .expect("persisted consolidation");
    ConsolidatedCorpus {
        pipeline,
        doc_a: a.document_id,
        doc_b: b.document_id,
        consolidated,
    }
}

#[test]
fn test_query_cites_the_consolidated_document() {
    let corpus = consolidated_corpus();
    let response = corpus
        .pipeline
        .get_source_of_truth(&QueryRequest {
            query: Some("How many retries are configured?".to_string()),
            ..QueryRequest::default()
        })
        .unwrap();

    assert!(response.answer.contains('3'));
    assert!(response.confidence >= 0.7);
    assert!(response.knowledge_gaps.is_empty());
    assert_eq!(response.sources[0].document_id, corpus.consolidated);
    assert!(response.sources[0].relevance_score > 0.0);

    // The consolidated document's high-confidence claim supports the
    // answer and verification ran on it.
    assert!(
        response
            .supporting_claims
            .iter()
            .any(|c| c.text.contains("3 times") && c.verified == Some(true))
    );
}

#[test]
fn test_query_without_llm_degrades_to_excerpt() {
    let corpus = consolidated_corpus();
    let no_llm = Pipeline::new(
        corpus.pipeline.store().clone(),
        std::sync::Arc::new(doctrine::embedding::TrigramEmbedder::new(
            corpus.pipeline.config().embedding.dimensions,
        )),
        None,
        corpus.pipeline.config().clone(),
    );

    let response = no_llm
        .get_source_of_truth(&QueryRequest {
            query: Some("How many retries are configured?".to_string()),
            verify_claims: false,
            ..QueryRequest::default()
        })
        .unwrap();

    // Fallback answer: top excerpt at half its relevance.
    assert!(response.answer.contains("retries 3 times"));
    assert!(response.confidence > 0.0);
    assert!(response.confidence <= 0.5);
}

#[test]
fn test_deprecate_migrates_references_and_cascades() {
    let corpus = consolidated_corpus();
    let needle = corpus.doc_a.to_string();

    // The consolidated document references doc A through its
    // provenance annotations.
    let before = corpus
        .pipeline
        .store()
        .get_document(corpus.consolidated)
        .unwrap()
        .unwrap();
    assert!(before.raw_content.contains(&needle));

    let response = corpus
        .pipeline
        .deprecate_document(&DeprecateRequest {
            document_id: corpus.doc_a,
            reason: "consolidated".to_string(),
            superseded_by: Some(corpus.consolidated),
            migrate_references: true,
            archive: false,
        })
        .unwrap();

    assert_eq!(response.status, DeprecationStatus::Deprecated);
    assert_eq!(response.superseded_by, Some(corpus.consolidated));
    assert!(response.claims_affected >= 1);
    assert_eq!(response.sections_affected, 3);

    let migrated = response
        .affected_references
        .iter()
        .find(|r| r.referencing_document_id == corpus.consolidated)
        .expect("consolidated doc references doc A");
    assert_eq!(migrated.migration_status, MigrationStatus::Migrated);
    assert!(migrated.reference_count >= 1);

    // Raw content now carries the successor id instead.
    let after = corpus
        .pipeline
        .store()
        .get_document(corpus.consolidated)
        .unwrap()
        .unwrap();
    assert!(!after.raw_content.contains(&needle));
    assert!(after.raw_content.contains(&corpus.consolidated.to_string()));

    // Deprecation cascades to every claim of doc A.
    let claims = corpus.pipeline.store().claims_by_document(corpus.doc_a).unwrap();
    assert!(!claims.is_empty());
    for claim in &claims {
        assert!(claim.deprecated);
        assert!(claim.deprecated_at.is_some());
    }
}

#[test]
fn test_queries_exclude_deprecated_documents() {
    let corpus = consolidated_corpus();
    corpus
        .pipeline
        .deprecate_document(&DeprecateRequest {
            document_id: corpus.doc_a,
            reason: "consolidated".to_string(),
            superseded_by: Some(corpus.consolidated),
            migrate_references: true,
            archive: false,
        })
        .unwrap();

    let response = corpus
        .pipeline
        .get_source_of_truth(&QueryRequest {
            query: Some("How many retries are configured?".to_string()),
            ..QueryRequest::default()
        })
        .unwrap();
    assert!(!response.sources.is_empty());
    for source in &response.sources {
        assert_ne!(source.document_id, corpus.doc_a);
    }

    // Opting in brings doc A back.
    let with_deprecated = corpus
        .pipeline
        .get_source_of_truth(&QueryRequest {
            query: Some("How many retries are configured?".to_string()),
            include_deprecated: true,
            ..QueryRequest::default()
        })
        .unwrap();
    assert!(
        with_deprecated
            .sources
            .iter()
            .any(|s| s.document_id == corpus.doc_a)
    );
}

#[test]
fn test_archive_changes_document_type() {
    let corpus = consolidated_corpus();
    let response = corpus
        .pipeline
        .deprecate_document(&DeprecateRequest {
            document_id: corpus.doc_b,
            reason: "retired".to_string(),
            superseded_by: None,
            migrate_references: true,
            archive: true,
        })
        .unwrap();

    assert_eq!(response.status, DeprecationStatus::Archived);
    let document = corpus
        .pipeline
        .store()
        .get_document(corpus.doc_b)
        .unwrap()
        .unwrap();
    assert_eq!(
        document.document_type,
        doctrine::models::DocumentType::Archive
    );
}

#[test]
fn test_supersession_cycles_are_rejected() {
    let corpus = consolidated_corpus();
    corpus
        .pipeline
        .deprecate_document(&DeprecateRequest {
            document_id: corpus.doc_a,
            reason: "first".to_string(),
            superseded_by: Some(corpus.doc_b),
            migrate_references: false,
            archive: false,
        })
        .unwrap();

    let err = corpus
        .pipeline
        .deprecate_document(&DeprecateRequest {
            document_id: corpus.doc_b,
            reason: "second".to_string(),
            superseded_by: Some(corpus.doc_a),
            migrate_references: false,
            archive: false,
        })
        .unwrap_err();
    assert_eq!(err.error_code(), "Conflict");
}

#[test]
fn test_deprecation_events_are_recorded() {
    let corpus = consolidated_corpus();
    let response = corpus
        .pipeline
        .deprecate_document(&DeprecateRequest {
            document_id: corpus.doc_a,
            reason: "consolidated".to_string(),
            superseded_by: Some(corpus.consolidated),
            migrate_references: true,
            archive: false,
        })
        .unwrap();

    let events = corpus
        .pipeline
        .store()
        .events_for_document(corpus.doc_a)
        .unwrap();
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(kinds.contains(&"ingestion"));
    assert!(kinds.contains(&"supersession"));
    assert!(kinds.contains(&"deprecation"));
    assert!(events.iter().any(|e| e.id == response.deprecation_id));
}

#[test]
fn test_missing_document_is_not_found() {
    let pipeline = scenario_pipeline();
    let err = pipeline
        .deprecate_document(&DeprecateRequest {
            document_id: DocumentId::new(),
            reason: "gone".to_string(),
            superseded_by: None,
            migrate_references: false,
            archive: false,
        })
        .unwrap_err();
    assert_eq!(err.error_code(), "NotFound");
}
