//! End-to-end ingest and overlap detection.

mod common;

use common::{DOC_A, DOC_B, ingest_content, pipeline_with, scenario_pipeline};
use doctrine::models::DocumentType;
use doctrine::parser::{self, ParsedSection};
use doctrine::pipeline::{FindOverlapsRequest, IngestRequest, QueryRequest, Scope};
use doctrine::storage::{ClaimStore, DocumentStore, SectionStore};

#[test]
fn test_ingest_reports_sections_and_claims() {
    let pipeline = scenario_pipeline();
    let response = ingest_content(&pipeline, DOC_A, 7);

    assert_eq!(response.title, "Service Spec");
    // Preamble + Overview + Retry Policy.
    assert_eq!(response.sections_extracted, 3);
    assert_eq!(response.claims_extracted, 1);
    assert!(response.entities_identified >= 1);
    // Three section embeddings plus the document embedding.
    assert_eq!(response.embeddings_generated, 4);
    assert!(response.similar_documents.is_empty());
    assert_eq!(response.potential_conflicts, 0);
}

#[test]
fn test_second_ingest_sees_similarity_and_conflicts() {
    let pipeline = scenario_pipeline();
    ingest_content(&pipeline, DOC_A, 7);
    let response = ingest_content(&pipeline, DOC_B, 5);

    // Doc A shares a subject ("the service") and most of its wording.
    assert_eq!(response.potential_conflicts, 1);
    assert_eq!(response.similar_documents.len(), 1);
    assert!(response.similar_documents[0].similarity > 0.5);
}

#[test]
fn test_round_trip_of_stored_sections() {
    let pipeline = scenario_pipeline();
    let response = ingest_content(&pipeline, DOC_A, 7);

    let sections = pipeline
        .store()
        .sections_by_document(response.document_id)
        .unwrap();
    let parsed: Vec<ParsedSection> = sections
        .iter()
        .map(|s| ParsedSection {
            header: s.header.clone(),
            content: s.content.clone(),
            level: s.level,
            start_line: s.start_line,
            end_line: s.end_line,
        })
        .collect();
    assert_eq!(parser::reassemble(&parsed).trim_end(), DOC_A.trim_end());
}

#[test]
fn test_stable_hash_across_metadata() {
    let pipeline = scenario_pipeline();
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("one.md");
    let path_b = dir.path().join("two.md");
    std::fs::write(&path_a, DOC_A).unwrap();
    std::fs::write(&path_b, DOC_A).unwrap();

    let first = pipeline
        .ingest_document(&IngestRequest {
            file_path: Some(path_a.to_string_lossy().into_owned()),
            document_type: Some(DocumentType::Spec),
            authority_level: 7,
            ..IngestRequest::default()
        })
        .unwrap();
    let second = pipeline
        .ingest_document(&IngestRequest {
            file_path: Some(path_b.to_string_lossy().into_owned()),
            document_type: Some(DocumentType::Guide),
            authority_level: 2,
            tags: vec!["ops".to_string()],
            ..IngestRequest::default()
        })
        .unwrap();

    let doc_a = pipeline.store().get_document(first.document_id).unwrap().unwrap();
    let doc_b = pipeline.store().get_document(second.document_id).unwrap().unwrap();
    assert_ne!(doc_a.id, doc_b.id);
    assert_eq!(doc_a.content_hash, doc_b.content_hash);
}

#[test]
fn test_idempotent_reingest() {
    let pipeline = scenario_pipeline();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spec.md");
    std::fs::write(&path, DOC_A).unwrap();

    let request = IngestRequest {
        file_path: Some(path.to_string_lossy().into_owned()),
        document_type: Some(DocumentType::Spec),
        authority_level: 7,
        ..IngestRequest::default()
    };
    let first = pipeline.ingest_document(&request).unwrap();
    let second = pipeline.ingest_document(&request).unwrap();

    assert_eq!(first.document_id, second.document_id);
    assert_eq!(first.sections_extracted, second.sections_extracted);
    assert_eq!(first.claims_extracted, second.claims_extracted);
    assert_eq!(pipeline.store().list_documents().unwrap().len(), 1);

    let sections = pipeline
        .store()
        .sections_by_document(first.document_id)
        .unwrap();
    assert_eq!(sections.len(), first.sections_extracted as usize);
}

#[test]
fn test_claim_locality_and_grounding() {
    let pipeline = scenario_pipeline();
    let response = ingest_content(&pipeline, DOC_A, 7);

    let claims = pipeline
        .store()
        .claims_by_document(response.document_id)
        .unwrap();
    assert!(!claims.is_empty());
    for claim in &claims {
        let section = pipeline
            .store()
            .get_section(claim.section_id)
            .unwrap()
            .expect("claim section exists");
        assert_eq!(section.document_id, claim.document_id);
        assert!(
            claim.paraphrased || section.content.contains(&claim.original_text),
            "claim text must be verbatim or flagged"
        );
    }
}

#[test]
fn test_invalid_source_union() {
    let pipeline = scenario_pipeline();
    let err = pipeline
        .ingest_document(&IngestRequest {
            document_type: Some(DocumentType::Spec),
            ..IngestRequest::default()
        })
        .unwrap_err();
    assert_eq!(err.error_code(), "InvalidInput");
}

#[test]
fn test_find_overlaps_clusters_the_retry_docs() {
    let pipeline = scenario_pipeline();
    let a = ingest_content(&pipeline, DOC_A, 7);
    let b = ingest_content(&pipeline, DOC_B, 5);

    let response = pipeline
        .find_overlaps(&FindOverlapsRequest {
            similarity_threshold: Some(0.70),
            ..FindOverlapsRequest::default()
        })
        .unwrap();

    assert_eq!(response.clusters.len(), 1);
    let cluster = &response.clusters[0];
    assert_eq!(cluster.document_ids.len(), 2);
    assert!(cluster.document_ids.contains(&a.document_id));
    assert!(cluster.document_ids.contains(&b.document_id));
    assert!(cluster.conflicts_summary.value_conflict >= 1);
    assert!(
        cluster
            .shared_headers
            .iter()
            .any(|h| h == "Retry Policy")
    );
    assert_eq!(cluster.pairwise_similarities.len(), 1);
    assert!(cluster.pairwise_similarities[0].similarity >= 0.70);
}

#[test]
fn test_conflict_symmetry_in_store() {
    let pipeline = scenario_pipeline();
    let a = ingest_content(&pipeline, DOC_A, 7);
    let b = ingest_content(&pipeline, DOC_B, 5);

    pipeline
        .find_overlaps(&FindOverlapsRequest {
            similarity_threshold: Some(0.70),
            ..FindOverlapsRequest::default()
        })
        .unwrap();

    let claims_a = pipeline.store().claims_by_document(a.document_id).unwrap();
    let claims_b = pipeline.store().claims_by_document(b.document_id).unwrap();
    let (ca, cb) = (claims_a[0].id, claims_b[0].id);

    use doctrine::storage::ConflictStore;
    let forward = pipeline.store().find_by_claim_ids(ca, cb).unwrap().unwrap();
    let backward = pipeline.store().find_by_claim_ids(cb, ca).unwrap().unwrap();
    assert_eq!(forward.id, backward.id);

    // Exactly one stored row for the pair.
    let all = pipeline.store().conflicts_for_claims(&[ca, cb]).unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn test_scoped_search_stays_in_scope() {
    let pipeline = scenario_pipeline();
    let a = ingest_content(&pipeline, DOC_A, 7);
    ingest_content(&pipeline, DOC_B, 5);

    let response = pipeline
        .get_source_of_truth(&QueryRequest {
            query: Some("What is the retry policy?".to_string()),
            scope: Some(Scope::Ids {
                document_ids: vec![a.document_id],
            }),
            ..QueryRequest::default()
        })
        .unwrap();

    assert!(!response.sources.is_empty());
    for source in &response.sources {
        assert_eq!(source.document_id, a.document_id);
    }
}

#[test]
fn test_ingest_without_llm_uses_heuristics() {
    let pipeline = pipeline_with(None);
    let response = ingest_content(&pipeline, DOC_A, 7);
    // The heuristic extractor still finds the retry sentence.
    assert_eq!(response.claims_extracted, 1);

    let claims = pipeline
        .store()
        .claims_by_document(response.document_id)
        .unwrap();
    assert_eq!(claims[0].predicate, "retries");
    assert!((claims[0].confidence - 0.5).abs() < f32::EPSILON);
}

#[test]
fn test_tag_lookup() {
    use doctrine::storage::RecordStore;

    let pipeline = scenario_pipeline();
    let response = pipeline
        .ingest_document(&IngestRequest {
            content: Some(DOC_A.to_string()),
            document_type: Some(DocumentType::Spec),
            authority_level: 7,
            tags: vec!["retries".to_string(), "ops".to_string()],
            ..IngestRequest::default()
        })
        .unwrap();

    let tagged = pipeline.store().documents_by_tag("retries").unwrap();
    assert_eq!(tagged, vec![response.document_id]);
    assert!(pipeline.store().documents_by_tag("nonexistent").unwrap().is_empty());

    let document = pipeline
        .store()
        .get_document(response.document_id)
        .unwrap()
        .unwrap();
    assert_eq!(document.tags, vec!["ops".to_string(), "retries".to_string()]);
}

#[test]
fn test_quarantined_documents_never_surface() {
    let pipeline = scenario_pipeline();
    let a = ingest_content(&pipeline, DOC_A, 7);
    ingest_content(&pipeline, DOC_B, 5);

    pipeline.store().mark_quarantined(a.document_id).unwrap();

    let quarantined = pipeline.store().quarantined_documents().unwrap();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].id, a.document_id);

    // Neither queries nor overlap analysis may see it.
    let response = pipeline
        .get_source_of_truth(&QueryRequest {
            query: Some("What is the retry policy?".to_string()),
            include_deprecated: true,
            ..QueryRequest::default()
        })
        .unwrap();
    for source in &response.sources {
        assert_ne!(source.document_id, a.document_id);
    }

    let overlaps = pipeline
        .find_overlaps(&FindOverlapsRequest::default())
        .unwrap();
    assert!(overlaps.clusters.is_empty());
}

#[test]
fn test_json_document_ingest() {
    let pipeline = scenario_pipeline();
    let response = pipeline
        .ingest_document(&IngestRequest {
            content: Some(
                r#"{"title": "Limits", "rate_limit": {"rpm": 600}, "burst": 50}"#.to_string(),
            ),
            format: Some(doctrine::models::DocumentFormat::Json),
            document_type: Some(DocumentType::Reference),
            ..IngestRequest::default()
        })
        .unwrap();
    assert_eq!(response.title, "Limits");
    assert_eq!(response.sections_extracted, 3);
}
