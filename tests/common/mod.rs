//! Shared fixtures for the end-to-end tests: a scripted LLM, an
//! in-memory pipeline, and the two-document retry-policy corpus.

#![allow(dead_code)]

use doctrine::config::DoctrineConfig;
use doctrine::embedding::TrigramEmbedder;
use doctrine::llm::{GenerationRequest, LlmProvider};
use doctrine::models::DocumentType;
use doctrine::pipeline::{IngestRequest, IngestResponse, Pipeline};
use doctrine::storage::SqliteStore;
use doctrine::Result;
use std::sync::Arc;

/// Doc A: authority 7, says the service retries 3 times.
pub const DOC_A: &str = "\
# Service Spec

## Overview
The payments service handles retry behavior for outbound calls.

## Retry Policy
The service retries 3 times.
";

/// Doc B: authority 5, says the service retries 5 times.
pub const DOC_B: &str = "\
# Ops Guide

## Overview
The payments service handles retry behavior for outbound calls.

## Retry Policy
The service retries 5 times at most.
";

/// A deterministic scripted LLM: first matching prompt pattern wins.
pub struct StubLlm {
    rules: Vec<(&'static str, &'static str)>,
}

impl StubLlm {
    pub fn new(rules: Vec<(&'static str, &'static str)>) -> Self {
        Self { rules }
    }
}

impl LlmProvider for StubLlm {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        for (pattern, response) in &self.rules {
            if request.prompt.contains(pattern) {
                return Ok((*response).to_string());
            }
        }
        Ok("[]".to_string())
    }
}

/// The scripted LLM for the retry-policy scenarios: extraction yields
/// the 0.9 / 0.6 confidence claims, synthesis answers "3", and
/// verification accepts.
pub fn scenario_llm() -> Arc<dyn LlmProvider> {
    Arc::new(StubLlm::new(vec![
        // Synthesis prompts carry the citation instruction.
        (
            "Cite sources as [n]",
            r#"{"answer": "The service retries 3 times [1].", "confidence": 0.9, "knowledge_gaps": []}"#,
        ),
        ("Do the predicates", r#"{"negation": false}"#),
        ("plausibly supported", r#"{"supported": true}"#),
        (
            "retries 3 times",
            r#"[{"subject": "the service", "predicate": "retries", "object": "3 times",
                "original_text": "The service retries 3 times.", "confidence": 0.9}]"#,
        ),
        (
            "retries 5 times",
            r#"[{"subject": "the service", "predicate": "retries", "object": "5 times",
                "original_text": "The service retries 5 times at most.", "confidence": 0.6}]"#,
        ),
    ]))
}

/// Test configuration: documented defaults plus the entity graph on.
pub fn test_config() -> DoctrineConfig {
    DoctrineConfig {
        entity_graph_enabled: true,
        ..DoctrineConfig::default()
    }
}

/// An in-memory pipeline with the trigram embedder and the given LLM.
pub fn pipeline_with(llm: Option<Arc<dyn LlmProvider>>) -> Pipeline<SqliteStore> {
    let config = test_config();
    let store = Arc::new(
        SqliteStore::in_memory(config.embedding.dimensions).expect("in-memory store"),
    );
    let embedder = Arc::new(TrigramEmbedder::new(config.embedding.dimensions));
    Pipeline::new(store, embedder, llm, config)
}

/// The standard scenario pipeline.
pub fn scenario_pipeline() -> Pipeline<SqliteStore> {
    pipeline_with(Some(scenario_llm()))
}

/// Ingests inline markdown content.
pub fn ingest_content(
    pipeline: &Pipeline<SqliteStore>,
    content: &str,
    authority: u8,
) -> IngestResponse {
    pipeline
        .ingest_document(&IngestRequest {
            content: Some(content.to_string()),
            document_type: Some(DocumentType::Spec),
            authority_level: authority,
            ..IngestRequest::default()
        })
        .expect("ingest")
}
