//! # Doctrine
//!
//! A document consolidation engine.
//!
//! Doctrine ingests heterogeneous knowledge documents (specs, guides,
//! handoffs, decisions, reports), maintains a searchable, deduplicated
//! source-of-truth index over them, surfaces semantic overlap and factual
//! conflicts, merges overlapping documents into a single authoritative
//! artifact with full provenance, and answers natural-language queries
//! with cited, confidence-scored answers.
//!
//! ## Features
//!
//! - Five-operation pipeline: ingest, find overlaps, consolidate, query,
//!   deprecate
//! - Atomic claim extraction with LLM + heuristic fallback
//! - Conflict detection (agreement / value conflict / direct negation)
//! - Multi-strategy merge engine with provenance maps
//! - SQLite-backed store with embedding similarity search
//!
//! ## Example
//!
//! ```rust,ignore
//! use doctrine::{DoctrineConfig, Pipeline};
//! use doctrine::pipeline::IngestRequest;
//!
//! let pipeline = Pipeline::from_config(&DoctrineConfig::default())?;
//! let result = pipeline.ingest_document(IngestRequest {
//!     content: Some("# Retry Policy\nThe service retries 3 times.".to_string()),
//!     ..Default::default()
//! })?;
//! println!("ingested {} sections", result.sections_extracted);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod embedding;
pub mod llm;
pub mod models;
pub mod observability;
pub mod parser;
pub mod pipeline;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::DoctrineConfig;
pub use embedding::Embedder;
pub use llm::LlmProvider;
pub use models::{
    AtomicClaim, Conflict, ConflictType, Document, DocumentFormat, DocumentId, DocumentType,
    MergeStrategy, Section, SectionId,
};
pub use pipeline::Pipeline;
pub use storage::{SqliteStore, Store};

/// Error type for doctrine operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait
/// implementations. The variants are exactly the wire error kinds the
/// tool responses carry; [`Error::error_code`] yields the wire string.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Schema violations, unknown enum values, malformed documents, zero-or-many union arms |
/// | `NotFound` | Referenced document or cluster does not exist |
/// | `DependencyUnavailable` | Embedding/LLM endpoint unreachable after bounded retries |
/// | `Conflict` | A write violates an invariant (e.g. cyclic supersession) |
/// | `Canceled` | Deadline exceeded or caller canceled |
/// | `Internal` | Store failures, corrupted rows, invariant violations |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A request names zero or more than one of its union arms
    /// - A document body is malformed for its declared format
    /// - An enum field carries an unknown value
    /// - An embedding has the wrong width at the store boundary
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An external dependency is unreachable after bounded retries.
    ///
    /// Callers degrade to their rule-based fallback path or surface the
    /// error when no fallback exists for the operation.
    #[error("dependency '{dependency}' unavailable: {cause}")]
    DependencyUnavailable {
        /// The dependency that failed (e.g. "llm", "embedding").
        dependency: String,
        /// The underlying cause.
        cause: String,
    },

    /// A write would violate an invariant.
    ///
    /// Raised when:
    /// - A supersession would introduce a cycle
    /// - A conflict references claims with mismatched subjects
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation was canceled or its deadline elapsed.
    #[error("canceled: {0}")]
    Canceled(String),

    /// An internal failure: store errors, corrupted data.
    ///
    /// Store errors propagate unchanged to the caller in this shape.
    #[error("operation '{operation}' failed: {cause}")]
    Internal {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns the wire error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::NotFound(_) => "NotFound",
            Self::DependencyUnavailable { .. } => "DependencyUnavailable",
            Self::Conflict(_) => "Conflict",
            Self::Canceled(_) => "Canceled",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Shorthand for an [`Error::Internal`] with an operation name.
    pub fn internal(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Internal {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for doctrine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("missing content".to_string());
        assert_eq!(err.to_string(), "invalid input: missing content");

        let err = Error::Internal {
            operation: "create_document".to_string(),
            cause: "disk full".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "operation 'create_document' failed: disk full"
        );

        let err = Error::DependencyUnavailable {
            dependency: "llm".to_string(),
            cause: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("llm"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NotFound("x".into()).error_code(), "NotFound");
        assert_eq!(Error::Conflict("x".into()).error_code(), "Conflict");
        assert_eq!(Error::Canceled("x".into()).error_code(), "Canceled");
        assert_eq!(Error::internal("op", "boom").error_code(), "Internal");
    }
}
