//! Storage layer.
//!
//! Repositories for every entity in the data model plus embedding
//! similarity search, all behind the traits in [`traits`]. The bundled
//! backend is SQLite; embeddings live in BLOB columns and are ranked
//! with brute-force cosine, which is exact and fast at knowledge-corpus
//! scale.

#![allow(clippy::cast_precision_loss)]

pub mod sqlite;
pub mod traits;
pub mod vector;

pub use sqlite::SqliteStore;
pub use traits::{
    ClaimStore, ConflictStore, DocumentPatch, DocumentStore, GraphStore, RecordStore,
    SectionStore, SemanticHit, Store,
};
pub use vector::{decode_embedding, encode_embedding};
