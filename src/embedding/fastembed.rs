//! FastEmbed-based embedder.

use super::Embedder;
use crate::{Error, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;

/// FastEmbed embedder using all-MiniLM-L6-v2.
pub struct FastEmbedEmbedder {
    model: Mutex<TextEmbedding>,
    dimensions: usize,
}

impl FastEmbedEmbedder {
    /// Default embedding dimensions for all-MiniLM-L6-v2.
    pub const DEFAULT_DIMENSIONS: usize = 384;

    /// Creates a new FastEmbed embedder, downloading the model on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the ONNX model cannot be initialized.
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
            .map_err(|e| Error::DependencyUnavailable {
                dependency: "embedding".to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self {
            model: Mutex::new(model),
            dimensions: Self::DEFAULT_DIMENSIONS,
        })
    }
}

impl Embedder for FastEmbedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text]).map(|mut v| v.remove(0))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut model = self.model.lock().map_err(|_| Error::DependencyUnavailable {
            dependency: "embedding".to_string(),
            cause: "embedding model lock poisoned".to_string(),
        })?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| Error::DependencyUnavailable {
                dependency: "embedding".to_string(),
                cause: e.to_string(),
            })
    }
}
