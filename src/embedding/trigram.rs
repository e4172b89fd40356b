//! Hashed character-trigram embedder.
//!
//! The always-available embedding path: a bag of character trigrams
//! hashed into a fixed-width vector and L2-normalized. Deterministic
//! across runs and platforms, so similarity comparisons stay total when
//! no model runtime is present, at a documented quality loss relative
//! to learned embeddings.

use super::Embedder;
use crate::Result;

/// Deterministic hashed-trigram embedder.
pub struct TrigramEmbedder {
    dimensions: usize,
}

/// FNV-1a, used to bucket trigrams; stable across platforms.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl TrigramEmbedder {
    /// Default embedding width, matching the common MiniLM dimension so
    /// stores sized for learned embeddings need no reconfiguration.
    pub const DEFAULT_DIMENSIONS: usize = 384;

    /// Creates an embedder with the given output width.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for TrigramEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

impl Embedder for TrigramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0_f32; self.dimensions];
        if self.dimensions == 0 {
            return Ok(vector);
        }

        let normalized: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        let padded = format!("  {}  ", normalized.split_whitespace().collect::<Vec<_>>().join(" "));
        let chars: Vec<char> = padded.chars().collect();

        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            if trigram.trim().is_empty() {
                continue;
            }
            let hash = fnv1a(trigram.as_bytes());
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hash % self.dimensions as u64) as usize;
            // Signed hashing keeps buckets roughly zero-mean.
            let sign = if hash & (1_u64 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = TrigramEmbedder::default();
        let a = embedder.embed("The service retries 3 times").unwrap();
        let b = embedder.embed("The service retries 3 times").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fixed_width_and_normalized() {
        let embedder = TrigramEmbedder::new(128);
        let v = embedder.embed("retry policy").unwrap();
        assert_eq!(v.len(), 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = TrigramEmbedder::new(64);
        let v = embedder.embed("   ").unwrap();
        assert!(v.iter().all(|x| x.abs() < f32::EPSILON));
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let embedder = TrigramEmbedder::default();
        let base = embedder.embed("the service retries three times").unwrap();
        let close = embedder.embed("the service retries five times").unwrap();
        let far = embedder.embed("database connection pooling settings").unwrap();
        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_batch_matches_single() {
        let embedder = TrigramEmbedder::new(32);
        let batch = embedder.embed_batch(&["a b c", "d e f"]).unwrap();
        assert_eq!(batch[0], embedder.embed("a b c").unwrap());
        assert_eq!(batch[1], embedder.embed("d e f").unwrap());
    }
}
