//! Embedding persistence helpers and ranking.

use crate::embedding::cosine_similarity;
use crate::{Error, Result};

/// Encodes an embedding as little-endian `f32` bytes for BLOB storage.
#[must_use]
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decodes a BLOB column back into an embedding.
///
/// # Errors
///
/// Returns [`Error::Internal`] if the byte length is not a multiple of 4.
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::internal(
            "decode_embedding",
            format!("corrupt embedding blob of {} bytes", bytes.len()),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Validates an embedding against the store's configured width.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on mismatch.
pub fn check_width(embedding: &[f32], expected: usize) -> Result<()> {
    if embedding.len() == expected {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "embedding width {} does not match configured width {expected}",
            embedding.len()
        )))
    }
}

/// A candidate row for similarity ranking.
pub struct RankCandidate<T> {
    /// The carried value.
    pub item: T,
    /// Cosine similarity, clamped non-negative for display.
    pub similarity: f32,
    /// Owning document's authority level (first tie-break, higher wins).
    pub authority_level: u8,
    /// Owning document's creation time in epoch millis (second
    /// tie-break, newer wins).
    pub created_at_ms: i64,
}

/// Scores and ranks candidates against a query vector, returning the
/// top `k` by similarity, then authority, then recency.
pub fn rank<T>(
    query: &[f32],
    candidates: impl IntoIterator<Item = (T, Vec<f32>, u8, i64)>,
    k: usize,
) -> Vec<RankCandidate<T>> {
    let mut scored: Vec<RankCandidate<T>> = candidates
        .into_iter()
        .map(|(item, embedding, authority_level, created_at_ms)| RankCandidate {
            similarity: cosine_similarity(query, &embedding).max(0.0),
            item,
            authority_level,
            created_at_ms,
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.authority_level.cmp(&a.authority_level))
            .then_with(|| b.created_at_ms.cmp(&a.created_at_ms))
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let embedding = vec![0.25_f32, -1.5, 3.125, 0.0];
        let decoded = decode_embedding(&encode_embedding(&embedding)).unwrap();
        assert_eq!(decoded, embedding);
    }

    #[test]
    fn test_decode_rejects_corrupt_blob() {
        let err = decode_embedding(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.error_code(), "Internal");
    }

    #[test]
    fn test_check_width() {
        assert!(check_width(&[0.0; 4], 4).is_ok());
        assert!(check_width(&[0.0; 3], 4).is_err());
    }

    #[test]
    fn test_rank_tie_breaks_on_authority_then_recency() {
        let query = vec![1.0, 0.0];
        let same = vec![1.0, 0.0];
        let ranked = rank(
            &query,
            vec![
                ("low-auth-old", same.clone(), 3, 100),
                ("high-auth-old", same.clone(), 7, 100),
                ("high-auth-new", same, 7, 200),
            ],
            3,
        );
        assert_eq!(ranked[0].item, "high-auth-new");
        assert_eq!(ranked[1].item, "high-auth-old");
        assert_eq!(ranked[2].item, "low-auth-old");
    }

    #[test]
    fn test_rank_clamps_negative_similarity() {
        let ranked = rank(&[1.0, 0.0], vec![("opposite", vec![-1.0, 0.0], 5, 0)], 1);
        assert!(ranked[0].similarity.abs() < f32::EPSILON);
    }
}
