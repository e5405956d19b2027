//! Feature-hashing embedder.
//!
//! Each lowercase alphanumeric token is hashed with SHA-256 into one of
//! `dimensions` buckets with a ±1 sign, then the vector is L2-normalized.
//! Deterministic across processes and platforms.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use taskloop_core::error::MemoryError;
use taskloop_core::memory::Embedder;

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a single text synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        Ok(inputs.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[test]
    fn embeddings_are_deterministic() {
        let e = HashingEmbedder::new(64);
        assert_eq!(e.embed_text("Create the output folder"), e.embed_text("Create the output folder"));
    }

    #[test]
    fn embeddings_are_unit_length() {
        let e = HashingEmbedder::new(32);
        let v = e.embed_text("some words to hash");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(v.len(), 32);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(8);
        assert!(e.embed_text("  ... ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn tokenization_ignores_case_and_punctuation() {
        let e = HashingEmbedder::new(128);
        assert_eq!(e.embed_text("Hello, World!"), e.embed_text("hello world"));
    }

    #[test]
    fn overlapping_texts_score_higher() {
        let e = HashingEmbedder::new(256);
        let query = e.embed_text("capybara habitat in south america");
        let related = e.embed_text("the capybara lives in south america");
        let unrelated = e.embed_text("quarterly revenue report for finance");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn embed_batch() {
        let e = HashingEmbedder::default();
        let out = e.embed(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 256);
    }
}
