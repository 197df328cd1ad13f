//! Feature-hashing stand-in for a real embedding model.

use paperdex_core::{Embedding, EmbeddingModel, vector};
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Default vector width of [`HashingEmbedder`].
pub const DEFAULT_DIM: usize = 256;

/// Maps each lowercase alphanumeric token to a signed bucket and L2-normalizes the sum.
///
/// Texts that share words land close together, which is enough to drive the semantic path
/// end to end without a model. It has no notion of meaning beyond shared tokens.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    /// Creates an embedder producing vectors of length `dim` (at least 1).
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIM)
    }
}

impl EmbeddingModel for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> paperdex_core::Result<Embedding> {
        let mut embedding = vec![0.0_f32; self.dim];
        for token in Self::tokens(text) {
            let hash = xxh3_64_with_seed(token.as_bytes(), 0x7061_7065);
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }
        if vector::normalize(&mut embedding).is_none() {
            anyhow::bail!("text has no indexable tokens");
        }
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn output_is_unit_length() {
        let embedder = HashingEmbedder::new(64);
        let v = embedder.embed("Denoising Diffusion Models").await.unwrap();
        assert_eq!(v.len(), 64);
        assert!((vector::l2_norm(&v) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn case_and_punctuation_do_not_matter() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Graph Neural Networks").await.unwrap();
        let b = embedder.embed("graph, neural; networks!").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn shared_words_score_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("diffusion models").await.unwrap();
        let near = embedder.embed("diffusion models for images").await.unwrap();
        let far = embedder.embed("graph neural networks").await.unwrap();
        assert!(vector::dot(&query, &near) > vector::dot(&query, &far));
    }

    #[tokio::test]
    async fn empty_text_fails() {
        let embedder = HashingEmbedder::default();
        assert!(embedder.embed(" -- ").await.is_err());
    }
}
