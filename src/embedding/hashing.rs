//! Deterministic offline embedder.
//!
//! Hashes lowercase alphanumeric tokens into a fixed number of buckets and
//! L2-normalizes the counts. Texts that share words get positive cosine
//! similarity; texts with no words in common score near zero. Used by tests
//! and by deployments that have no model available.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{l2_normalize, EmbeddingProvider};
use crate::error::ProviderError;

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimensions as u64) as usize;
            v[bucket] += 1.0;
        }
        l2_normalize(&v)
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn generate(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}
