//! Text-to-vector embedding providers.
//!
//! Provides the [`EmbeddingProvider`] trait and three implementations:
//! - [`local::LocalEmbeddingProvider`]: all-MiniLM-L6-v2 via ONNX Runtime
//! - [`remote::RemoteEmbeddingProvider`]: OpenAI-compatible `/embeddings` endpoint
//! - [`hashing::HashingEmbedder`]: deterministic bag-of-words hashing, no model needed
//!
//! The provider is created via [`create_provider`] from configuration.

pub mod hashing;
pub mod local;
pub mod remote;

use std::sync::Arc;

use anyhow::Result;

use crate::error::ProviderError;

/// Default number of dimensions (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// All methods are synchronous. Callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. Returns one vector per input, in order.
    fn generate(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text string.
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.generate(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("provider returned no vectors".into()))
    }

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Model identifier, recorded in `schema_meta`.
    fn model_name(&self) -> &str;
}

/// Create an embedding provider from config.
///
/// `local` fails if model files are missing; run `hindsight model download` first.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(local::LocalEmbeddingProvider::new(config)?)),
        "remote" => Ok(Arc::new(remote::RemoteEmbeddingProvider::new(config)?)),
        "hashing" => Ok(Arc::new(hashing::HashingEmbedder::new(config.dimensions))),
        other => anyhow::bail!(
            "unknown embedding provider: {other}. Supported: local, remote, hashing"
        ),
    }
}

/// Cosine similarity in [-1, 1]. Returns 0 when either vector has zero norm
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// True if every component is zero (the placeholder written when embedding fails).
pub fn is_placeholder(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}
