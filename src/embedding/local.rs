//! Local ONNX Runtime embedding provider.
//!
//! Runs all-MiniLM-L6-v2 (or any sentence-transformer export with the same
//! inputs) via `ort`: tokenization, inference, masked mean pooling, and L2
//! normalization.

use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::ProviderError;

/// Maximum sequence length for all-MiniLM-L6-v2 (trained at 256).
const MAX_SEQ_LEN: usize = 256;

pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model: String,
    dimensions: usize,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `hindsight model download` first.",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `hindsight model download` first.",
            tokenizer_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    fn run_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);

        let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            input_ids_flat.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask_flat.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids = Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))?;
        let attention_mask =
            Tensor::from_array((shape.clone(), attention_mask_flat.clone().into_boxed_slice()))?;
        // single segment
        let token_type_ids =
            Tensor::from_array((shape, vec![0i64; batch_size * seq_len].into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
            "token_type_ids" => token_type_ids,
        })?;

        // Output name varies by export.
        let token_emb_value = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (shape, data) = token_emb_value
            .try_extract_tensor::<f32>()
            .context("failed to extract token embeddings tensor")?;

        let dims: &[i64] = &shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[2] == self.dimensions as i64,
            "unexpected token embeddings shape: {dims:?}, expected [batch, seq, {}]",
            self.dimensions
        );
        let hidden_dim = dims[2] as usize;
        let actual_seq_len = dims[1] as usize;

        let mut results = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let mut sum = vec![0.0f32; hidden_dim];
            let mut count = 0.0f32;

            for s in 0..actual_seq_len {
                let mask = attention_mask_flat[b * seq_len + s] as f32;
                if mask > 0.0 {
                    let offset = (b * actual_seq_len + s) * hidden_dim;
                    for (d, acc) in sum.iter_mut().enumerate() {
                        *acc += data[offset + d] * mask;
                    }
                    count += mask;
                }
            }

            if count > 0.0 {
                sum.iter_mut().for_each(|x| *x /= count);
            }
            results.push(l2_normalize(&sum));
        }

        Ok(results)
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn generate(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.run_batch(texts).map_err(ProviderError::Other)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
