//! OpenAI-compatible HTTP embedding provider.
//!
//! Posts `{model, input}` to `{api_base}/embeddings` and reads `data[].embedding`
//! in `index` order. Vectors are L2-normalized on receipt.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use super::{l2_normalize, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::ProviderError;

pub struct RemoteEmbeddingProvider {
    url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
    // Built on first use so construction never happens on an async worker.
    client: OnceLock<reqwest::blocking::Client>,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.api_base.trim().is_empty(),
            "embedding.api_base must be set for the remote provider"
        );
        Ok(Self {
            url: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            client: OnceLock::new(),
        })
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, ProviderError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    fn map_http(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Http(err)
        }
    }
}

impl EmbeddingProvider for RemoteEmbeddingProvider {
    fn generate(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let mut request = self.client()?.post(&self.url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let json: Value = request
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| self.map_http(e))?;

        let vectors = parse_embedding_response(&json)?;
        if vectors.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                bad.len()
            )));
        }

        tracing::debug!(count = vectors.len(), model = %self.model, "remote embeddings generated");
        Ok(vectors.iter().map(|v| l2_normalize(v)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn parse_embedding_response(json: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::InvalidResponse("missing data array".into()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(fallback_index);
        let values = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidResponse("item missing embedding array".into()))?;
        let vector = values
            .iter()
            .map(|v| v.as_f64().map(|n| n as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| ProviderError::InvalidResponse("embedding value must be numeric".into()))?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
