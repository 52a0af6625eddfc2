//! Audio-to-text for `audio` events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::extraction::map_reqwest;
use crate::config::TranscriptionConfig;
use crate::error::ProviderError;

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ProviderError>;
}

pub fn create_transcriber(config: &TranscriptionConfig) -> anyhow::Result<Arc<dyn Transcriber>> {
    if config.api_key.trim().is_empty() {
        tracing::info!("no transcription API key configured, audio will not be transcribed");
        return Ok(Arc::new(DisabledTranscriber));
    }
    Ok(Arc::new(HttpTranscriber::new(config)?))
}

/// OpenAI-compatible `/audio/transcriptions` client.
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl HttpTranscriber {
    pub fn new(config: &TranscriptionConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/audio/transcriptions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ProviderError> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.webm")
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_reqwest(e, self.timeout))?;
        let json: Value = res
            .error_for_status()?
            .json()
            .await
            .map_err(|e| map_reqwest(e, self.timeout))?;
        parse_transcript(&json)
    }
}

fn parse_transcript(json: &Value) -> Result<String, ProviderError> {
    json.get("text")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ProviderError::InvalidResponse("transcription response has no text".into()))
}

pub struct DisabledTranscriber;

#[async_trait]
impl Transcriber for DisabledTranscriber {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, ProviderError> {
        Err(ProviderError::Unavailable("transcription is not configured".into()))
    }
}
