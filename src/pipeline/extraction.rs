//! Structured extraction from captured content.
//!
//! The [`Extractor`] turns raw text into an [`Extraction`]: a summary, the
//! entities mentioned, action items, and a few descriptive fields. The LLM
//! output is untrusted, so [`Extraction::from_value`] is the only way in and
//! it drops anything malformed instead of failing the whole result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::ExtractionConfig;
use crate::error::ProviderError;
use crate::memory::types::{EntityType, TaskPriority, MAX_DESCRIPTION_CHARS};

const SYSTEM_PROMPT: &str = "You extract structured memory from captured content. \
Reply with a single JSON object with these keys: \
\"summary\" (string, required, one or two sentences), \
\"entities\" (array of {\"type\": person|organization|location|event|document|concept|task, \"value\": string, \"label\": string, \"context\": string}), \
\"action_items\" (array of {\"text\": string, \"priority\": low|medium|high|urgent, \"due_date\": ISO 8601 date or null, \"assignee\": person name or null}), \
\"sentiment\" (positive|neutral|negative), \"confidence\" (0..1), \
\"topics\" (array of strings), \"suggestions\" (array of strings). \
Only include entities and action items that are explicitly present in the content.";

/// Hints about where the content came from, passed alongside the text.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionContext {
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedEntity {
    pub entity_type: EntityType,
    pub value: String,
    /// The raw type label as produced by the extractor.
    pub label: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedActionItem {
    pub text: String,
    pub priority: TaskPriority,
    /// Unparsed; the pipeline decides whether it is a real date.
    pub due_date: Option<String>,
    pub assignee: Option<String>,
}

/// Validated extractor output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub summary: String,
    pub entities: Vec<ExtractedEntity>,
    pub action_items: Vec<ExtractedActionItem>,
    pub sentiment: Option<String>,
    pub confidence: Option<f64>,
    pub topics: Vec<String>,
    pub suggestions: Vec<String>,
}

impl Extraction {
    /// Validate a raw JSON document. Only `summary` is mandatory; malformed
    /// entity and action items are dropped.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ProviderError::InvalidResponse("extraction is not a JSON object".into()))?;

        let summary = non_empty_str(obj.get("summary"))
            .ok_or_else(|| ProviderError::InvalidResponse("extraction has no summary".into()))?;
        if summary.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(ProviderError::InvalidResponse(format!(
                "summary exceeds {MAX_DESCRIPTION_CHARS} characters"
            )));
        }

        let entities = array(obj.get("entities"))
            .filter_map(|item| {
                let label = non_empty_str(item.get("type"))?;
                let value = non_empty_str(item.get("value"))?;
                Some(ExtractedEntity {
                    entity_type: EntityType::from_label(&label),
                    value,
                    label,
                    context: non_empty_str(item.get("context")),
                })
            })
            .collect();

        let action_items = array(obj.get("action_items"))
            .filter_map(|item| {
                let text = non_empty_str(item.get("text"))?;
                Some(ExtractedActionItem {
                    text,
                    priority: non_empty_str(item.get("priority"))
                        .map(|p| TaskPriority::from_label(&p))
                        .unwrap_or(TaskPriority::Medium),
                    due_date: non_empty_str(item.get("due_date")),
                    assignee: non_empty_str(item.get("assignee")),
                })
            })
            .collect();

        Ok(Self {
            summary,
            entities,
            action_items,
            sentiment: non_empty_str(obj.get("sentiment")),
            confidence: obj.get("confidence").and_then(Value::as_f64),
            topics: strings(obj.get("topics")),
            suggestions: strings(obj.get("suggestions")),
        })
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn array(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value
        .and_then(Value::as_array)
        .map(|a| a.iter())
        .into_iter()
        .flatten()
}

fn strings(value: Option<&Value>) -> Vec<String> {
    array(value).filter_map(|v| non_empty_str(Some(v))).collect()
}

// ── Extractors ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str, context: &ExtractionContext) -> Result<Extraction, ProviderError>;
}

/// Pick the extractor for `config`: the LLM client when an API key is set,
/// otherwise [`DisabledExtractor`].
pub fn create_extractor(config: &ExtractionConfig) -> anyhow::Result<Arc<dyn Extractor>> {
    if config.api_key.trim().is_empty() {
        tracing::info!("no extraction API key configured, events will be stored unextracted");
        return Ok(Arc::new(DisabledExtractor));
    }
    Ok(Arc::new(LlmExtractor::new(config)?))
}

/// OpenAI-compatible chat completions in JSON mode.
pub struct LlmExtractor {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl LlmExtractor {
    pub fn new(config: &ExtractionConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout,
        })
    }

    fn request_body(&self, text: &str, context: &ExtractionContext) -> Value {
        let context = serde_json::to_string(context).unwrap_or_default();
        serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("Context: {context}\n\nContent:\n{text}") },
            ],
        })
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, text: &str, context: &ExtractionContext) -> Result<Extraction, ProviderError> {
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text, context))
            .send()
            .await
            .map_err(|e| map_reqwest(e, self.timeout))?;
        let json: Value = res
            .error_for_status()?
            .json()
            .await
            .map_err(|e| map_reqwest(e, self.timeout))?;
        Extraction::from_value(parse_completion_content(json)?)
    }
}

/// Always fails, so every event takes the degraded path.
pub struct DisabledExtractor;

#[async_trait]
impl Extractor for DisabledExtractor {
    async fn extract(&self, _text: &str, _context: &ExtractionContext) -> Result<Extraction, ProviderError> {
        Err(ProviderError::Unavailable("extraction is not configured".into()))
    }
}

pub(crate) fn map_reqwest(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Http(err)
    }
}

/// Pull the JSON document out of `choices[0].message.content`.
fn parse_completion_content(json: Value) -> Result<Value, ProviderError> {
    let content = json
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidResponse("completion has no message content".into()))?;

    serde_json::from_str(strip_code_fence(content))
        .map_err(|e| ProviderError::InvalidResponse(format!("completion content is not JSON: {e}")))
}

/// Some models wrap JSON mode output in a ```json fence anyway.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
