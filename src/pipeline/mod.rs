//! Event processing pipeline.
//!
//! Captured content goes in, structured memory comes out: an event, the
//! entities it mentions, the edges between them, and any action items as
//! tasks. A single worker drains a bounded FIFO queue, so submissions are
//! processed strictly one at a time. Entity reuse by exact name relies on
//! that ordering.
//!
//! Provider failures never fail a submission. A failed transcription falls
//! back to the text content; a failed extraction still records the event,
//! marked as degraded.

pub mod extraction;
pub mod transcription;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::config::HindsightConfig;
use crate::error::{ProviderError, StoreError};
use crate::memory::common::parse_time;
use crate::memory::types::{
    Entity, EntityType, EventType, Metadata, NewEntity, NewEvent, NewRelationship, NewTask,
    Participant, RecordKind, RelationshipType,
};
use crate::memory::{EntityStore, Stores};

pub use extraction::{Extraction, ExtractionContext, Extractor};
pub use transcription::Transcriber;

const TRUNCATION_MARKER: &str = "\n\n[... content truncated ...]";
const FAILED_DESCRIPTION: &str = "Content captured, extraction failed";
const SUMMARY_TITLE_CHARS: usize = 80;
const MAX_TITLE_CHARS: usize = 200;
const PREVIEW_CHARS: usize = 500;

/// One captured observation submitted for processing.
#[derive(Debug, Clone)]
pub struct IngestPayload {
    pub content: String,
    pub event_type: EventType,
    /// May carry `title`, `window_title`, `timestamp` and `source`.
    pub metadata: Metadata,
    /// Names of people known to have taken part.
    pub participants: Vec<String>,
    pub source: Option<String>,
    pub source_id: Option<String>,
    pub audio: Option<Vec<u8>>,
}

impl IngestPayload {
    pub fn new(content: impl Into<String>, event_type: EventType) -> Self {
        Self {
            content: content.into(),
            event_type,
            metadata: Metadata::new(),
            participants: Vec::new(),
            source: None,
            source_id: None,
            audio: None,
        }
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Ids of everything written for one submission.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub entity_ids: Vec<String>,
    pub task_ids: Vec<String>,
    /// True when extraction failed and only the raw event was stored.
    pub degraded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("event pipeline is not running")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub max_chars: usize,
    pub extraction_timeout: Duration,
    pub transcription_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &HindsightConfig) -> Self {
        Self {
            queue_capacity: config.pipeline.queue_capacity.max(1),
            max_chars: config.extraction.max_chars.max(1),
            extraction_timeout: Duration::from_secs(config.extraction.timeout_secs.max(1)),
            transcription_timeout: Duration::from_secs(config.transcription.timeout_secs.max(1)),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&HindsightConfig::default())
    }
}

struct Job {
    payload: IngestPayload,
    reply: oneshot::Sender<Result<ProcessedEvent, StoreError>>,
}

/// Cloneable submission handle. The worker stops once every handle is dropped.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Job>,
}

impl PipelineHandle {
    /// Queue `payload` and wait for it to be processed.
    pub async fn process_event(&self, payload: IngestPayload) -> Result<ProcessedEvent, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { payload, reply })
            .await
            .map_err(|_| PipelineError::Closed)?;
        Ok(rx.await.map_err(|_| PipelineError::Closed)??)
    }
}

pub struct EventPipeline {
    stores: Stores,
    extractor: Arc<dyn Extractor>,
    transcriber: Arc<dyn Transcriber>,
    settings: PipelineSettings,
}

impl EventPipeline {
    pub fn new(
        stores: Stores,
        extractor: Arc<dyn Extractor>,
        transcriber: Arc<dyn Transcriber>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            stores,
            extractor,
            transcriber,
            settings,
        }
    }

    /// Start the worker on the current tokio runtime.
    pub fn spawn(
        stores: Stores,
        extractor: Arc<dyn Extractor>,
        transcriber: Arc<dyn Transcriber>,
        config: &HindsightConfig,
    ) -> PipelineHandle {
        Self::new(stores, extractor, transcriber, PipelineSettings::from_config(config)).start()
    }

    pub fn start(self) -> PipelineHandle {
        let (tx, mut rx) = mpsc::channel::<Job>(self.settings.queue_capacity);
        tracing::info!(queue_capacity = self.settings.queue_capacity, "event pipeline started");
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = self.process(job.payload).await;
                if let Err(e) = &result {
                    tracing::error!(error = %e, "event processing failed");
                }
                // The submitter may have gone away; nothing to do then.
                let _ = job.reply.send(result);
            }
            tracing::info!("event pipeline stopped");
        });
        PipelineHandle { tx }
    }

    /// Process one payload end to end.
    pub async fn process(&self, payload: IngestPayload) -> Result<ProcessedEvent, StoreError> {
        let started = Instant::now();

        let text = self.with_transcript(&payload).await;
        let (input, truncated) = truncate_chars(&text, self.settings.max_chars);
        if truncated {
            tracing::debug!(max_chars = self.settings.max_chars, "content truncated for extraction");
        }

        let context = ExtractionContext {
            source_type: payload.event_type.to_string(),
            window_title: payload.metadata_str("window_title").map(str::to_string),
            timestamp: payload.metadata_str("timestamp").map(str::to_string),
        };
        let timeout = self.settings.extraction_timeout;
        let outcome = match tokio::time::timeout(timeout, self.extractor.extract(&input, &context)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };

        let stores = self.stores.clone();
        let processed = match outcome {
            Ok(extraction) => {
                tokio::task::spawn_blocking(move || match write_extraction(&stores, &payload, extraction) {
                    Err(StoreError::Validation(e)) => {
                        tracing::warn!(error = %e, "extraction rejected by the store, storing raw event");
                        write_degraded(&stores, &payload, &text, &format!("invalid extraction: {e}"))
                    }
                    other => other,
                })
                .await??
            }
            Err(e) => {
                tracing::warn!(error = %e, event_type = %payload.event_type, "extraction failed, storing raw event");
                let reason = e.to_string();
                tokio::task::spawn_blocking(move || write_degraded(&stores, &payload, &text, &reason))
                    .await??
            }
        };

        tracing::info!(
            event_id = %processed.event_id,
            entities = processed.entity_ids.len(),
            tasks = processed.task_ids.len(),
            degraded = processed.degraded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "event processed"
        );
        Ok(processed)
    }

    async fn with_transcript(&self, payload: &IngestPayload) -> String {
        let audio = match (&payload.event_type, &payload.audio) {
            (EventType::Audio, Some(audio)) if !audio.is_empty() => audio,
            _ => return payload.content.clone(),
        };
        let timeout = self.settings.transcription_timeout;
        let result = match tokio::time::timeout(timeout, self.transcriber.transcribe(audio)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };
        match result {
            Ok(transcript) => format!("Transcript:\n{transcript}\n\n{}", payload.content),
            Err(e) => {
                tracing::warn!(error = %e, bytes = audio.len(), "transcription failed, using text content");
                payload.content.clone()
            }
        }
    }
}

// ── Writes ───────────────────────────────────────────────────────────────────

fn write_extraction(
    stores: &Stores,
    payload: &IngestPayload,
    extraction: Extraction,
) -> Result<ProcessedEvent, StoreError> {
    let mut metadata = payload.metadata.clone();
    metadata.insert("extraction".into(), "ok".into());
    if let Some(sentiment) = &extraction.sentiment {
        metadata.insert("sentiment".into(), sentiment.clone().into());
    }
    if let Some(confidence) = extraction.confidence {
        metadata.insert("confidence".into(), confidence.into());
    }
    metadata.insert("topics".into(), extraction.topics.clone().into());
    metadata.insert("suggestions".into(), extraction.suggestions.clone().into());

    let title = title_from_metadata(payload)
        .unwrap_or_else(|| shorten(&extraction.summary, SUMMARY_TITLE_CHARS));
    let mut input = NewEvent::new(payload.event_type, title, event_time(payload))
        .with_description(extraction.summary.clone());
    input.source = event_source(payload);
    input.source_id = payload.source_id.clone();
    input.metadata = metadata;
    // Reject before any entity is written.
    input.validate()?;

    let entities = stores.entities();
    let mut entity_ids: Vec<String> = Vec::new();

    // Extracted entities, in mention order; `context` stays paired with its entity.
    let mut mentioned: Vec<(Entity, Option<String>)> = Vec::new();
    for item in &extraction.entities {
        if let Some(entity) = upsert_entity(&entities, &item.value, item.entity_type)? {
            push_unique(&mut entity_ids, &entity.id);
            mentioned.push((entity, item.context.clone()));
        }
    }

    let hinted = resolve_participants(&entities, &payload.participants)?;
    let mut participants = Vec::new();
    let mut seen = HashSet::new();
    for person in &hinted {
        push_unique(&mut entity_ids, &person.id);
        if seen.insert(person.id.clone()) {
            participants.push(participant(&person.id, "participant"));
        }
    }
    for (entity, _) in &mentioned {
        if entity.entity_type == EntityType::Person && seen.insert(entity.id.clone()) {
            participants.push(participant(&entity.id, "mentioned"));
        }
    }

    input.participants = participants;
    let event = stores.events().create(input)?;

    for (entity, context) in &mentioned {
        let mut edge_meta = Metadata::new();
        if let Some(context) = context {
            edge_meta.insert("context".into(), context.clone().into());
        }
        let edge = NewRelationship::new(
            (event.id.as_str(), RecordKind::Event),
            RelationshipType::Mentions,
            (entity.id.as_str(), RecordKind::Entity),
        )
        .with_metadata(edge_meta);
        entities.create_relationship(edge)?;
    }

    let distinct: Vec<&str> = {
        let mut seen = HashSet::new();
        mentioned
            .iter()
            .map(|(e, _)| e.id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    };
    for (i, a) in distinct.iter().enumerate() {
        for b in &distinct[i + 1..] {
            // Unordered pair: always store it in the same direction.
            let (from, to) = if a < b { (*a, *b) } else { (*b, *a) };
            let mut edge_meta = Metadata::new();
            edge_meta.insert("via_event".into(), event.id.clone().into());
            entities.create_relationship(
                NewRelationship::new(
                    (from, RecordKind::Entity),
                    RelationshipType::RelatedTo,
                    (to, RecordKind::Entity),
                )
                .with_metadata(edge_meta),
            )?;
        }
    }

    let tasks = stores.tasks();
    let mut task_ids = Vec::new();
    for item in &extraction.action_items {
        let mut input = NewTask::new(shorten(&item.text, MAX_TITLE_CHARS));
        if item.text.chars().count() > MAX_TITLE_CHARS {
            input.description = Some(item.text.clone());
        }
        input.priority = item.priority;
        input.related_event_id = Some(event.id.clone());
        input.metadata.insert("source".into(), "extraction".into());
        if let Some(raw) = &item.due_date {
            match parse_due_date(raw) {
                Some(due) => input.due_date = Some(due),
                None => {
                    input.metadata.insert("due_date_raw".into(), raw.clone().into());
                }
            }
        }
        if let Some(name) = &item.assignee {
            match entities.find_by_name(name, EntityType::Person)? {
                Some(person) => input.assignee_id = Some(person.id),
                None => {
                    input.metadata.insert("assignee_raw".into(), name.clone().into());
                }
            }
        }
        match tasks.create(input) {
            Ok(task) => task_ids.push(task.id),
            Err(StoreError::Validation(e)) => {
                tracing::warn!(event_id = %event.id, error = %e, "skipping invalid action item");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(ProcessedEvent {
        event_id: event.id,
        entity_ids,
        task_ids,
        degraded: false,
    })
}

fn write_degraded(
    stores: &Stores,
    payload: &IngestPayload,
    text: &str,
    reason: &str,
) -> Result<ProcessedEvent, StoreError> {
    let hinted = resolve_participants(&stores.entities(), &payload.participants)?;
    let mut entity_ids = Vec::new();
    let mut participants = Vec::new();
    for person in &hinted {
        if !entity_ids.contains(&person.id) {
            entity_ids.push(person.id.clone());
            participants.push(participant(&person.id, "participant"));
        }
    }

    let mut metadata = payload.metadata.clone();
    metadata.insert("extraction".into(), "failed".into());
    metadata.insert("extraction_error".into(), reason.into());
    let preview: String = text.chars().take(PREVIEW_CHARS).collect();
    metadata.insert("content_preview".into(), preview.into());

    let title = title_from_metadata(payload)
        .or_else(|| {
            text.lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(|l| shorten(l, SUMMARY_TITLE_CHARS))
        })
        .unwrap_or_else(|| format!("{} capture", payload.event_type));

    let mut input = NewEvent::new(payload.event_type, title, event_time(payload))
        .with_description(FAILED_DESCRIPTION);
    input.participants = participants;
    input.source = event_source(payload);
    input.source_id = payload.source_id.clone();
    input.metadata = metadata;
    let event = stores.events().create(input)?;

    Ok(ProcessedEvent {
        event_id: event.id,
        entity_ids,
        task_ids: Vec::new(),
        degraded: true,
    })
}

/// Reuse a live entity with the same name and type, or create one.
/// Names the store rejects are skipped.
fn upsert_entity(
    entities: &EntityStore,
    name: &str,
    entity_type: EntityType,
) -> Result<Option<Entity>, StoreError> {
    if let Some(existing) = entities.find_by_name(name, entity_type)? {
        entities.touch_last_seen(&existing.id)?;
        return Ok(Some(existing));
    }
    let mut input = NewEntity::new(name.trim(), entity_type);
    input.metadata.insert("source".into(), "extraction".into());
    match entities.create(input) {
        Ok(created) => Ok(Some(created.entity)),
        Err(StoreError::Validation(e)) => {
            tracing::warn!(name, error = %e, "skipping invalid extracted entity");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn resolve_participants(entities: &EntityStore, names: &[String]) -> Result<Vec<Entity>, StoreError> {
    let mut out = Vec::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if let Some(person) = upsert_entity(entities, name, EntityType::Person)? {
            out.push(person);
        }
    }
    Ok(out)
}

fn participant(entity_id: &str, role: &str) -> Participant {
    let mut metadata = Metadata::new();
    metadata.insert("role".into(), role.into());
    Participant {
        entity_id: entity_id.to_string(),
        metadata,
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|x| x == id) {
        ids.push(id.to_string());
    }
}

fn title_from_metadata(payload: &IngestPayload) -> Option<String> {
    payload
        .metadata_str("title")
        .or_else(|| payload.metadata_str("window_title"))
        .map(|t| shorten(t, MAX_TITLE_CHARS))
}

fn event_source(payload: &IngestPayload) -> Option<String> {
    payload
        .source
        .clone()
        .or_else(|| payload.metadata_str("source").map(str::to_string))
}

/// `metadata.timestamp` when it parses, otherwise now.
fn event_time(payload: &IngestPayload) -> DateTime<Utc> {
    payload
        .metadata_str("timestamp")
        .and_then(|t| parse_time(t).ok())
        .unwrap_or_else(Utc::now)
}

/// RFC 3339, or a bare `YYYY-MM-DD` taken as midnight UTC.
pub fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = parse_time(raw) {
        return Some(t);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Cut `text` at `max` chars and append the truncation marker. Returns whether
/// anything was cut.
pub fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => (format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]), true),
        None => (text.to_string(), false),
    }
}

/// First `max` chars of `text`, with a trailing ellipsis when shortened.
fn shorten(text: &str, max: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}…", text[..byte_idx].trim_end()),
        None => text.to_string(),
    }
}
