//! Hybrid retrieval over events, entities, and tasks.
//!
//! Each request embeds the query once, loads three candidate pools in
//! parallel, scores every candidate on semantic similarity, recency, and
//! overlap with the caller's entity context, then returns the best `limit`
//! by weighted sum. The engine never writes.

pub mod scoring;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::embedding::{cosine_similarity, is_placeholder};
use crate::error::StoreError;
use crate::memory::common::TimeWindow;
use crate::memory::tasks::reference_time;
use crate::memory::types::{Entity, Event, Metadata, RecordKind, Task};
use crate::memory::Stores;

pub use scoring::{ScoreBreakdown, Weights};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalContext {
    /// Entity ids the caller is currently focused on.
    #[serde(default)]
    pub entity_context: Vec<String>,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub context: RetrievalContext,
    #[serde(default)]
    pub weights: Option<Weights>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_entity_context(mut self, ids: Vec<String>) -> Self {
        self.context.entity_context = ids;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub id: String,
    pub source: RecordKind,
    pub content: String,
    pub metadata: Metadata,
    pub timestamp: Option<DateTime<Utc>>,
    pub score: f64,
    pub scores: ScoreBreakdown,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResponse {
    pub results: Vec<RetrievalResult>,
    /// Candidates scored after pool truncation.
    pub total_candidates: usize,
    /// Candidates dropped because no usable embedding could be produced.
    pub skipped: usize,
    /// True when the query could not be embedded and semantic scores are all 0.
    pub degraded: bool,
}

/// A record normalized for scoring.
struct Candidate {
    id: String,
    source: RecordKind,
    content: String,
    metadata: Metadata,
    embedding: Vec<f32>,
    timestamp: Option<DateTime<Utc>>,
    related: Vec<String>,
    semantic: f64,
}

impl From<Event> for Candidate {
    fn from(e: Event) -> Self {
        let mut metadata = e.metadata.clone();
        metadata.insert("type".into(), e.event_type.as_str().into());
        metadata.insert("title".into(), e.title.clone().into());
        if let Some(source) = &e.source {
            metadata.insert("source".into(), source.clone().into());
        }
        Self {
            content: e.embedding_text(),
            related: e.participants.iter().map(|p| p.entity_id.clone()).collect(),
            timestamp: Some(e.start_time),
            id: e.id,
            source: RecordKind::Event,
            metadata,
            embedding: e.embedding,
            semantic: 0.0,
        }
    }
}

impl From<Entity> for Candidate {
    fn from(e: Entity) -> Self {
        let mut metadata = e.metadata.clone();
        metadata.insert("type".into(), e.entity_type.as_str().into());
        metadata.insert("name".into(), e.name.clone().into());
        Self {
            content: e.embedding_text(),
            related: vec![e.id.clone()],
            timestamp: Some(e.updated_at),
            id: e.id,
            source: RecordKind::Entity,
            metadata,
            embedding: e.embedding,
            semantic: 0.0,
        }
    }
}

impl From<Task> for Candidate {
    fn from(t: Task) -> Self {
        let mut metadata = t.metadata.clone();
        metadata.insert("status".into(), t.status.as_str().into());
        metadata.insert("priority".into(), t.priority.as_str().into());
        if let Some(due) = t.due_date {
            metadata.insert("due_date".into(), due.to_rfc3339().into());
        }
        Self {
            content: t.embedding_text(),
            related: t
                .assignee_id
                .iter()
                .chain(t.related_entity_id.iter())
                .cloned()
                .collect(),
            timestamp: Some(reference_time(&t)),
            id: t.id,
            source: RecordKind::Task,
            metadata,
            embedding: t.embedding,
            semantic: 0.0,
        }
    }
}

struct Pool {
    candidates: Vec<Candidate>,
    skipped: usize,
}

impl Pool {
    fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            skipped: 0,
        }
    }
}

#[derive(Clone)]
pub struct RetrievalEngine {
    stores: Stores,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(stores: Stores, config: RetrievalConfig) -> Self {
        Self { stores, config }
    }

    pub async fn retrieve(&self, request: RetrievalRequest) -> Result<RetrievalResponse, StoreError> {
        self.retrieve_at(request, Utc::now()).await
    }

    /// [`retrieve`](Self::retrieve) against an explicit clock.
    pub async fn retrieve_at(
        &self,
        request: RetrievalRequest,
        now: DateTime<Utc>,
    ) -> Result<RetrievalResponse, StoreError> {
        let limit = request
            .limit
            .unwrap_or(self.config.default_limit)
            .min(self.config.max_limit);
        if limit == 0 {
            return Ok(RetrievalResponse::default());
        }
        let pool_size = limit * self.config.oversample.max(1);
        let weights = request.weights.unwrap_or_else(|| self.config.weights.into());

        let query_vec = self.embed_query(&request.query).await?;
        let degraded = query_vec.is_none();
        // An all-zero query vector carries no semantic signal.
        let query_vec = query_vec.filter(|q| !is_placeholder(q));

        let mut seen = HashSet::new();
        let context_ids: Vec<String> = request
            .context
            .entity_context
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        let context: HashSet<String> = context_ids.iter().cloned().collect();

        let window = request.context.time_window;
        let (events, entities, tasks) = tokio::try_join!(
            self.load_pool(query_vec.clone(), pool_size, move |stores| {
                Ok(stores
                    .events()
                    .live_in_window(window.as_ref())?
                    .into_iter()
                    .map(Candidate::from)
                    .collect())
            }),
            self.load_pool(query_vec.clone(), pool_size, move |stores| {
                if context_ids.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(stores
                    .entities()
                    .live_by_ids(&context_ids)?
                    .into_iter()
                    .map(Candidate::from)
                    .collect())
            }),
            self.load_pool(query_vec, pool_size, |stores| {
                Ok(stores.tasks().live()?.into_iter().map(Candidate::from).collect())
            }),
        )?;

        let skipped = events.skipped + entities.skipped + tasks.skipped;
        let mut results: Vec<RetrievalResult> = events
            .candidates
            .into_iter()
            .chain(entities.candidates)
            .chain(tasks.candidates)
            .map(|c| {
                let scores = ScoreBreakdown {
                    semantic: c.semantic,
                    temporal: scoring::temporal_score(c.timestamp, now, self.config.decay_per_day),
                    relational: scoring::relational_score(&context, &c.related),
                };
                RetrievalResult {
                    score: scores.composite(&weights),
                    scores,
                    id: c.id,
                    source: c.source,
                    content: c.content,
                    metadata: c.metadata,
                    timestamp: c.timestamp,
                }
            })
            .collect();
        let total_candidates = results.len();

        results.sort_by(|a, b| scoring::by_score_then_id((a.score, &a.id), (b.score, &b.id)));
        results.truncate(limit);

        tracing::debug!(
            limit,
            total_candidates,
            returned = results.len(),
            skipped,
            degraded,
            "retrieval complete"
        );
        Ok(RetrievalResponse {
            results,
            total_candidates,
            skipped,
            degraded,
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Option<Vec<f32>>, StoreError> {
        let embedder = self.stores.embedder.clone();
        let dimensions = self.stores.dimensions;
        let text = query.to_string();
        let result = tokio::task::spawn_blocking(move || embedder.embed(&text)).await?;
        Ok(match result {
            Ok(v) if v.len() == dimensions => Some(v),
            Ok(v) => {
                tracing::warn!(expected = dimensions, got = v.len(), "query embedding has wrong dimensionality");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, semantic scores disabled");
                None
            }
        })
    }

    /// Load one pool off the async workers, then score and truncate it.
    async fn load_pool<F>(
        &self,
        query: Option<Vec<f32>>,
        pool_size: usize,
        load: F,
    ) -> Result<Pool, StoreError>
    where
        F: FnOnce(&Stores) -> Result<Vec<Candidate>, StoreError> + Send + 'static,
    {
        let stores = self.stores.clone();
        tokio::task::spawn_blocking(move || {
            let candidates = load(&stores)?;
            if candidates.is_empty() {
                return Ok(Pool::empty());
            }
            Ok(score_pool(&stores, candidates, query.as_deref(), pool_size))
        })
        .await?
    }
}

fn score_pool(stores: &Stores, candidates: Vec<Candidate>, query: Option<&[f32]>, pool_size: usize) -> Pool {
    let mut pool = Pool::empty();
    for mut c in candidates {
        if let Some(query) = query {
            let missing = c.embedding.len() != stores.dimensions;
            if missing || is_placeholder(&c.embedding) {
                match stores.embedder.embed(&c.content) {
                    Ok(v) if v.len() == stores.dimensions => c.embedding = v,
                    Ok(_) | Err(_) if missing => {
                        tracing::warn!(record_id = %c.id, source = %c.source, "no usable embedding, skipping candidate");
                        pool.skipped += 1;
                        continue;
                    }
                    Ok(_) | Err(_) => {
                        tracing::debug!(record_id = %c.id, "placeholder embedding kept, semantic score 0");
                    }
                }
            }
            c.semantic = cosine_similarity(query, &c.embedding);
        }
        pool.candidates.push(c);
    }
    // Without a query vector every semantic score is 0; keep the newest instead.
    if query.is_some() {
        pool.candidates
            .sort_by(|a, b| scoring::by_score_then_id((a.semantic, &a.id), (b.semantic, &b.id)));
    } else {
        pool.candidates
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    }
    pool.candidates.truncate(pool_size);
    pool
}
