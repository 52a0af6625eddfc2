//! HTTP API.
//!
//! Provides [`router`] for the REST surface and [`serve`], which wires the
//! stores, embedding provider, extraction pipeline, and retrieval engine into
//! a running server.

use std::str::FromStr;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::HindsightConfig;
use crate::embedding;
use crate::error::{StoreError, ValidationError};
use crate::memory::types::{Entity, Event, EventType, Metadata, Task, TaskStatus};
use crate::memory::Stores;
use crate::pipeline::extraction::create_extractor;
use crate::pipeline::transcription::create_transcriber;
use crate::pipeline::{EventPipeline, IngestPayload, PipelineError, PipelineHandle, ProcessedEvent};
use crate::retrieval::{RetrievalEngine, RetrievalRequest, RetrievalResponse};

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub pipeline: PipelineHandle,
    pub engine: RetrievalEngine,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(ingest_event))
        .route("/events/{id}", get(get_event))
        .route("/search", post(search))
        .route("/retrieve", post(search))
        .route("/entities/{id}", get(get_entity))
        .route("/tasks/{id}/status", patch(set_task_status))
        .with_state(state)
}

/// Open the stores, start the pipeline, and serve until ctrl-c.
pub async fn serve(config: HindsightConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let embedder = embedding::create_provider(&config.embedding)?;
    tracing::info!(provider = %config.embedding.provider, model = %embedder.model_name(), "embedding provider ready");

    let stores = Stores::open(&config, embedder)?;
    let extractor = create_extractor(&config.extraction)?;
    let transcriber = create_transcriber(&config.transcription)?;
    let pipeline = EventPipeline::spawn(stores.clone(), extractor, transcriber, &config);
    let engine = RetrievalEngine::new(stores.clone(), config.retrieval.clone());

    let app = router(AppState {
        stores,
        pipeline,
        engine,
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "hindsight listening at http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down server");
        })
        .await?;

    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn default_event_type() -> EventType {
    EventType::Note
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_event_type")]
    pub event_type: EventType,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    /// Base64-encoded audio bytes.
    #[serde(default)]
    pub audio: Option<String>,
}

impl IngestRequest {
    fn into_payload(self) -> Result<IngestPayload, ValidationError> {
        let mut errors = ValidationError::new();
        let audio = match self.audio.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(encoded) => match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    errors.push("audio", format!("invalid base64: {e}"));
                    None
                }
            },
            None => None,
        };
        if self.content.trim().is_empty() && audio.is_none() {
            errors.push("content", "must not be empty unless audio is provided");
        }
        errors.into_result()?;

        Ok(IngestPayload {
            content: self.content,
            event_type: self.event_type,
            metadata: self.metadata,
            participants: self.participants,
            source: self.source,
            source_id: self.source_id,
            audio,
        })
    }
}

async fn ingest_event(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProcessedEvent>), ApiError> {
    let Json(request) = payload?;
    let payload = request.into_payload().map_err(StoreError::from)?;
    let processed = state.pipeline.process_event(payload).await?;
    Ok((StatusCode::CREATED, Json(processed)))
}

async fn search(
    State(state): State<AppState>,
    payload: Result<Json<RetrievalRequest>, JsonRejection>,
) -> Result<Json<RetrievalResponse>, ApiError> {
    let Json(request) = payload?;
    tracing::debug!(query_len = request.query.len(), limit = ?request.limit, "retrieval request");
    Ok(Json(state.engine.retrieve(request).await?))
}

async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Entity>, ApiError> {
    let entities = state.stores.entities();
    let mut entity = tokio::task::spawn_blocking(move || entities.get(&id))
        .await
        .map_err(StoreError::from)??;
    entity.embedding.clear();
    Ok(Json(entity))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Event>, ApiError> {
    let events = state.stores.events();
    let mut event = tokio::task::spawn_blocking(move || events.get(&id))
        .await
        .map_err(StoreError::from)??;
    event.embedding.clear();
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

async fn set_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(request) = payload?;
    let status = TaskStatus::from_str(request.status.trim()).map_err(|e| {
        let mut err = ValidationError::new();
        err.push("status", e);
        StoreError::from(err)
    })?;
    let tasks = state.stores.tasks();
    let mut task = tokio::task::spawn_blocking(move || tasks.set_status(&id, status))
        .await
        .map_err(StoreError::from)??;
    task.embedding.clear();
    Ok(Json(task))
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    fields: Option<Vec<String>>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            fields: None,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(v) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                fields: Some(v.fields().into_iter().map(str::to_string).collect()),
                message: v.to_string(),
            },
            StoreError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            other => {
                tracing::error!(error = %other, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Store(e) => e.into(),
            PipelineError::Closed => Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            fields: self.fields,
        };
        (self.status, Json(body)).into_response()
    }
}
