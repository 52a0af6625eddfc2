//! Personal memory layer for AI desktop assistants.
//!
//! Hindsight turns captured observations (meeting notes, screen captures,
//! audio) into structured memory: the people, organizations, and concepts
//! they mention, the events themselves, and the action items they produce.
//! Memory is recalled by a hybrid ranking that blends semantic similarity,
//! recency, and overlap with the entities the caller is focused on.
//!
//! # Architecture
//!
//! - **Relational store**: SQLite, the source of truth for every record
//! - **Vector index**: [sqlite-vec](https://github.com/asg017/sqlite-vec) collections for
//!   entities and events
//! - **Graph store**: typed, weighted edges in SQLite
//! - **Embeddings**: local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions), an
//!   OpenAI-compatible endpoint, or a deterministic hashing embedder
//! - **Extraction**: an OpenAI-compatible chat model in JSON mode
//! - **Transport**: REST over axum
//!
//! Relational writes are transactional; vector and graph writes follow the
//! commit on a best-effort basis and can be rebuilt with
//! [`memory::reconcile::reconcile`].
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`embedding`]: text-to-vector providers
//! - [`index`]: the vector index and graph store behind their traits
//! - [`memory`]: the entity, event, and task store adapters
//! - [`pipeline`]: transcription, extraction, and structured writes for new events
//! - [`retrieval`]: hybrid ranking across all record types
//! - [`server`]: the HTTP API

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod memory;
pub mod pipeline;
pub mod retrieval;
pub mod server;
