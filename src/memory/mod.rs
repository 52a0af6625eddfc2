pub mod common;
pub mod entities;
pub mod events;
pub mod reconcile;
pub mod relations;
pub mod stats;
pub mod tasks;
pub mod types;

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::config::HindsightConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::StoreError;
use crate::index::{GraphStore, SqliteGraphStore, SqliteVecIndex, VectorIndex};

pub use entities::EntityStore;
pub use events::EventStore;
pub use tasks::TaskStore;

/// Default cosine similarity at which a new entity is flagged as a possible duplicate.
pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.88;

/// Handles to the three backing stores plus the embedding provider.
///
/// Cheap to clone. Built once at startup and passed to the store adapters,
/// the pipeline, and the retrieval engine.
#[derive(Clone)]
pub struct Stores {
    pub db: Arc<Mutex<Connection>>,
    pub vectors: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn GraphStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub dimensions: usize,
    pub dedup_threshold: f64,
}

/// Result of embedding a record's text.
pub(crate) struct Embedded {
    pub vector: Vec<f32>,
    /// `false` when the placeholder was substituted.
    pub real: bool,
}

impl Stores {
    pub fn new(
        conn: Connection,
        vectors: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let dimensions = embedder.dimensions();
        Self {
            db: Arc::new(Mutex::new(conn)),
            vectors,
            graph,
            embedder,
            dimensions,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
        }
    }

    /// Open the three on-disk stores named in `config`.
    pub fn open(config: &HindsightConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let db_path = config.resolved_db_path();
        let conn = crate::db::open_database(&db_path)?;
        tracing::info!(db = %db_path.display(), "database ready");

        if let Ok(Some(stored)) = crate::db::migrations::get_embedding_model(&conn) {
            if stored != embedder.model_name() {
                tracing::warn!(
                    stored = %stored,
                    configured = %embedder.model_name(),
                    "embedding model changed, run `hindsight reindex --reembed` to update all vectors"
                );
            }
        }

        let vectors = SqliteVecIndex::open(config.resolved_vector_path(), embedder.dimensions())
            .context("failed to open vector index")?;
        let graph = SqliteGraphStore::open(config.resolved_graph_path())
            .context("failed to open graph store")?;
        Ok(Self::new(conn, Arc::new(vectors), Arc::new(graph), embedder)
            .with_dedup_threshold(config.retrieval.dedup_threshold))
    }

    /// Three independent in-memory stores.
    pub fn open_in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let conn = crate::db::open_memory_database()?;
        let vectors = SqliteVecIndex::open_in_memory(embedder.dimensions())?;
        let graph = SqliteGraphStore::open_in_memory()?;
        Ok(Self::new(conn, Arc::new(vectors), Arc::new(graph), embedder))
    }

    pub fn with_dedup_threshold(mut self, threshold: f64) -> Self {
        self.dedup_threshold = threshold;
        self
    }

    pub fn entities(&self) -> EntityStore {
        EntityStore::new(self.clone())
    }

    pub fn events(&self) -> EventStore {
        EventStore::new(self.clone())
    }

    pub fn tasks(&self) -> TaskStore {
        TaskStore::new(self.clone())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Embed `text`, substituting the zero placeholder if the provider fails
    /// or returns the wrong dimensionality.
    pub(crate) fn embed_or_placeholder(&self, text: &str) -> Embedded {
        match self.embedder.embed(text) {
            Ok(vector) if vector.len() == self.dimensions => Embedded { vector, real: true },
            Ok(vector) => {
                tracing::warn!(
                    expected = self.dimensions,
                    got = vector.len(),
                    "embedding has wrong dimensionality, using placeholder"
                );
                self.placeholder()
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, using placeholder");
                self.placeholder()
            }
        }
    }

    fn placeholder(&self) -> Embedded {
        Embedded {
            vector: common::placeholder_embedding(self.dimensions),
            real: false,
        }
    }
}
