//! Secondary indexes: the vector index and the graph store.
//!
//! Both are derived from the relational store and written best-effort after a
//! relational commit. They sit behind traits so either can be swapped out;
//! the default implementations are SQLite files of their own.

pub mod graph;
pub mod vector;

use anyhow::Result;
use serde::Serialize;

use crate::memory::types::{RecordKind, Relationship, RelationshipType};

pub use graph::SqliteGraphStore;
pub use vector::SqliteVecIndex;

/// A named vector collection. Tasks have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Entities,
    Events,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Entities => "entities_vec",
            Self::Events => "events_vec",
        }
    }

    pub fn for_kind(kind: RecordKind) -> Option<Self> {
        match kind {
            RecordKind::Entity => Some(Self::Entities),
            RecordKind::Event => Some(Self::Events),
            RecordKind::Task => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Entities => "entities",
            Self::Events => "events",
        })
    }
}

/// One nearest-neighbor result. `distance` is L2 over normalized vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub distance: f64,
}

/// Approximate-nearest-neighbor index keyed by record id.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector for `id`. The vector is L2-normalized before storage.
    fn upsert(&self, collection: Collection, id: &str, embedding: &[f32]) -> Result<()>;

    fn remove(&self, collection: Collection, id: &str) -> Result<()>;

    /// Up to `limit` nearest vectors, closest first.
    fn nearest(&self, collection: Collection, query: &[f32], limit: usize) -> Result<Vec<VectorHit>>;

    fn count(&self, collection: Collection) -> Result<usize>;
}

/// Edge direction relative to the node passed to [`GraphStore::neighbors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNeighbor {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub weight: i64,
    pub direction: Direction,
}

/// Labeled property graph over entity, event, and task nodes.
pub trait GraphStore: Send + Sync {
    /// Create the node or refresh its label and display name.
    fn upsert_node(&self, id: &str, kind: RecordKind, name: &str) -> Result<()>;

    /// Remove the node and every edge touching it.
    fn delete_node(&self, id: &str) -> Result<()>;

    /// Create the edge or overwrite its weight and metadata with the relationship's.
    fn merge_edge(&self, relationship: &Relationship) -> Result<()>;

    fn remove_edge(&self, source_id: &str, target_id: &str, rel: RelationshipType) -> Result<()>;

    fn neighbors(&self, id: &str) -> Result<Vec<GraphNeighbor>>;

    /// `(nodes, edges)`.
    fn counts(&self) -> Result<(usize, usize)>;
}
