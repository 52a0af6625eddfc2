//! sqlite-vec backed [`VectorIndex`].
//!
//! One `vec0` virtual table per collection on a dedicated connection. sqlite-vec
//! reports L2 distance; because vectors are normalized on the way in, callers
//! convert with `similarity = 1 - d²/2`.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::{Collection, VectorHit, VectorIndex};
use crate::embedding::l2_normalize;

pub struct SqliteVecIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
}

impl SqliteVecIndex {
    /// Open (or create) the vector store file.
    pub fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        let conn = crate::db::open_connection(path.as_ref())?;
        let index = Self::from_connection(conn, dimensions)?;
        tracing::info!(path = %path.as_ref().display(), dimensions, "vector index ready");
        Ok(index)
    }

    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().context("failed to open in-memory vector index")?;
        Self::from_connection(conn, dimensions)
    }

    fn from_connection(conn: Connection, dimensions: usize) -> Result<Self> {
        for collection in [Collection::Entities, Collection::Events] {
            conn.execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(
                    id TEXT PRIMARY KEY,
                    embedding FLOAT[{dimensions}]
                );",
                collection.table()
            ))
            .with_context(|| format!("failed to create {}", collection.table()))?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("vector index lock poisoned: {e}"))
    }
}

impl VectorIndex for SqliteVecIndex {
    fn upsert(&self, collection: Collection, id: &str, embedding: &[f32]) -> Result<()> {
        anyhow::ensure!(
            embedding.len() == self.dimensions,
            "embedding has {} dimensions, index expects {}",
            embedding.len(),
            self.dimensions
        );
        let bytes = embedding_to_bytes(&l2_normalize(embedding));
        let conn = self.lock()?;
        let table = collection.table();
        // vec0 has no UPSERT
        conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        conn.execute(
            &format!("INSERT INTO {table} (id, embedding) VALUES (?1, ?2)"),
            params![id, bytes],
        )?;
        Ok(())
    }

    fn remove(&self, collection: Collection, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", collection.table()),
            params![id],
        )?;
        Ok(())
    }

    fn nearest(&self, collection: Collection, query: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        if limit == 0 {
            return Ok(vec![]);
        }
        anyhow::ensure!(
            query.len() == self.dimensions,
            "query has {} dimensions, index expects {}",
            query.len(),
            self.dimensions
        );
        let bytes = embedding_to_bytes(&l2_normalize(query));
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, distance FROM {} WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
            collection.table()
        ))?;
        let hits = stmt
            .query_map(params![bytes, limit as i64], |row| {
                Ok(VectorHit {
                    id: row.get(0)?,
                    distance: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    fn count(&self, collection: Collection) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", collection.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

/// Serialize an embedding as little-endian f32 bytes (the sqlite-vec and BLOB format).
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Inverse of [`embedding_to_bytes`]. Trailing partial chunks are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Convert an L2 distance between unit vectors to cosine similarity.
pub fn l2_to_similarity(distance: f64) -> f64 {
    1.0 - (distance * distance) / 2.0
}

/// Largest L2 distance between unit vectors whose cosine similarity is at least `threshold`.
pub fn cosine_threshold_to_l2(threshold: f64) -> f64 {
    (2.0 * (1.0 - threshold)).max(0.0).sqrt()
}
