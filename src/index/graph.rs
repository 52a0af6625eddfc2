//! SQLite-backed [`GraphStore`].
//!
//! Nodes carry a label (`Entity`, `Event`, `Task`) and a display name; edges are
//! keyed by `(source_id, target_id, type)` and mirror the relational weight.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::{Direction, GraphNeighbor, GraphStore};
use crate::memory::types::{RecordKind, Relationship, RelationshipType};

const GRAPH_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    name TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS graph_edges (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    type TEXT NOT NULL,
    weight INTEGER NOT NULL DEFAULT 1,
    metadata TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id, type)
);

CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id);
"#;

pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = crate::db::open_connection(path.as_ref())?;
        let store = Self::from_connection(conn)?;
        tracing::info!(path = %path.as_ref().display(), "graph store ready");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory graph store")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(GRAPH_SQL)
            .context("failed to initialize graph schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("graph store lock poisoned: {e}"))
    }
}

fn ensure_node(conn: &Connection, id: &str, kind: RecordKind, now: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO graph_nodes (id, label, name, updated_at) VALUES (?1, ?2, ?1, ?3)",
        params![id, kind.graph_label(), now],
    )?;
    Ok(())
}

impl GraphStore for SqliteGraphStore {
    fn upsert_node(&self, id: &str, kind: RecordKind, name: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO graph_nodes (id, label, name, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET label = excluded.label, name = excluded.name, \
             updated_at = excluded.updated_at",
            params![id, kind.graph_label(), name, now],
        )?;
        Ok(())
    }

    fn delete_node(&self, id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM graph_edges WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM graph_nodes WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn merge_edge(&self, rel: &Relationship) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let metadata = serde_json::to_string(&rel.metadata)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        ensure_node(&tx, &rel.source_id, rel.source_kind, &now)?;
        ensure_node(&tx, &rel.target_id, rel.target_kind, &now)?;
        tx.execute(
            "INSERT INTO graph_edges (source_id, target_id, type, weight, metadata, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(source_id, target_id, type) DO UPDATE SET \
             weight = excluded.weight, metadata = excluded.metadata, updated_at = excluded.updated_at",
            params![
                rel.source_id,
                rel.target_id,
                rel.relationship_type.as_str(),
                rel.weight,
                metadata,
                now
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn remove_edge(&self, source_id: &str, target_id: &str, rel: RelationshipType) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM graph_edges WHERE source_id = ?1 AND target_id = ?2 AND type = ?3",
            params![source_id, target_id, rel.as_str()],
        )?;
        Ok(())
    }

    fn neighbors(&self, id: &str) -> Result<Vec<GraphNeighbor>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT e.target_id, COALESCE(n.label, ''), e.type, e.weight, 'out' \
             FROM graph_edges e LEFT JOIN graph_nodes n ON n.id = e.target_id \
             WHERE e.source_id = ?1 \
             UNION ALL \
             SELECT e.source_id, COALESCE(n.label, ''), e.type, e.weight, 'in' \
             FROM graph_edges e LEFT JOIN graph_nodes n ON n.id = e.source_id \
             WHERE e.target_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut neighbors = Vec::with_capacity(rows.len());
        for (other, label, rel_type, weight, dir) in rows {
            let relationship_type = rel_type
                .parse::<RelationshipType>()
                .map_err(|e| anyhow::anyhow!(e))?;
            neighbors.push(GraphNeighbor {
                id: other,
                label,
                relationship_type,
                weight,
                direction: if dir == "out" {
                    Direction::Outgoing
                } else {
                    Direction::Incoming
                },
            });
        }
        Ok(neighbors)
    }

    fn counts(&self) -> Result<(usize, usize)> {
        let conn = self.lock()?;
        let nodes: i64 = conn.query_row("SELECT COUNT(*) FROM graph_nodes", [], |r| r.get(0))?;
        let edges: i64 = conn.query_row("SELECT COUNT(*) FROM graph_edges", [], |r| r.get(0))?;
        Ok((nodes as usize, edges as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Metadata;
    use chrono::Utc;

    fn rel(source: &str, target: &str, weight: i64) -> Relationship {
        Relationship {
            id: "r".into(),
            source_id: source.into(),
            source_kind: RecordKind::Event,
            target_id: target.into(),
            target_kind: RecordKind::Entity,
            relationship_type: RelationshipType::Mentions,
            weight,
            metadata: Metadata::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merge_edge_overwrites_weight() {
        let graph = SqliteGraphStore::open_in_memory().unwrap();
        graph.merge_edge(&rel("ev", "alice", 1)).unwrap();
        graph.merge_edge(&rel("ev", "alice", 2)).unwrap();

        let out = graph.neighbors("ev").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].weight, 2);
        assert_eq!(out[0].direction, Direction::Outgoing);
        assert_eq!(out[0].label, "Entity");
        assert_eq!(graph.counts().unwrap(), (2, 1));
    }

    #[test]
    fn delete_node_detaches_edges() {
        let graph = SqliteGraphStore::open_in_memory().unwrap();
        graph.upsert_node("alice", RecordKind::Entity, "Alice").unwrap();
        graph.merge_edge(&rel("ev", "alice", 1)).unwrap();
        graph.delete_node("alice").unwrap();

        assert!(graph.neighbors("ev").unwrap().is_empty());
        assert_eq!(graph.counts().unwrap(), (1, 0));
    }

    #[test]
    fn remove_edge_is_typed() {
        let graph = SqliteGraphStore::open_in_memory().unwrap();
        graph.merge_edge(&rel("ev", "alice", 1)).unwrap();
        graph
            .remove_edge("ev", "alice", RelationshipType::RelatedTo)
            .unwrap();
        assert_eq!(graph.neighbors("alice").unwrap().len(), 1);
        graph
            .remove_edge("ev", "alice", RelationshipType::Mentions)
            .unwrap();
        assert!(graph.neighbors("alice").unwrap().is_empty());
    }
}
