use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::memory::types::TaskStatus;

/// Live and soft-deleted row counts for one table.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RecordCounts {
    pub live: u64,
    pub deleted: u64,
}

/// Response from [`memory_stats`].
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub entities: RecordCounts,
    pub events: RecordCounts,
    pub tasks: RecordCounts,
    /// Live tasks per status; every status is present.
    pub tasks_by_status: BTreeMap<String, u64>,
    pub relationships: u64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_event: Option<String>,
}

/// Compute relational store statistics.
///
/// `db_path` is used for file size; pass None for in-memory databases.
pub fn memory_stats(conn: &Connection, db_path: Option<&Path>) -> Result<StatsResponse> {
    let entities = count_records(conn, "entities")?;
    let events = count_records(conn, "events")?;
    let tasks = count_records(conn, "tasks")?;
    let tasks_by_status = count_tasks_by_status(conn)?;
    let relationships: i64 =
        conn.query_row("SELECT COUNT(*) FROM entity_relationships", [], |row| row.get(0))?;
    let (oldest_event, newest_event) = conn.query_row(
        "SELECT MIN(start_time), MAX(start_time) FROM events WHERE deleted_at IS NULL",
        [],
        |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
    )?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        entities,
        events,
        tasks,
        tasks_by_status,
        relationships: relationships as u64,
        db_size_bytes,
        oldest_event,
        newest_event,
    })
}

fn count_records(conn: &Connection, table: &str) -> Result<RecordCounts> {
    let (live, deleted): (i64, i64) = conn.query_row(
        &format!(
            "SELECT COUNT(*) FILTER (WHERE deleted_at IS NULL), \
                    COUNT(*) FILTER (WHERE deleted_at IS NOT NULL) FROM {table}"
        ),
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(RecordCounts {
        live: live as u64,
        deleted: deleted as u64,
    })
}

fn count_tasks_by_status(conn: &Connection) -> Result<BTreeMap<String, u64>> {
    let mut map: BTreeMap<String, u64> = TaskStatus::all()
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM tasks WHERE deleted_at IS NULL GROUP BY status",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (status, count) in rows {
        map.insert(status, count as u64);
    }
    Ok(map)
}
