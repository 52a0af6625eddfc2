pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) a SQLite file with the pragmas every store expects:
/// WAL journaling, foreign keys, and a busy timeout.
pub fn open_connection(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    Ok(conn)
}

/// Open (or create) the relational store at the given path, with schema
/// initialized and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    let mut conn = open_connection(path)?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&mut conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a fully initialized in-memory relational store.
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let mut conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&mut conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Summary produced by [`check_database_health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub schema_version: u32,
    pub expected_schema_version: u32,
    pub journal_mode: String,
    pub sqlite_vec_version: String,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.integrity_ok && self.schema_version == self.expected_schema_version
    }
}

/// Run SQLite's integrity check and collect schema metadata.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let integrity_details: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .context("integrity check failed to run")?;
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    let sqlite_vec_version: String = conn
        .query_row("SELECT vec_version()", [], |row| row.get(0))
        .context("sqlite-vec is not loaded")?;

    Ok(HealthReport {
        integrity_ok: integrity_details == "ok",
        integrity_details,
        schema_version: migrations::get_schema_version(conn)?,
        expected_schema_version: migrations::CURRENT_SCHEMA_VERSION,
        journal_mode,
        sqlite_vec_version: sqlite_vec_version.trim_start_matches('v').to_string(),
        embedding_model: migrations::get_embedding_model(conn)?,
        embedding_dimensions: migrations::get_embedding_dimensions(conn)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_database_is_healthy() {
        let conn = open_memory_database().unwrap();
        let report = check_database_health(&conn).unwrap();
        assert!(report.integrity_ok);
        assert!(report.is_healthy());
        assert_eq!(report.embedding_dimensions, Some(384));
    }

    #[test]
    fn file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_database(dir.path().join("nested").join("memory.db")).unwrap();
        let report = check_database_health(&conn).unwrap();
        assert_eq!(report.journal_mode.to_lowercase(), "wal");
    }
}
