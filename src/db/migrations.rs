//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `schema_meta` and runs sequential migrations
//! to bring the database up to [`CURRENT_SCHEMA_VERSION`]. Migrations only ever
//! add things; nothing is renamed or dropped.

use rusqlite::Connection;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    match conn.query_row(
        "SELECT value FROM schema_meta WHERE key = ?1",
        [key],
        |row| row.get::<_, String>(0),
    ) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// The embedding model the stored vectors were produced with, if recorded.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    get_meta(conn, "embedding_model")
}

/// The embedding dimensionality the stored vectors were produced with, if recorded.
pub fn get_embedding_dimensions(conn: &Connection) -> rusqlite::Result<Option<usize>> {
    Ok(get_meta(conn, "embedding_dimensions")?.and_then(|v| v.parse().ok()))
}

/// Record the embedding model and dimensionality currently in use.
pub fn set_embedding_model(conn: &Connection, model: &str, dimensions: usize) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_model', ?1)",
        [model],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_dimensions', ?1)",
        [dimensions.to_string()],
    )?;
    Ok(())
}

/// Run any pending forward-only migrations, each in its own transaction.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        let tx = conn.transaction()?;
        match next {
            2 => migrate_v1_to_v2(&tx)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }
        update_schema_version(&tx, next)?;
        tx.commit()?;
        version = next;
    }

    Ok(())
}

/// v1 → v2: seed the embedding model keys so model changes can be detected.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('embedding_model', 'all-MiniLM-L6-v2')",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('embedding_dimensions', '384')",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn fresh_db_starts_at_version_1() {
        let conn = test_db();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
        assert!(get_embedding_model(&conn).unwrap().is_none());
    }

    #[test]
    fn run_migrations_upgrades_to_current() {
        let mut conn = test_db();
        run_migrations(&mut conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(
            get_embedding_model(&conn).unwrap().as_deref(),
            Some("all-MiniLM-L6-v2")
        );
        assert_eq!(get_embedding_dimensions(&conn).unwrap(), Some(384));
    }

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = test_db();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn set_embedding_model_overwrites() {
        let mut conn = test_db();
        run_migrations(&mut conn).unwrap();
        set_embedding_model(&conn, "text-embedding-3-small", 1536).unwrap();
        assert_eq!(
            get_embedding_model(&conn).unwrap().as_deref(),
            Some("text-embedding-3-small")
        );
        assert_eq!(get_embedding_dimensions(&conn).unwrap(), Some(1536));
    }
}
