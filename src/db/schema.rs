//! SQL DDL for the relational (authoritative) store.
//!
//! Defines `entities`, `events`, `event_participants`, `tasks`,
//! `entity_relationships`, and `schema_meta`. All DDL uses `IF NOT EXISTS` for
//! idempotent initialization. The vector and graph stores own their own DDL in
//! [`crate::index`].

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT NOT NULL CHECK(type IN ('person','organization','location','event','document','concept','task')),
    description TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    last_seen_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_entities_type_name ON entities(type, name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_entities_deleted ON entities(deleted_at);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL CHECK(type IN ('meeting','screen_capture','audio','document','note','other')),
    title TEXT NOT NULL,
    description TEXT,
    start_time TEXT NOT NULL,
    end_time TEXT,
    source TEXT,
    source_id TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_start ON events(start_time);
CREATE INDEX IF NOT EXISTS idx_events_deleted ON events(deleted_at);
CREATE INDEX IF NOT EXISTS idx_events_source ON events(source, source_id);

CREATE TABLE IF NOT EXISTS event_participants (
    event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    entity_id TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (event_id, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_participants_entity ON event_participants(entity_id);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL CHECK(status IN ('pending','in_progress','completed','blocked','cancelled')),
    priority TEXT NOT NULL CHECK(priority IN ('low','medium','high','urgent')),
    due_date TEXT,
    assignee_id TEXT,
    related_event_id TEXT,
    related_entity_id TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee_id);
CREATE INDEX IF NOT EXISTS idx_tasks_event ON tasks(related_event_id);
CREATE INDEX IF NOT EXISTS idx_tasks_deleted ON tasks(deleted_at);

-- Typed graph edges; one row per (source, target, type), repeats bump weight
CREATE TABLE IF NOT EXISTS entity_relationships (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    source_kind TEXT NOT NULL CHECK(source_kind IN ('entity','event','task')),
    target_id TEXT NOT NULL,
    target_kind TEXT NOT NULL CHECK(target_kind IN ('entity','event','task')),
    type TEXT NOT NULL,
    weight INTEGER NOT NULL DEFAULT 1,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (source_id, target_id, type)
);

CREATE INDEX IF NOT EXISTS idx_relationships_source ON entity_relationships(source_id);
CREATE INDEX IF NOT EXISTS idx_relationships_target ON entity_relationships(target_id);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all relational tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
