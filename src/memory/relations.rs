//! Typed relationship storage.
//!
//! Relationships live in `entity_relationships`, unique on
//! `(source_id, target_id, type)`. Asserting an existing edge again increments
//! its weight and merges metadata instead of inserting a second row. These
//! functions take a `&Connection` (or a `Transaction` via deref) so callers
//! decide the transaction boundary.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::common::{enum_col, fmt_time, merge_metadata, metadata_col, metadata_to_sql, new_id, time_col};
use super::types::{NewRelationship, RecordKind, Relationship, RelationshipType};
use crate::error::StoreError;

const COLUMNS: &str =
    "id, source_id, source_kind, target_id, target_kind, type, weight, metadata, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    Ok(Relationship {
        id: row.get(0)?,
        source_id: row.get(1)?,
        source_kind: enum_col(row, 2)?,
        target_id: row.get(3)?,
        target_kind: enum_col(row, 4)?,
        relationship_type: enum_col(row, 5)?,
        weight: row.get(6)?,
        metadata: metadata_col(row, 7)?,
        created_at: time_col(row, 8)?,
        updated_at: time_col(row, 9)?,
    })
}

/// Whether a live (not soft-deleted) record of `kind` exists.
pub fn live_record_exists(conn: &Connection, kind: RecordKind, id: &str) -> Result<bool, StoreError> {
    let table = match kind {
        RecordKind::Entity => "entities",
        RecordKind::Event => "events",
        RecordKind::Task => "tasks",
    };
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE id = ?1 AND deleted_at IS NULL"),
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn find_relationship(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    rel: RelationshipType,
) -> Result<Option<Relationship>, StoreError> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM entity_relationships \
                 WHERE source_id = ?1 AND target_id = ?2 AND type = ?3"
            ),
            params![source_id, target_id, rel.as_str()],
            from_row,
        )
        .optional()?;
    Ok(found)
}

/// Insert the edge, or bump the weight of the existing one and merge metadata.
pub fn upsert_relationship(
    conn: &Connection,
    input: &NewRelationship,
) -> Result<Relationship, StoreError> {
    let now = Utc::now();
    let now_s = fmt_time(&now);

    if let Some(mut existing) = find_relationship(
        conn,
        &input.source_id,
        &input.target_id,
        input.relationship_type,
    )? {
        existing.weight += 1;
        existing.updated_at = now;
        merge_metadata(&mut existing.metadata, input.metadata.clone());
        conn.execute(
            "UPDATE entity_relationships SET weight = ?1, metadata = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                existing.weight,
                metadata_to_sql(&existing.metadata)?,
                now_s,
                existing.id
            ],
        )?;
        return Ok(existing);
    }

    let rel = Relationship {
        id: new_id(),
        source_id: input.source_id.clone(),
        source_kind: input.source_kind,
        target_id: input.target_id.clone(),
        target_kind: input.target_kind,
        relationship_type: input.relationship_type,
        weight: 1,
        metadata: input.metadata.clone(),
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        &format!("INSERT INTO entity_relationships ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"),
        params![
            rel.id,
            rel.source_id,
            rel.source_kind.as_str(),
            rel.target_id,
            rel.target_kind.as_str(),
            rel.relationship_type.as_str(),
            rel.weight,
            metadata_to_sql(&rel.metadata)?,
            now_s,
        ],
    )?;
    Ok(rel)
}

/// Every relationship with `id` at either end, oldest first.
pub fn relationships_for(conn: &Connection, id: &str) -> Result<Vec<Relationship>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM entity_relationships \
         WHERE source_id = ?1 OR target_id = ?1 ORDER BY created_at, id"
    ))?;
    let rows = stmt
        .query_map(params![id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn all_relationships(conn: &Connection) -> Result<Vec<Relationship>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM entity_relationships ORDER BY created_at, id"
    ))?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns `true` if a row was removed.
pub fn delete_relationship(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    rel: RelationshipType,
) -> Result<bool, StoreError> {
    let n = conn.execute(
        "DELETE FROM entity_relationships WHERE source_id = ?1 AND target_id = ?2 AND type = ?3",
        params![source_id, target_id, rel.as_str()],
    )?;
    Ok(n > 0)
}

pub fn delete_relationships_for(conn: &Connection, id: &str) -> Result<usize, StoreError> {
    let n = conn.execute(
        "DELETE FROM entity_relationships WHERE source_id = ?1 OR target_id = ?1",
        params![id],
    )?;
    Ok(n)
}

/// Outcome of [`repoint_relationships`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepointSummary {
    pub moved: usize,
    pub merged: usize,
    pub dropped: usize,
}

/// Move every edge touching `from` onto `to`.
///
/// An edge that would collide with an existing `(source, target, type)` adds
/// its weight into that edge. An edge that would become a self-loop is dropped.
pub fn repoint_relationships(
    conn: &Connection,
    from: &str,
    to: &str,
) -> Result<RepointSummary, StoreError> {
    let mut summary = RepointSummary::default();
    let now = fmt_time(&Utc::now());

    for rel in relationships_for(conn, from)? {
        let source = if rel.source_id == from { to } else { rel.source_id.as_str() };
        let target = if rel.target_id == from { to } else { rel.target_id.as_str() };

        if source == target {
            conn.execute("DELETE FROM entity_relationships WHERE id = ?1", params![rel.id])?;
            summary.dropped += 1;
            continue;
        }

        match find_relationship(conn, source, target, rel.relationship_type)? {
            Some(mut existing) if existing.id != rel.id => {
                existing.weight += rel.weight;
                merge_metadata(&mut existing.metadata, rel.metadata.clone());
                conn.execute(
                    "UPDATE entity_relationships SET weight = ?1, metadata = ?2, updated_at = ?3 WHERE id = ?4",
                    params![existing.weight, metadata_to_sql(&existing.metadata)?, now, existing.id],
                )?;
                conn.execute("DELETE FROM entity_relationships WHERE id = ?1", params![rel.id])?;
                summary.merged += 1;
            }
            _ => {
                conn.execute(
                    "UPDATE entity_relationships SET source_id = ?1, target_id = ?2, updated_at = ?3 WHERE id = ?4",
                    params![source, target, now, rel.id],
                )?;
                summary.moved += 1;
            }
        }
    }

    Ok(summary)
}
