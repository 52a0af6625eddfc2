//! Event store adapter.
//!
//! Owns `events` and `event_participants`, the `events` vector collection, and
//! the `Event` graph nodes plus each participant's `PARTICIPATED_IN` edge.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::common::{
    best_effort, embedding_col, enum_col, fmt_time, merge_metadata, metadata_col,
    metadata_to_sql, new_id, opt_time_col, paged, resolve_sort, time_col, Filters, FindOptions,
    Page, PageRequest, TimeWindow,
};
use super::relations;
use super::types::{
    titled_embedding_text, Event, EventPatch, EventType, NewEvent, NewRelationship, Participant,
    RecordKind, Relationship, RelationshipType,
};
use super::Stores;
use crate::embedding::is_placeholder;
use crate::error::{StoreError, ValidationError};
use crate::index::vector::embedding_to_bytes;
use crate::index::Collection;

const COLUMNS: &str = "id, type, title, description, start_time, end_time, source, source_id, metadata, embedding, created_at, updated_at, deleted_at";
const SORT_COLUMNS: &[&str] = &["start_time", "created_at", "updated_at", "title"];

fn from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        event_type: enum_col(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        start_time: time_col(row, 4)?,
        end_time: opt_time_col(row, 5)?,
        participants: Vec::new(),
        source: row.get(6)?,
        source_id: row.get(7)?,
        metadata: metadata_col(row, 8)?,
        embedding: embedding_col(row, 9)?,
        created_at: time_col(row, 10)?,
        updated_at: time_col(row, 11)?,
        deleted_at: opt_time_col(row, 12)?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub source: Option<String>,
    pub start_after: Option<DateTime<Utc>>,
    pub start_before: Option<DateTime<Utc>>,
    pub include_deleted: bool,
}

#[derive(Clone)]
pub struct EventStore {
    stores: Stores,
}

impl EventStore {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Validate, embed, and insert the event with its participants in one
    /// transaction, then index it.
    pub fn create(&self, input: NewEvent) -> Result<Event, StoreError> {
        input.validate()?;

        let text = titled_embedding_text(&input.title, input.description.as_deref());
        let embedded = self.stores.embed_or_placeholder(&text);

        let now = Utc::now();
        let mut event = Event {
            id: new_id(),
            event_type: input.event_type,
            title: input.title,
            description: input.description,
            start_time: input.start_time,
            end_time: input.end_time,
            participants: Vec::new(),
            source: input.source,
            source_id: input.source_id,
            metadata: input.metadata,
            embedding: embedded.vector,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        event.participants = dedup_participants(input.participants);

        let edges = {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;
            insert_row(&tx, &event)?;
            insert_participants(&tx, &event.id, &event.participants)?;
            let edges = participation_edges(&tx, &event.id, &event.participants)?;
            tx.commit()?;
            edges
        };

        if embedded.real {
            best_effort(&event.id, "vector", "upsert", || {
                self.stores
                    .vectors
                    .upsert(Collection::Events, &event.id, &event.embedding)
            });
        }
        best_effort(&event.id, "graph", "upsert_node", || {
            self.stores
                .graph
                .upsert_node(&event.id, RecordKind::Event, &event.title)
        });
        self.merge_edges(&edges);

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            participants = event.participants.len(),
            "event created"
        );
        Ok(event)
    }

    /// Apply a patch to a live event. A `participants` patch replaces the list.
    pub fn update(&self, id: &str, patch: EventPatch) -> Result<Event, StoreError> {
        let current = self.get(id)?;
        let mut next = current.clone();
        if let Some(event_type) = patch.event_type {
            next.event_type = event_type;
        }
        if let Some(title) = patch.title {
            next.title = title;
        }
        if let Some(description) = patch.description {
            next.description = Some(description);
        }
        if let Some(start_time) = patch.start_time {
            next.start_time = start_time;
        }
        if let Some(end_time) = patch.end_time {
            next.end_time = Some(end_time);
        }
        let participants_changed = patch.participants.is_some();
        if let Some(participants) = patch.participants {
            next.participants = dedup_participants(participants);
        }
        if let Some(metadata) = patch.metadata {
            merge_metadata(&mut next.metadata, metadata);
        }
        validate_merged(&next)?;

        let text_changed = next.embedding_text() != current.embedding_text();
        let mut indexable = !next.embedding.is_empty() && !is_placeholder(&next.embedding);
        if text_changed {
            let embedded = self.stores.embed_or_placeholder(&next.embedding_text());
            next.embedding = embedded.vector;
            indexable = embedded.real;
        }
        next.updated_at = Utc::now();

        let (edges, dropped) = {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE events SET type = ?1, title = ?2, description = ?3, start_time = ?4, \
                 end_time = ?5, metadata = ?6, embedding = ?7, updated_at = ?8 \
                 WHERE id = ?9 AND deleted_at IS NULL",
                params![
                    next.event_type.as_str(),
                    next.title,
                    next.description,
                    fmt_time(&next.start_time),
                    next.end_time.as_ref().map(fmt_time),
                    metadata_to_sql(&next.metadata)?,
                    embedding_to_bytes(&next.embedding),
                    fmt_time(&next.updated_at),
                    id
                ],
            )?;
            if n == 0 {
                return Err(StoreError::not_found(RecordKind::Event, id));
            }

            let mut dropped = Vec::new();
            let mut edges = Vec::new();
            if participants_changed {
                for old in &current.participants {
                    if !next.participants.iter().any(|p| p.entity_id == old.entity_id) {
                        relations::delete_relationship(
                            &tx,
                            &old.entity_id,
                            id,
                            RelationshipType::ParticipatedIn,
                        )?;
                        dropped.push(old.entity_id.clone());
                    }
                }
                tx.execute("DELETE FROM event_participants WHERE event_id = ?1", params![id])?;
                insert_participants(&tx, id, &next.participants)?;
                let fresh: Vec<Participant> = next
                    .participants
                    .iter()
                    .filter(|p| !current.participants.iter().any(|c| c.entity_id == p.entity_id))
                    .cloned()
                    .collect();
                edges = participation_edges(&tx, id, &fresh)?;
            }
            tx.commit()?;
            (edges, dropped)
        };

        if text_changed {
            if indexable {
                best_effort(id, "vector", "upsert", || {
                    self.stores.vectors.upsert(Collection::Events, id, &next.embedding)
                });
            } else {
                best_effort(id, "vector", "remove", || {
                    self.stores.vectors.remove(Collection::Events, id)
                });
            }
        }
        if next.title != current.title {
            best_effort(id, "graph", "upsert_node", || {
                self.stores.graph.upsert_node(id, RecordKind::Event, &next.title)
            });
        }
        for entity_id in &dropped {
            best_effort(id, "graph", "remove_edge", || {
                self.stores
                    .graph
                    .remove_edge(entity_id, id, RelationshipType::ParticipatedIn)
            });
        }
        self.merge_edges(&edges);

        Ok(next)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let now = fmt_time(&Utc::now());
        let n = self.stores.conn()?.execute(
            "UPDATE events SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now, id],
        )?;
        if n == 0 {
            return Err(StoreError::not_found(RecordKind::Event, id));
        }
        best_effort(id, "vector", "remove", || {
            self.stores.vectors.remove(Collection::Events, id)
        });
        tracing::debug!(event_id = id, "event soft-deleted");
        Ok(())
    }

    /// Physically remove the event, its participant rows, and its relationships.
    /// Tasks derived from it keep existing with `related_event_id` cleared.
    pub fn hard_delete(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;
            if load(&tx, id, true)?.is_none() {
                return Err(StoreError::not_found(RecordKind::Event, id));
            }
            relations::delete_relationships_for(&tx, id)?;
            tx.execute(
                "UPDATE tasks SET related_event_id = NULL WHERE related_event_id = ?1",
                params![id],
            )?;
            // participants cascade
            tx.execute("DELETE FROM events WHERE id = ?1", params![id])?;
            tx.commit()?;
        }
        best_effort(id, "vector", "remove", || {
            self.stores.vectors.remove(Collection::Events, id)
        });
        best_effort(id, "graph", "delete_node", || self.stores.graph.delete_node(id));
        tracing::info!(event_id = id, "event hard-deleted");
        Ok(())
    }

    pub fn find_by_id(&self, id: &str, opts: &FindOptions) -> Result<Option<Event>, StoreError> {
        let conn = self.stores.conn()?;
        load(&conn, id, opts.include_deleted)
    }

    pub fn get(&self, id: &str) -> Result<Event, StoreError> {
        self.find_by_id(id, &FindOptions::default())?
            .ok_or_else(|| StoreError::not_found(RecordKind::Event, id))
    }

    pub fn find(&self, filter: &EventFilter, page: &PageRequest) -> Result<Page<Event>, StoreError> {
        let sort = resolve_sort(page, SORT_COLUMNS)?;
        let mut filters = Filters::new();
        filters.live_only(filter.include_deleted);
        if let Some(t) = filter.event_type {
            filters.bind("type = ?", t.as_str().to_string());
        }
        if let Some(source) = &filter.source {
            filters.bind("source = ?", source.clone());
        }
        if let Some(after) = &filter.start_after {
            filters.bind("start_time >= ?", fmt_time(after));
        }
        if let Some(before) = &filter.start_before {
            filters.bind("start_time <= ?", fmt_time(before));
        }

        let conn = self.stores.conn()?;
        let mut page = paged(&conn, "events", COLUMNS, &filters, sort, page, from_row)?;
        for event in &mut page.items {
            event.participants = load_participants(&conn, &event.id)?;
        }
        Ok(page)
    }

    /// Live events whose `start_time` falls inside the window (or all live
    /// events), newest first.
    pub fn live_in_window(&self, window: Option<&TimeWindow>) -> Result<Vec<Event>, StoreError> {
        let conn = self.stores.conn()?;
        load_live(&conn, window)
    }

    fn merge_edges(&self, edges: &[Relationship]) {
        for edge in edges {
            best_effort(&edge.target_id, "graph", "merge_edge", || {
                self.stores.graph.merge_edge(edge)
            });
        }
    }
}

// ── Row helpers ───────────────────────────────────────────────────────────────

fn insert_row(conn: &Connection, e: &Event) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO events ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL)"
        ),
        params![
            e.id,
            e.event_type.as_str(),
            e.title,
            e.description,
            fmt_time(&e.start_time),
            e.end_time.as_ref().map(fmt_time),
            e.source,
            e.source_id,
            metadata_to_sql(&e.metadata)?,
            embedding_to_bytes(&e.embedding),
            fmt_time(&e.created_at),
            fmt_time(&e.updated_at),
        ],
    )?;
    Ok(())
}

fn insert_participants(conn: &Connection, event_id: &str, participants: &[Participant]) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO event_participants (event_id, entity_id, metadata) VALUES (?1, ?2, ?3)",
    )?;
    for p in participants {
        stmt.execute(params![event_id, p.entity_id, metadata_to_sql(&p.metadata)?])?;
    }
    Ok(())
}

/// Upsert an entity → event `PARTICIPATED_IN` edge for each participant that
/// is a live entity.
fn participation_edges(
    conn: &Connection,
    event_id: &str,
    participants: &[Participant],
) -> Result<Vec<Relationship>, StoreError> {
    let mut edges = Vec::new();
    for p in participants {
        if !relations::live_record_exists(conn, RecordKind::Entity, &p.entity_id)? {
            continue;
        }
        let input = NewRelationship::new(
            (p.entity_id.as_str(), RecordKind::Entity),
            RelationshipType::ParticipatedIn,
            (event_id, RecordKind::Event),
        );
        edges.push(relations::upsert_relationship(conn, &input)?);
    }
    Ok(edges)
}

fn load_participants(conn: &Connection, event_id: &str) -> Result<Vec<Participant>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, metadata FROM event_participants WHERE event_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map(params![event_id], |row| {
            Ok(Participant {
                entity_id: row.get(0)?,
                metadata: metadata_col(row, 1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn load(conn: &Connection, id: &str, include_deleted: bool) -> Result<Option<Event>, StoreError> {
    let sql = if include_deleted {
        format!("SELECT {COLUMNS} FROM events WHERE id = ?1")
    } else {
        format!("SELECT {COLUMNS} FROM events WHERE id = ?1 AND deleted_at IS NULL")
    };
    let Some(mut event) = conn.query_row(&sql, params![id], from_row).optional()? else {
        return Ok(None);
    };
    event.participants = load_participants(conn, &event.id)?;
    Ok(Some(event))
}

pub(crate) fn load_live(conn: &Connection, window: Option<&TimeWindow>) -> Result<Vec<Event>, StoreError> {
    let mut filters = Filters::new();
    filters.live_only(false);
    if let Some(w) = window {
        if let Some(start) = &w.start {
            filters.bind("start_time >= ?", fmt_time(start));
        }
        if let Some(end) = &w.end {
            filters.bind("start_time <= ?", fmt_time(end));
        }
    }
    let mut events = filters.select(conn, "events", COLUMNS, "start_time DESC, id", from_row)?;
    for event in &mut events {
        event.participants = load_participants(conn, &event.id)?;
    }
    Ok(events)
}

pub(crate) fn deleted_ids(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM events WHERE deleted_at IS NOT NULL")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

pub(crate) fn set_embedding(conn: &Connection, id: &str, embedding: &[f32]) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE events SET embedding = ?1 WHERE id = ?2",
        params![embedding_to_bytes(embedding), id],
    )?;
    Ok(())
}

/// Keep the first occurrence of each entity id.
fn dedup_participants(participants: Vec<Participant>) -> Vec<Participant> {
    let mut seen = std::collections::HashSet::new();
    participants
        .into_iter()
        .filter(|p| seen.insert(p.entity_id.clone()))
        .collect()
}

fn validate_merged(e: &Event) -> Result<(), ValidationError> {
    let mut input = NewEvent::new(e.event_type, e.title.clone(), e.start_time);
    input.description = e.description.clone();
    input.end_time = e.end_time;
    input.participants = e.participants.clone();
    input.validate()
}
