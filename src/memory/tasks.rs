//! Task store adapter.
//!
//! Owns the `tasks` rows and `Task` graph nodes. Tasks keep a denormalized
//! embedding for retrieval scoring but have no vector-index collection.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::common::{
    best_effort, embedding_col, enum_col, fmt_time, merge_metadata, metadata_col,
    metadata_to_sql, new_id, opt_time_col, paged, resolve_sort, time_col, Filters, FindOptions,
    Page, PageRequest,
};
use super::relations;
use super::types::{
    titled_embedding_text, NewRelationship, NewTask, RecordKind, Relationship, RelationshipType,
    Task, TaskPatch, TaskPriority, TaskStatus,
};
use super::Stores;
use crate::error::{StoreError, ValidationError};
use crate::index::vector::embedding_to_bytes;

const COLUMNS: &str = "id, title, description, status, priority, due_date, assignee_id, related_event_id, related_entity_id, metadata, embedding, created_at, updated_at, deleted_at";
const SORT_COLUMNS: &[&str] = &["created_at", "updated_at", "due_date", "priority", "title"];

fn from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: enum_col(row, 3)?,
        priority: enum_col(row, 4)?,
        due_date: opt_time_col(row, 5)?,
        assignee_id: row.get(6)?,
        related_event_id: row.get(7)?,
        related_entity_id: row.get(8)?,
        metadata: metadata_col(row, 9)?,
        embedding: embedding_col(row, 10)?,
        created_at: time_col(row, 11)?,
        updated_at: time_col(row, 12)?,
        deleted_at: opt_time_col(row, 13)?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<String>,
    pub related_event_id: Option<String>,
    pub include_deleted: bool,
}

#[derive(Clone)]
pub struct TaskStore {
    stores: Stores,
}

impl TaskStore {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub fn create(&self, input: NewTask) -> Result<Task, StoreError> {
        input.validate()?;

        let text = titled_embedding_text(&input.title, input.description.as_deref());
        let embedded = self.stores.embed_or_placeholder(&text);

        let now = Utc::now();
        let task = Task {
            id: new_id(),
            title: input.title,
            description: input.description,
            status: input.status,
            priority: input.priority,
            due_date: input.due_date,
            assignee_id: input.assignee_id,
            related_event_id: input.related_event_id,
            related_entity_id: input.related_entity_id,
            metadata: input.metadata,
            embedding: embedded.vector,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let edges = {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;
            insert_row(&tx, &task)?;
            let edges = reference_edges(&tx, &task)?;
            tx.commit()?;
            edges
        };

        best_effort(&task.id, "graph", "upsert_node", || {
            self.stores.graph.upsert_node(&task.id, RecordKind::Task, &task.title)
        });
        self.merge_edges(&edges);

        tracing::debug!(task_id = %task.id, status = %task.status, priority = %task.priority, "task created");
        Ok(task)
    }

    pub fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, StoreError> {
        let current = self.get(id)?;
        let mut next = current.clone();
        if let Some(title) = patch.title {
            next.title = title;
        }
        if let Some(description) = patch.description {
            next.description = Some(description);
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(priority) = patch.priority {
            next.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            next.due_date = Some(due_date);
        }
        if let Some(assignee_id) = patch.assignee_id {
            next.assignee_id = Some(assignee_id);
        }
        if let Some(related_entity_id) = patch.related_entity_id {
            next.related_entity_id = Some(related_entity_id);
        }
        if let Some(metadata) = patch.metadata {
            merge_metadata(&mut next.metadata, metadata);
        }
        validate_merged(&next)?;

        if next.embedding_text() != current.embedding_text() {
            next.embedding = self.stores.embed_or_placeholder(&next.embedding_text()).vector;
        }
        next.updated_at = Utc::now();

        let edges = {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE tasks SET title = ?1, description = ?2, status = ?3, priority = ?4, \
                 due_date = ?5, assignee_id = ?6, related_entity_id = ?7, metadata = ?8, \
                 embedding = ?9, updated_at = ?10 WHERE id = ?11 AND deleted_at IS NULL",
                params![
                    next.title,
                    next.description,
                    next.status.as_str(),
                    next.priority.as_str(),
                    next.due_date.as_ref().map(fmt_time),
                    next.assignee_id,
                    next.related_entity_id,
                    metadata_to_sql(&next.metadata)?,
                    embedding_to_bytes(&next.embedding),
                    fmt_time(&next.updated_at),
                    id
                ],
            )?;
            if n == 0 {
                return Err(StoreError::not_found(RecordKind::Task, id));
            }
            let mut edges = Vec::new();
            if next.assignee_id != current.assignee_id
                || next.related_entity_id != current.related_entity_id
            {
                edges = reference_edges(&tx, &next)?;
            }
            tx.commit()?;
            edges
        };

        if next.title != current.title {
            best_effort(id, "graph", "upsert_node", || {
                self.stores.graph.upsert_node(id, RecordKind::Task, &next.title)
            });
        }
        self.merge_edges(&edges);
        Ok(next)
    }

    /// Set the status. Any status may follow any other.
    pub fn set_status(&self, id: &str, status: TaskStatus) -> Result<Task, StoreError> {
        let previous = self.get(id)?.status;
        let task = self.update(
            id,
            TaskPatch {
                status: Some(status),
                ..Default::default()
            },
        )?;
        tracing::info!(task_id = id, from = %previous, to = %status, "task status changed");
        Ok(task)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let now = fmt_time(&Utc::now());
        let n = self.stores.conn()?.execute(
            "UPDATE tasks SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now, id],
        )?;
        if n == 0 {
            return Err(StoreError::not_found(RecordKind::Task, id));
        }
        tracing::debug!(task_id = id, "task soft-deleted");
        Ok(())
    }

    pub fn hard_delete(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;
            if load(&tx, id, true)?.is_none() {
                return Err(StoreError::not_found(RecordKind::Task, id));
            }
            relations::delete_relationships_for(&tx, id)?;
            tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            tx.commit()?;
        }
        best_effort(id, "graph", "delete_node", || self.stores.graph.delete_node(id));
        tracing::info!(task_id = id, "task hard-deleted");
        Ok(())
    }

    pub fn find_by_id(&self, id: &str, opts: &FindOptions) -> Result<Option<Task>, StoreError> {
        let conn = self.stores.conn()?;
        load(&conn, id, opts.include_deleted)
    }

    pub fn get(&self, id: &str) -> Result<Task, StoreError> {
        self.find_by_id(id, &FindOptions::default())?
            .ok_or_else(|| StoreError::not_found(RecordKind::Task, id))
    }

    pub fn find(&self, filter: &TaskFilter, page: &PageRequest) -> Result<Page<Task>, StoreError> {
        let sort = resolve_sort(page, SORT_COLUMNS)?;
        let mut filters = Filters::new();
        filters.live_only(filter.include_deleted);
        if let Some(status) = filter.status {
            filters.bind("status = ?", status.as_str().to_string());
        }
        if let Some(priority) = filter.priority {
            filters.bind("priority = ?", priority.as_str().to_string());
        }
        if let Some(assignee) = &filter.assignee_id {
            filters.bind("assignee_id = ?", assignee.clone());
        }
        if let Some(event_id) = &filter.related_event_id {
            filters.bind("related_event_id = ?", event_id.clone());
        }
        let conn = self.stores.conn()?;
        paged(&conn, "tasks", COLUMNS, &filters, sort, page, from_row)
    }

    /// Every live task, newest first.
    pub fn live(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.stores.conn()?;
        load_live(&conn)
    }

    fn merge_edges(&self, edges: &[Relationship]) {
        for edge in edges {
            best_effort(&edge.source_id, "graph", "merge_edge", || {
                self.stores.graph.merge_edge(edge)
            });
        }
    }
}

// ── Row helpers ───────────────────────────────────────────────────────────────

fn insert_row(conn: &Connection, t: &Task) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO tasks ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, NULL)"
        ),
        params![
            t.id,
            t.title,
            t.description,
            t.status.as_str(),
            t.priority.as_str(),
            t.due_date.as_ref().map(fmt_time),
            t.assignee_id,
            t.related_event_id,
            t.related_entity_id,
            metadata_to_sql(&t.metadata)?,
            embedding_to_bytes(&t.embedding),
            fmt_time(&t.created_at),
            fmt_time(&t.updated_at),
        ],
    )?;
    Ok(())
}

/// `ASSIGNED_TO`, `DERIVED_FROM`, and `RELATED_TO` edges for whichever
/// references point at live records.
fn reference_edges(conn: &Connection, task: &Task) -> Result<Vec<Relationship>, StoreError> {
    let refs = [
        (task.assignee_id.as_deref(), RelationshipType::AssignedTo, RecordKind::Entity),
        (task.related_event_id.as_deref(), RelationshipType::DerivedFrom, RecordKind::Event),
        (task.related_entity_id.as_deref(), RelationshipType::RelatedTo, RecordKind::Entity),
    ];
    let mut edges = Vec::new();
    for (target, rel, kind) in refs {
        let Some(target) = target else { continue };
        if !relations::live_record_exists(conn, kind, target)? {
            continue;
        }
        let input = NewRelationship::new((task.id.as_str(), RecordKind::Task), rel, (target, kind));
        edges.push(relations::upsert_relationship(conn, &input)?);
    }
    Ok(edges)
}

pub(crate) fn load(conn: &Connection, id: &str, include_deleted: bool) -> Result<Option<Task>, StoreError> {
    let sql = if include_deleted {
        format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1")
    } else {
        format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1 AND deleted_at IS NULL")
    };
    Ok(conn.query_row(&sql, params![id], from_row).optional()?)
}

pub(crate) fn load_live(conn: &Connection) -> Result<Vec<Task>, StoreError> {
    let mut filters = Filters::new();
    filters.live_only(false);
    filters.select(conn, "tasks", COLUMNS, "created_at DESC, id", from_row)
}

pub(crate) fn set_embedding(conn: &Connection, id: &str, embedding: &[f32]) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE tasks SET embedding = ?1 WHERE id = ?2",
        params![embedding_to_bytes(embedding), id],
    )?;
    Ok(())
}

/// When a task is "due" for recency purposes: its due date, else its creation time.
pub fn reference_time(task: &Task) -> DateTime<Utc> {
    task.due_date.unwrap_or(task.created_at)
}

fn validate_merged(t: &Task) -> Result<(), ValidationError> {
    let mut input = NewTask::new(t.title.clone());
    input.description = t.description.clone();
    input.assignee_id = t.assignee_id.clone();
    input.related_event_id = t.related_event_id.clone();
    input.related_entity_id = t.related_entity_id.clone();
    input.validate()
}
