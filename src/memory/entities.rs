//! Entity store adapter.
//!
//! Owns the `entities` rows, the `entities` vector collection, and the
//! `Entity` graph nodes. Also carries the relationship operations, since
//! every graph edge hangs off an entity in practice.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::common::{
    best_effort, embedding_col, enum_col, fmt_time, merge_metadata, metadata_col,
    metadata_to_sql, new_id, opt_time_col, paged, resolve_sort, time_col, Filters, FindOptions,
    Page, PageRequest,
};
use super::relations;
use super::types::{
    entity_embedding_text, Entity, EntityPatch, EntityType, Metadata, NewEntity, NewRelationship,
    RecordKind, Relationship, RelationshipType,
};
use super::Stores;
use crate::embedding::{cosine_similarity, is_placeholder};
use crate::error::{StoreError, ValidationError};
use crate::index::vector::{embedding_to_bytes, l2_to_similarity};
use crate::index::Collection;

const COLUMNS: &str = "id, name, type, description, metadata, embedding, created_at, updated_at, deleted_at, last_seen_at";
const SORT_COLUMNS: &[&str] = &["created_at", "updated_at", "name", "last_seen_at"];
const DUPLICATE_CANDIDATES: usize = 5;

fn from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: enum_col(row, 2)?,
        description: row.get(3)?,
        metadata: metadata_col(row, 4)?,
        embedding: embedding_col(row, 5)?,
        created_at: time_col(row, 6)?,
        updated_at: time_col(row, 7)?,
        deleted_at: opt_time_col(row, 8)?,
        last_seen_at: opt_time_col(row, 9)?,
    })
}

/// Filters accepted by [`EntityStore::find`].
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub entity_type: Option<EntityType>,
    /// Case-insensitive substring match on `name`.
    pub name_contains: Option<String>,
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarEntity {
    pub entity: Entity,
    pub similarity: f64,
}

/// A newly created entity plus any existing entities it may duplicate.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedEntity {
    pub entity: Entity,
    pub possible_duplicates: Vec<SimilarEntity>,
}

#[derive(Clone)]
pub struct EntityStore {
    stores: Stores,
}

impl EntityStore {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Validate, embed, insert, then index. Near-duplicates of the same type
    /// are reported but never block the insert.
    pub fn create(&self, input: NewEntity) -> Result<CreatedEntity, StoreError> {
        input.validate()?;

        let text = entity_embedding_text(&input.name, input.description.as_deref());
        let embedded = self.stores.embed_or_placeholder(&text);

        let possible_duplicates = if embedded.real {
            self.similar_to(
                &embedded.vector,
                Some(input.entity_type),
                DUPLICATE_CANDIDATES,
                self.stores.dedup_threshold,
            )?
        } else {
            Vec::new()
        };

        let now = Utc::now();
        let entity = Entity {
            id: new_id(),
            name: input.name,
            entity_type: input.entity_type,
            description: input.description,
            metadata: input.metadata,
            embedding: embedded.vector,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            last_seen_at: Some(now),
        };

        {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;
            insert_row(&tx, &entity)?;
            tx.commit()?;
        }

        if embedded.real {
            best_effort(&entity.id, "vector", "upsert", || {
                self.stores
                    .vectors
                    .upsert(Collection::Entities, &entity.id, &entity.embedding)
            });
        }
        best_effort(&entity.id, "graph", "upsert_node", || {
            self.stores
                .graph
                .upsert_node(&entity.id, RecordKind::Entity, &entity.name)
        });

        if !possible_duplicates.is_empty() {
            tracing::warn!(
                entity_id = %entity.id,
                name = %entity.name,
                candidates = possible_duplicates.len(),
                "possible duplicate entity"
            );
        }
        tracing::debug!(entity_id = %entity.id, entity_type = %entity.entity_type, "entity created");

        Ok(CreatedEntity {
            entity,
            possible_duplicates,
        })
    }

    /// Apply a patch to a live entity. Re-embeds only if name or description changed.
    pub fn update(&self, id: &str, patch: EntityPatch) -> Result<Entity, StoreError> {
        let current = self.get(id)?;
        let mut next = current.clone();
        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(entity_type) = patch.entity_type {
            next.entity_type = entity_type;
        }
        if let Some(description) = patch.description {
            next.description = Some(description);
        }
        if let Some(metadata) = patch.metadata {
            merge_metadata(&mut next.metadata, metadata);
        }
        validate_merged(&next)?;

        let text_changed = next.embedding_text() != current.embedding_text();
        let mut indexable = !is_placeholder(&next.embedding) && !next.embedding.is_empty();
        if text_changed {
            let embedded = self.stores.embed_or_placeholder(&next.embedding_text());
            next.embedding = embedded.vector;
            indexable = embedded.real;
        }
        next.updated_at = Utc::now();

        {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE entities SET name = ?1, type = ?2, description = ?3, metadata = ?4, \
                 embedding = ?5, updated_at = ?6 WHERE id = ?7 AND deleted_at IS NULL",
                params![
                    next.name,
                    next.entity_type.as_str(),
                    next.description,
                    metadata_to_sql(&next.metadata)?,
                    embedding_to_bytes(&next.embedding),
                    fmt_time(&next.updated_at),
                    id
                ],
            )?;
            if n == 0 {
                return Err(StoreError::not_found(RecordKind::Entity, id));
            }
            tx.commit()?;
        }

        if text_changed {
            if indexable {
                best_effort(id, "vector", "upsert", || {
                    self.stores.vectors.upsert(Collection::Entities, id, &next.embedding)
                });
            } else {
                best_effort(id, "vector", "remove", || {
                    self.stores.vectors.remove(Collection::Entities, id)
                });
            }
        }
        if next.name != current.name {
            best_effort(id, "graph", "upsert_node", || {
                self.stores.graph.upsert_node(id, RecordKind::Entity, &next.name)
            });
        }

        Ok(next)
    }

    /// Soft delete: set `deleted_at` and drop the vector entry.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let now = fmt_time(&Utc::now());
        let n = self.stores.conn()?.execute(
            "UPDATE entities SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now, id],
        )?;
        if n == 0 {
            return Err(StoreError::not_found(RecordKind::Entity, id));
        }
        best_effort(id, "vector", "remove", || {
            self.stores.vectors.remove(Collection::Entities, id)
        });
        tracing::debug!(entity_id = id, "entity soft-deleted");
        Ok(())
    }

    /// Physically remove the entity, its relationships, and its participant
    /// rows. Task references to it are cleared.
    pub fn hard_delete(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;
            purge(&tx, id)?;
            tx.commit()?;
        }
        self.drop_secondary(id);
        tracing::info!(entity_id = id, "entity hard-deleted");
        Ok(())
    }

    fn drop_secondary(&self, id: &str) {
        best_effort(id, "vector", "remove", || {
            self.stores.vectors.remove(Collection::Entities, id)
        });
        best_effort(id, "graph", "delete_node", || self.stores.graph.delete_node(id));
    }

    /// Refresh `last_seen_at` on a live entity.
    pub fn touch_last_seen(&self, id: &str) -> Result<(), StoreError> {
        let now = fmt_time(&Utc::now());
        let n = self.stores.conn()?.execute(
            "UPDATE entities SET last_seen_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now, id],
        )?;
        if n == 0 {
            return Err(StoreError::not_found(RecordKind::Entity, id));
        }
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn find_by_id(&self, id: &str, opts: &FindOptions) -> Result<Option<Entity>, StoreError> {
        let conn = self.stores.conn()?;
        load(&conn, id, opts.include_deleted)
    }

    /// Like [`find_by_id`](Self::find_by_id) for live rows, but missing is an error.
    pub fn get(&self, id: &str) -> Result<Entity, StoreError> {
        self.find_by_id(id, &FindOptions::default())?
            .ok_or_else(|| StoreError::not_found(RecordKind::Entity, id))
    }

    pub fn find(&self, filter: &EntityFilter, page: &PageRequest) -> Result<Page<Entity>, StoreError> {
        let sort = resolve_sort(page, SORT_COLUMNS)?;
        let mut filters = Filters::new();
        filters.live_only(filter.include_deleted);
        if let Some(t) = filter.entity_type {
            filters.bind("type = ?", t.as_str().to_string());
        }
        if let Some(needle) = filter.name_contains.as_deref().filter(|s| !s.is_empty()) {
            filters.bind("instr(lower(name), lower(?)) > 0", needle.to_string());
        }
        let conn = self.stores.conn()?;
        paged(&conn, "entities", COLUMNS, &filters, sort, page, from_row)
    }

    /// Case-insensitive exact match on name within one type, oldest first.
    pub fn find_by_name(&self, name: &str, entity_type: EntityType) -> Result<Option<Entity>, StoreError> {
        let conn = self.stores.conn()?;
        let found = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM entities \
                     WHERE name = ?1 COLLATE NOCASE AND type = ?2 AND deleted_at IS NULL \
                     ORDER BY created_at, id LIMIT 1"
                ),
                params![name.trim(), entity_type.as_str()],
                from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Live entities with the given ids, in the order given. Unknown ids are skipped.
    pub fn live_by_ids(&self, ids: &[String]) -> Result<Vec<Entity>, StoreError> {
        let conn = self.stores.conn()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(e) = load(&conn, id, false)? {
                out.push(e);
            }
        }
        Ok(out)
    }

    /// Entities whose embedding is at least `threshold` cosine-similar to `text`'s,
    /// most similar first.
    pub fn find_similar(
        &self,
        text: &str,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SimilarEntity>, StoreError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let embedded = self.stores.embed_or_placeholder(text);
        if !embedded.real {
            return Ok(vec![]);
        }
        self.similar_to(&embedded.vector, None, limit, threshold)
    }

    fn similar_to(
        &self,
        embedding: &[f32],
        entity_type: Option<EntityType>,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SimilarEntity>, StoreError> {
        // Over-fetch: the index may hold entries of other types or stale ids.
        let k = limit * 4 + 8;
        let scored: Vec<(String, f64)> =
            match self.stores.vectors.nearest(Collection::Entities, embedding, k) {
                Ok(hits) => hits
                    .into_iter()
                    .map(|h| (h.id, l2_to_similarity(h.distance)))
                    .collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "vector search failed, scanning relational embeddings");
                    let conn = self.stores.conn()?;
                    scan_similar(&conn, embedding)?
                }
            };

        let conn = self.stores.conn()?;
        let mut out = Vec::new();
        for (id, similarity) in scored {
            if similarity < threshold {
                continue;
            }
            let Some(entity) = load(&conn, &id, false)? else {
                continue;
            };
            if entity_type.is_some_and(|t| t != entity.entity_type) {
                continue;
            }
            out.push(SimilarEntity { entity, similarity });
        }
        out.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        out.truncate(limit);
        Ok(out)
    }

    // ── Relationships ─────────────────────────────────────────────────────────

    /// Assert a typed edge between two live records. Re-asserting bumps the weight.
    pub fn create_relationship(&self, input: NewRelationship) -> Result<Relationship, StoreError> {
        input.validate()?;
        let rel = {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;
            for (id, kind) in [
                (&input.source_id, input.source_kind),
                (&input.target_id, input.target_kind),
            ] {
                if !relations::live_record_exists(&tx, kind, id)? {
                    return Err(StoreError::not_found(kind, id.as_str()));
                }
            }
            let rel = relations::upsert_relationship(&tx, &input)?;
            tx.commit()?;
            rel
        };
        best_effort(&rel.id, "graph", "merge_edge", || self.stores.graph.merge_edge(&rel));
        Ok(rel)
    }

    pub fn get_relationships(&self, id: &str) -> Result<Vec<Relationship>, StoreError> {
        let conn = self.stores.conn()?;
        relations::relationships_for(&conn, id)
    }

    /// Revoke one typed edge. Returns `false` if it did not exist.
    pub fn remove_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        rel: RelationshipType,
    ) -> Result<bool, StoreError> {
        let removed = {
            let conn = self.stores.conn()?;
            relations::delete_relationship(&conn, source_id, target_id, rel)?
        };
        if removed {
            best_effort(source_id, "graph", "remove_edge", || {
                self.stores.graph.remove_edge(source_id, target_id, rel)
            });
        }
        Ok(removed)
    }

    /// Fold `duplicate_id` into `survivor_id` and hard-delete the duplicate.
    ///
    /// Relationships, event participation, and task references all move to the
    /// survivor in one transaction. The survivor's `metadata.merged_from`
    /// records the duplicate's id.
    pub fn merge_entities(&self, survivor_id: &str, duplicate_id: &str) -> Result<Entity, StoreError> {
        if survivor_id == duplicate_id {
            let mut err = ValidationError::new();
            err.push("duplicate_id", "must differ from survivor_id");
            return Err(err.into());
        }

        let (survivor, summary, edges) = {
            let mut conn = self.stores.conn()?;
            let tx = conn.transaction()?;

            let mut survivor = load(&tx, survivor_id, false)?
                .ok_or_else(|| StoreError::not_found(RecordKind::Entity, survivor_id))?;
            if load(&tx, duplicate_id, false)?.is_none() {
                return Err(StoreError::not_found(RecordKind::Entity, duplicate_id));
            }

            let summary = relations::repoint_relationships(&tx, duplicate_id, survivor_id)?;
            tx.execute(
                "UPDATE OR IGNORE event_participants SET entity_id = ?1 WHERE entity_id = ?2",
                params![survivor_id, duplicate_id],
            )?;
            tx.execute(
                "DELETE FROM event_participants WHERE entity_id = ?1",
                params![duplicate_id],
            )?;
            tx.execute(
                "UPDATE tasks SET assignee_id = ?1 WHERE assignee_id = ?2",
                params![survivor_id, duplicate_id],
            )?;
            tx.execute(
                "UPDATE tasks SET related_entity_id = ?1 WHERE related_entity_id = ?2",
                params![survivor_id, duplicate_id],
            )?;

            record_merged_from(&mut survivor.metadata, duplicate_id);
            survivor.updated_at = Utc::now();
            tx.execute(
                "UPDATE entities SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    metadata_to_sql(&survivor.metadata)?,
                    fmt_time(&survivor.updated_at),
                    survivor_id
                ],
            )?;
            tx.execute("DELETE FROM entities WHERE id = ?1", params![duplicate_id])?;

            let edges = relations::relationships_for(&tx, survivor_id)?;
            tx.commit()?;
            (survivor, summary, edges)
        };

        self.drop_secondary(duplicate_id);
        for edge in &edges {
            best_effort(&edge.id, "graph", "merge_edge", || self.stores.graph.merge_edge(edge));
        }

        tracing::info!(
            survivor_id,
            duplicate_id,
            moved = summary.moved,
            merged = summary.merged,
            dropped = summary.dropped,
            "entities merged"
        );
        Ok(survivor)
    }
}

// ── Row helpers ───────────────────────────────────────────────────────────────

fn insert_row(conn: &Connection, e: &Entity) -> Result<(), StoreError> {
    conn.execute(
        &format!("INSERT INTO entities ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9)"),
        params![
            e.id,
            e.name,
            e.entity_type.as_str(),
            e.description,
            metadata_to_sql(&e.metadata)?,
            embedding_to_bytes(&e.embedding),
            fmt_time(&e.created_at),
            fmt_time(&e.updated_at),
            e.last_seen_at.as_ref().map(fmt_time),
        ],
    )?;
    Ok(())
}

pub(crate) fn load(conn: &Connection, id: &str, include_deleted: bool) -> Result<Option<Entity>, StoreError> {
    let sql = if include_deleted {
        format!("SELECT {COLUMNS} FROM entities WHERE id = ?1")
    } else {
        format!("SELECT {COLUMNS} FROM entities WHERE id = ?1 AND deleted_at IS NULL")
    };
    Ok(conn.query_row(&sql, params![id], from_row).optional()?)
}

/// All live entities, oldest first.
pub(crate) fn load_live(conn: &Connection) -> Result<Vec<Entity>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM entities WHERE deleted_at IS NULL ORDER BY created_at, id"
    ))?;
    let rows = stmt.query_map([], from_row)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ids of soft-deleted entities.
pub(crate) fn deleted_ids(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM entities WHERE deleted_at IS NOT NULL")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

pub(crate) fn set_embedding(conn: &Connection, id: &str, embedding: &[f32]) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE entities SET embedding = ?1 WHERE id = ?2",
        params![embedding_to_bytes(embedding), id],
    )?;
    Ok(())
}

fn purge(conn: &Connection, id: &str) -> Result<(), StoreError> {
    if load(conn, id, true)?.is_none() {
        return Err(StoreError::not_found(RecordKind::Entity, id));
    }
    relations::delete_relationships_for(conn, id)?;
    conn.execute("DELETE FROM event_participants WHERE entity_id = ?1", params![id])?;
    conn.execute("UPDATE tasks SET assignee_id = NULL WHERE assignee_id = ?1", params![id])?;
    conn.execute(
        "UPDATE tasks SET related_entity_id = NULL WHERE related_entity_id = ?1",
        params![id],
    )?;
    conn.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
    Ok(())
}

/// Brute-force cosine scan over live relational embeddings.
fn scan_similar(conn: &Connection, query: &[f32]) -> Result<Vec<(String, f64)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, embedding FROM entities WHERE deleted_at IS NULL AND embedding IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, embedding_col(row, 1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(id, emb)| {
            let sim = cosine_similarity(query, &emb);
            (id, sim)
        })
        .collect())
}

fn record_merged_from(metadata: &mut Metadata, duplicate_id: &str) {
    let entry = metadata
        .entry("merged_from")
        .or_insert_with(|| serde_json::Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = serde_json::Value::Array(vec![entry.clone()]);
    }
    if let serde_json::Value::Array(ids) = entry {
        ids.push(serde_json::Value::String(duplicate_id.to_string()));
    }
}

fn validate_merged(e: &Entity) -> Result<(), ValidationError> {
    NewEntity {
        name: e.name.clone(),
        entity_type: e.entity_type,
        description: e.description.clone(),
        metadata: Metadata::new(),
    }
    .validate()
}
