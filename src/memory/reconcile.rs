//! Secondary-index reconciliation.
//!
//! Secondary writes are best-effort, so the vector index and graph store can
//! drift from the relational store. [`reconcile`] rebuilds both from the
//! relational rows. Optionally it also regenerates every embedding, which is
//! how a change of embedding model is applied.

use serde::Serialize;

use super::types::RecordKind;
use super::{entities, events, relations, tasks, Stores};
use crate::db::migrations;
use crate::embedding::is_placeholder;
use crate::error::StoreError;
use crate::index::Collection;

const BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Regenerate every embedding, not only missing or placeholder ones.
    pub reembed: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub embeddings_regenerated: usize,
    pub vectors_upserted: usize,
    pub vectors_removed: usize,
    pub nodes_synced: usize,
    pub edges_synced: usize,
    pub failures: usize,
}

/// A record whose embedding may need regenerating.
struct Pending {
    kind: RecordKind,
    id: String,
    name: String,
    text: String,
    embedding: Vec<f32>,
}

/// Rebuild the vector index and graph store from the relational store.
pub fn reconcile(stores: &Stores, options: ReconcileOptions) -> Result<ReconcileReport, StoreError> {
    let mut report = ReconcileReport::default();

    let (mut records, deleted_entities, deleted_events, edges) = {
        let conn = stores.conn()?;
        let mut records = Vec::new();
        for e in entities::load_live(&conn)? {
            records.push(Pending {
                kind: RecordKind::Entity,
                text: e.embedding_text(),
                id: e.id,
                name: e.name,
                embedding: e.embedding,
            });
        }
        for e in events::load_live(&conn, None)? {
            records.push(Pending {
                kind: RecordKind::Event,
                text: e.embedding_text(),
                id: e.id,
                name: e.title,
                embedding: e.embedding,
            });
        }
        for t in tasks::load_live(&conn)? {
            records.push(Pending {
                kind: RecordKind::Task,
                text: t.embedding_text(),
                id: t.id,
                name: t.title,
                embedding: t.embedding,
            });
        }
        (
            records,
            entities::deleted_ids(&conn)?,
            events::deleted_ids(&conn)?,
            relations::all_relationships(&conn)?,
        )
    };

    regenerate(stores, &mut records, options.reembed, &mut report)?;

    for record in &records {
        if let Some(collection) = Collection::for_kind(record.kind) {
            if needs_embedding(stores, &record.embedding) {
                continue;
            }
            match stores.vectors.upsert(collection, &record.id, &record.embedding) {
                Ok(()) => report.vectors_upserted += 1,
                Err(e) => {
                    tracing::warn!(record_id = %record.id, index = "vector", error = %e, "reconcile upsert failed");
                    report.failures += 1;
                }
            }
        }
        match stores.graph.upsert_node(&record.id, record.kind, &record.name) {
            Ok(()) => report.nodes_synced += 1,
            Err(e) => {
                tracing::warn!(record_id = %record.id, index = "graph", error = %e, "reconcile node failed");
                report.failures += 1;
            }
        }
    }

    for (collection, ids) in [
        (Collection::Entities, &deleted_entities),
        (Collection::Events, &deleted_events),
    ] {
        for id in ids {
            match stores.vectors.remove(collection, id) {
                Ok(()) => report.vectors_removed += 1,
                Err(e) => {
                    tracing::warn!(record_id = %id, index = "vector", error = %e, "reconcile remove failed");
                    report.failures += 1;
                }
            }
        }
    }

    for edge in &edges {
        match stores.graph.merge_edge(edge) {
            Ok(()) => report.edges_synced += 1,
            Err(e) => {
                tracing::warn!(record_id = %edge.id, index = "graph", error = %e, "reconcile edge failed");
                report.failures += 1;
            }
        }
    }

    if options.reembed && report.failures == 0 {
        let conn = stores.conn()?;
        migrations::set_embedding_model(&conn, stores.embedder.model_name(), stores.dimensions)?;
    }

    tracing::info!(
        regenerated = report.embeddings_regenerated,
        vectors = report.vectors_upserted,
        removed = report.vectors_removed,
        nodes = report.nodes_synced,
        edges = report.edges_synced,
        failures = report.failures,
        "reconciliation finished"
    );
    Ok(report)
}

fn needs_embedding(stores: &Stores, embedding: &[f32]) -> bool {
    embedding.len() != stores.dimensions || is_placeholder(embedding)
}

/// Regenerate embeddings in batches and write them back to the relational rows.
fn regenerate(
    stores: &Stores,
    records: &mut [Pending],
    all: bool,
    report: &mut ReconcileReport,
) -> Result<(), StoreError> {
    let stale: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| all || needs_embedding(stores, &r.embedding))
        .map(|(i, _)| i)
        .collect();

    for chunk in stale.chunks(BATCH_SIZE) {
        let texts: Vec<&str> = chunk.iter().map(|&i| records[i].text.as_str()).collect();
        let vectors = match stores.embedder.generate(&texts) {
            Ok(v) if v.len() == chunk.len() => v,
            Ok(_) | Err(_) => {
                tracing::warn!(batch = chunk.len(), "embedding batch failed during reconcile");
                report.failures += chunk.len();
                continue;
            }
        };

        let conn = stores.conn()?;
        for (&i, vector) in chunk.iter().zip(vectors) {
            if vector.len() != stores.dimensions {
                report.failures += 1;
                continue;
            }
            let record = &mut records[i];
            match record.kind {
                RecordKind::Entity => entities::set_embedding(&conn, &record.id, &vector)?,
                RecordKind::Event => events::set_embedding(&conn, &record.id, &vector)?,
                RecordKind::Task => tasks::set_embedding(&conn, &record.id, &vector)?,
            }
            record.embedding = vector;
            report.embeddings_regenerated += 1;
        }
    }
    Ok(())
}
