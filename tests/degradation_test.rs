mod helpers;

use std::sync::Arc;

use chrono::Utc;
use hindsight::db::migrations::get_embedding_model;
use hindsight::embedding::is_placeholder;
use hindsight::index::Collection;
use hindsight::memory::reconcile::{reconcile, ReconcileOptions};
use hindsight::memory::types::{
    EntityType, EventType, NewEntity, NewEvent, NewRelationship, NewTask, Participant, RecordKind,
    RelationshipType,
};

use helpers::{graph_store, stores_with, test_stores, vec_index, FailingGraph, FailingVectorIndex, FlakyEmbedder};

#[test]
fn embedding_failure_writes_placeholder() {
    let embedder = FlakyEmbedder::new(true);
    let stores = stores_with(embedder.clone(), vec_index(), graph_store());

    let created = stores
        .entities()
        .create(NewEntity::new("Priya", EntityType::Person))
        .unwrap();
    assert!(is_placeholder(&created.entity.embedding));
    assert_eq!(created.entity.embedding.len(), helpers::DIMS);
    assert!(created.possible_duplicates.is_empty());
    assert!(embedder.calls() >= 1);

    let event = stores
        .events()
        .create(NewEvent::new(EventType::Note, "Offline note", Utc::now()))
        .unwrap();
    assert!(is_placeholder(&event.embedding));

    // Placeholders never reach the vector index.
    assert_eq!(stores.vectors.count(Collection::Entities).unwrap(), 0);
    assert_eq!(stores.vectors.count(Collection::Events).unwrap(), 0);
    // The graph write does not depend on the embedding.
    assert_eq!(stores.graph.counts().unwrap().0, 2);
}

#[test]
fn reconcile_repairs_placeholders_once_embedder_recovers() {
    let embedder = FlakyEmbedder::new(true);
    let stores = stores_with(embedder.clone(), vec_index(), graph_store());

    let entity = stores
        .entities()
        .create(NewEntity::new("Priya", EntityType::Person))
        .unwrap()
        .entity;
    stores
        .events()
        .create(NewEvent::new(EventType::Note, "Offline note", Utc::now()))
        .unwrap();
    stores.tasks().create(NewTask::new("Follow up with Priya")).unwrap();

    let failed = reconcile(&stores, ReconcileOptions::default()).unwrap();
    assert_eq!(failed.embeddings_regenerated, 0);
    assert_eq!(failed.failures, 3);

    embedder.set_failing(false);
    let report = reconcile(&stores, ReconcileOptions::default()).unwrap();
    assert_eq!(report.embeddings_regenerated, 3);
    assert_eq!(report.vectors_upserted, 2);
    assert_eq!(report.nodes_synced, 3);
    assert_eq!(report.failures, 0);

    let repaired = stores.entities().get(&entity.id).unwrap();
    assert!(!is_placeholder(&repaired.embedding));
    assert_eq!(stores.vectors.count(Collection::Entities).unwrap(), 1);
    assert_eq!(stores.vectors.count(Collection::Events).unwrap(), 1);

    // Nothing left to repair.
    let again = reconcile(&stores, ReconcileOptions::default()).unwrap();
    assert_eq!(again.embeddings_regenerated, 0);
}

#[test]
fn failing_vector_index_does_not_fail_writes() {
    let stores = stores_with(
        Arc::new(hindsight::embedding::hashing::HashingEmbedder::new(helpers::DIMS)),
        Arc::new(FailingVectorIndex),
        graph_store(),
    );

    let alice = stores
        .entities()
        .create(NewEntity::new("Alice", EntityType::Person))
        .unwrap()
        .entity;
    stores.entities().delete(&alice.id).unwrap();

    let event = stores
        .events()
        .create(NewEvent::new(EventType::Meeting, "Standup", Utc::now()))
        .unwrap();
    assert!(!is_placeholder(&event.embedding));
    assert!(stores.events().get(&event.id).is_ok());
}

#[test]
fn similarity_search_falls_back_to_relational_scan() {
    let stores = stores_with(
        Arc::new(hindsight::embedding::hashing::HashingEmbedder::new(helpers::DIMS)),
        Arc::new(FailingVectorIndex),
        graph_store(),
    );
    let target = stores
        .entities()
        .create(NewEntity::new("Quarterly budget plan", EntityType::Document))
        .unwrap()
        .entity;
    stores
        .entities()
        .create(NewEntity::new("Garden party", EntityType::Event))
        .unwrap();

    let hits = stores.entities().find_similar("quarterly budget plan", 5, 0.5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity.id, target.id);

    // Dedup detection works through the same fallback.
    let dup = stores
        .entities()
        .create(NewEntity::new("quarterly budget plan", EntityType::Document))
        .unwrap();
    assert_eq!(dup.possible_duplicates.len(), 1);
}

#[test]
fn failing_graph_does_not_fail_writes() {
    let stores = stores_with(
        Arc::new(hindsight::embedding::hashing::HashingEmbedder::new(helpers::DIMS)),
        vec_index(),
        Arc::new(FailingGraph),
    );
    let alice = stores
        .entities()
        .create(NewEntity::new("Alice", EntityType::Person))
        .unwrap()
        .entity;
    let bob = stores
        .entities()
        .create(NewEntity::new("Bob", EntityType::Person))
        .unwrap()
        .entity;

    let rel = stores
        .entities()
        .create_relationship(NewRelationship::new(
            (alice.id.as_str(), RecordKind::Entity),
            RelationshipType::RelatedTo,
            (bob.id.as_str(), RecordKind::Entity),
        ))
        .unwrap();
    assert_eq!(rel.weight, 1);

    let mut input = NewEvent::new(EventType::Meeting, "1:1", Utc::now());
    input.participants.push(Participant {
        entity_id: alice.id.clone(),
        metadata: Default::default(),
    });
    let event = stores.events().create(input).unwrap();

    // Relational edges are authoritative even though the graph saw none of them.
    assert_eq!(stores.entities().get_relationships(&alice.id).unwrap().len(), 2);
    assert_eq!(stores.vectors.count(Collection::Events).unwrap(), 1);
    assert!(stores.events().hard_delete(&event.id).is_ok());
}

#[test]
fn reconcile_restores_drifted_indexes() {
    let stores = test_stores();
    let alice = stores
        .entities()
        .create(NewEntity::new("Alice", EntityType::Person))
        .unwrap()
        .entity;
    let gone = stores
        .entities()
        .create(NewEntity::new("Former colleague", EntityType::Person))
        .unwrap()
        .entity;
    let mut input = NewEvent::new(EventType::Meeting, "Sprint review", Utc::now());
    input.participants.push(Participant {
        entity_id: alice.id.clone(),
        metadata: Default::default(),
    });
    let event = stores.events().create(input).unwrap();
    stores.entities().delete(&gone.id).unwrap();

    // Simulate drift: wipe the secondary entries behind the stores' back.
    stores.vectors.remove(Collection::Entities, &alice.id).unwrap();
    stores.vectors.remove(Collection::Events, &event.id).unwrap();
    stores.vectors.upsert(Collection::Entities, &gone.id, &gone.embedding).unwrap();
    stores.graph.delete_node(&alice.id).unwrap();
    assert!(stores.graph.neighbors(&event.id).unwrap().is_empty());

    let report = reconcile(&stores, ReconcileOptions::default()).unwrap();
    assert_eq!(report.failures, 0);
    assert_eq!(report.embeddings_regenerated, 0);
    assert_eq!(report.vectors_upserted, 2);
    assert_eq!(report.vectors_removed, 1);
    assert_eq!(report.edges_synced, 1);

    assert_eq!(stores.vectors.count(Collection::Entities).unwrap(), 1);
    assert_eq!(stores.vectors.count(Collection::Events).unwrap(), 1);
    let neighbors = stores.graph.neighbors(&event.id).unwrap();
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].id, alice.id);
}

#[test]
fn reembed_records_the_new_model() {
    let embedder = FlakyEmbedder::new(false);
    let stores = stores_with(embedder.clone(), vec_index(), graph_store());
    stores
        .entities()
        .create(NewEntity::new("Alice", EntityType::Person))
        .unwrap();
    stores.tasks().create(NewTask::new("Plan offsite")).unwrap();

    let report = reconcile(&stores, ReconcileOptions { reembed: true }).unwrap();
    assert_eq!(report.embeddings_regenerated, 2);
    assert_eq!(report.failures, 0);

    let conn = stores.db.lock().unwrap();
    assert_eq!(get_embedding_model(&conn).unwrap().as_deref(), Some("flaky-hashing"));
}

#[test]
fn failed_reembed_keeps_the_old_model() {
    let embedder = FlakyEmbedder::new(false);
    let stores = stores_with(embedder.clone(), vec_index(), graph_store());
    stores
        .entities()
        .create(NewEntity::new("Alice", EntityType::Person))
        .unwrap();

    embedder.set_failing(true);
    let report = reconcile(&stores, ReconcileOptions { reembed: true }).unwrap();
    assert_eq!(report.failures, 1);

    let conn = stores.db.lock().unwrap();
    assert_eq!(get_embedding_model(&conn).unwrap().as_deref(), Some("all-MiniLM-L6-v2"));
}
