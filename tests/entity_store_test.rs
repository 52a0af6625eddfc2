mod helpers;

use hindsight::error::StoreError;
use hindsight::index::Collection;
use hindsight::memory::common::{FindOptions, PageRequest, SortDirection};
use hindsight::memory::entities::EntityFilter;
use hindsight::memory::types::{
    EntityPatch, EntityType, EventType, NewEntity, NewEvent, NewRelationship, NewTask,
    Participant, RecordKind, RelationshipType,
};
use serde_json::json;

use helpers::test_stores;

#[test]
fn create_and_read_back() {
    let stores = test_stores();
    let created = stores
        .entities()
        .create(NewEntity::new("Alice Chen", EntityType::Person).with_description("Engineering lead"))
        .unwrap();
    assert!(created.possible_duplicates.is_empty());

    let entity = stores.entities().get(&created.entity.id).unwrap();
    assert_eq!(entity.name, "Alice Chen");
    assert_eq!(entity.entity_type, EntityType::Person);
    assert_eq!(entity.embedding.len(), helpers::DIMS);
    assert!(entity.last_seen_at.is_some());
    assert_eq!(stores.vectors.count(Collection::Entities).unwrap(), 1);
}

#[test]
fn validation_reports_every_field() {
    let stores = test_stores();
    let input = NewEntity::new("   ", EntityType::Concept).with_description("x".repeat(20_001));
    let err = stores.entities().create(input).unwrap_err();
    match err {
        StoreError::Validation(v) => assert_eq!(v.fields(), vec!["name", "description"]),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn soft_deleted_entities_are_hidden() {
    let stores = test_stores();
    let id = stores
        .entities()
        .create(NewEntity::new("Acme Corp", EntityType::Organization))
        .unwrap()
        .entity
        .id;

    stores.entities().delete(&id).unwrap();

    assert!(stores.entities().find_by_id(&id, &FindOptions::default()).unwrap().is_none());
    let deleted = stores
        .entities()
        .find_by_id(&id, &FindOptions::including_deleted())
        .unwrap()
        .unwrap();
    assert!(deleted.deleted_at.is_some());
    assert!(stores.entities().get(&id).unwrap_err().is_not_found());
    assert_eq!(stores.vectors.count(Collection::Entities).unwrap(), 0);

    // Deleting twice is a not-found, not a silent success.
    assert!(stores.entities().delete(&id).unwrap_err().is_not_found());
}

#[test]
fn find_pages_filters_and_sorts() {
    let stores = test_stores();
    for name in ["Carol", "alice", "Bob", "Dave"] {
        stores
            .entities()
            .create(NewEntity::new(name, EntityType::Person))
            .unwrap();
    }
    stores
        .entities()
        .create(NewEntity::new("Acme", EntityType::Organization))
        .unwrap();

    let people = EntityFilter {
        entity_type: Some(EntityType::Person),
        ..Default::default()
    };
    let page = stores
        .entities()
        .find(&people, &PageRequest::page(1, 3).sorted_by("name", SortDirection::Asc))
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.items.len(), 3);
    let names: Vec<_> = page.items.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Bob", "Carol", "Dave"]);

    let second = stores
        .entities()
        .find(&people, &PageRequest::page(2, 3).sorted_by("name", SortDirection::Asc))
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].name, "alice");

    let substring = EntityFilter {
        name_contains: Some("AV".into()),
        ..Default::default()
    };
    let page = stores.entities().find(&substring, &PageRequest::default()).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].name, "Dave");
}

#[test]
fn unknown_sort_column_is_rejected() {
    let stores = test_stores();
    let err = stores
        .entities()
        .find(
            &EntityFilter::default(),
            &PageRequest::default().sorted_by("name; DROP TABLE entities", SortDirection::Asc),
        )
        .unwrap_err();
    match err {
        StoreError::Validation(v) => assert_eq!(v.fields(), vec!["sort_by"]),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn find_by_name_ignores_case_and_type_mismatch() {
    let stores = test_stores();
    let id = stores
        .entities()
        .create(NewEntity::new("Sarah Kim", EntityType::Person))
        .unwrap()
        .entity
        .id;

    let found = stores
        .entities()
        .find_by_name("  sarah KIM ", EntityType::Person)
        .unwrap()
        .unwrap();
    assert_eq!(found.id, id);
    assert!(stores
        .entities()
        .find_by_name("Sarah Kim", EntityType::Organization)
        .unwrap()
        .is_none());
}

#[test]
fn find_similar_ranks_shared_words_first() {
    let stores = test_stores();
    let report = stores
        .entities()
        .create(NewEntity::new("quarterly sales report", EntityType::Document))
        .unwrap()
        .entity
        .id;
    stores
        .entities()
        .create(NewEntity::new("team offsite lunch", EntityType::Event))
        .unwrap();

    let hits = stores.entities().find_similar("quarterly sales report draft", 5, 0.3).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity.id, report);
    assert!(hits[0].similarity > 0.3);

    assert!(stores.entities().find_similar("anything", 0, 0.0).unwrap().is_empty());
}

#[test]
fn near_duplicates_are_reported_but_still_created() {
    let stores = test_stores();
    let first = stores
        .entities()
        .create(NewEntity::new("Project Apollo", EntityType::Concept))
        .unwrap()
        .entity;

    let second = stores
        .entities()
        .create(NewEntity::new("project apollo", EntityType::Concept))
        .unwrap();
    assert_eq!(second.possible_duplicates.len(), 1);
    assert_eq!(second.possible_duplicates[0].entity.id, first.id);
    assert_ne!(second.entity.id, first.id);

    // Same text under another type is not a duplicate.
    let other_type = stores
        .entities()
        .create(NewEntity::new("Project Apollo", EntityType::Document))
        .unwrap();
    assert!(other_type.possible_duplicates.is_empty());
}

#[test]
fn update_reembeds_only_when_text_changes() {
    let stores = test_stores();
    let entity = stores
        .entities()
        .create(NewEntity::new("Bob", EntityType::Person))
        .unwrap()
        .entity;

    let mut metadata = serde_json::Map::new();
    metadata.insert("team".into(), json!("platform"));
    let patched = stores
        .entities()
        .update(
            &entity.id,
            EntityPatch {
                metadata: Some(metadata),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(patched.embedding, entity.embedding);
    assert_eq!(patched.metadata["team"], json!("platform"));
    assert!(patched.updated_at >= entity.updated_at);

    let renamed = stores
        .entities()
        .update(
            &entity.id,
            EntityPatch {
                description: Some("Platform engineer on call this week".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_ne!(renamed.embedding, entity.embedding);
    assert_eq!(renamed.metadata["team"], json!("platform"));

    let err = stores
        .entities()
        .update(
            &entity.id,
            EntityPatch {
                name: Some(String::new()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn merge_moves_references_to_survivor() {
    let stores = test_stores();
    let survivor = stores
        .entities()
        .create(NewEntity::new("Robert Jones", EntityType::Person))
        .unwrap()
        .entity;
    let duplicate = stores
        .entities()
        .create(NewEntity::new("Bob Jones", EntityType::Person))
        .unwrap()
        .entity;
    let acme = stores
        .entities()
        .create(NewEntity::new("Acme", EntityType::Organization))
        .unwrap()
        .entity;

    let mut event = NewEvent::new(EventType::Meeting, "Vendor call", chrono::Utc::now());
    event.participants.push(Participant {
        entity_id: duplicate.id.clone(),
        metadata: Default::default(),
    });
    let event = stores.events().create(event).unwrap();

    let mut task = NewTask::new("Send contract");
    task.assignee_id = Some(duplicate.id.clone());
    let task = stores.tasks().create(task).unwrap();

    stores
        .entities()
        .create_relationship(NewRelationship::new(
            (duplicate.id.as_str(), RecordKind::Entity),
            RelationshipType::PartOf,
            (acme.id.as_str(), RecordKind::Entity),
        ))
        .unwrap();

    let merged = stores.entities().merge_entities(&survivor.id, &duplicate.id).unwrap();
    assert_eq!(merged.metadata["merged_from"], json!([duplicate.id]));

    assert!(stores
        .entities()
        .find_by_id(&duplicate.id, &FindOptions::including_deleted())
        .unwrap()
        .is_none());
    assert_eq!(stores.tasks().get(&task.id).unwrap().assignee_id.as_deref(), Some(survivor.id.as_str()));
    let event = stores.events().get(&event.id).unwrap();
    assert_eq!(event.participants.len(), 1);
    assert_eq!(event.participants[0].entity_id, survivor.id);

    let rels = stores.entities().get_relationships(&survivor.id).unwrap();
    assert!(rels
        .iter()
        .any(|r| r.relationship_type == RelationshipType::PartOf && r.target_id == acme.id));
    assert!(stores.entities().get_relationships(&duplicate.id).unwrap().is_empty());
}

#[test]
fn merge_rejects_self_and_missing() {
    let stores = test_stores();
    let a = stores
        .entities()
        .create(NewEntity::new("A", EntityType::Concept))
        .unwrap()
        .entity;
    assert!(matches!(
        stores.entities().merge_entities(&a.id, &a.id).unwrap_err(),
        StoreError::Validation(_)
    ));
    assert!(stores
        .entities()
        .merge_entities(&a.id, "missing")
        .unwrap_err()
        .is_not_found());
}

#[test]
fn hard_delete_clears_task_references() {
    let stores = test_stores();
    let person = stores
        .entities()
        .create(NewEntity::new("Temp contractor", EntityType::Person))
        .unwrap()
        .entity;
    let mut task = NewTask::new("Review invoices");
    task.assignee_id = Some(person.id.clone());
    task.related_entity_id = Some(person.id.clone());
    let task = stores.tasks().create(task).unwrap();

    stores.entities().hard_delete(&person.id).unwrap();

    let task = stores.tasks().get(&task.id).unwrap();
    assert!(task.assignee_id.is_none());
    assert!(task.related_entity_id.is_none());
    assert!(stores.entities().hard_delete(&person.id).unwrap_err().is_not_found());
}
