mod helpers;

use chrono::{Duration, Utc};
use hindsight::index::Collection;
use hindsight::memory::common::{FindOptions, PageRequest, SortDirection};
use hindsight::memory::events::EventFilter;
use hindsight::memory::tasks::{reference_time, TaskFilter};
use hindsight::memory::types::{
    EntityType, EventPatch, EventType, NewEntity, NewEvent, NewTask, Participant, RecordKind,
    RelationshipType, TaskPriority, TaskStatus,
};
use hindsight::memory::Stores;
use serde_json::json;

use helpers::test_stores;

fn person(stores: &Stores, name: &str) -> String {
    stores
        .entities()
        .create(NewEntity::new(name, EntityType::Person))
        .unwrap()
        .entity
        .id
}

fn participant(entity_id: &str, role: &str) -> Participant {
    let mut metadata = serde_json::Map::new();
    metadata.insert("role".into(), json!(role));
    Participant {
        entity_id: entity_id.to_string(),
        metadata,
    }
}

// ── Events ───────────────────────────────────────────────────────────────────

#[test]
fn participants_produce_participation_edges() {
    let stores = test_stores();
    let alice = person(&stores, "Alice");
    let bob = person(&stores, "Bob");

    let mut input = NewEvent::new(EventType::Meeting, "Design review", Utc::now())
        .with_description("Walked through the storage redesign");
    input.participants = vec![
        participant(&alice, "participant"),
        participant(&bob, "mentioned"),
        participant(&alice, "duplicate"),
    ];
    let event = stores.events().create(input).unwrap();
    assert_eq!(event.participants.len(), 2);
    assert_eq!(event.participants[0].metadata["role"], json!("participant"));

    let stored = stores.events().get(&event.id).unwrap();
    assert_eq!(stored.participants, event.participants);

    let rels = stores.entities().get_relationships(&event.id).unwrap();
    assert_eq!(rels.len(), 2);
    for rel in &rels {
        assert_eq!(rel.relationship_type, RelationshipType::ParticipatedIn);
        assert_eq!(rel.source_kind, RecordKind::Entity);
        assert_eq!(rel.target_id, event.id);
    }
    assert_eq!(stores.graph.neighbors(&event.id).unwrap().len(), 2);
    assert_eq!(stores.vectors.count(Collection::Events).unwrap(), 1);
}

#[test]
fn replacing_participants_drops_stale_edges() {
    let stores = test_stores();
    let alice = person(&stores, "Alice");
    let bob = person(&stores, "Bob");
    let carol = person(&stores, "Carol");

    let mut input = NewEvent::new(EventType::Meeting, "Planning", Utc::now());
    input.participants = vec![participant(&alice, "participant"), participant(&bob, "participant")];
    let event = stores.events().create(input).unwrap();

    let updated = stores
        .events()
        .update(
            &event.id,
            EventPatch {
                participants: Some(vec![
                    participant(&bob, "participant"),
                    participant(&carol, "participant"),
                ]),
                ..Default::default()
            },
        )
        .unwrap();
    let ids: Vec<_> = updated.participants.iter().map(|p| p.entity_id.clone()).collect();
    assert_eq!(ids, vec![bob.clone(), carol.clone()]);

    let mut sources: Vec<_> = stores
        .entities()
        .get_relationships(&event.id)
        .unwrap()
        .into_iter()
        .map(|r| r.source_id)
        .collect();
    sources.sort();
    let mut expected = vec![bob.clone(), carol.clone()];
    expected.sort();
    assert_eq!(sources, expected);

    let neighbor_ids: Vec<_> = stores
        .graph
        .neighbors(&event.id)
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert!(!neighbor_ids.contains(&alice));
    assert_eq!(neighbor_ids.len(), 2);
}

#[test]
fn unknown_participants_are_stored_without_edges() {
    let stores = test_stores();
    let mut input = NewEvent::new(EventType::Note, "Loose note", Utc::now());
    input.participants = vec![participant("not-an-entity", "mentioned")];
    let event = stores.events().create(input).unwrap();

    assert_eq!(stores.events().get(&event.id).unwrap().participants.len(), 1);
    assert!(stores.entities().get_relationships(&event.id).unwrap().is_empty());
}

#[test]
fn event_filters_and_time_bounds() {
    let stores = test_stores();
    let now = Utc::now();
    for (i, event_type) in [EventType::Meeting, EventType::Note, EventType::Meeting]
        .into_iter()
        .enumerate()
    {
        let mut input = NewEvent::new(event_type, format!("event {i}"), now - Duration::days(i as i64));
        input.source = Some(if i == 0 { "calendar" } else { "manual" }.to_string());
        stores.events().create(input).unwrap();
    }

    let meetings = EventFilter {
        event_type: Some(EventType::Meeting),
        ..Default::default()
    };
    let page = stores
        .events()
        .find(&meetings, &PageRequest::default().sorted_by("start_time", SortDirection::Asc))
        .unwrap();
    let titles: Vec<_> = page.items.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["event 2", "event 0"]);

    let recent = EventFilter {
        start_after: Some(now - Duration::hours(36)),
        ..Default::default()
    };
    assert_eq!(stores.events().find(&recent, &PageRequest::default()).unwrap().total, 2);

    let from_calendar = EventFilter {
        source: Some("calendar".into()),
        ..Default::default()
    };
    assert_eq!(stores.events().find(&from_calendar, &PageRequest::default()).unwrap().total, 1);
}

#[test]
fn end_before_start_is_rejected() {
    let stores = test_stores();
    let now = Utc::now();
    let mut input = NewEvent::new(EventType::Meeting, "Backwards", now);
    input.end_time = Some(now - Duration::minutes(5));
    let err = stores.events().create(input).unwrap_err();
    match err {
        hindsight::error::StoreError::Validation(v) => assert_eq!(v.fields(), vec!["end_time"]),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn soft_deleted_event_keeps_graph_node() {
    let stores = test_stores();
    let alice = person(&stores, "Alice");
    let mut input = NewEvent::new(EventType::Meeting, "Retro", Utc::now());
    input.participants = vec![participant(&alice, "participant")];
    let event = stores.events().create(input).unwrap();

    stores.events().delete(&event.id).unwrap();

    assert!(stores.events().get(&event.id).unwrap_err().is_not_found());
    assert!(stores
        .events()
        .find_by_id(&event.id, &FindOptions::including_deleted())
        .unwrap()
        .is_some());
    assert_eq!(stores.vectors.count(Collection::Events).unwrap(), 0);
    assert_eq!(stores.graph.neighbors(&event.id).unwrap().len(), 1);
    assert!(stores.events().live_in_window(None).unwrap().is_empty());
}

#[test]
fn hard_deleted_event_clears_task_reference() {
    let stores = test_stores();
    let event = stores
        .events()
        .create(NewEvent::new(EventType::Meeting, "Budget review", Utc::now()))
        .unwrap();
    let mut input = NewTask::new("Send revised budget");
    input.related_event_id = Some(event.id.clone());
    let task = stores.tasks().create(input).unwrap();

    stores.events().hard_delete(&event.id).unwrap();

    let task = stores.tasks().get(&task.id).unwrap();
    assert!(task.related_event_id.is_none());
    assert!(stores.entities().get_relationships(&task.id).unwrap().is_empty());
    assert!(stores
        .events()
        .find_by_id(&event.id, &FindOptions::including_deleted())
        .unwrap()
        .is_none());
}

// ── Tasks ────────────────────────────────────────────────────────────────────

#[test]
fn task_references_become_edges() {
    let stores = test_stores();
    let alice = person(&stores, "Alice");
    let acme = stores
        .entities()
        .create(NewEntity::new("Acme", EntityType::Organization))
        .unwrap()
        .entity
        .id;
    let event = stores
        .events()
        .create(NewEvent::new(EventType::Meeting, "Vendor call", Utc::now()))
        .unwrap();

    let mut input = NewTask::new("Draft the contract");
    input.assignee_id = Some(alice.clone());
    input.related_event_id = Some(event.id.clone());
    input.related_entity_id = Some(acme.clone());
    input.priority = TaskPriority::High;
    let task = stores.tasks().create(input).unwrap();

    let mut rels: Vec<_> = stores
        .entities()
        .get_relationships(&task.id)
        .unwrap()
        .into_iter()
        .map(|r| (r.relationship_type, r.target_id))
        .collect();
    rels.sort_by_key(|(t, _)| t.as_str());
    assert_eq!(
        rels,
        vec![
            (RelationshipType::AssignedTo, alice),
            (RelationshipType::DerivedFrom, event.id),
            (RelationshipType::RelatedTo, acme),
        ]
    );
    assert_eq!(stores.graph.neighbors(&task.id).unwrap().len(), 3);
}

#[test]
fn any_status_may_follow_any_other() {
    let stores = test_stores();
    let task = stores.tasks().create(NewTask::new("Ship release notes")).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    for status in [
        TaskStatus::Completed,
        TaskStatus::Pending,
        TaskStatus::Blocked,
        TaskStatus::Cancelled,
        TaskStatus::InProgress,
    ] {
        let updated = stores.tasks().set_status(&task.id, status).unwrap();
        assert_eq!(updated.status, status);
    }
    assert_eq!(stores.tasks().get(&task.id).unwrap().status, TaskStatus::InProgress);
    assert_eq!(
        stores.tasks().get(&task.id).unwrap().embedding,
        task.embedding
    );

    assert!(stores
        .tasks()
        .set_status("missing", TaskStatus::Completed)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn task_filters() {
    let stores = test_stores();
    let alice = person(&stores, "Alice");

    let mut a = NewTask::new("Book venue");
    a.assignee_id = Some(alice.clone());
    a.priority = TaskPriority::Urgent;
    stores.tasks().create(a).unwrap();
    let b = stores.tasks().create(NewTask::new("Order snacks")).unwrap();
    stores.tasks().set_status(&b.id, TaskStatus::Completed).unwrap();
    let c = stores.tasks().create(NewTask::new("Print badges")).unwrap();
    stores.tasks().delete(&c.id).unwrap();

    let all = stores.tasks().find(&TaskFilter::default(), &PageRequest::default()).unwrap();
    assert_eq!(all.total, 2);

    let with_deleted = TaskFilter {
        include_deleted: true,
        ..Default::default()
    };
    assert_eq!(stores.tasks().find(&with_deleted, &PageRequest::default()).unwrap().total, 3);

    let alices = TaskFilter {
        assignee_id: Some(alice),
        ..Default::default()
    };
    let page = stores.tasks().find(&alices, &PageRequest::default()).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].priority, TaskPriority::Urgent);

    let done = TaskFilter {
        status: Some(TaskStatus::Completed),
        ..Default::default()
    };
    let page = stores.tasks().find(&done, &PageRequest::default()).unwrap();
    assert_eq!(page.items[0].title, "Order snacks");

    assert_eq!(stores.tasks().live().unwrap().len(), 2);
}

#[test]
fn reference_time_prefers_due_date() {
    let stores = test_stores();
    let due = Utc::now() + Duration::days(3);
    let mut input = NewTask::new("Renew passport");
    input.due_date = Some(due);
    let with_due = stores.tasks().create(input).unwrap();
    let without = stores.tasks().create(NewTask::new("Call plumber")).unwrap();

    assert_eq!(reference_time(&with_due), due);
    assert_eq!(reference_time(&without), without.created_at);
}

#[test]
fn tasks_are_not_vector_indexed() {
    let stores = test_stores();
    stores.tasks().create(NewTask::new("Water plants")).unwrap();
    assert_eq!(stores.vectors.count(Collection::Entities).unwrap(), 0);
    assert_eq!(stores.vectors.count(Collection::Events).unwrap(), 0);
    let (nodes, _) = stores.graph.counts().unwrap();
    assert_eq!(nodes, 1);
}
