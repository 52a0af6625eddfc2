mod helpers;

use std::sync::Arc;

use chrono::{Duration, Utc};
use hindsight::config::RetrievalConfig;
use hindsight::embedding::hashing::HashingEmbedder;
use hindsight::embedding::{is_placeholder, EmbeddingProvider};
use hindsight::error::ProviderError;
use hindsight::memory::common::TimeWindow;
use hindsight::memory::types::{
    EntityType, EventType, NewEntity, NewEvent, NewTask, Participant, RecordKind,
};
use hindsight::memory::Stores;
use hindsight::retrieval::{RetrievalEngine, RetrievalRequest, Weights};

use helpers::{graph_store, stores_with, test_stores, vec_index, FlakyEmbedder, DIMS};

const SEMANTIC_ONLY: Weights = Weights {
    semantic: 1.0,
    temporal: 0.0,
    relational: 0.0,
};

const TEMPORAL_ONLY: Weights = Weights {
    semantic: 0.0,
    temporal: 1.0,
    relational: 0.0,
};

fn engine(stores: &Stores) -> RetrievalEngine {
    RetrievalEngine::new(stores.clone(), RetrievalConfig::default())
}

fn event(stores: &Stores, title: &str, age: Duration) -> String {
    stores
        .events()
        .create(NewEvent::new(EventType::Note, title, Utc::now() - age))
        .unwrap()
        .id
}

/// Hashing embedder that refuses any text containing "poison".
struct PickyEmbedder(HashingEmbedder);

impl EmbeddingProvider for PickyEmbedder {
    fn generate(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(ProviderError::Unavailable("refused".into()));
        }
        self.0.generate(texts)
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_name(&self) -> &str {
        "picky"
    }
}

#[tokio::test]
async fn empty_stores_return_nothing() {
    let stores = test_stores();
    let response = engine(&stores)
        .retrieve(RetrievalRequest::new("anything at all"))
        .await
        .unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.total_candidates, 0);
    assert!(!response.degraded);
}

#[tokio::test]
async fn zero_limit_returns_nothing() {
    let stores = test_stores();
    event(&stores, "quarterly report", Duration::zero());
    let response = engine(&stores)
        .retrieve(RetrievalRequest::new("quarterly report").with_limit(0))
        .await
        .unwrap();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn semantic_match_ranks_first() {
    let stores = test_stores();
    let report = event(&stores, "quarterly report deadline friday", Duration::hours(5));
    event(&stores, "lunch with the design team", Duration::hours(1));
    event(&stores, "dentist appointment", Duration::hours(2));

    let mut request = RetrievalRequest::new("when is the quarterly report deadline").with_limit(3);
    request.weights = Some(SEMANTIC_ONLY);
    let response = engine(&stores).retrieve(request).await.unwrap();

    assert_eq!(response.results.len(), 3);
    assert_eq!(response.results[0].id, report);
    assert_eq!(response.results[0].source, RecordKind::Event);
    assert!(response.results[0].scores.semantic > response.results[1].scores.semantic);
    assert_eq!(response.results[0].metadata["type"], "note");
}

#[tokio::test]
async fn results_are_sorted_and_limited() {
    let stores = test_stores();
    for i in 0..6 {
        event(&stores, &format!("status update {i}"), Duration::days(i));
    }
    stores.tasks().create(NewTask::new("write status update")).unwrap();

    let response = engine(&stores)
        .retrieve(RetrievalRequest::new("status update").with_limit(4))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 4);
    assert_eq!(response.total_candidates, 7);
    for pair in response.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn pools_are_truncated_by_oversample() {
    let stores = test_stores();
    for i in 0..5 {
        event(&stores, &format!("standup notes {i}"), Duration::hours(i));
    }
    let config = RetrievalConfig {
        oversample: 1,
        ..Default::default()
    };
    let engine = RetrievalEngine::new(stores.clone(), config);
    let response = engine
        .retrieve(RetrievalRequest::new("standup notes").with_limit(2))
        .await
        .unwrap();
    assert_eq!(response.total_candidates, 2);
    assert_eq!(response.results.len(), 2);
}

#[tokio::test]
async fn limit_is_clamped_to_max() {
    let stores = test_stores();
    for i in 0..4 {
        event(&stores, &format!("note {i}"), Duration::hours(i));
    }
    let config = RetrievalConfig {
        max_limit: 2,
        ..Default::default()
    };
    let response = RetrievalEngine::new(stores.clone(), config)
        .retrieve(RetrievalRequest::new("note").with_limit(50))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 2);
}

#[tokio::test]
async fn deleted_records_are_never_returned() {
    let stores = test_stores();
    let kept = event(&stores, "budget review", Duration::hours(1));
    let gone = event(&stores, "budget review draft", Duration::hours(1));
    stores.events().delete(&gone).unwrap();
    let task = stores.tasks().create(NewTask::new("budget review prep")).unwrap();
    stores.tasks().delete(&task.id).unwrap();

    let response = engine(&stores)
        .retrieve(RetrievalRequest::new("budget review"))
        .await
        .unwrap();
    let ids: Vec<_> = response.results.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![kept]);
}

#[tokio::test]
async fn query_embedding_failure_degrades_to_recency() {
    let embedder = FlakyEmbedder::new(false);
    let stores = stores_with(embedder.clone(), vec_index(), graph_store());
    let old = event(&stores, "project kickoff", Duration::days(10));
    let new = event(&stores, "project kickoff", Duration::days(1));
    stores
        .events()
        .create(NewEvent::new(EventType::Note, "placeholder note", Utc::now()))
        .unwrap();

    embedder.set_failing(true);
    let response = engine(&stores)
        .retrieve(RetrievalRequest::new("project kickoff"))
        .await
        .unwrap();
    assert!(response.degraded);
    assert_eq!(response.skipped, 0);
    assert_eq!(response.results.len(), 3);
    assert!(response.results.iter().all(|r| r.scores.semantic == 0.0));

    let pos = |id: &str| response.results.iter().position(|r| r.id == id).unwrap();
    assert!(pos(&new) < pos(&old));
}

fn stale_then_fresh(stores: &Stores) -> String {
    for i in 0..4 {
        event(stores, &format!("old {i}"), Duration::days(30 + i));
    }
    event(stores, "fresh", Duration::zero())
}

#[tokio::test]
async fn degraded_pool_keeps_the_newest_events() {
    let embedder = FlakyEmbedder::new(false);
    let stores = stores_with(embedder.clone(), vec_index(), graph_store());
    let fresh = stale_then_fresh(&stores);

    embedder.set_failing(true);
    let response = engine(&stores)
        .retrieve(RetrievalRequest::new("anything").with_limit(1))
        .await
        .unwrap();
    assert!(response.degraded);
    // limit 1 × oversample 3: the pool holds the three newest events.
    assert_eq!(response.total_candidates, 3);
    assert_eq!(response.results[0].id, fresh);
    assert!(response.results[0].scores.temporal > 0.99);
}

#[tokio::test]
async fn empty_query_still_produces_results() {
    let stores = test_stores();
    let fresh = stale_then_fresh(&stores);

    let response = engine(&stores)
        .retrieve(RetrievalRequest::new("").with_limit(1))
        .await
        .unwrap();
    assert!(!response.degraded);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, fresh);
    assert_eq!(response.results[0].scores.semantic, 0.0);

    let all = engine(&stores).retrieve(RetrievalRequest::new("")).await.unwrap();
    assert_eq!(all.results.len(), 5);
}

#[tokio::test]
async fn missing_embeddings_are_regenerated_for_scoring() {
    let stores = test_stores();
    let id = event(&stores, "release checklist", Duration::hours(1));
    {
        let conn = stores.db.lock().unwrap();
        conn.execute("UPDATE events SET embedding = NULL WHERE id = ?1", [&id])
            .unwrap();
    }

    let mut request = RetrievalRequest::new("release checklist");
    request.weights = Some(SEMANTIC_ONLY);
    let response = engine(&stores).retrieve(request).await.unwrap();
    assert_eq!(response.skipped, 0);
    assert_eq!(response.results[0].id, id);
    assert!(response.results[0].scores.semantic > 0.99);

    // Retrieval never writes the regenerated vector back.
    let stored = stores.events().get(&id).unwrap();
    assert!(stored.embedding.is_empty());
}

#[tokio::test]
async fn unembeddable_candidates_are_skipped() {
    let stores = stores_with(
        Arc::new(PickyEmbedder(HashingEmbedder::new(DIMS))),
        vec_index(),
        graph_store(),
    );
    let good = event(&stores, "roadmap sync", Duration::hours(1));
    // Embedding fails at write time, so the row holds a placeholder.
    let bad = event(&stores, "poison pill", Duration::hours(1));
    {
        let conn = stores.db.lock().unwrap();
        conn.execute("UPDATE events SET embedding = NULL WHERE id = ?1", [&bad])
            .unwrap();
    }

    let response = engine(&stores)
        .retrieve(RetrievalRequest::new("roadmap sync"))
        .await
        .unwrap();
    assert_eq!(response.skipped, 1);
    assert!(!response.degraded);
    let ids: Vec<_> = response.results.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![good]);
}

#[tokio::test]
async fn placeholder_embeddings_score_zero_but_are_kept() {
    let stores = stores_with(
        Arc::new(PickyEmbedder(HashingEmbedder::new(DIMS))),
        vec_index(),
        graph_store(),
    );
    let id = event(&stores, "poison ivy notes", Duration::hours(1));

    let response = engine(&stores)
        .retrieve(RetrievalRequest::new("ivy"))
        .await
        .unwrap();
    assert_eq!(response.skipped, 0);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, id);
    assert_eq!(response.results[0].scores.semantic, 0.0);
}

#[tokio::test]
async fn placeholders_are_rescored_once_the_provider_recovers() {
    let embedder = FlakyEmbedder::new(true);
    let stores = stores_with(embedder.clone(), vec_index(), graph_store());
    let id = event(&stores, "budget forecast", Duration::hours(1));
    assert!(is_placeholder(&stores.events().get(&id).unwrap().embedding));

    embedder.set_failing(false);
    let mut request = RetrievalRequest::new("budget forecast");
    request.weights = Some(SEMANTIC_ONLY);
    let response = engine(&stores).retrieve(request).await.unwrap();
    assert_eq!(response.skipped, 0);
    assert!(response.results[0].scores.semantic > 0.99);

    // The stored row still holds the placeholder until reconcile runs.
    assert!(is_placeholder(&stores.events().get(&id).unwrap().embedding));
}

#[tokio::test]
async fn entity_context_boosts_related_records() {
    let stores = test_stores();
    let alice = stores
        .entities()
        .create(NewEntity::new("Alice", EntityType::Person))
        .unwrap()
        .entity
        .id;

    let mut mine = NewTask::new("prepare slides");
    mine.assignee_id = Some(alice.clone());
    let mine = stores.tasks().create(mine).unwrap().id;
    let other = stores.tasks().create(NewTask::new("prepare slides")).unwrap().id;

    let mut meeting = NewEvent::new(EventType::Meeting, "slides review", Utc::now());
    meeting.participants.push(Participant {
        entity_id: alice.clone(),
        metadata: Default::default(),
    });
    let meeting = stores.events().create(meeting).unwrap().id;

    let response = engine(&stores)
        .retrieve(
            RetrievalRequest::new("prepare slides")
                .with_entity_context(vec![alice.clone(), alice.clone(), "  ".into()]),
        )
        .await
        .unwrap();

    let find = |id: &str| response.results.iter().find(|r| r.id == id).unwrap();
    assert_eq!(find(&mine).scores.relational, 1.0);
    assert_eq!(find(&other).scores.relational, 0.0);
    assert_eq!(find(&meeting).scores.relational, 1.0);
    assert!(find(&mine).score > find(&other).score);

    // Context entities themselves are candidates.
    let entity = find(&alice);
    assert_eq!(entity.source, RecordKind::Entity);
    assert_eq!(entity.scores.relational, 1.0);
}

#[tokio::test]
async fn entities_are_candidates_only_through_context() {
    let stores = test_stores();
    stores
        .entities()
        .create(NewEntity::new("Quarterly report", EntityType::Document))
        .unwrap();
    let response = engine(&stores)
        .retrieve(RetrievalRequest::new("quarterly report"))
        .await
        .unwrap();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn time_window_limits_events() {
    let stores = test_stores();
    event(&stores, "old offsite", Duration::days(10));
    let recent = event(&stores, "recent offsite", Duration::days(1));

    let mut request = RetrievalRequest::new("offsite");
    request.context.time_window = Some(TimeWindow {
        start: Some(Utc::now() - Duration::days(2)),
        end: None,
    });
    let response = engine(&stores).retrieve(request).await.unwrap();
    let ids: Vec<_> = response.results.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![recent]);
}

#[tokio::test]
async fn recency_is_monotonic_and_future_is_fresh() {
    let stores = test_stores();
    let now = Utc::now();
    let ancient = event(&stores, "retro", Duration::days(30));
    let week = event(&stores, "retro", Duration::days(7));
    let future = stores
        .events()
        .create(NewEvent::new(EventType::Meeting, "retro", now + Duration::days(2)))
        .unwrap()
        .id;

    let mut request = RetrievalRequest::new("retro");
    request.weights = Some(TEMPORAL_ONLY);
    let response = engine(&stores).retrieve_at(request, now).await.unwrap();

    let ids: Vec<_> = response.results.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![future.clone(), week, ancient]);
    assert!((response.results[0].scores.temporal - 1.0).abs() < 1e-9);
    let expected = (-0.1f64 * 7.0).exp();
    assert!((response.results[1].scores.temporal - expected).abs() < 1e-3);
}

#[tokio::test]
async fn ties_break_by_id() {
    let stores = test_stores();
    let a = stores.tasks().create(NewTask::new("renew domain")).unwrap().id;
    let b = stores.tasks().create(NewTask::new("renew domain")).unwrap().id;

    let mut request = RetrievalRequest::new("renew domain");
    request.weights = Some(SEMANTIC_ONLY);
    let first = engine(&stores).retrieve(request.clone()).await.unwrap();
    let second = engine(&stores).retrieve(request).await.unwrap();

    let ids: Vec<_> = first.results.iter().map(|r| r.id.clone()).collect();
    let mut sorted = vec![a, b];
    sorted.sort();
    assert_eq!(ids, sorted);
    let again: Vec<_> = second.results.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, again);
}

#[tokio::test]
async fn weights_change_the_order() {
    let stores = test_stores();
    let now = Utc::now();
    let relevant_old = event(&stores, "tax filing documents", Duration::days(60));
    let fresh_unrelated = event(&stores, "coffee chat", Duration::minutes(5));

    let mut semantic = RetrievalRequest::new("tax filing documents");
    semantic.weights = Some(SEMANTIC_ONLY);
    let response = engine(&stores).retrieve_at(semantic, now).await.unwrap();
    assert_eq!(response.results[0].id, relevant_old);

    let mut temporal = RetrievalRequest::new("tax filing documents");
    temporal.weights = Some(TEMPORAL_ONLY);
    let response = engine(&stores).retrieve_at(temporal, now).await.unwrap();
    assert_eq!(response.results[0].id, fresh_unrelated);
}
