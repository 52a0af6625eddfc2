#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hindsight::db;
use hindsight::embedding::hashing::HashingEmbedder;
use hindsight::embedding::EmbeddingProvider;
use hindsight::error::ProviderError;
use hindsight::index::{
    Collection, GraphNeighbor, GraphStore, SqliteGraphStore, SqliteVecIndex, VectorHit, VectorIndex,
};
use hindsight::memory::types::{Relationship, RelationshipType, RecordKind};
use hindsight::memory::Stores;
use hindsight::pipeline::{
    EventPipeline, Extraction, ExtractionContext, Extractor, PipelineHandle, PipelineSettings,
    Transcriber,
};
use serde_json::Value;

pub const DIMS: usize = 384;

/// In-memory stores with the deterministic hashing embedder.
pub fn test_stores() -> Stores {
    Stores::open_in_memory(Arc::new(HashingEmbedder::new(DIMS))).unwrap()
}

/// In-memory stores with caller-supplied collaborators.
pub fn stores_with(
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
) -> Stores {
    Stores::new(db::open_memory_database().unwrap(), vectors, graph, embedder)
}

pub fn vec_index() -> Arc<dyn VectorIndex> {
    Arc::new(SqliteVecIndex::open_in_memory(DIMS).unwrap())
}

pub fn graph_store() -> Arc<dyn GraphStore> {
    Arc::new(SqliteGraphStore::open_in_memory().unwrap())
}

// ── Embedders ────────────────────────────────────────────────────────────────

/// Hashing embedder that can be switched into a failing state.
pub struct FlakyEmbedder {
    inner: HashingEmbedder,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(failing: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbedder::new(DIMS),
            failing: AtomicBool::new(failing),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for FlakyEmbedder {
    fn generate(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("embedding service down".into()));
        }
        self.inner.generate(texts)
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_name(&self) -> &str {
        "flaky-hashing"
    }
}

// ── Failing secondary indexes ────────────────────────────────────────────────

pub struct FailingVectorIndex;

impl VectorIndex for FailingVectorIndex {
    fn upsert(&self, _: Collection, _: &str, _: &[f32]) -> anyhow::Result<()> {
        anyhow::bail!("vector index unavailable")
    }
    fn remove(&self, _: Collection, _: &str) -> anyhow::Result<()> {
        anyhow::bail!("vector index unavailable")
    }
    fn nearest(&self, _: Collection, _: &[f32], _: usize) -> anyhow::Result<Vec<VectorHit>> {
        anyhow::bail!("vector index unavailable")
    }
    fn count(&self, _: Collection) -> anyhow::Result<usize> {
        anyhow::bail!("vector index unavailable")
    }
}

pub struct FailingGraph;

impl GraphStore for FailingGraph {
    fn upsert_node(&self, _: &str, _: RecordKind, _: &str) -> anyhow::Result<()> {
        anyhow::bail!("graph unavailable")
    }
    fn delete_node(&self, _: &str) -> anyhow::Result<()> {
        anyhow::bail!("graph unavailable")
    }
    fn merge_edge(&self, _: &Relationship) -> anyhow::Result<()> {
        anyhow::bail!("graph unavailable")
    }
    fn remove_edge(&self, _: &str, _: &str, _: RelationshipType) -> anyhow::Result<()> {
        anyhow::bail!("graph unavailable")
    }
    fn neighbors(&self, _: &str) -> anyhow::Result<Vec<GraphNeighbor>> {
        anyhow::bail!("graph unavailable")
    }
    fn counts(&self) -> anyhow::Result<(usize, usize)> {
        anyhow::bail!("graph unavailable")
    }
}

// ── Scripted providers ───────────────────────────────────────────────────────

/// What a [`ScriptedExtractor`] does on one call.
pub enum Step {
    Reply(Value),
    Fail,
    Hang,
}

/// Replays queued steps; once the queue is empty, repeats `fallback`.
pub struct ScriptedExtractor {
    steps: Mutex<VecDeque<Step>>,
    fallback: Value,
    pub inputs: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    pub fn replying(value: Value) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: value,
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn with_steps(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            fallback: serde_json::json!({ "summary": "fallback" }),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, text: &str, _context: &ExtractionContext) -> Result<Extraction, ProviderError> {
        self.inputs.lock().unwrap().push(text.to_string());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(v)) => Extraction::from_value(v),
            Some(Step::Fail) => Err(ProviderError::Unavailable("llm down".into())),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Unavailable("unreachable".into()))
            }
            None => Extraction::from_value(self.fallback.clone()),
        }
    }
}

pub struct ScriptedTranscriber {
    pub text: Option<String>,
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, ProviderError> {
        self.text
            .clone()
            .ok_or_else(|| ProviderError::Unavailable("whisper down".into()))
    }
}

/// Start a pipeline over `stores` with the given extractor and no transcription.
pub fn pipeline(stores: &Stores, extractor: Arc<dyn Extractor>) -> PipelineHandle {
    pipeline_with(stores, extractor, None, PipelineSettings::default())
}

pub fn pipeline_with(
    stores: &Stores,
    extractor: Arc<dyn Extractor>,
    transcript: Option<&str>,
    settings: PipelineSettings,
) -> PipelineHandle {
    let transcriber = Arc::new(ScriptedTranscriber {
        text: transcript.map(str::to_string),
    });
    EventPipeline::new(stores.clone(), extractor, transcriber, settings).start()
}
