use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HindsightConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub extraction: ExtractionConfig,
    pub transcription: TranscriptionConfig,
    pub retrieval: RetrievalConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

/// Locations of the three backing stores. They may point at the same file.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub vector_path: String,
    pub graph_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `local` (ONNX), `remote` (OpenAI-compatible HTTP), or `hashing` (offline, deterministic).
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub dimensions: usize,
    pub api_base: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Character budget for extractor input; longer content is truncated.
    pub max_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    /// Per-pool candidate multiplier applied to the requested limit.
    pub oversample: usize,
    /// Temporal decay constant λ, per day.
    pub decay_per_day: f64,
    /// Cosine similarity at which a new entity is reported as a possible duplicate.
    pub dedup_threshold: f64,
    pub weights: WeightsConfig,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct WeightsConfig {
    pub semantic: f64,
    pub temporal: f64,
    pub relational: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7878,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = default_hindsight_dir();
        Self {
            db_path: dir.join("memory.db").to_string_lossy().into_owned(),
            vector_path: dir.join("vectors.db").to_string_lossy().into_owned(),
            graph_path: dir.join("graph.db").to_string_lossy().into_owned(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_hindsight_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            dimensions: 384,
            api_base: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4o-mini".into(),
            temperature: 0.2,
            timeout_secs: 30,
            max_chars: 30_000,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "whisper-1".into(),
            timeout_secs: 60,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
            oversample: 3,
            decay_per_day: 0.1,
            dedup_threshold: 0.88,
            weights: WeightsConfig::default(),
        }
    }
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            semantic: 0.4,
            temporal: 0.3,
            relational: 0.3,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// Returns `~/.hindsight/`, or `./.hindsight/` when no home directory is known.
pub fn default_hindsight_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hindsight")
}

/// Returns the default config file path: `~/.hindsight/config.toml`
pub fn default_config_path() -> PathBuf {
    default_hindsight_dir().join("config.toml")
}

impl HindsightConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            HindsightConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HINDSIGHT_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("HINDSIGHT_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("HINDSIGHT_EMBEDDING_URL") {
            self.embedding.api_base = val;
        }
        if let Ok(val) = std::env::var("HINDSIGHT_EMBEDDING_API_KEY") {
            self.embedding.api_key = val;
        }
        if let Ok(val) = std::env::var("HINDSIGHT_LLM_URL") {
            self.extraction.api_base = val.clone();
            self.transcription.api_base = val;
        }
        if let Ok(val) = std::env::var("HINDSIGHT_LLM_API_KEY") {
            self.extraction.api_key = val.clone();
            self.transcription.api_key = val;
        }
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_vector_path(&self) -> PathBuf {
        expand_tilde(&self.storage.vector_path)
    }

    pub fn resolved_graph_path(&self) -> PathBuf {
        expand_tilde(&self.storage.graph_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
