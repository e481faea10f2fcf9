use serde::Deserialize;
use std::path::Path;

use crate::error::{PipelineError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_size")]
    pub target_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_target_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` (with local-hash fallback), `"hash"` (deterministic
    /// pseudo-embeddings only), or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// How long terminal jobs are kept before garbage collection.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Base timeout for the extraction phase; scaled up for large files.
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retention_secs: default_retention_secs(),
            gc_interval_secs: default_gc_interval_secs(),
            extract_timeout_secs: default_extract_timeout_secs(),
        }
    }
}

fn default_max_concurrent() -> usize {
    2
}
fn default_retention_secs() -> u64 {
    3600
}
fn default_gc_interval_secs() -> u64 {
    1800
}
fn default_extract_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Terminal document status records are eligible for cleanup after
    /// this many seconds.
    #[serde(default = "default_status_ttl_secs")]
    pub status_ttl_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            status_ttl_secs: default_status_ttl_secs(),
        }
    }
}

fn default_status_ttl_secs() -> u64 {
    86400
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::InvalidConfiguration(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| PipelineError::InvalidConfiguration(format!("failed to parse config: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.target_size == 0 {
        return Err(PipelineError::InvalidConfiguration(
            "chunking.target_size must be > 0".to_string(),
        ));
    }

    // Enforced again inside the chunker; rejecting here keeps a bad config
    // from ever reaching a job.
    if config.chunking.overlap >= config.chunking.target_size {
        return Err(PipelineError::InvalidConfiguration(format!(
            "chunking.overlap ({}) must be < chunking.target_size ({})",
            config.chunking.overlap, config.chunking.target_size
        )));
    }

    if config.queue.max_concurrent == 0 {
        return Err(PipelineError::InvalidConfiguration(
            "queue.max_concurrent must be >= 1".to_string(),
        ));
    }

    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        return Err(PipelineError::InvalidConfiguration(format!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        )));
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "hash" => {}
        other => {
            return Err(PipelineError::InvalidConfiguration(format!(
                "unknown embedding provider: '{}'. Must be disabled, openai, or hash.",
                other
            )))
        }
    }

    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        return Err(PipelineError::InvalidConfiguration(
            "embedding.model must be specified when provider is 'openai'".to_string(),
        ));
    }

    Ok(())
}
