//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`OpenAiProvider`]** — calls an OpenAI-compatible embeddings API
//!   with batching, retry, and exponential backoff.
//! - **[`HashProvider`]** — a deterministic local pseudo-embedder. This is
//!   an explicit last resort: its vectors capture crude token overlap, not
//!   semantics, and every batch it produces is labeled `pseudo` so callers
//!   never present its similarities as equal-confidence to real embeddings.
//! - **[`FallbackProvider`]** — chains providers in order, failing fast
//!   only when the last link also fails.
//!
//! Every provider returns exactly one vector per input text, in input
//! order; partial results are an error, never silently truncated or
//! zero-filled.
//!
//! # Retry Strategy (OpenAI provider)
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, Result};

/// One batch of embeddings plus its provenance.
///
/// `pseudo` is true when the vectors came from the local hash fallback
/// rather than a real embedding model.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub provider: String,
    pub pseudo: bool,
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the provider/model identifier (e.g. `"text-embedding-3-small"`).
    fn name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts. The result holds exactly one vector per
    /// input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<EmbeddingBatch> {
    let batch = provider.embed(&[text.to_string()]).await?;
    if batch.vectors.len() != 1 {
        return Err(PipelineError::EmbeddingFailed(format!(
            "provider {} returned {} vectors for 1 text",
            batch.provider,
            batch.vectors.len()
        )));
    }
    Ok(batch)
}

/// Create the configured provider (with fallback chain where applicable).
///
/// | Config value | Chain |
/// |--------------|-------|
/// | `"openai"` | [`OpenAiProvider`] → [`HashProvider`] |
/// | `"hash"` | [`HashProvider`] only |
/// | `"disabled"` | error |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let primary = OpenAiProvider::new(config)?;
            let fallback = HashProvider::new(config.dims);
            Ok(Arc::new(FallbackProvider::new(vec![
                Arc::new(primary),
                Arc::new(fallback),
            ])?))
        }
        "hash" => Ok(Arc::new(HashProvider::new(config.dims))),
        "disabled" => Err(PipelineError::InvalidConfiguration(
            "embedding provider is disabled".to_string(),
        )),
        other => Err(PipelineError::InvalidConfiguration(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ OpenAI Provider ============

/// Embedding provider for an OpenAI-compatible `POST /v1/embeddings` API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiProvider {
    model: String,
    dims: usize,
    max_retries: u32,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            PipelineError::InvalidConfiguration(
                "embedding.model required for openai provider".to_string(),
            )
        })?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(PipelineError::InvalidConfiguration(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }
        Ok(Self {
            model,
            dims: config.dims,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn call_api(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PipelineError::EmbeddingFailed("OPENAI_API_KEY not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PipelineError::EmbeddingFailed(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| PipelineError::EmbeddingFailed(e.to_string()))?;
                        return parse_openai_response(&json, texts.len());
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(PipelineError::EmbeddingFailed(format!(
                            "API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(PipelineError::EmbeddingFailed(format!(
                        "API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(PipelineError::EmbeddingFailed(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| PipelineError::EmbeddingFailed("retries exhausted".to_string())))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        let vectors = self.call_api(texts).await?;
        Ok(EmbeddingBatch {
            vectors,
            provider: self.model.clone(),
            pseudo: false,
        })
    }
}

/// Parse an OpenAI embeddings API response, requiring one vector per input.
fn parse_openai_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            PipelineError::EmbeddingFailed("invalid response: missing data array".to_string())
        })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                PipelineError::EmbeddingFailed("invalid response: missing embedding".to_string())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    if embeddings.len() != expected {
        return Err(PipelineError::EmbeddingFailed(format!(
            "expected {} embeddings, got {}",
            expected,
            embeddings.len()
        )));
    }

    Ok(embeddings)
}

// ============ Hash Provider (last resort) ============

/// Deterministic local pseudo-embedder.
///
/// Hashes whitespace tokens into a fixed number of buckets and
/// L2-normalizes the result. Two texts sharing many tokens get similar
/// vectors; nothing more is promised. Batches are labeled `pseudo: true`
/// so downstream consumers can surface the reduced confidence.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            // FNV-1a over the lowercased token.
            let mut hash: u64 = 0xcbf29ce484222325;
            for b in token.to_lowercase().bytes() {
                hash ^= b as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            v[(hash % self.dims as u64) as usize] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn name(&self) -> &str {
        "local-hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|t| self.embed_one(t)).collect(),
            provider: "local-hash".to_string(),
            pseudo: true,
        })
    }
}

// ============ Fallback Chain ============

/// Chains providers in order; each link is tried only after the previous
/// one failed. Fails fast when the last link fails — never returns zero
/// vectors or partial batches.
pub struct FallbackProvider {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
}

impl FallbackProvider {
    /// All links must share the same dimensionality; a chain that could
    /// change dims mid-document would corrupt the vector store.
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(PipelineError::InvalidConfiguration(
                "fallback chain needs at least one provider".to_string(),
            ));
        }
        let dims = providers[0].dims();
        for p in &providers[1..] {
            if p.dims() != dims {
                return Err(PipelineError::DimensionMismatch {
                    expected: dims,
                    actual: p.dims(),
                });
            }
        }
        Ok(Self { providers })
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackProvider {
    fn name(&self) -> &str {
        self.providers[0].name()
    }

    fn dims(&self) -> usize {
        self.providers[0].dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.embed(texts).await {
                Ok(batch) => {
                    if batch.vectors.len() != texts.len() {
                        return Err(PipelineError::EmbeddingFailed(format!(
                            "provider {} returned {} vectors for {} texts",
                            provider.name(),
                            batch.vectors.len(),
                            texts.len()
                        )));
                    }
                    return Ok(batch);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "embedding provider failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| PipelineError::EmbeddingFailed("empty fallback chain".to_string())))
    }
}

// ============ Similarity ============

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
/// Cosine (not Euclidean distance) is the required metric here: embedding
/// magnitude carries no meaning for the models in use, so a magnitude-
/// sensitive metric would silently rank results differently.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
