//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and two concrete providers:
//! - **[`GeminiProvider`]**: calls Google's `batchEmbedContents` endpoint
//!   with batching, timeout, retry, and backoff.
//! - **[`LexicalProvider`]**: deterministic hashed bag-of-words vectors.
//!   Needs no network or credentials; used for offline setups and tests.
//!
//! Providers distinguish two modes. Document mode embeds stored chunks;
//! query mode embeds a search question. Gemini tunes its vectors per mode
//! (`RETRIEVAL_DOCUMENT` / `RETRIEVAL_QUERY`); the lexical provider uses one
//! projection for both.
//!
//! Also provides the vector utilities shared with the index:
//! - [`cosine_similarity`]
//! - [`vec_to_bytes`] / [`bytes_to_vec`] (little-endian `f32`)
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{credential, EmbeddingConfig, GOOGLE_API_KEY_ENV};
use crate::error::{ConciergeError, Result};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Which side of a retrieval a text is embedded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Document,
    Query,
}

impl EmbedMode {
    fn task_type(self) -> &'static str {
        match self {
            EmbedMode::Document => "RETRIEVAL_DOCUMENT",
            EmbedMode::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// Trait for embedding backends.
///
/// Every returned vector has exactly [`dims`](EmbeddingProvider::dims)
/// entries, and `embed_documents` returns one vector per input in order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded in the index manifest.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Construct the configured provider.
///
/// Fails with [`ConciergeError::Configuration`] when the Gemini provider is
/// selected and `GOOGLE_API_KEY` is not set.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::new(config)?)),
        "lexical" => Ok(Arc::new(LexicalProvider::new(config.dims))),
        other => Err(ConciergeError::configuration(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Reject responses with the wrong vector count or width.
fn check_vectors(vectors: &[Vec<f32>], expected_count: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(ConciergeError::embedding(format!(
            "expected {} vectors, provider returned {}",
            expected_count,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(ConciergeError::embedding(format!(
            "expected {}-d vectors, provider returned {}-d",
            dims,
            bad.len()
        )));
    }
    Ok(())
}

// ============ Gemini Provider ============

/// Google Generative Language embeddings (`text-embedding-004`, 768-d).
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl GeminiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = credential(GOOGLE_API_KEY_ENV).ok_or_else(|| {
            ConciergeError::configuration(format!(
                "{} environment variable not set (required by the gemini embedding provider)",
                GOOGLE_API_KEY_ENV
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ConciergeError::embedding)?;

        Ok(Self {
            client,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embed_batch(batch, mode).await?;
            check_vectors(&vectors, batch.len(), self.dims)?;
            out.extend(vectors);
        }
        tracing::debug!(
            "embedded {} texts with {} ({:?} mode)",
            texts.len(),
            self.model,
            mode
        );
        Ok(out)
    }

    /// One `batchEmbedContents` call with retry/backoff.
    async fn embed_batch(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        let model_path = format!("models/{}", self.model);
        let requests: Vec<Value> = texts
            .iter()
            .map(|t| {
                json!({
                    "model": model_path,
                    "content": { "parts": [{ "text": t }] },
                    "taskType": mode.task_type(),
                })
            })
            .collect();
        let body = json!({ "requests": requests });
        let url = format!("{}/{}:batchEmbedContents", self.base_url, model_path);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!("retrying embedding request in {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value =
                            response.json().await.map_err(ConciergeError::embedding)?;
                        return parse_gemini_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = ConciergeError::embedding(format!(
                        "Gemini API error {}: {}",
                        status, body_text
                    ));
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(ConciergeError::embedding(e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ConciergeError::embedding("embedding failed after retries")))
    }
}

/// Extract `embeddings[].values` in order.
fn parse_gemini_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let items = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ConciergeError::embedding("invalid Gemini response: missing embeddings"))?;

    items
        .iter()
        .map(|item| {
            let values = item
                .get("values")
                .and_then(|v| v.as_array())
                .ok_or_else(|| ConciergeError::embedding("invalid Gemini response: missing values"))?;
            values
                .iter()
                .map(|v| {
                    v.as_f64().map(|f| f as f32).ok_or_else(|| {
                        ConciergeError::embedding(format!(
                            "invalid Gemini response: non-numeric embedding value {}",
                            v
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed(texts, EmbedMode::Document).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()], EmbedMode::Query)
            .await?
            .pop()
            .ok_or_else(|| ConciergeError::embedding("empty embedding response"))
    }
}

// ============ Lexical Provider ============

/// Hashed bag-of-words embeddings.
///
/// Each lower-cased alphanumeric token is hashed into one of `dims` buckets
/// with a hash-derived sign, and the result is L2-normalised. Texts sharing
/// words therefore have positive cosine similarity.
pub struct LexicalProvider {
    dims: usize,
}

impl LexicalProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for LexicalProvider {
    fn model_name(&self) -> &str {
        "lexical-hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian `f32` bytes.
pub fn vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes; a trailing partial value is ignored.
pub fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
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
