//! Embedding client (C1): converts text to dense vectors.
//!
//! Retries with exponential backoff on transient upstream failures, the same
//! attempt-count/backoff-duration loop the original OpenAI provider used,
//! generalized to the spec's own constants (base 500ms, factor 2, cap 3
//! attempts) and classified into [`RagError`] only once retries are
//! exhausted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::RagError;

const STAGE: &str = "embed";
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_FACTOR: u64 = 2;
const MAX_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeds a batch of texts, respecting the provider's batch limit
    /// internally. The returned vector count always equals the input count.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;

    fn dims(&self) -> usize;
}

/// Calls an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbeddingClient {
    client: reqwest::Client,
    config: EmbeddingConfig,
    dims: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: EmbeddingConfig, dims: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build embedding http client");
        Self { client, config, dims }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = self.config.batch_size.max(1);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let vectors = embed_batch_with_retry(&self.client, &self.config, batch).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::internal(
                    STAGE,
                    format!("embedding provider returned {} vectors for {} inputs", vectors.len(), batch.len()),
                ));
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_batch_with_retry(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    batch: &[String],
) -> Result<Vec<Vec<f32>>, RagError> {
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        match try_embed_once(client, config, batch).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) if is_retryable(&e) => {
                tracing::warn!(attempt, error = %e, "embedding request failed, retrying");
                last_err = Some(e);
                if attempt < MAX_ATTEMPTS {
                    let backoff = BACKOFF_BASE_MS * BACKOFF_FACTOR.pow(attempt - 1);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
            Err(e) => return Err(RagError::upstream(STAGE, e.to_string())),
        }
    }

    Err(RagError::upstream(
        STAGE,
        last_err.map(|e| e.to_string()).unwrap_or_else(|| "embedding request failed after retries".to_string()),
    ))
}

async fn try_embed_once(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    batch: &[String],
) -> anyhow::Result<Vec<Vec<f32>>> {
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let response = client
        .post("https://api.openai.com/v1/embeddings")
        .bearer_auth(api_key)
        .json(&EmbeddingRequest { model: &config.model, input: batch })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("embedding provider returned {status}: {body}");
    }

    let parsed: EmbeddingResponse = response.json().await?;
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

fn is_retryable(e: &anyhow::Error) -> bool {
    let msg = e.to_string();
    if msg.contains("returned 429") || msg.contains("returned 5") {
        return true;
    }
    if let Some(source) = e.downcast_ref::<reqwest::Error>() {
        return source.is_timeout() || source.is_connect();
    }
    false
}

/// `DEMO_MODE` stub: deterministic, hash-derived fixed vectors. No network
/// call, no retries — used for tests and smoke runs.
pub struct DemoEmbeddingClient {
    dims: usize,
}

impl DemoEmbeddingClient {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingClient for DemoEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|t| hash_vector(t, self.dims)).collect())
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Derives a unit-length vector deterministically from `text`'s SHA-256
/// digest, cycling the digest bytes to fill `dims` dimensions.
fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let mut v: Vec<f32> = (0..dims)
        .map(|i| {
            let byte = digest[i % digest.len()];
            (byte as f32 / 255.0) * 2.0 - 1.0
        })
        .collect();
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Fixed embedding dimensionality used by this deployment.
pub const DEMO_DIMS: usize = 384;

pub fn create_client(config: &crate::config::Config) -> std::sync::Arc<dyn EmbeddingClient> {
    if config.demo_mode {
        std::sync::Arc::new(DemoEmbeddingClient::new(DEMO_DIMS))
    } else {
        std::sync::Arc::new(OpenAiEmbeddingClient::new(config.embedding.clone(), DEMO_DIMS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_client_is_deterministic() {
        let client = DemoEmbeddingClient::new(16);
        let a = client.embed(&["hello world".to_string()]).await.unwrap();
        let b = client.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 16);
    }

    #[tokio::test]
    async fn demo_client_preserves_input_count() {
        let client = DemoEmbeddingClient::new(8);
        let out = client.embed(&["a".into(), "b".into(), "c".into()]).await.unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn distinct_texts_hash_to_distinct_vectors() {
        let a = hash_vector("one", 32);
        let b = hash_vector("two", 32);
        assert_ne!(a, b);
    }
}
