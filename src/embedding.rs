//! Batched embedding client for an OpenAI-compatible HTTP provider.
//!
//! Callers submit logical batches of arbitrary size; the client slices them
//! into provider-sized sub-batches, optionally appends a trailing sentinel
//! token to every text, and reassembles the vectors in input order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, EmbeddingResult};

/// Text-to-vector provider boundary. The production implementation is the
/// HTTP [`EmbeddingClient`]; tests substitute a deterministic generator.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_texts(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    fn dimensions(&self) -> usize;
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
    index: usize,
    embedding: Vec<f32>,
}

/// HTTP client for the embedding provider.
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> EmbeddingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Embed a logical batch of texts. Sub-batching by the provider batch
    /// size happens here; the result has one vector per input, in order.
    pub async fn embed_texts(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = self.prepare_texts(texts);
        let mut vectors = Vec::with_capacity(prepared.len());
        for chunk in prepared.chunks(self.config.batch_size.max(1)) {
            let batch = self.embed_batch(chunk).await?;
            vectors.extend(batch);
        }

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        Ok(vectors.pop().unwrap_or_default())
    }

    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.api_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        });
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider { status, body });
        }

        let mut payload: EmbeddingResponse = response.json().await?;
        if payload.data.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: payload.data.len(),
            });
        }
        payload.data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(payload.data.len());
        for datum in payload.data {
            if datum.embedding.len() != self.config.dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.config.dimensions,
                    got: datum.embedding.len(),
                });
            }
            vectors.push(datum.embedding);
        }
        Ok(vectors)
    }

    /// Apply the EOS sentinel when configured.
    fn prepare_texts(&self, texts: &[String]) -> Vec<String> {
        if self.config.append_eos_token {
            texts
                .iter()
                .map(|t| format!("{t}{}", self.config.eos_token))
                .collect()
        } else {
            texts.to_vec()
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed_texts(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        EmbeddingClient::embed_texts(self, texts).await
    }

    async fn embed_query(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        EmbeddingClient::embed_query(self, text).await
    }

    fn dimensions(&self) -> usize {
        EmbeddingClient::dimensions(self)
    }
}

/// Deterministic embedder for tests: hashes each text into a unit-ish
/// vector so identical texts embed identically.
#[cfg(test)]
pub struct HashingEmbedder {
    pub dims: usize,
}

#[cfg(test)]
#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t, self.dims)).collect())
    }

    async fn embed_query(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        Ok(hash_vector(text, self.dims))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    (0..dims)
        .map(|i| {
            let mut hasher = DefaultHasher::new();
            (text, i).hash(&mut hasher);
            (hasher.finish() % 1000) as f32 / 1000.0 - 0.5
        })
        .collect()
}
