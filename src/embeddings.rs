use anyhow::{Context, Result};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::iam::IamTokenProvider;

pub const DEFAULT_EMBEDDING_MODEL: &str = "ibm/slate-30m-english-rtrvr";

/// watsonx.ai API version pinned for both model endpoints.
pub const API_VERSION: &str = "2024-05-31";

/// Inputs per embeddings request. The endpoint accepts large batches; this
/// keeps request bodies bounded when indexing long documents.
fn batch_size() -> usize {
    std::env::var("EMBEDDING_BATCH_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(100)
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model_id: &'a str,
    project_id: &'a str,
    inputs: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    results: Vec<EmbeddingResult>,
}

#[derive(Deserialize)]
struct EmbeddingResult {
    embedding: Vec<f32>,
}

/// Embedding client for the watsonx.ai text-embeddings endpoint, with LRU
/// caching for query embeddings. Chunk embedding goes through the batch path.
pub struct EmbeddingService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    project_id: String,
    iam: Arc<IamTokenProvider>,
    query_cache: RwLock<LruCache<String, Vec<f32>>>,
}

impl EmbeddingService {
    pub fn new(service_url: &str, project_id: &str, iam: Arc<IamTokenProvider>) -> Result<Self> {
        let model = std::env::var("WATSONX_EMBEDDING_MODEL")
            .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string());

        tracing::info!("Embedding endpoint: {}/ml/v1/text/embeddings", service_url);
        tracing::info!("Embedding model: {}", model);

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()?,
            endpoint: format!("{service_url}/ml/v1/text/embeddings"),
            model,
            project_id: project_id.to_string(),
            iam,
            query_cache: RwLock::new(LruCache::new(NonZeroUsize::new(1000).unwrap())),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Embed a single query string, consulting the LRU cache first.
    pub async fn get_query_embedding(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.query_cache.write().await.get(text) {
            return Ok(cached.clone());
        }

        let embeddings = self.request_embeddings(&[text.to_string()]).await?;
        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embeddings array from watsonx"))?;

        self.query_cache
            .write()
            .await
            .put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Embed a set of chunk texts, batching requests to keep bodies bounded.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let batch_size = batch_size();
        let total_batches = texts.len().div_ceil(batch_size);
        let mut embeddings = Vec::with_capacity(texts.len());

        for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
            tracing::debug!(
                "Batch {}/{}: embedding {} texts",
                batch_idx + 1,
                total_batches,
                batch.len()
            );

            let batch_embeddings = self.request_embeddings(batch).await?;
            if batch_embeddings.len() != batch.len() {
                return Err(anyhow::anyhow!(
                    "Batch {}/{}: received {} embeddings for {} texts",
                    batch_idx + 1,
                    total_batches,
                    batch_embeddings.len(),
                    batch.len()
                ));
            }

            embeddings.extend(batch_embeddings);
        }

        Ok(embeddings)
    }

    async fn request_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let token = self.iam.bearer_token().await?;
        let request = EmbeddingRequest {
            model_id: &self.model,
            project_id: &self.project_id,
            inputs,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("version", API_VERSION)])
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .context("Embedding request failed")?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "watsonx embeddings API error: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .context("Embedding response was not valid JSON")?;

        Ok(body.results.into_iter().map(|r| r.embedding).collect())
    }
}
