//! Embedding providers and the cache-backed embedding path.
//!
//! Vectors come from, in order: a fresh cache entry, the configured
//! provider, a stale cache entry, and finally the local hashing embedder.
//! [`EmbeddingService::embed_text`] therefore never fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use iw_core::{Embedder, EntityKind, IwError, IwResult, VectorStore};

use crate::cache::{CacheLookup, CacheSource, Purpose, ResultCache};
use crate::config::{CacheConfig, EmbeddingConfig, LlmConfig};
use crate::fallback::hashed_embedding;
use crate::fingerprint::{fingerprint, normalized_fingerprint};

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        dimensions: usize,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> IwResult<Vec<f32>> {
        #[derive(serde::Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a str,
            dimensions: usize,
        }

        #[derive(serde::Deserialize)]
        struct EmbedResponse {
            data: Vec<EmbedData>,
        }

        #[derive(serde::Deserialize)]
        struct EmbedData {
            embedding: Vec<f32>,
        }

        let url = format!("{}/embeddings", self.base_url);
        let mut req_builder = self.client.post(&url).json(&EmbedRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimensions,
        });
        if let Some(ref key) = self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }
        let resp = req_builder
            .send()
            .await
            .map_err(|e| IwError::Embedding(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IwError::Embedding(format!("API error {status}: {body}")));
        }

        let data: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| IwError::Embedding(format!("parse error: {e}")))?;

        data.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| IwError::Embedding("empty response".into()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Deterministic local embedder based on feature hashing.
///
/// Similarity only reflects shared vocabulary, but it needs no network and
/// keeps semantic search functional when no provider is configured.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> IwResult<Vec<f32>> {
        Ok(hashed_embedding(text, self.dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "local-hashing"
    }
}

/// Pick the embedder named by `config.provider`.
pub fn init_embedder(config: &EmbeddingConfig, llm: &LlmConfig) -> Arc<dyn Embedder> {
    match config.provider.as_str() {
        "openai" | "openai-compatible" => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| llm.base_url.clone());
            info!(base_url = %base_url, model = %config.model, "embedding provider initialized");
            Arc::new(OpenAiEmbedder::new(
                base_url,
                llm.api_key.clone(),
                config.model.clone(),
                config.dimensions,
                Duration::from_secs(llm.timeout_secs),
            ))
        }
        "local" => Arc::new(HashingEmbedder::new(config.dimensions)),
        other => {
            warn!(provider = other, "unknown embedding provider, using local hashing embedder");
            Arc::new(HashingEmbedder::new(config.dimensions))
        }
    }
}

// ---------------------------------------------------------------------------
// Cache-backed embedding path
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSource {
    Provider,
    Cache,
    StaleCache,
    Fallback,
}

pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    cache: Arc<ResultCache>,
    vectors: Arc<dyn VectorStore>,
    dimensions: usize,
    timeout: Duration,
    ttl: Duration,
    fallback_ttl: Duration,
}

impl EmbeddingService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        cache: Arc<ResultCache>,
        vectors: Arc<dyn VectorStore>,
        cache_config: &CacheConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            dimensions: embedder.dimensions(),
            embedder,
            cache,
            vectors,
            timeout,
            ttl: Duration::from_secs(cache_config.embedding_ttl_secs),
            fallback_ttl: Duration::from_secs(cache_config.fallback_ttl_secs),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.embedder.name()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embedding of entity content. The cache key is case-sensitive.
    pub async fn embed_text(&self, text: &str) -> (Vec<f32>, EmbeddingSource) {
        let key = fingerprint(text, Some(Purpose::Embedding.as_str()));
        self.embed_keyed(text, &key).await
    }

    /// Embedding of a search query. Case and surrounding whitespace are
    /// ignored for caching, and the query is embedded in normalized form.
    pub async fn embed_query(&self, query: &str) -> (Vec<f32>, EmbeddingSource) {
        let normalized = query.trim().to_lowercase();
        let key = normalized_fingerprint(&normalized, Some("query"));
        self.embed_keyed(&normalized, &key).await
    }

    async fn embed_keyed(&self, text: &str, key: &str) -> (Vec<f32>, EmbeddingSource) {
        let stale = match self.cache.get::<Vec<f32>>(key, Purpose::Embedding).await {
            Some(CacheLookup::Fresh(entry)) if entry.payload.len() == self.dimensions => {
                debug!(fingerprint = key, "embedding cache hit");
                return (entry.payload, EmbeddingSource::Cache);
            }
            Some(CacheLookup::Stale(entry)) if entry.payload.len() == self.dimensions => {
                Some(entry)
            }
            _ => None,
        };

        match self.call_provider(text).await {
            Ok(vector) => {
                self.cache
                    .put(key, Purpose::Embedding, &vector, CacheSource::Provider, self.ttl)
                    .await;
                (vector, EmbeddingSource::Provider)
            }
            Err(e) => {
                if let Some(entry) = stale {
                    warn!(provider = self.embedder.name(), error = %e, "embedding provider failed, serving stale cache entry");
                    return (entry.payload, EmbeddingSource::StaleCache);
                }
                warn!(provider = self.embedder.name(), error = %e, "embedding provider failed, using local hashing vector");
                let vector = hashed_embedding(text, self.dimensions);
                self.cache
                    .put(
                        key,
                        Purpose::Embedding,
                        &vector,
                        CacheSource::Fallback,
                        self.fallback_ttl,
                    )
                    .await;
                (vector, EmbeddingSource::Fallback)
            }
        }
    }

    async fn call_provider(&self, text: &str) -> IwResult<Vec<f32>> {
        let mut vector = tokio::time::timeout(self.timeout, self.embedder.embed(text))
            .await
            .map_err(|_| IwError::Embedding("embedding request timed out".into()))??;
        if vector.len() != self.dimensions {
            return Err(IwError::Embedding(format!(
                "expected {} dimensions, provider returned {}",
                self.dimensions,
                vector.len()
            )));
        }
        normalize(&mut vector);
        Ok(vector)
    }

    /// Recompute and persist the stored embedding for an entity.
    pub async fn refresh_entity(
        &self,
        user_id: &str,
        kind: EntityKind,
        id: Uuid,
        text: &str,
    ) -> IwResult<EmbeddingSource> {
        let (vector, source) = self.embed_text(text).await;
        if vector.iter().all(|v| *v == 0.0) {
            // Nothing to match against; keep the index free of zero vectors.
            self.vectors.delete(user_id, kind, id).await?;
            return Ok(source);
        }
        self.vectors.upsert(user_id, kind, id, &vector).await?;
        debug!(user_id, kind = %kind, id = %id, ?source, "entity embedding refreshed");
        Ok(source)
    }

    pub async fn remove_entity(&self, user_id: &str, kind: EntityKind, id: Uuid) -> IwResult<bool> {
        self.vectors.delete(user_id, kind, id).await
    }

    pub async fn nearest(
        &self,
        user_id: &str,
        kind: EntityKind,
        query: &[f32],
        min_score: f64,
        limit: usize,
    ) -> IwResult<Vec<(Uuid, f64)>> {
        self.vectors.search(user_id, kind, query, min_score, limit).await
    }
}

/// Scale to unit length; the zero vector is left unchanged.
fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
