//! Embedding provider interface, HTTP client, and per-job memo cache.
//!
//! Vectors returned by any `Embedder` are L2-normalized, so cosine
//! similarity reduces to a dot product downstream.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::EmbeddingPolicy;
use crate::types::EmbedError;

/// Embedding provider contract: texts in, L2-normalized vectors out.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// OpenAI-compatible embeddings endpoint client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn from_policy(policy: &EmbeddingPolicy) -> Option<Self> {
        let api_key = std::env::var(&policy.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())?;
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .build()
            .ok()?;
        tracing::info!(
            "Embedding client initialized: model={} dimension={}",
            policy.model,
            policy.dimension
        );
        Some(Self {
            client,
            api_key,
            base_url: policy.base_url.trim_end_matches('/').to_string(),
            model: policy.model.clone(),
            dimension: policy.dimension,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::RequestFailed(format!("{status}: {body}")));
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbedError::Malformed(e.to_string()))?;
        let data = resp_json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| EmbedError::Malformed("missing data array".to_string()))?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let raw = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| EmbedError::Malformed("missing embedding".to_string()))?;
            let mut vector: Vec<f32> = raw
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            l2_normalize(&mut vector);
            vectors.push(vector);
        }
        if vectors.len() != texts.len() {
            return Err(EmbedError::Malformed(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Deterministic embedder for tests: character trigram hashing into a
/// fixed-dimension normalized vector. Similar strings land close together,
/// identical strings land identically, and there is no network.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let mut vector = vec![0.0f32; self.dimension];
            let lowered = text.to_lowercase();
            let chars: Vec<char> = lowered.chars().collect();
            for window in chars.windows(3.min(chars.len().max(1))) {
                let gram: String = window.iter().collect();
                let digest = Sha256::digest(gram.as_bytes());
                let bucket =
                    u64::from_le_bytes(digest[..8].try_into().unwrap()) as usize % self.dimension;
                vector[bucket] += 1.0;
            }
            l2_normalize(&mut vector);
            out.push(vector);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash-trigram"
    }
}

/// Memoizing wrapper: text → vector, keyed by content hash. Used by the
/// semantic merge so repeated canonical texts embed once per process.
pub struct CachingEmbedder {
    inner: Arc<dyn Embedder>,
    cache: DashMap<String, Vec<f32>>,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    fn key(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl Embedder for CachingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut misses = Vec::new();
        let mut miss_indices = Vec::new();
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(&Self::key(text)) {
                Some(hit) => out.push(Some(hit.clone())),
                None => {
                    out.push(None);
                    misses.push(text.clone());
                    miss_indices.push(i);
                }
            }
        }

        if !misses.is_empty() {
            let fresh = self.inner.embed(&misses).await?;
            for (slot, vector) in miss_indices.iter().zip(fresh) {
                self.cache.insert(Self::key(&texts[*slot]), vector.clone());
                out[*slot] = Some(vector);
            }
        }

        Ok(out.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(32);
        let texts = vec!["machine learning".to_string(), "machine learning".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors[0], vectors[1]);
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_are_closer_than_dissimilar() {
        let embedder = HashEmbedder::new(64);
        let texts = vec![
            "neural network".to_string(),
            "neural networks".to_string(),
            "zebrafish habitat".to_string(),
        ];
        let v = embedder.embed(&texts).await.unwrap();
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&v[0], &v[1]) > dot(&v[0], &v[2]));
    }

    #[tokio::test]
    async fn caching_embedder_memoizes() {
        let inner = Arc::new(HashEmbedder::new(16));
        let cache = CachingEmbedder::new(inner);
        let texts = vec!["a".to_string(), "b".to_string()];
        let first = cache.embed(&texts).await.unwrap();
        assert_eq!(cache.cached_count(), 2);
        let second = cache.embed(&texts).await.unwrap();
        assert_eq!(first, second);
    }
}
