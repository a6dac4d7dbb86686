//! Concrete embedding providers and the embedding candidate list.
//!
//! Every provider implements [`qa_harness_core::embedding::EmbeddingProvider`]
//! for exactly one model identifier:
//! - **[`OpenAIEmbedder`]**: `POST {url}/v1/embeddings`.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama.
//! - **[`HashEmbedder`]**: offline FNV-1a feature hashing (`fnv1a-<dims>`).
//! - **`LocalEmbedder`**: fastembed, behind the `local-embeddings` feature.
//!
//! Providers only *classify* failures. Retry and backoff belong to the
//! vector store, which retries the whole embedding step.
//!
//! # Error classification
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → [`ProviderError::Transient`]
//! - HTTP 4xx other than 429 (unknown model, bad key) → [`ProviderError::Permanent`]
//! - Network errors and timeouts → [`ProviderError::Transient`]
//! - Missing API key, malformed response → [`ProviderError::Permanent`]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use qa_harness_core::embedding::{EmbeddingProvider, HashEmbedder, ProviderError};

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_HASH_DIMS: usize = 384;

/// Map a non-success HTTP status to a provider error.
pub fn classify_status(service: &str, status: reqwest::StatusCode, body: &str) -> ProviderError {
    let message = format!("{} API error {}: {}", service, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        ProviderError::Transient(message)
    } else {
        ProviderError::Permanent(message)
    }
}

/// Network-level failures are always worth another attempt.
pub fn classify_transport(service: &str, err: reqwest::Error) -> ProviderError {
    ProviderError::Transient(format!("{} request failed: {}", service, err))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn check_dims(model: &str, expected: Option<usize>, vectors: &[Vec<f32>]) -> Result<(), ProviderError> {
    if let Some(dims) = expected {
        if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
            return Err(ProviderError::Permanent(format!(
                "model {} returned {} dimensions, expected {}",
                model,
                v.len(),
                dims
            )));
        }
    }
    Ok(())
}

fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

// ============ OpenAI ============

/// Embedding model served by the OpenAI API (or a compatible endpoint).
///
/// Reads `OPENAI_API_KEY` at construction; a missing key surfaces as a
/// permanent error on first use so that the fallback chain can skip it.
pub struct OpenAIEmbedder {
    model: String,
    dims: Option<usize>,
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(model: &str, config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: model.to_string(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Permanent("OPENAI_API_KEY not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status("OpenAI", status, &text));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("invalid OpenAI response: {}", e)))?;
        let vectors = parse_openai_response(&json)?;
        check_dims(&self.model, self.dims, &vectors)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let invalid = |what: &str| ProviderError::Permanent(format!("invalid OpenAI response: {}", what));
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vector = item
            .get("embedding")
            .and_then(parse_vector)
            .ok_or_else(|| invalid("missing embedding"))?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedding model served by a local Ollama instance.
pub struct OllamaEmbedder {
    model: String,
    dims: Option<usize>,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(model: &str, config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: model.to_string(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string()),
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::Transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status("Ollama", status, &text));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("invalid Ollama response: {}", e)))?;
        let vectors = parse_ollama_response(&json)?;
        check_dims(&self.model, self.dims, &vectors)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|items| items.iter().map(parse_vector).collect::<Option<Vec<_>>>())
        .ok_or_else(|| {
            ProviderError::Permanent("invalid Ollama response: missing embeddings array".to_string())
        })
}

// ============ Local (fastembed) ============

/// Embedding model run in-process with fastembed.
///
/// The model is downloaded on first use and cached; after that no network
/// calls are made.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model: String,
    batch_size: usize,
    engine: Arc<tokio::sync::OnceCell<Arc<std::sync::Mutex<fastembed::TextEmbedding>>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(model: &str, config: &EmbeddingConfig) -> Result<Self> {
        fastembed_model(model)?;
        Ok(Self {
            model: model.to_string(),
            batch_size: config.batch_size,
            engine: Arc::new(tokio::sync::OnceCell::new()),
        })
    }

    async fn engine(&self) -> Result<Arc<std::sync::Mutex<fastembed::TextEmbedding>>, ProviderError> {
        let model = self.model.clone();
        self.engine
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || {
                    let kind = fastembed_model(&model)
                        .map_err(|e| ProviderError::Permanent(e.to_string()))?;
                    fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(kind))
                        .map(|m| Arc::new(std::sync::Mutex::new(m)))
                        .map_err(|e| {
                            ProviderError::Permanent(format!(
                                "failed to initialize local embedding model: {}",
                                e
                            ))
                        })
                })
                .await
                .map_err(|e| ProviderError::Permanent(e.to_string()))?
            })
            .await
            .cloned()
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let engine = self.engine().await?;
        let texts = texts.to_vec();
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || {
            let mut model = engine
                .lock()
                .map_err(|_| ProviderError::Permanent("local embedding model poisoned".to_string()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| ProviderError::Permanent(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| ProviderError::Permanent(e.to_string()))?
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
            other
        ),
    }
}

/// Instantiate one provider per configured model, in fallback order.
///
/// | `provider` | Candidates |
/// |------------|------------|
/// | `"disabled"` | none |
/// | `"openai"` | one [`OpenAIEmbedder`] per model |
/// | `"ollama"` | one [`OllamaEmbedder`] per model |
/// | `"hash"` | one [`HashEmbedder`] of `dims` (default 384) |
/// | `"local"` | one `LocalEmbedder` per model (feature `local-embeddings`) |
pub fn build_candidates(config: &EmbeddingConfig) -> Result<Vec<Arc<dyn EmbeddingProvider>>> {
    let mut out: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();
    match config.provider.as_str() {
        "disabled" => {}
        "openai" => {
            for model in &config.models {
                out.push(Arc::new(OpenAIEmbedder::new(model, config)?));
            }
        }
        "ollama" => {
            for model in &config.models {
                out.push(Arc::new(OllamaEmbedder::new(model, config)?));
            }
        }
        "hash" => {
            out.push(Arc::new(HashEmbedder::new(
                config.dims.unwrap_or(DEFAULT_HASH_DIMS),
            )));
        }
        #[cfg(feature = "local-embeddings")]
        "local" => {
            for model in &config.models {
                out.push(Arc::new(LocalEmbedder::new(model, config)?));
            }
        }
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        use reqwest::StatusCode;
        assert!(classify_status("OpenAI", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status("OpenAI", StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status("OpenAI", StatusCode::NOT_FOUND, "model").is_transient());
        assert!(!classify_status("OpenAI", StatusCode::UNAUTHORIZED, "key").is_transient());
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.25]]);
        let bad = serde_json::json!({"embeddings": [["x"]]});
        assert!(parse_ollama_response(&bad).is_err());
    }

    #[test]
    fn test_dims_check() {
        assert!(check_dims("m", Some(2), &[vec![1.0, 2.0]]).is_ok());
        assert!(check_dims("m", None, &[vec![1.0]]).is_ok());
        let err = check_dims("m", Some(3), &[vec![1.0]]).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_build_candidates() {
        let mut cfg = EmbeddingConfig::default();
        assert!(build_candidates(&cfg).unwrap().is_empty());

        cfg.provider = "hash".to_string();
        cfg.dims = Some(32);
        let c = build_candidates(&cfg).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].model_name(), "fnv1a-32");

        cfg.provider = "ollama".to_string();
        cfg.models = vec!["nomic-embed-text".to_string(), "all-minilm".to_string()];
        let names: Vec<String> = build_candidates(&cfg)
            .unwrap()
            .iter()
            .map(|p| p.model_name().to_string())
            .collect();
        assert_eq!(names, vec!["nomic-embed-text", "all-minilm"]);
    }

    #[tokio::test]
    async fn test_openai_without_key_is_permanent() {
        let embedder = OpenAIEmbedder {
            model: "text-embedding-3-small".to_string(),
            dims: None,
            url: OPENAI_URL.to_string(),
            api_key: None,
            client: reqwest::Client::new(),
        };
        let err = embedder.probe().await.unwrap_err();
        assert_eq!(err, ProviderError::Permanent("OPENAI_API_KEY not set".to_string()));
    }
}
