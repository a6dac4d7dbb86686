//! The vector index store: build, load, query, and add.
//!
//! [`VectorStore`] owns the single resident [`VectorIndex`] of the process.
//! Everything that swaps the resident index (`build`, `add`, `load`) is
//! serialized by an internal mutex. The resident index is an `Arc` swapped
//! in only after the new index has been persisted, so a query never observes a half-built index and a failed
//! build leaves both the resident index and the persisted file as they were.
//!
//! # Retry
//!
//! Transient embedding failures retry the *whole* embedding step (all
//! batches), sequentially, up to [`RetryPolicy::max_attempts`] attempts in
//! total. The delay before attempt `n + 1` is `base_delay * 2^(n - 1)`.
//! Permanent failures are returned immediately.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use qa_harness_core::chunk::{chunk_documents, ChunkingParams};
use qa_harness_core::embedding::{EmbeddingProvider, ProviderError};
use qa_harness_core::index::{IndexError, ScoredChunk, VectorIndex};
use qa_harness_core::models::{Chunk, Document};
use qa_harness_core::store::IndexRepository;

use crate::config::Config;
use crate::embedding::build_candidates;
use crate::fallback::ProviderChain;
use crate::index_file::FileIndexRepository;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("no knowledge base available: {0}")]
    IndexUnavailable(String),
    #[error("no indexable content: every document was empty")]
    NothingToIndex,
}

/// Sequential retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(2000))
    }
}

/// What a successful `build` or `add` produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildSummary {
    pub model: String,
    /// Chunks produced by this call.
    pub chunk_count: usize,
    /// Distinct sources that produced chunks in this call.
    pub distinct_sources: usize,
    /// Size of the index after this call.
    pub total_chunks: usize,
    /// Sorted distinct sources of the whole index.
    pub sources: Vec<String>,
    pub skipped_documents: Vec<String>,
    pub index_location: String,
}

/// Status-tagged build outcome for JSON output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BuildResult {
    Ok(BuildSummary),
    Error { message: String },
}

impl From<Result<BuildSummary, StoreError>> for BuildResult {
    fn from(result: Result<BuildSummary, StoreError>) -> Self {
        match result {
            Ok(summary) => BuildResult::Ok(summary),
            Err(e) => BuildResult::Error {
                message: e.to_string(),
            },
        }
    }
}

/// Snapshot of the store for health checks and `qah info`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub resident: bool,
    pub location: String,
    /// Embedding model selected for this session, once selection happened.
    pub active_model: Option<String>,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub chunk_count: usize,
    pub sources: Vec<String>,
    pub built_at: Option<String>,
}

pub struct VectorStore {
    repository: Arc<dyn IndexRepository>,
    embedders: Arc<ProviderChain<dyn EmbeddingProvider>>,
    chunking: ChunkingParams,
    batch_size: usize,
    retry: RetryPolicy,
    resident: RwLock<Option<Arc<VectorIndex>>>,
    writer: Mutex<()>,
}

impl VectorStore {
    pub fn new(
        repository: Arc<dyn IndexRepository>,
        embedders: Arc<ProviderChain<dyn EmbeddingProvider>>,
        chunking: ChunkingParams,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            embedders,
            chunking,
            batch_size: batch_size.max(1),
            retry,
            resident: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    /// Wire a store from configuration: file repository at `[index].path`,
    /// embedding candidates from `[embedding]`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let candidates = build_candidates(&config.embedding)?;
        Ok(Self::new(
            Arc::new(FileIndexRepository::new(&config.index.path)),
            Arc::new(ProviderChain::new("embedding", candidates)),
            config.chunking.params()?,
            config.embedding.batch_size,
            RetryPolicy::new(
                config.embedding.max_attempts,
                Duration::from_millis(config.embedding.base_delay_ms),
            ),
        ))
    }

    pub fn location(&self) -> String {
        self.repository.location()
    }

    /// The resident index, without loading.
    pub async fn resident(&self) -> Option<Arc<VectorIndex>> {
        self.resident.read().await.clone()
    }

    async fn swap(&self, index: Arc<VectorIndex>) {
        *self.resident.write().await = Some(index);
    }

    /// Chunk, embed, persist, and swap in a brand-new index.
    ///
    /// On any failure the previously persisted index and the resident index
    /// are left untouched.
    pub async fn build(&self, documents: &[Document]) -> Result<BuildSummary, StoreError> {
        let _guard = self.writer.lock().await;
        self.build_locked(documents).await
    }

    async fn build_locked(&self, documents: &[Document]) -> Result<BuildSummary, StoreError> {
        let output = chunk_documents(documents, &self.chunking, 0);
        for skipped in &output.skipped {
            warn!(source = %skipped, "skipping document with no text");
        }
        if output.chunks.is_empty() {
            return Err(StoreError::NothingToIndex);
        }

        let provider = self.embedders.active().await?;
        info!(
            model = provider.model_name(),
            documents = documents.len(),
            chunks = output.chunks.len(),
            "building index"
        );
        let texts: Vec<String> = output.chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_with_retry(provider.as_ref(), &texts).await?;

        let chunked_sources = output.chunked_sources();
        let chunk_count = output.chunks.len();
        let index = VectorIndex::from_parts(provider.model_name(), output.chunks, vectors)?;
        self.repository.save(&index).await?;

        let summary = BuildSummary {
            model: index.model().to_string(),
            chunk_count,
            distinct_sources: chunked_sources.len(),
            total_chunks: index.len(),
            sources: index.sources(),
            skipped_documents: output.skipped,
            index_location: self.location(),
        };
        self.swap(Arc::new(index)).await;
        info!(
            chunks = summary.total_chunks,
            sources = summary.distinct_sources,
            location = %summary.index_location,
            "index built"
        );
        Ok(summary)
    }

    /// Read the persisted index and make it resident.
    ///
    /// Requires a usable embedding model: with every candidate exhausted the
    /// index could never be queried, so it is not loaded.
    pub async fn load(&self) -> Result<Arc<VectorIndex>, StoreError> {
        self.load_from(self.repository.as_ref()).await
    }

    /// Read an index from another repository and make it resident.
    /// Later writes still go to this store's own repository.
    pub async fn load_from(
        &self,
        repository: &dyn IndexRepository,
    ) -> Result<Arc<VectorIndex>, StoreError> {
        let _guard = self.writer.lock().await;
        self.load_locked(repository).await
    }

    async fn load_locked(
        &self,
        repository: &dyn IndexRepository,
    ) -> Result<Arc<VectorIndex>, StoreError> {
        self.embedders.active().await?;
        let index = Arc::new(repository.load().await?);
        info!(
            model = index.model(),
            chunks = index.len(),
            location = %repository.location(),
            "index loaded"
        );
        self.swap(Arc::clone(&index)).await;
        Ok(index)
    }

    /// The resident index, attempting one implicit load when none is resident.
    ///
    /// # Errors
    ///
    /// [`StoreError::Provider`] when no embedding model is usable,
    /// [`StoreError::IndexUnavailable`] when the implicit load fails.
    pub async fn ensure_loaded(&self) -> Result<Arc<VectorIndex>, StoreError> {
        if let Some(index) = self.resident().await {
            return Ok(index);
        }
        let _guard = self.writer.lock().await;
        // A build or load may have finished while we waited.
        if let Some(index) = self.resident().await {
            return Ok(index);
        }
        self.embedders.active().await?;
        debug!(location = %self.location(), "no resident index, loading");
        self.load_locked(self.repository.as_ref())
            .await
            .map_err(|e| StoreError::IndexUnavailable(e.to_string()))
    }

    /// Return the `k` chunks most similar to `text`, embedded with the
    /// index's own model.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let index = self.ensure_loaded().await?;
        let provider = self.embedders.provider_for(index.model()).await?;
        let vectors = self
            .embed_with_retry(provider.as_ref(), &[text.to_string()])
            .await?;
        let query = vectors.into_iter().next().ok_or_else(|| {
            StoreError::Provider(ProviderError::Permanent("empty embedding response".to_string()))
        })?;
        Ok(index.top_k(&query, k))
    }

    /// Append documents to the resident index with its model and re-persist.
    /// Builds a new index when none exists yet.
    pub async fn add(&self, documents: &[Document]) -> Result<BuildSummary, StoreError> {
        let _guard = self.writer.lock().await;

        let current = match self.resident().await {
            Some(index) => index,
            None => match self.load_locked(self.repository.as_ref()).await {
                Ok(index) => index,
                Err(StoreError::Index(IndexError::NotFound(_))) => {
                    info!("no existing index, building a new one");
                    return self.build_locked(documents).await;
                }
                Err(e) => return Err(e),
            },
        };

        let output = chunk_documents(documents, &self.chunking, current.next_ordinal());
        for skipped in &output.skipped {
            warn!(source = %skipped, "skipping document with no text");
        }
        if output.chunks.is_empty() {
            return Err(StoreError::NothingToIndex);
        }

        let provider = self.embedders.provider_for(current.model()).await?;
        let texts: Vec<String> = output.chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_with_retry(provider.as_ref(), &texts).await?;

        let chunked_sources = output.chunked_sources();
        let chunk_count = output.chunks.len();
        let mut next = (*current).clone();
        next.extend(output.chunks, vectors)?;
        self.repository.save(&next).await?;

        let summary = BuildSummary {
            model: next.model().to_string(),
            chunk_count,
            distinct_sources: chunked_sources.len(),
            total_chunks: next.len(),
            sources: next.sources(),
            skipped_documents: output.skipped,
            index_location: self.location(),
        };
        self.swap(Arc::new(next)).await;
        info!(added = chunk_count, total = summary.total_chunks, "documents added");
        Ok(summary)
    }

    /// Look up a resident chunk by source id and ordinal.
    pub async fn chunk(&self, source_id: &str, ordinal: usize) -> Option<Chunk> {
        self.resident()
            .await
            .and_then(|index| index.chunk(source_id, ordinal).cloned())
    }

    pub async fn status(&self) -> StoreStatus {
        let resident = self.resident().await;
        StoreStatus {
            resident: resident.is_some(),
            location: self.location(),
            active_model: self.embedders.selected_model(),
            model: resident.as_ref().map(|i| i.model().to_string()),
            dims: resident.as_ref().map(|i| i.dims()),
            chunk_count: resident.as_ref().map_or(0, |i| i.len()),
            sources: resident.as_ref().map(|i| i.sources()).unwrap_or_default(),
            built_at: resident.as_ref().map(|i| i.built_at().to_rfc3339()),
        }
    }

    async fn embed_with_retry(
        &self,
        provider: &dyn EmbeddingProvider,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut attempt = 1;
        loop {
            match self.embed_all(provider, texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient embedding failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn embed_all(
        &self,
        provider: &dyn EmbeddingProvider,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = provider.embed(batch).await?;
            if embedded.len() != batch.len() {
                return Err(ProviderError::Permanent(format!(
                    "model {} returned {} vectors for {} texts",
                    provider.model_name(),
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}
