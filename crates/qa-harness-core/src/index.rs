//! In-memory vector index: chunks paired with their embeddings.
//!
//! A [`VectorIndex`] is built for exactly one embedding model. Every entry
//! owns its chunk and its vector, so chunk↔vector pairing cannot drift,
//! and every vector has the same dimensionality.
//!
//! Ranking is brute-force cosine similarity. Results come back in strictly
//! descending score order; equal scores are ordered by ascending ordinal so
//! that a query is deterministic for a given index.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;

use crate::embedding::cosine_similarity;
use crate::models::Chunk;

/// Errors raised while constructing, persisting, or loading an index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("no index found at {0}")]
    NotFound(String),
    #[error("index at {location} is corrupt: {reason}")]
    Corrupt { location: String, reason: String },
    #[error("inconsistent index data: {0}")]
    Inconsistent(String),
    #[error("index I/O failed at {location}: {reason}")]
    Io { location: String, reason: String },
}

/// One chunk and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// The set of (chunk, vector) pairs for one knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Create an empty index for `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            dims: 0,
            built_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Build an index from parallel chunk and vector lists.
    ///
    /// # Errors
    ///
    /// [`IndexError::Inconsistent`] when the lists differ in length, a
    /// vector is empty, or vectors disagree on dimensionality.
    pub fn from_parts(
        model: impl Into<String>,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        let mut index = Self::new(model);
        index.extend(chunks, vectors)?;
        Ok(index)
    }

    /// Restore an index from already-validated persisted parts.
    pub(crate) fn restore(
        model: String,
        dims: usize,
        built_at: DateTime<Utc>,
        entries: Vec<IndexEntry>,
    ) -> Self {
        Self {
            model,
            dims,
            built_at,
            entries,
        }
    }

    /// Append chunks and their vectors. All-or-nothing: on error the index
    /// is left unchanged.
    pub fn extend(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<(), IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::Inconsistent(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let mut dims = self.dims;
        for v in &vectors {
            if v.is_empty() {
                return Err(IndexError::Inconsistent("empty embedding vector".to_string()));
            }
            if dims == 0 {
                dims = v.len();
            } else if v.len() != dims {
                return Err(IndexError::Inconsistent(format!(
                    "vector dimension {} does not match index dimension {}",
                    v.len(),
                    dims
                )));
            }
        }
        self.dims = dims;
        self.entries.extend(
            chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry { chunk, vector }),
        );
        Ok(())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Vector dimensionality, or 0 for an empty index.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    /// Ordinal the next appended chunk should receive.
    pub fn next_ordinal(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.chunk.ordinal + 1)
            .max()
            .unwrap_or(0)
    }

    /// Sorted distinct source ids.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.chunks().map(|c| c.source_id.clone()).collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// Look up a chunk by source id and ordinal.
    pub fn chunk(&self, source_id: &str, ordinal: usize) -> Option<&Chunk> {
        self.chunks()
            .find(|c| c.ordinal == ordinal && c.source_id == source_id)
    }

    /// Return the `k` chunks most similar to `query`.
    ///
    /// Sorted by descending score, ties broken by ascending ordinal.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let s = cosine_similarity(query, &e.vector);
                (i, if s.is_nan() { f32::NEG_INFINITY } else { s })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    self.entries[a.0]
                        .chunk
                        .ordinal
                        .cmp(&self.entries[b.0].chunk.ordinal)
                })
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect()
    }
}
