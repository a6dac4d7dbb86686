//! Retriever: top-k passages with provenance, formatted for prompts.
//!
//! A thin layer over [`VectorStore::query`]. Every passage carries its
//! source id and chunk ordinal so a generated test case can cite it as
//! `"<source_id> (chunk_<ordinal>)"`, and [`Retriever::evidence`] can later
//! resolve those citations back to the exact chunk text.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::vectorstore::{StoreError, VectorStore};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("knowledge base unavailable: {0}")]
    KnowledgeBaseUnavailable(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RetrievalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IndexUnavailable(reason) => RetrievalError::KnowledgeBaseUnavailable(reason),
            other => RetrievalError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub source_id: String,
    pub ordinal: usize,
    pub text: String,
    pub score: f32,
}

impl RetrievedChunk {
    pub fn citation(&self) -> String {
        format!("{} (chunk_{})", self.source_id, self.ordinal)
    }
}

/// Render passages as delimited, citable blocks.
pub fn format_for_prompt(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("=== SOURCE: {} ===\n{}\n=== END ===", c.citation(), c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Split `"checkout.md (chunk_3)"` into `("checkout.md", 3)`.
pub fn parse_citation(citation: &str) -> Option<(&str, usize)> {
    let (source, rest) = citation.trim().rsplit_once("(chunk_")?;
    let ordinal = rest.strip_suffix(')')?.trim().parse().ok()?;
    let source = source.trim_end();
    if source.is_empty() {
        return None;
    }
    Some((source, ordinal))
}

/// Chunk text backing one citation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub citation: String,
    pub source_id: String,
    pub ordinal: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvidenceReport {
    pub found: Vec<Evidence>,
    /// Citations that did not parse or name no resident chunk.
    pub unresolved: Vec<String>,
}

pub struct Retriever {
    store: Arc<VectorStore>,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// The `top_k` passages most similar to `query`, best first.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let hits = self.store.query(query, top_k).await?;
        debug!(query, hits = hits.len(), "retrieved passages");
        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                source_id: hit.chunk.source_id,
                ordinal: hit.chunk.ordinal,
                text: hit.chunk.text,
                score: hit.score,
            })
            .collect())
    }

    /// Resolve `Grounded_In` citations to the exact chunks they name.
    pub async fn evidence(&self, grounded_in: &[String]) -> Result<EvidenceReport, RetrievalError> {
        self.store.ensure_loaded().await?;

        let mut report = EvidenceReport::default();
        for citation in grounded_in {
            let Some((source, ordinal)) = parse_citation(citation) else {
                warn!(citation = %citation, "unparsable citation");
                report.unresolved.push(citation.clone());
                continue;
            };
            match self.store.chunk(source, ordinal).await {
                Some(chunk) => report.found.push(Evidence {
                    citation: citation.clone(),
                    source_id: chunk.source_id,
                    ordinal: chunk.ordinal,
                    text: chunk.text,
                }),
                None => {
                    warn!(citation = %citation, "citation names no indexed chunk");
                    report.unresolved.push(citation.clone());
                }
            }
        }
        Ok(report)
    }
}
