//! Persistence abstraction for the vector index.
//!
//! A knowledge base is persisted as one artifact holding the whole
//! [`VectorIndex`]; there is no record-level persistence. The
//! [`IndexRepository`] trait lets the store swap backends: the app crate
//! writes files atomically, [`memory::InMemoryRepository`] keeps bytes in
//! memory for tests and embedded use.
//!
//! Both backends share the [`codec`] so that corruption is detected the same
//! way everywhere.

pub mod codec;
pub mod memory;

use async_trait::async_trait;

use crate::index::{IndexError, VectorIndex};

/// Abstract storage for a single persisted [`VectorIndex`].
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`location`](IndexRepository::location) | Human-readable location of the artifact |
/// | [`load`](IndexRepository::load) | Read and validate the artifact |
/// | [`save`](IndexRepository::save) | Replace the artifact wholesale |
#[async_trait]
pub trait IndexRepository: Send + Sync {
    /// Stable, human-readable location (a path, a URI, a label).
    fn location(&self) -> String;

    /// Read the persisted index.
    ///
    /// # Errors
    ///
    /// [`IndexError::NotFound`] when nothing was persisted yet,
    /// [`IndexError::Corrupt`] when the artifact cannot be decoded.
    async fn load(&self) -> Result<VectorIndex, IndexError>;

    /// Replace the persisted index. Readers of the artifact must observe
    /// either the old or the new index, never a partial write.
    async fn save(&self, index: &VectorIndex) -> Result<(), IndexError>;
}
