//! In-memory [`IndexRepository`] for tests and embedded use.
//!
//! Keeps the encoded bytes rather than the live index so that load goes
//! through the same decoding and validation as the file backend.

use std::sync::RwLock;

use async_trait::async_trait;

use super::codec::{decode_index, encode_index};
use super::IndexRepository;
use crate::index::{IndexError, VectorIndex};

pub struct InMemoryRepository {
    label: String,
    bytes: RwLock<Option<Vec<u8>>>,
}

impl InMemoryRepository {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            bytes: RwLock::new(None),
        }
    }

    /// Raw persisted bytes, if anything was saved.
    pub fn raw(&self) -> Option<Vec<u8>> {
        self.bytes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Overwrite the persisted bytes directly.
    pub fn put_raw(&self, bytes: Vec<u8>) {
        *self
            .bytes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(bytes);
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl IndexRepository for InMemoryRepository {
    fn location(&self) -> String {
        format!("memory://{}", self.label)
    }

    async fn load(&self) -> Result<VectorIndex, IndexError> {
        match self.raw() {
            Some(bytes) => decode_index(&bytes, &self.location()),
            None => Err(IndexError::NotFound(self.location())),
        }
    }

    async fn save(&self, index: &VectorIndex) -> Result<(), IndexError> {
        let bytes = encode_index(index)?;
        self.put_raw(bytes);
        Ok(())
    }
}
