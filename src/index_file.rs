//! File-backed [`IndexRepository`].
//!
//! The index lives in one JSON file. Saves write a temp file in the same
//! directory, flush and sync it, then rename it over the old artifact, so a
//! reader sees either the previous index or the new one. A failed save
//! leaves the previous file untouched.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};

use qa_harness_core::index::{IndexError, VectorIndex};
use qa_harness_core::store::codec::{decode_index, encode_index};
use qa_harness_core::store::IndexRepository;

pub struct FileIndexRepository {
    path: PathBuf,
}

impl FileIndexRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, err: impl std::fmt::Display) -> IndexError {
        IndexError::Io {
            location: self.location(),
            reason: err.to_string(),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl IndexRepository for FileIndexRepository {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<VectorIndex, IndexError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::NotFound(self.location()))
            }
            Err(e) => return Err(self.io_error(e)),
        };
        decode_index(&bytes, &self.location())
    }

    async fn save(&self, index: &VectorIndex) -> Result<(), IndexError> {
        let bytes = encode_index(index)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| self.io_error(e))?
            .map_err(|e| self.io_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_harness_core::models::Chunk;
    use tempfile::TempDir;

    fn index(text: &str) -> VectorIndex {
        VectorIndex::from_parts(
            "fnv1a-8",
            vec![Chunk {
                source_id: "a.md".into(),
                ordinal: 0,
                text: text.into(),
            }],
            vec![vec![0.5; 8]],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let repo = FileIndexRepository::new(tmp.path().join("kb.json"));
        assert!(matches!(repo.load().await, Err(IndexError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_save_creates_parent_and_replaces() {
        let tmp = TempDir::new().unwrap();
        let repo = FileIndexRepository::new(tmp.path().join("nested/dir/kb.json"));

        repo.save(&index("first")).await.unwrap();
        repo.save(&index("second")).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded.entries()[0].chunk.text, "second");
        // Only the artifact remains; temp files were renamed away.
        let names: Vec<_> = std::fs::read_dir(tmp.path().join("nested/dir"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.json");
        std::fs::write(&path, "{ truncated").unwrap();
        let repo = FileIndexRepository::new(&path);
        assert!(matches!(repo.load().await, Err(IndexError::Corrupt { .. })));
    }
}
