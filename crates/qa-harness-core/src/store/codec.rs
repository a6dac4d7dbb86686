//! On-disk representation of a [`VectorIndex`].
//!
//! JSON envelope with a format version, the model identifier, the
//! dimensionality, the build timestamp, a SHA-256 checksum, and one entry per
//! chunk. Vectors are base64-encoded little-endian `f32` bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::index::{IndexEntry, IndexError, VectorIndex};
use crate::models::Chunk;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    format_version: u32,
    model: String,
    dims: usize,
    built_at: DateTime<Utc>,
    checksum: String,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    source_id: String,
    ordinal: usize,
    text: String,
    vector: String,
}

/// Serialize an index into its persisted byte form.
pub fn encode_index(index: &VectorIndex) -> Result<Vec<u8>, IndexError> {
    let blobs: Vec<Vec<u8>> = index.entries().iter().map(|e| vec_to_blob(&e.vector)).collect();
    let checksum = checksum(
        index.model(),
        index.entries().iter().map(|e| &e.chunk).zip(blobs.iter()),
    );

    let persisted = PersistedIndex {
        format_version: FORMAT_VERSION,
        model: index.model().to_string(),
        dims: index.dims(),
        built_at: index.built_at(),
        checksum,
        entries: index
            .entries()
            .iter()
            .zip(blobs.iter())
            .map(|(e, blob)| PersistedEntry {
                source_id: e.chunk.source_id.clone(),
                ordinal: e.chunk.ordinal,
                text: e.chunk.text.clone(),
                vector: STANDARD.encode(blob),
            })
            .collect(),
    };

    serde_json::to_vec(&persisted).map_err(|e| IndexError::Inconsistent(e.to_string()))
}

/// Decode and validate persisted bytes read from `location`.
///
/// Every structural problem is reported as [`IndexError::Corrupt`].
pub fn decode_index(bytes: &[u8], location: &str) -> Result<VectorIndex, IndexError> {
    let corrupt = |reason: String| IndexError::Corrupt {
        location: location.to_string(),
        reason,
    };

    let persisted: PersistedIndex =
        serde_json::from_slice(bytes).map_err(|e| corrupt(format!("unreadable payload: {}", e)))?;

    if persisted.format_version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported format version {}",
            persisted.format_version
        )));
    }
    if persisted.model.trim().is_empty() {
        return Err(corrupt("missing model identifier".to_string()));
    }

    let mut blobs = Vec::with_capacity(persisted.entries.len());
    let mut entries = Vec::with_capacity(persisted.entries.len());
    for (i, pe) in persisted.entries.into_iter().enumerate() {
        let blob = STANDARD
            .decode(pe.vector.as_bytes())
            .map_err(|e| corrupt(format!("entry {}: undecodable vector: {}", i, e)))?;
        if blob.is_empty() || blob.len() % 4 != 0 || blob.len() / 4 != persisted.dims {
            return Err(corrupt(format!(
                "entry {}: vector has {} bytes, expected {} dimensions",
                i,
                blob.len(),
                persisted.dims
            )));
        }
        let vector = blob_to_vec(&blob);
        entries.push(IndexEntry {
            chunk: Chunk {
                source_id: pe.source_id,
                ordinal: pe.ordinal,
                text: pe.text,
            },
            vector,
        });
        blobs.push(blob);
    }

    let expected = checksum(
        &persisted.model,
        entries.iter().map(|e| &e.chunk).zip(blobs.iter()),
    );
    if expected != persisted.checksum {
        return Err(corrupt("checksum mismatch".to_string()));
    }

    Ok(VectorIndex::restore(
        persisted.model,
        persisted.dims,
        persisted.built_at,
        entries,
    ))
}

fn checksum<'a>(model: &str, entries: impl Iterator<Item = (&'a Chunk, &'a Vec<u8>)>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    for (chunk, blob) in entries {
        hasher.update([0u8]);
        hasher.update(chunk.source_id.as_bytes());
        hasher.update([0u8]);
        hasher.update((chunk.ordinal as u64).to_le_bytes());
        hasher.update(chunk.text.as_bytes());
        hasher.update([0u8]);
        hasher.update(blob);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VectorIndex {
        VectorIndex::from_parts(
            "text-embedding-3-small",
            vec![
                Chunk {
                    source_id: "a.md".into(),
                    ordinal: 0,
                    text: "Checkout allows discount codes".into(),
                },
                Chunk {
                    source_id: "b.md".into(),
                    ordinal: 1,
                    text: "Errors show in red banner".into(),
                },
            ],
            vec![vec![0.5, -1.25, 3.0], vec![0.0, 1.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn decode_restores_encoded_index() {
        let index = sample();
        let bytes = encode_index(&index).unwrap();
        let restored = decode_index(&bytes, "mem").unwrap();
        assert_eq!(restored, index);
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = decode_index(b"not json", "kb.json").unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn blank_model_is_corrupt() {
        let bytes = encode_index(&sample()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["model"] = serde_json::json!("");
        let err = decode_index(&serde_json::to_vec(&value).unwrap(), "kb.json").unwrap_err();
        match err {
            IndexError::Corrupt { reason, .. } => assert!(reason.contains("model")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn tampered_text_fails_checksum() {
        let bytes = encode_index(&sample()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["entries"][0]["text"] = serde_json::json!("tampered");
        let err = decode_index(&serde_json::to_vec(&value).unwrap(), "kb.json").unwrap_err();
        match err {
            IndexError::Corrupt { reason, .. } => assert_eq!(reason, "checksum mismatch"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn wrong_dimension_is_corrupt() {
        let bytes = encode_index(&sample()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["dims"] = serde_json::json!(4);
        assert!(decode_index(&serde_json::to_vec(&value).unwrap(), "kb.json").is_err());
    }
}
