//! Filesystem ingestion: walk a directory, normalize every matching file.
//!
//! Source ids are paths relative to the scanned root (forward slashes), and
//! documents come back sorted by source id so chunk ordinals are stable
//! across rebuilds of the same tree.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use qa_harness_core::models::Document;

use crate::config::IngestConfig;
use crate::extract::normalize;

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Scan `root` with the include/exclude globs from `[ingest]`.
pub fn scan_with_config(root: &Path, config: &IngestConfig) -> Result<Vec<Document>> {
    scan_directory(root, &config.include_globs, &config.exclude_globs)
}

pub fn scan_directory(root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<Document>> {
    if !root.is_dir() {
        bail!("Document directory does not exist: {}", root.display());
    }

    let include_set = build_globset(include)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(exclude.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut documents = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            debug!(file = %rel_str, "skipped by globs");
            continue;
        }

        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        documents.push(normalize_as(&bytes, path, rel_str));
    }

    documents.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    info!(root = %root.display(), documents = documents.len(), "scanned documents");
    Ok(documents)
}

/// Read and normalize individual files; the source id is the file name.
pub fn read_files(paths: &[impl AsRef<Path>]) -> Result<Vec<Document>> {
    paths
        .iter()
        .map(|p| {
            let path = p.as_ref();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .with_context(|| format!("Not a file path: {}", path.display()))?;
            let bytes =
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(normalize(&bytes, &name))
        })
        .collect()
}

/// Extraction picks the format from the real path, the id stays relative.
fn normalize_as(bytes: &[u8], path: &Path, source_id: String) -> Document {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut doc = normalize(bytes, &filename);
    doc.source_id = source_id;
    doc
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "z.md", "last");
        write(tmp.path(), "docs/a.txt", "first");
        write(tmp.path(), "docs/data.json", r#"{"k": "v"}"#);
        write(tmp.path(), "image.png", "binary");
        write(tmp.path(), "node_modules/pkg/readme.md", "vendored");
        write(tmp.path(), "drafts/wip.md", "draft");

        let docs = scan_directory(
            tmp.path(),
            &IngestConfig::default().include_globs,
            &["drafts/**".to_string()],
        )
        .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["docs/a.txt", "docs/data.json", "z.md"]);
        assert_eq!(docs[1].text, "k: v");
    }

    #[test]
    fn test_missing_root_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_directory(&tmp.path().join("nope"), &[], &[]).is_err());
    }

    #[test]
    fn test_read_files_uses_file_name() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "sub/notes.md", "hello");
        let docs = read_files(&[tmp.path().join("sub/notes.md")]).unwrap();
        assert_eq!(docs[0].source_id, "notes.md");
        assert_eq!(docs[0].text, "hello");
    }
}
