//! CLI command bodies.
//!
//! Each `run_*` function backs one `qah` subcommand. Machine-readable
//! results go to stdout as JSON; progress and warnings go through
//! `tracing` to stderr. A failed command prints its status-tagged error
//! JSON and then returns an error so the process exits non-zero.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use qa_harness_core::models::TestCase;
use qa_harness_core::validate::validate_element;

use crate::automation::build_script;
use crate::config::Config;
use crate::connector_fs::{read_files, scan_with_config};
use crate::fallback::ProviderChain;
use crate::generate::{build_generators, GenerationResult, TestCaseGenerator};
use crate::page::extract_selector_map;
use crate::rag::{RetrievedChunk, Retriever};
use crate::vectorstore::{BuildResult, StoreStatus, VectorStore};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn resolve_top_k(config: &Config, top_k: Option<usize>) -> Result<usize> {
    match top_k {
        Some(0) => bail!("--top-k must be >= 1"),
        Some(k) => Ok(k),
        None => Ok(config.retrieval.top_k),
    }
}

/// `qah build <dir>`: replace the knowledge base with the scanned directory.
pub async fn run_build(config: &Config, dir: &Path) -> Result<()> {
    let documents = scan_with_config(dir, &config.ingest)?;
    let store = VectorStore::from_config(config)?;
    let result = store.build(&documents).await;
    let failed = result.is_err();
    print_json(&BuildResult::from(result))?;
    if failed {
        bail!("knowledge base build failed; the previous index was left untouched");
    }
    Ok(())
}

/// `qah add <files…>`: append files to the knowledge base.
pub async fn run_add(config: &Config, files: &[PathBuf]) -> Result<()> {
    let documents = read_files(files)?;
    let store = VectorStore::from_config(config)?;
    let result = store.add(&documents).await;
    let failed = result.is_err();
    print_json(&BuildResult::from(result))?;
    if failed {
        bail!("adding documents failed; the previous index was left untouched");
    }
    Ok(())
}

#[derive(Serialize)]
struct InfoReport {
    index: StoreStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    load_error: Option<String>,
    embedding_provider: String,
    embedding_models: Vec<String>,
    generation_provider: String,
    generation_models: Vec<String>,
}

/// `qah info`: knowledge base and provider summary.
pub async fn run_info(config: &Config) -> Result<()> {
    let store = VectorStore::from_config(config)?;
    let load_error = store.load().await.err().map(|e| e.to_string());
    print_json(&InfoReport {
        index: store.status().await,
        load_error,
        embedding_provider: config.embedding.provider.clone(),
        embedding_models: config.embedding.models.clone(),
        generation_provider: config.generation.provider.clone(),
        generation_models: config.generation.models.clone(),
    })
}

#[derive(Serialize)]
struct SearchOutput {
    query: String,
    results: Vec<SearchLine>,
}

#[derive(Serialize)]
struct SearchLine {
    citation: String,
    score: f32,
    text: String,
}

impl From<RetrievedChunk> for SearchLine {
    fn from(chunk: RetrievedChunk) -> Self {
        Self {
            citation: chunk.citation(),
            score: chunk.score,
            text: chunk.text,
        }
    }
}

/// `qah search <query>`: top-k passages.
pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let k = resolve_top_k(config, top_k)?;
    let retriever = Retriever::new(Arc::new(VectorStore::from_config(config)?));
    let passages = retriever.retrieve(query, k).await?;
    print_json(&SearchOutput {
        query: query.to_string(),
        results: passages.into_iter().map(SearchLine::from).collect(),
    })
}

/// `qah generate <query>`: grounded, validated test cases.
pub async fn run_generate(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let k = resolve_top_k(config, top_k)?;
    let store = Arc::new(VectorStore::from_config(config)?);
    let generators = Arc::new(ProviderChain::new(
        "generation",
        build_generators(&config.generation)?,
    ));
    let generator = TestCaseGenerator::new(Arc::new(Retriever::new(store)), generators);

    let result = generator.generate(query, k).await;
    let failed = result.is_err();
    print_json(&GenerationResult::from(result))?;
    if failed {
        bail!("test case generation failed");
    }
    Ok(())
}

/// `qah selectors <page.html>`: the page's selector map.
pub fn run_selectors(page: &Path) -> Result<()> {
    let html = std::fs::read_to_string(page)
        .with_context(|| format!("Failed to read page: {}", page.display()))?;
    print_json(&extract_selector_map(&html))
}

/// Test cases in a file: a single object, an array, or saved `qah generate`
/// output (`{"test_cases": [...]}`).
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read test cases: {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let elements = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("test_cases") {
            Some(serde_json::Value::Array(items)) => items,
            Some(_) => bail!("test_cases must be an array in {}", path.display()),
            None => vec![serde_json::Value::Object(obj)],
        },
        _ => bail!("expected a test case object or array in {}", path.display()),
    };

    elements
        .iter()
        .enumerate()
        .map(|(i, v)| {
            validate_element(v).map_err(|reason| anyhow::anyhow!("test case {}: {}", i, reason))
        })
        .collect()
}

/// `qah script <test_cases.json> --page <page.html>`.
pub fn run_script(
    config: &Config,
    test_cases: &Path,
    page: &Path,
    id: Option<&str>,
    base_url: Option<&str>,
    json: bool,
) -> Result<()> {
    let cases = load_test_cases(test_cases)?;
    let test_case = match id {
        Some(id) => cases
            .iter()
            .find(|tc| tc.id == id)
            .with_context(|| format!("No test case with Test_ID '{}'", id))?,
        None => cases.first().context("No test cases in file")?,
    };

    let html = std::fs::read_to_string(page)
        .with_context(|| format!("Failed to read page: {}", page.display()))?;
    let map = extract_selector_map(&html);
    let report = build_script(
        test_case,
        &map,
        config.selectors.tie_break,
        base_url.unwrap_or(&config.script.base_url),
    );

    if json {
        print_json(&report)
    } else {
        print!("{}", report.script);
        Ok(())
    }
}
