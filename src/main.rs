//! # QA Harness CLI (`qah`)
//!
//! Builds a document knowledge base, generates grounded test cases from it,
//! and turns test cases into Selenium scripts for a captured page.
//!
//! ## Usage
//!
//! ```bash
//! qah --config ./config/qah.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qah build <dir>` | Replace the knowledge base with the documents under `<dir>` |
//! | `qah add <files…>` | Append files to the knowledge base |
//! | `qah info` | Show knowledge base and provider status |
//! | `qah search "<query>"` | Top-k passages with citations |
//! | `qah generate "<query>"` | Generate and validate test cases |
//! | `qah selectors <page.html>` | Extract the page's selector map |
//! | `qah script <cases.json> --page <page.html>` | Selenium script for one test case |
//! | `qah serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! qah build ./docs
//! qah search "discount codes" --top-k 3
//! qah generate "checkout discount codes" > cases.json
//! qah script cases.json --page ./pages/checkout.html --id TC-001 > test_tc_001.py
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use qa_harness::{commands, config, server};

/// QA Harness: grounded test-case generation with selector-resolved scripts.
#[derive(Parser)]
#[command(
    name = "qah",
    about = "QA Harness: grounded test-case generation with selector-resolved automation scripts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/qah.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a new knowledge base from a directory of documents.
    ///
    /// Scans with `[ingest]` globs, chunks, embeds, and atomically replaces
    /// the index at `[index].path`. A failed build leaves the old index.
    Build {
        /// Directory to scan.
        dir: PathBuf,
    },

    /// Add files to the knowledge base, embedding with its existing model.
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show knowledge base status and configured providers.
    Info,

    /// Retrieve the passages most similar to a query.
    Search {
        query: String,

        /// Number of passages (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Generate grounded test cases for a query.
    Generate {
        query: String,

        /// Number of passages given to the model.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Extract the selector map of an HTML page.
    Selectors {
        page: PathBuf,
    },

    /// Render a Selenium script for a test case against a page.
    Script {
        /// JSON file with a test case, an array, or `qah generate` output.
        test_cases: PathBuf,

        /// HTML snapshot of the page under test.
        #[arg(long)]
        page: PathBuf,

        /// Test_ID to render (defaults to the first test case).
        #[arg(long)]
        id: Option<String>,

        /// URL the script opens (defaults to `[script].base_url`).
        #[arg(long)]
        base_url: Option<String>,

        /// Print the full resolution report as JSON instead of the script.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Selector extraction needs no configuration.
    if let Commands::Selectors { page } = &cli.command {
        return commands::run_selectors(page);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { dir } => commands::run_build(&cfg, &dir).await?,
        Commands::Add { files } => commands::run_add(&cfg, &files).await?,
        Commands::Info => commands::run_info(&cfg).await?,
        Commands::Search { query, top_k } => commands::run_search(&cfg, &query, top_k).await?,
        Commands::Generate { query, top_k } => {
            commands::run_generate(&cfg, &query, top_k).await?
        }
        Commands::Script {
            test_cases,
            page,
            id,
            base_url,
            json,
        } => commands::run_script(
            &cfg,
            &test_cases,
            &page,
            id.as_deref(),
            base_url.as_deref(),
            json,
        )?,
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Selectors { .. } => {}
    }

    Ok(())
}
