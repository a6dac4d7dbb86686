//! # QA Harness
//!
//! Grounded test-case generation. Documents are chunked and embedded into a
//! persisted vector index; a query retrieves cited passages; a language
//! model turns them into test cases that are validated against a strict
//! schema; each test case's steps are resolved against the selector map of
//! a captured page and rendered as a Selenium script.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Ingest       │──▶│ VectorStore  │──▶│ index file   │
//! │ PDF/HTML/... │   │ chunk+embed  │   │ (JSON)       │
//! └──────────────┘   └──────┬───────┘   └──────────────┘
//!                           ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │ Retriever    │──▶│ Generator    │──▶ validator
//!                    └──────────────┘   └──────────────┘        │
//!                                                               ▼
//!                    ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//!                    │ page.html    │──▶│ SelectorMap  │──▶│ script   │
//!                    └──────────────┘   └──────────────┘   └──────────┘
//! ```
//!
//! Runtime-free logic (data model, chunking, index, validation, selector
//! resolution, script rendering) lives in the `qa-harness-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`extract`] | Raw bytes → normalized document text |
//! | [`connector_fs`] | Directory scanning with include/exclude globs |
//! | [`embedding`] | OpenAI, Ollama, hash, and local embedding providers |
//! | [`fallback`] | Ordered model fallback with memoized selection |
//! | [`index_file`] | Atomic file-backed index repository |
//! | [`vectorstore`] | Build, load, query, and add with retry and atomic swap |
//! | [`rag`] | Retrieval with citations and evidence lookup |
//! | [`generate`] | Generation collaborator and test-case pipeline |
//! | [`page`] | HTML → selector map |
//! | [`automation`] | Test case + selector map → script report |
//! | [`commands`] | `qah` command bodies |
//! | [`server`] | HTTP API |

pub mod automation;
pub mod commands;
pub mod config;
pub mod connector_fs;
pub mod embedding;
pub mod extract;
pub mod fallback;
pub mod generate;
pub mod index_file;
pub mod page;
pub mod rag;
pub mod server;
pub mod vectorstore;
