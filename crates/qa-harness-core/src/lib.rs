//! # QA Harness Core
//!
//! Runtime-free logic for QA Harness: the data model, chunking, the
//! embedding trait and vector math, the vector index with its persisted
//! codec and repository abstraction, structured output validation, selector
//! resolution, and script synthesis.
//!
//! This crate contains no tokio, network, or filesystem I/O. The
//! `qa-harness` crate supplies concrete providers, the file repository,
//! and the store that coordinates them.

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
pub mod script;
pub mod selectors;
pub mod store;
pub mod validate;
