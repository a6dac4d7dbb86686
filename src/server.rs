//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness plus knowledge base status |
//! | `POST` | `/kb/build` | Build (or `append` to) the knowledge base from uploaded files |
//! | `POST` | `/kb/search` | Top-k passages for a query |
//! | `POST` | `/kb/evidence` | Resolve `Grounded_In` citations to chunk text |
//! | `POST` | `/testcases` | Retrieve, generate and validate test cases |
//! | `POST` | `/pages` | Extract a selector map from HTML; replaces the current one |
//! | `GET`  | `/selectors` | The current selector map |
//! | `POST` | `/script` | Selenium script for one test case |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `kb_unavailable`, `no_relevant_information` | 404 |
//! | `malformed_output` | 422 |
//! | `provider_error` | 502 |
//! | `provider_unavailable` | 503 |
//! | `internal` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser front end
//! can call the API from another port.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use qa_harness_core::embedding::ProviderError;
use qa_harness_core::models::Document;
use qa_harness_core::selectors::SelectorMap;
use qa_harness_core::validate::validate_element;

use crate::automation::{build_script, ScriptReport};
use crate::config::Config;
use crate::extract::normalize;
use crate::fallback::ProviderChain;
use crate::generate::{build_generators, GenerationError, GenerationOutcome, TestCaseGenerator};
use crate::page::extract_selector_map;
use crate::rag::{EvidenceReport, RetrievalError, Retriever};
use crate::vectorstore::{BuildSummary, StoreError, StoreStatus, VectorStore};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<VectorStore>,
    generator: Arc<TestCaseGenerator>,
    /// The page the scripts target. Replaced wholesale by `POST /pages`.
    selectors: Arc<RwLock<SelectorMap>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<VectorStore>, generator: Arc<TestCaseGenerator>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            generator,
            selectors: Arc::new(RwLock::new(SelectorMap::new())),
        }
    }

    /// Wire providers, store and generator from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(VectorStore::from_config(config)?);
        let retriever = Arc::new(Retriever::new(Arc::clone(&store)));
        let generators = Arc::new(ProviderChain::new(
            "generation",
            build_generators(&config.generation)?,
        ));
        let generator = Arc::new(TestCaseGenerator::new(retriever, generators));
        Ok(Self::new(config.clone(), store, generator))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/kb/build", post(handle_build))
        .route("/kb/search", post(handle_search))
        .route("/kb/evidence", post(handle_evidence))
        .route("/testcases", post(handle_testcases))
        .route("/pages", post(handle_pages))
        .route("/selectors", get(handle_selectors))
        .route("/script", post(handle_script))
        .layer(cors)
        .with_state(state)
}

/// Serve on `[server].bind` until the process is terminated.
///
/// A persisted knowledge base is loaded up front when present; a missing
/// one is not an error, `POST /kb/build` creates it.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    match state.store.load().await {
        Ok(index) => info!(chunks = index.len(), model = index.model(), "knowledge base ready"),
        Err(e) => info!(reason = %e, "starting without a knowledge base"),
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        if err.is_transient() {
            AppError::new(StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable", err.to_string())
        } else {
            AppError::new(StatusCode::BAD_GATEWAY, "provider_error", err.to_string())
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Provider(e) => e.into(),
            StoreError::IndexUnavailable(_) => {
                AppError::new(StatusCode::NOT_FOUND, "kb_unavailable", err.to_string())
            }
            StoreError::NothingToIndex => bad_request(err.to_string()),
            StoreError::Index(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
            }
        }
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::KnowledgeBaseUnavailable(_) => {
                AppError::new(StatusCode::NOT_FOUND, "kb_unavailable", err.to_string())
            }
            RetrievalError::Store(e) => e.into(),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Retrieval(e) => e.into(),
            GenerationError::Provider(e) => e.into(),
            GenerationError::NoRelevantInformation => {
                AppError::new(StatusCode::NOT_FOUND, "no_relevant_information", err.to_string())
            }
            GenerationError::Malformed(_) => AppError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "malformed_output",
                err.to_string(),
            ),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    knowledge_base: StoreStatus,
    selector_count: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        knowledge_base: state.store.status().await,
        selector_count: state.selectors.read().await.len(),
    })
}

// ============ POST /kb/build ============

#[derive(Deserialize)]
struct UploadedFile {
    filename: String,
    content_base64: String,
}

#[derive(Deserialize)]
struct BuildRequest {
    documents: Vec<UploadedFile>,
    /// Add to the existing knowledge base instead of replacing it.
    #[serde(default)]
    append: bool,
}

#[derive(Serialize)]
struct BuildResponse {
    status: &'static str,
    #[serde(flatten)]
    summary: BuildSummary,
}

async fn handle_build(
    State(state): State<AppState>,
    Json(req): Json<BuildRequest>,
) -> Result<Json<BuildResponse>, AppError> {
    if req.documents.is_empty() {
        return Err(bad_request("documents must not be empty"));
    }

    let engine = base64::engine::general_purpose::STANDARD;
    let mut documents: Vec<Document> = Vec::with_capacity(req.documents.len());
    for file in &req.documents {
        let bytes = engine
            .decode(file.content_base64.trim())
            .map_err(|e| bad_request(format!("{}: invalid base64: {}", file.filename, e)))?;
        documents.push(normalize(&bytes, &file.filename));
    }

    let summary = if req.append {
        state.store.add(&documents).await?
    } else {
        state.store.build(&documents).await?
    };
    Ok(Json(BuildResponse {
        status: "ok",
        summary,
    }))
}

// ============ POST /kb/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct SearchHit {
    citation: String,
    source_id: String,
    ordinal: usize,
    score: f32,
    text: String,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

fn top_k(state: &AppState, requested: Option<usize>) -> Result<usize, AppError> {
    match requested {
        Some(0) => Err(bad_request("top_k must be >= 1")),
        Some(k) => Ok(k),
        None => Ok(state.config.retrieval.top_k),
    }
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let k = top_k(&state, req.top_k)?;
    let passages = state.generator.retriever().retrieve(&req.query, k).await?;
    Ok(Json(SearchResponse {
        results: passages
            .into_iter()
            .map(|p| SearchHit {
                citation: p.citation(),
                source_id: p.source_id,
                ordinal: p.ordinal,
                score: p.score,
                text: p.text,
            })
            .collect(),
    }))
}

// ============ POST /kb/evidence ============

#[derive(Deserialize)]
struct EvidenceRequest {
    grounded_in: Vec<String>,
}

async fn handle_evidence(
    State(state): State<AppState>,
    Json(req): Json<EvidenceRequest>,
) -> Result<Json<EvidenceReport>, AppError> {
    Ok(Json(
        state.generator.retriever().evidence(&req.grounded_in).await?,
    ))
}

// ============ POST /testcases ============

#[derive(Deserialize)]
struct TestCasesRequest {
    query: String,
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct TestCasesResponse {
    status: &'static str,
    #[serde(flatten)]
    outcome: GenerationOutcome,
}

async fn handle_testcases(
    State(state): State<AppState>,
    Json(req): Json<TestCasesRequest>,
) -> Result<Json<TestCasesResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let k = top_k(&state, req.top_k)?;
    let outcome = state.generator.generate(&req.query, k).await?;
    Ok(Json(TestCasesResponse {
        status: "ok",
        outcome,
    }))
}

// ============ Selector map ============

#[derive(Deserialize)]
struct PageRequest {
    html: String,
}

#[derive(Serialize)]
struct SelectorsResponse {
    count: usize,
    selectors: SelectorMap,
}

async fn handle_pages(
    State(state): State<AppState>,
    Json(req): Json<PageRequest>,
) -> Result<Json<SelectorsResponse>, AppError> {
    if req.html.trim().is_empty() {
        return Err(bad_request("html must not be empty"));
    }
    let map = extract_selector_map(&req.html);
    info!(selectors = map.len(), "selector map replaced");
    *state.selectors.write().await = map.clone();
    Ok(Json(SelectorsResponse {
        count: map.len(),
        selectors: map,
    }))
}

async fn handle_selectors(State(state): State<AppState>) -> Json<SelectorsResponse> {
    let map = state.selectors.read().await.clone();
    Json(SelectorsResponse {
        count: map.len(),
        selectors: map,
    })
}

// ============ POST /script ============

#[derive(Deserialize)]
struct ScriptRequest {
    test_case: serde_json::Value,
    base_url: Option<String>,
}

async fn handle_script(
    State(state): State<AppState>,
    Json(req): Json<ScriptRequest>,
) -> Result<Json<ScriptReport>, AppError> {
    let test_case = validate_element(&req.test_case)
        .map_err(|reason| bad_request(format!("invalid test case: {}", reason)))?;
    let base_url = req
        .base_url
        .as_deref()
        .unwrap_or(&state.config.script.base_url);
    let map = state.selectors.read().await;
    Ok(Json(build_script(
        &test_case,
        &map,
        state.config.selectors.tie_break,
        base_url,
    )))
}
