//! Test-case generation: retrieve → prompt → generate → validate.
//!
//! The generation collaborator is the [`Generator`] trait: a prompt goes
//! in, raw model text comes out. [`OpenAIChatGenerator`] talks to any
//! OpenAI-compatible `/v1/chat/completions` endpoint. Model fallback works
//! the same as for embeddings, through a
//! [`ProviderChain`](crate::fallback::ProviderChain) of generators.
//!
//! [`TestCaseGenerator`] runs the whole pipeline and hands the raw text to
//! the structured output validator; malformed elements are dropped and
//! logged, the rest of the batch is returned.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use qa_harness_core::embedding::ProviderError;
use qa_harness_core::validate::{validate_output, MalformedOutputError, ValidatedBatch};

use crate::config::GenerationConfig;
use crate::embedding::{classify_status, classify_transport};
use crate::fallback::ProviderChain;
use crate::rag::{format_for_prompt, RetrievalError, RetrievedChunk, Retriever};

const OPENAI_URL: &str = "https://api.openai.com";
const PREVIEW_CHARS: usize = 200;

/// A text-generation backend serving one model.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Return the model's raw text for `prompt`. Empty text is not an error
    /// here; the validator rejects it.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Initialization probe used by the fallback chain.
    async fn probe(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

// ============ OpenAI-compatible chat ============

pub struct OpenAIChatGenerator {
    model: String,
    url: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl OpenAIChatGenerator {
    pub fn new(model: &str, config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: model.to_string(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            client,
        })
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Permanent("OPENAI_API_KEY not set".to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAIChatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let api_key = self.api_key()?;
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status("OpenAI", status, &text));
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("invalid OpenAI response: {}", e)))?;
        Ok(parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default())
    }

    /// `GET /v1/models/{model}`: unknown models and bad keys fail here,
    /// before any prompt is sent.
    async fn probe(&self) -> Result<(), ProviderError> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .get(format!("{}/v1/models/{}", self.url, self.model))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(classify_status("OpenAI", status, &text))
        }
    }
}

/// One generator per configured model, in fallback order. Empty when
/// generation is disabled.
pub fn build_generators(config: &GenerationConfig) -> Result<Vec<Arc<dyn Generator>>> {
    let mut out: Vec<Arc<dyn Generator>> = Vec::new();
    match config.provider.as_str() {
        "disabled" => {}
        "openai" => {
            for model in &config.models {
                out.push(Arc::new(OpenAIChatGenerator::new(model, config)?));
            }
        }
        other => bail!("Unknown generation provider: {}", other),
    }
    Ok(out)
}

// ============ Prompt ============

/// Prompt asking for a JSON array of test cases grounded in `passages`.
pub fn build_prompt(query: &str, passages: &[RetrievedChunk]) -> String {
    format!(
        r#"You write software test cases. Answer with JSON only.

REQUEST: {query}

DOCUMENTATION:
{docs}

RULES:
1. Use only facts stated in the documentation above. Write "UNKNOWN" for anything it does not say.
2. Cover both positive and negative behaviour.
3. Cite the passages each test case relies on in Grounded_In, exactly as "<source> (chunk_<n>)" from the SOURCE lines.
4. List short element names (for example "email input", "submit button") in SelectorsNeeded.
5. Reply with a JSON array and nothing else: no prose, no code fences.

Each element must have this shape:
{{
  "Test_ID": "TC-001",
  "Feature": "feature under test",
  "Test_Scenario": "what the test checks",
  "Preconditions": ["state before the test"],
  "Steps": ["first action", "second action"],
  "Expected_Result": "observable outcome",
  "Test_Type": "positive" or "negative",
  "Grounded_In": ["source.md (chunk_0)"],
  "SelectorsNeeded": ["element name"]
}}

JSON:"#,
        query = query.trim(),
        docs = format_for_prompt(passages),
    )
}

// ============ Pipeline ============

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error("no relevant information found in the knowledge base")]
    NoRelevantInformation,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Malformed(#[from] MalformedOutputError),
}

/// A passage the prompt was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsedChunk {
    pub source: String,
    pub chunk_id: usize,
    pub preview: String,
}

impl From<&RetrievedChunk> for UsedChunk {
    fn from(chunk: &RetrievedChunk) -> Self {
        let mut preview: String = chunk.text.chars().take(PREVIEW_CHARS).collect();
        if chunk.text.chars().nth(PREVIEW_CHARS).is_some() {
            preview.push_str("...");
        }
        Self {
            source: chunk.source_id.clone(),
            chunk_id: chunk.ordinal,
            preview,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub model: String,
    #[serde(flatten)]
    pub batch: ValidatedBatch,
    pub used_chunks: Vec<UsedChunk>,
}

/// Status-tagged generation outcome for JSON output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GenerationResult {
    Ok(GenerationOutcome),
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_response: Option<String>,
    },
}

impl From<Result<GenerationOutcome, GenerationError>> for GenerationResult {
    fn from(result: Result<GenerationOutcome, GenerationError>) -> Self {
        match result {
            Ok(outcome) => GenerationResult::Ok(outcome),
            Err(err) => {
                let raw_response = match &err {
                    GenerationError::Malformed(MalformedOutputError::InvalidJson {
                        attempted, ..
                    }) => Some(attempted.clone()),
                    _ => None,
                };
                GenerationResult::Error {
                    message: err.to_string(),
                    raw_response,
                }
            }
        }
    }
}

pub struct TestCaseGenerator {
    retriever: Arc<Retriever>,
    generators: Arc<ProviderChain<dyn Generator>>,
}

impl TestCaseGenerator {
    pub fn new(retriever: Arc<Retriever>, generators: Arc<ProviderChain<dyn Generator>>) -> Self {
        Self {
            retriever,
            generators,
        }
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub async fn generate(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<GenerationOutcome, GenerationError> {
        let passages = self.retriever.retrieve(query, top_k).await?;
        if passages.is_empty() {
            warn!(query, "no passages retrieved");
            return Err(GenerationError::NoRelevantInformation);
        }

        let generator = self.generators.active().await?;
        let prompt = build_prompt(query, &passages);
        info!(
            model = generator.model_name(),
            passages = passages.len(),
            prompt_chars = prompt.len(),
            "generating test cases"
        );
        let raw = generator.generate(&prompt).await?;
        if raw.trim().is_empty() {
            warn!(model = generator.model_name(), "model returned empty output");
        }

        let batch = validate_output(&raw)?;
        for rejection in &batch.rejections {
            warn!(index = rejection.index, reason = %rejection.reason, "dropping invalid test case");
        }
        info!(
            accepted = batch.test_cases.len(),
            rejected = batch.rejected_count,
            "test cases validated"
        );

        Ok(GenerationOutcome {
            model: generator.model_name().to_string(),
            batch,
            used_chunks: passages.iter().map(UsedChunk::from).collect(),
        })
    }
}
