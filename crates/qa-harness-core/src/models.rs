//! Core data models shared by the retrieval and grounding pipeline.
//!
//! These types flow from ingestion (documents) through indexing (chunks),
//! generation (test cases) and resolution (selector maps and scripts).

use serde::{Deserialize, Serialize};

/// A normalized document handed over by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable identifier of the origin (usually the file name).
    pub source_id: String,
    /// Normalized text. May be empty when extraction failed.
    pub text: String,
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
        }
    }

    /// True when the document carries no indexable text.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A bounded, contiguous slice of one document's text.
///
/// `ordinal` is assigned sequentially across all documents of one build
/// pass, starting at 0, and is only meaningful within that index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_id: String,
    pub ordinal: usize,
    pub text: String,
}

impl Chunk {
    /// Provenance tag used in prompts and `Grounded_In` citations.
    pub fn citation(&self) -> String {
        format!("{} (chunk_{})", self.source_id, self.ordinal)
    }
}

/// Whether a test case exercises the happy path or a failure path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Positive,
    Negative,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Positive => "positive",
            TestType::Negative => "negative",
        }
    }
}

/// A validated, grounded test case.
///
/// Field names on the wire follow the generation prompt (`Test_ID`,
/// `Test_Scenario`, ...); snake_case aliases are accepted on input.
/// Instances are only produced by [`crate::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(rename = "Test_ID", alias = "id", alias = "test_id")]
    pub id: String,
    #[serde(rename = "Feature", alias = "feature")]
    pub feature: String,
    #[serde(rename = "Test_Scenario", alias = "scenario", alias = "test_scenario")]
    pub scenario: String,
    #[serde(rename = "Preconditions", alias = "preconditions")]
    pub preconditions: Vec<String>,
    #[serde(rename = "Steps", alias = "steps")]
    pub steps: Vec<String>,
    #[serde(rename = "Expected_Result", alias = "expected_result")]
    pub expected_result: String,
    #[serde(rename = "Test_Type", alias = "type", alias = "test_type")]
    pub test_type: TestType,
    #[serde(rename = "Grounded_In", alias = "grounded_in")]
    pub grounded_in: Vec<String>,
    #[serde(
        rename = "SelectorsNeeded",
        alias = "selectors_needed",
        alias = "Selectors_Needed"
    )]
    pub selectors_needed: Vec<String>,
}

/// Coarse classification of an extracted page element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Input,
    Button,
    Link,
    Message,
    Element,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Input => "input",
            ElementKind::Button => "button",
            ElementKind::Link => "link",
            ElementKind::Message => "message",
            ElementKind::Element => "element",
        }
    }
}

/// One locatable element of a page snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorEntry {
    /// Normalized human-readable descriptor, unique within its map.
    pub key: String,
    pub css_selector: String,
    pub element_kind: ElementKind,
}

/// A single script step paired with the selector it acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptAction {
    pub step_text: String,
    pub selector: Option<String>,
}

/// Ordered actions for one test case plus the selectors that could not be
/// resolved. Derived per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedScript {
    pub ordered_actions: Vec<ScriptAction>,
    pub missing_selectors: Vec<String>,
}
