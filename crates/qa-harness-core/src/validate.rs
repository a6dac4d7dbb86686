//! Structured output validation for generated test cases.
//!
//! Model output is free-form text that is *expected* to hold a JSON array
//! of test-case objects. [`validate_output`] pulls the JSON payload out of
//! the text, parses it, and checks every element against the [`TestCase`]
//! schema on its own: a bad element is dropped and reported, the rest of the
//! batch survives.
//!
//! # Extraction order
//!
//! 1. A fenced code block (```` ```json ... ``` ````): its contents stand in
//!    for the text in the next steps.
//! 2. Text not starting with `[` or `{`: the first balanced `[...]` or
//!    `{...}` span. The scan skips brackets inside JSON strings.
//! 3. The text verbatim.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{TestCase, TestType};

/// The whole batch could not be turned into test cases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedOutputError {
    #[error("model output is empty")]
    Empty,
    #[error("model output is not valid JSON: {diagnostic}")]
    InvalidJson { diagnostic: String, attempted: String },
    #[error("expected a JSON array or object, got {0}")]
    UnexpectedShape(&'static str),
    #[error("model output contains no test cases")]
    NoTestCases,
}

/// One element that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("element {index}: {reason}")]
pub struct SchemaViolation {
    /// Position of the element in the parsed array.
    pub index: usize,
    pub reason: String,
}

/// Test cases that passed validation, plus what was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedBatch {
    pub test_cases: Vec<TestCase>,
    pub rejected_count: usize,
    pub rejections: Vec<SchemaViolation>,
}

/// Extract, parse, and validate raw model output.
///
/// # Errors
///
/// [`MalformedOutputError`] when the text is empty, is not JSON, is JSON of
/// the wrong shape, or is an empty array. Individual invalid elements are
/// not errors; they are listed in [`ValidatedBatch::rejections`].
pub fn validate_output(raw: &str) -> Result<ValidatedBatch, MalformedOutputError> {
    if raw.trim().is_empty() {
        return Err(MalformedOutputError::Empty);
    }

    let payload = extract_payload(raw);
    let value: Value =
        serde_json::from_str(payload).map_err(|e| MalformedOutputError::InvalidJson {
            diagnostic: e.to_string(),
            attempted: payload.to_string(),
        })?;

    let elements = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => return Err(MalformedOutputError::UnexpectedShape(json_kind(&other))),
    };
    if elements.is_empty() {
        return Err(MalformedOutputError::NoTestCases);
    }

    let mut batch = ValidatedBatch {
        test_cases: Vec::with_capacity(elements.len()),
        rejected_count: 0,
        rejections: Vec::new(),
    };
    for (index, element) in elements.iter().enumerate() {
        match validate_element(element) {
            Ok(tc) => batch.test_cases.push(tc),
            Err(reason) => {
                batch.rejected_count += 1;
                batch.rejections.push(SchemaViolation { index, reason });
            }
        }
    }
    Ok(batch)
}

/// Locate the JSON payload inside free-form model output.
pub fn extract_payload(raw: &str) -> &str {
    let text = match fenced_block(raw).map(str::trim) {
        Some(body) if !body.is_empty() => body,
        _ => raw.trim(),
    };
    if text.starts_with('[') || text.starts_with('{') {
        return text;
    }
    balanced_span(text).unwrap_or(text)
}

/// Contents of the first ```` ``` ```` fence, skipping an optional language tag.
fn fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after = &raw[open + 3..];
    let body = match after.find('\n') {
        Some(nl)
            if after[..nl]
                .trim()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            &after[nl + 1..]
        }
        _ => after,
    };
    Some(match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    })
}

/// First balanced `[...]` / `{...}` span, ignoring brackets inside strings.
fn balanced_span(text: &str) -> Option<&str> {
    for (start, c) in text.char_indices() {
        if c != '[' && c != '{' {
            continue;
        }
        if let Some(end) = span_end(&text[start..]) {
            return Some(&text[start..start + end]);
        }
    }
    None
}

/// Byte length of the balanced span at the start of `s`, if it closes.
fn span_end(s: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ']' | '}' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Validate one parsed element against the test-case schema.
pub fn validate_element(value: &Value) -> Result<TestCase, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", json_kind(value)))?;

    let id = required_string(obj, &["Test_ID", "test_id", "id"])?;
    let feature = required_string(obj, &["Feature", "feature"])?;
    let scenario = required_string(obj, &["Test_Scenario", "test_scenario", "scenario"])?;
    let expected_result = required_string(obj, &["Expected_Result", "expected_result"])?;

    let steps = string_list(obj, &["Steps", "steps"])?.unwrap_or_default();
    if steps.is_empty() {
        return Err("Steps must contain at least one non-blank step".to_string());
    }

    let test_type = match field(obj, &["Test_Type", "test_type", "type"]) {
        Some(Value::String(s)) if s == "positive" => TestType::Positive,
        Some(Value::String(s)) if s == "negative" => TestType::Negative,
        Some(other) => {
            return Err(format!(
                "Test_Type must be \"positive\" or \"negative\", got {}",
                other
            ))
        }
        None => return Err("missing field Test_Type".to_string()),
    };

    Ok(TestCase {
        id,
        feature,
        scenario,
        preconditions: string_list(obj, &["Preconditions", "preconditions"])?.unwrap_or_default(),
        steps,
        expected_result,
        test_type,
        grounded_in: string_list(obj, &["Grounded_In", "grounded_in"])?.unwrap_or_default(),
        selectors_needed: string_list(
            obj,
            &["SelectorsNeeded", "Selectors_Needed", "selectors_needed"],
        )?
        .unwrap_or_default(),
    })
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n))
}

fn required_string(obj: &Map<String, Value>, names: &[&str]) -> Result<String, String> {
    match field(obj, names) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(format!("{} must not be blank", names[0])),
        Some(other) => Err(format!("{} must be a string, got {}", names[0], json_kind(other))),
        None => Err(format!("missing field {}", names[0])),
    }
}

/// An optional list of strings. Blank entries are dropped.
fn string_list(obj: &Map<String, Value>, names: &[&str]) -> Result<Option<Vec<String>>, String> {
    let items = match field(obj, names) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(format!(
                "{} must be an array of strings, got {}",
                names[0],
                json_kind(other)
            ))
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) if s.trim().is_empty() => {}
            Value::String(s) => out.push(s.trim().to_string()),
            other => {
                return Err(format!(
                    "{} must contain only strings, found {}",
                    names[0],
                    json_kind(other)
                ))
            }
        }
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "Test_ID": "TC-001",
        "Feature": "Discount codes",
        "Test_Scenario": "Apply a valid discount code",
        "Preconditions": ["Cart has one item"],
        "Steps": ["Enter \"SAVE10\" in the discount field", "Click apply"],
        "Expected_Result": "Total is reduced by 10%",
        "Test_Type": "positive",
        "Grounded_In": ["checkout.md (chunk_0)"],
        "SelectorsNeeded": ["discount", "apply"]
    }"#;

    #[test]
    fn fenced_json_block_validates() {
        let raw = format!("Here you go:\n```json\n[{}]\n```\nThanks!", VALID);
        let batch = validate_output(&raw).unwrap();
        assert_eq!(batch.test_cases.len(), 1);
        assert_eq!(batch.rejected_count, 0);
        let tc = &batch.test_cases[0];
        assert_eq!(tc.id, "TC-001");
        assert_eq!(tc.steps.len(), 2);
        assert_eq!(tc.selectors_needed, vec!["discount", "apply"]);
    }

    #[test]
    fn not_json_is_error() {
        let err = validate_output("not json").unwrap_err();
        match err {
            MalformedOutputError::InvalidJson { attempted, .. } => assert_eq!(attempted, "not json"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn one_valid_one_invalid() {
        let raw = format!(
            r#"[{}, {{"Test_ID": "TC-002", "Feature": "x", "Test_Scenario": "y",
                "Steps": ["a"], "Expected_Result": "z", "Test_Type": "edge"}}]"#,
            VALID
        );
        let batch = validate_output(&raw).unwrap();
        assert_eq!(batch.test_cases.len(), 1);
        assert_eq!(batch.rejected_count, 1);
        assert_eq!(batch.rejections[0].index, 1);
        assert!(batch.rejections[0].reason.contains("Test_Type"));
    }

    #[test]
    fn empty_inputs_are_errors() {
        assert_eq!(validate_output("").unwrap_err(), MalformedOutputError::Empty);
        assert_eq!(validate_output("  \n").unwrap_err(), MalformedOutputError::Empty);
        assert_eq!(validate_output("[]").unwrap_err(), MalformedOutputError::NoTestCases);
    }

    #[test]
    fn single_object_is_wrapped() {
        let batch = validate_output(VALID).unwrap();
        assert_eq!(batch.test_cases.len(), 1);
    }

    #[test]
    fn scalar_payload_is_wrong_shape() {
        assert_eq!(
            validate_output("42").unwrap_err(),
            MalformedOutputError::UnexpectedShape("a number")
        );
    }

    #[test]
    fn balanced_span_in_prose() {
        let raw = format!("Sure! The cases [as requested] follow: [{}] Done.", VALID);
        // "[as requested]" is balanced but not JSON; the first span wins.
        assert_eq!(extract_payload(&raw), "[as requested]");

        let raw = format!("Result: [{}] -- end", VALID);
        let batch = validate_output(&raw).unwrap();
        assert_eq!(batch.test_cases[0].feature, "Discount codes");
    }

    #[test]
    fn span_scan_ignores_brackets_in_strings() {
        let raw = r#"Output: {"a": "close ] and } inside", "b": [1, 2]} trailing"#;
        assert_eq!(
            extract_payload(raw),
            r#"{"a": "close ] and } inside", "b": [1, 2]}"#
        );
        let escaped = r#"x {"a": "quote \" ] still string"} y"#;
        assert_eq!(extract_payload(escaped), r#"{"a": "quote \" ] still string"}"#);
    }

    #[test]
    fn fence_without_language_tag() {
        let raw = format!("```\n{}\n```", VALID);
        assert!(extract_payload(&raw).starts_with('{'));
        assert_eq!(extract_payload("```json\n\n```"), "```json\n\n```");
    }

    #[test]
    fn prose_inside_fence_is_scanned() {
        let raw = format!("```\nHere: [{}]\n```", VALID);
        assert!(extract_payload(&raw).starts_with("[{"));
        let batch = validate_output(&raw).unwrap();
        assert_eq!(batch.test_cases[0].id, "TC-001");
    }

    #[test]
    fn schema_rules() {
        let base: Value = serde_json::from_str(VALID).unwrap();

        let mut blank_id = base.clone();
        blank_id["Test_ID"] = Value::from("  ");
        assert!(validate_element(&blank_id).unwrap_err().contains("blank"));

        let mut no_steps = base.clone();
        no_steps["Steps"] = serde_json::json!(["", "  "]);
        assert!(validate_element(&no_steps).unwrap_err().contains("Steps"));

        let mut bad_list = base.clone();
        bad_list["Grounded_In"] = serde_json::json!([1, 2]);
        assert!(validate_element(&bad_list).is_err());

        let mut capitalized = base.clone();
        capitalized["Test_Type"] = Value::from("Positive");
        assert!(validate_element(&capitalized).is_err());

        let mut missing_optional = base.clone();
        missing_optional
            .as_object_mut()
            .unwrap()
            .remove("Preconditions");
        assert!(validate_element(&missing_optional)
            .unwrap()
            .preconditions
            .is_empty());

        assert!(validate_element(&Value::from("text")).is_err());
    }

    #[test]
    fn snake_case_fields_accepted() {
        let raw = r#"[{"id": "TC-9", "feature": "Login", "scenario": "Bad password",
            "steps": ["Type \"x\" into password"], "expected_result": "Error banner",
            "type": "negative", "selectors_needed": ["password"]}]"#;
        let batch = validate_output(raw).unwrap();
        assert_eq!(batch.test_cases[0].test_type, TestType::Negative);
    }
}
