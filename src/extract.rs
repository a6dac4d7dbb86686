//! Document normalization: raw bytes + filename → [`Document`].
//!
//! The format is chosen by file extension:
//!
//! | Extension | Extraction |
//! |-----------|------------|
//! | `.pdf` | `pdf-extract` text |
//! | `.html`, `.htm` | visible text via `scraper`; `script`/`style` dropped, one phrase per line |
//! | `.json` | flattened to indented `key: value` lines |
//! | anything else | lossy UTF-8 |
//!
//! [`normalize`] never fails: extraction errors are logged and produce a
//! document with empty text, which the chunker skips and reports.

use scraper::Html;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use qa_harness_core::models::Document;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Lowercased extension of `filename`, without the dot.
fn extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Extract plain text from `bytes` according to the extension of `filename`.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
    match extension(filename).as_str() {
        "pdf" => extract_pdf(bytes),
        "html" | "htm" => Ok(extract_html(&String::from_utf8_lossy(bytes))),
        "json" => extract_json(bytes),
        _ => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Normalize one uploaded or scanned file. `filename` becomes the source id.
pub fn normalize(bytes: &[u8], filename: &str) -> Document {
    let text = match extract_text(bytes, filename) {
        Ok(text) => text,
        Err(e) => {
            warn!(file = filename, error = %e, "extraction failed, indexing nothing for this file");
            String::new()
        }
    };
    debug!(file = filename, chars = text.len(), "normalized document");
    Document::new(filename, text)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Visible text of an HTML page, one phrase per line.
///
/// Text nodes are split into lines, lines into phrases at double spaces,
/// each phrase trimmed, and empty phrases dropped.
pub fn extract_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut phrases: Vec<&str> = Vec::new();
    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
        });
        if hidden {
            continue;
        }
        let text: &str = text;
        phrases.extend(
            text.lines()
                .flat_map(|line| line.split("  "))
                .map(str::trim)
                .filter(|p| !p.is_empty()),
        );
    }
    phrases.join("\n")
}

fn extract_json(bytes: &[u8]) -> Result<String, ExtractError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let mut lines = Vec::new();
    flatten_json(&value, 0, &mut lines);
    Ok(lines.join("\n"))
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Objects become `key: value` lines (or `key:` followed by the nested
/// value one level deeper); arrays become `- item` lines (or `Item n:`
/// headers for nested values). Two spaces per level.
fn flatten_json(value: &Value, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if v.is_object() || v.is_array() {
                    lines.push(format!("{}{}:", indent, key));
                    flatten_json(v, depth + 1, lines);
                } else {
                    lines.push(format!("{}{}: {}", indent, key, scalar(v)));
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if item.is_object() || item.is_array() {
                    lines.push(format!("{}Item {}:", indent, i + 1));
                    flatten_json(item, depth + 1, lines);
                } else {
                    lines.push(format!("{}- {}", indent, scalar(item)));
                }
            }
        }
        other => lines.push(format!("{}{}", indent, scalar(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_drops_scripts_and_splits_phrases() {
        let html = r#"<html><head><title>Shop</title><style>p { color: red }</style></head>
<body><h1>Checkout</h1><script>var x = 1;</script>
<p>Enter code   then press apply</p>
<ul><li>  Free shipping </li><li></li></ul></body></html>"#;
        assert_eq!(
            extract_html(html),
            "Shop\nCheckout\nEnter code\nthen press apply\nFree shipping"
        );
    }

    #[test]
    fn test_json_flattening() {
        let json = br#"{"product": "Widget", "price": 9.5, "tags": ["a", "b"], "shipping": {"free": true}, "variants": [{"sku": "W-1"}]}"#;
        let text = extract_text(json, "catalog.json").unwrap();
        assert_eq!(
            text,
            "product: Widget\nprice: 9.5\ntags:\n  - a\n  - b\nshipping:\n  free: true\nvariants:\n  Item 1:\n    sku: W-1"
        );
    }

    #[test]
    fn test_bad_input_normalizes_to_empty_text() {
        let doc = normalize(b"{ not json", "broken.json");
        assert_eq!(doc.source_id, "broken.json");
        assert!(doc.is_blank());

        let doc = normalize(b"not a pdf", "scan.PDF");
        assert!(doc.is_blank());
    }

    #[test]
    fn test_unknown_extension_is_text() {
        let doc = normalize(b"plain \xff text", "notes.rst");
        assert_eq!(doc.text, "plain \u{fffd} text");
        assert_eq!(extension("README"), "");
        assert_eq!(extension("Page.HTM"), "htm");
    }
}
