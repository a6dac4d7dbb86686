//! Page snapshots: HTML → [`SelectorMap`].
//!
//! One pass over the document in tree order; each element lands in at most
//! one category, checked in this order:
//!
//! | Element | Kind | Key |
//! |---------|------|-----|
//! | `button`, `input[type=submit\|button\|reset]` | button | `button_<text\|value\|id\|name>` |
//! | `input`, `select`, `textarea` | input | `<tag>_<name\|id\|placeholder\|aria-label>` |
//! | `a[href]` | link | `link_<text\|id\|title>` |
//! | class contains `error`/`success`/`message`/`alert`/`warning` | message | `<tag>_<word>_message` |
//! | anything else with an `id` | element | `<tag>_<id>` |
//!
//! An element with an `id` whose key came from something else is also
//! registered as `<tag>_<id>` with the same selector.
//!
//! Keys are normalized with [`normalize_key`] after the descriptor is cut to
//! 30 characters; collisions get `_2`, `_3`, ... suffixes. Selectors prefer
//! `#id`, then an attribute selector, then a structural
//! `tag:nth-of-type(n)` path from `body`. All selectors are valid CSS.

use scraper::{ElementRef, Html};
use tracing::debug;

use qa_harness_core::models::ElementKind;
use qa_harness_core::selectors::{normalize_key, SelectorMap};

const DESCRIPTOR_CHARS: usize = 30;
const MESSAGE_WORDS: [&str; 5] = ["error", "success", "message", "alert", "warning"];

/// Extract the selector map of an HTML page.
pub fn extract_selector_map(html: &str) -> SelectorMap {
    let document = Html::parse_document(html);
    let mut map = SelectorMap::new();

    for element in document.tree.root().descendants().filter_map(ElementRef::wrap) {
        let Some((kind, raw_key, selector)) = classify(element) else {
            continue;
        };
        let key = normalize_key(&raw_key);
        if !key.is_empty() {
            map.insert_unique(&key, selector.clone(), kind);
        }

        // Every element with an id is also reachable as `<tag>_<id>`.
        if let Some(id) = attr(element, "id") {
            let id_key = normalize_key(&keyed(element.value().name(), id));
            if !id_key.is_empty() && id_key != key {
                map.insert_unique(&id_key, selector, kind);
            }
        }
    }

    debug!(selectors = map.len(), "extracted selector map");
    map
}

fn classify(el: ElementRef<'_>) -> Option<(ElementKind, String, String)> {
    let tag = el.value().name();
    let attr = |name: &str| attr(el, name);
    let id = attr("id");

    let input_type = attr("type").map(str::to_ascii_lowercase);
    let is_button = tag == "button"
        || (tag == "input"
            && matches!(input_type.as_deref(), Some("submit" | "button" | "reset")));

    if is_button {
        let text = visible_text(el);
        let descriptor = non_empty(&text)
            .or(attr("value"))
            .or(id)
            .or(attr("name"))?;
        let selector = match (id, attr("value"), attr("name")) {
            (Some(id), _, _) => id_selector(id),
            (None, Some(value), _) if tag == "input" => {
                format!("input[value='{}']", css_string(value))
            }
            (None, _, Some(name)) => format!("{}[name='{}']", tag, css_string(name)),
            _ => structural_path(el),
        };
        return Some((ElementKind::Button, keyed("button", descriptor), selector));
    }

    if matches!(tag, "input" | "select" | "textarea") {
        if input_type.as_deref() == Some("hidden") {
            return None;
        }
        let name = attr("name");
        let descriptor = name
            .or(id)
            .or(attr("placeholder"))
            .or(attr("aria-label"))?;
        let selector = match (id, name) {
            (Some(id), _) => id_selector(id),
            (None, Some(name)) => format!("{}[name='{}']", tag, css_string(name)),
            _ => structural_path(el),
        };
        return Some((ElementKind::Input, keyed(tag, descriptor), selector));
    }

    if tag == "a" && el.value().attr("href").is_some() {
        let text = visible_text(el);
        let descriptor = non_empty(&text).or(id).or(attr("title"))?;
        let selector = id.map(id_selector).unwrap_or_else(|| structural_path(el));
        return Some((ElementKind::Link, keyed("link", descriptor), selector));
    }

    if let Some((word, class)) = message_class(el) {
        let selector = match id {
            Some(id) => id_selector(id),
            None if is_identifier(class) => format!("{}.{}", tag, class),
            None => structural_path(el),
        };
        return Some((
            ElementKind::Message,
            format!("{}_{}_message", tag, word),
            selector,
        ));
    }

    let id = id?;
    Some((ElementKind::Element, keyed(tag, id), id_selector(id)))
}

/// Trimmed, non-empty attribute value.
fn attr<'a>(el: ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First class containing one of [`MESSAGE_WORDS`], with the word it matched.
fn message_class<'a>(el: ElementRef<'a>) -> Option<(&'static str, &'a str)> {
    for class in el.value().attr("class").unwrap_or_default().split_whitespace() {
        let lower = class.to_ascii_lowercase();
        if let Some(word) = MESSAGE_WORDS.iter().find(|w| lower.contains(*w)) {
            return Some((word, class));
        }
    }
    None
}

fn keyed(prefix: &str, descriptor: &str) -> String {
    let short: String = descriptor.chars().take(DESCRIPTOR_CHARS).collect();
    format!("{}_{}", prefix, short)
}

fn visible_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s).filter(|s| !s.is_empty())
}

/// CSS identifier usable after `#` or `.` without escaping.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        Some('-') => match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        },
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn id_selector(id: &str) -> String {
    if is_identifier(id) {
        format!("#{}", id)
    } else {
        format!("[id='{}']", css_string(id))
    }
}

/// Escape a value for a single-quoted CSS string.
fn css_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `body > div:nth-of-type(2) > a:nth-of-type(1)` style path.
fn structural_path(el: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    let mut current = Some(el);
    while let Some(node) = current {
        let name = node.value().name();
        if name == "body" || name == "html" {
            parts.push(name.to_string());
            break;
        }
        let position = 1 + node
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|s| s.value().name() == name)
            .count();
        parts.push(format!("{}:nth-of-type({})", name, position));
        current = node.parent().and_then(ElementRef::wrap);
    }
    parts.reverse();
    parts.join(" > ")
}
