//! Selector map and selector resolution.
//!
//! A [`SelectorMap`] holds the locatable elements of one page snapshot,
//! keyed by a normalized descriptor such as `input_email` or
//! `button_apply`. It is built once per snapshot and replaced wholesale.
//!
//! [`resolve`] matches a test case's selector requests against a map:
//!
//! 1. exact key match,
//! 2. case-insensitive substring match of the request in a key,
//! 3. substring match of the normalized request (`"discount code"` →
//!    `discount_code`).
//!
//! When several keys qualify the [`TieBreak`] decides. Requests that match
//! nothing are returned in [`SelectorResolution::missing_selectors`]; a gap
//! is a result, not an error.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{HashMap, HashSet};

use crate::models::{ElementKind, SelectorEntry};

/// Words that name an element's kind rather than its purpose. A step that
/// shares only these with a key is not considered a match.
const GENERIC_WORDS: [&str; 8] = [
    "input", "button", "link", "message", "select", "textarea", "element", "field",
];

/// Lowercase `raw`, collapse runs of non-alphanumerics into `_`, trim `_`.
///
/// ```rust
/// use qa_harness_core::selectors::normalize_key;
///
/// assert_eq!(normalize_key("  Apply Code! "), "apply_code");
/// assert_eq!(normalize_key("user-email"), "user_email");
/// ```
pub fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    out
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Insertion-ordered mapping from descriptor key to [`SelectorEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorMap {
    entries: Vec<SelectorEntry>,
    by_key: HashMap<String, usize>,
}

impl SelectorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry whose key must not be present yet.
    ///
    /// Returns the entry back when the key is taken.
    pub fn insert(&mut self, entry: SelectorEntry) -> Result<(), SelectorEntry> {
        if self.by_key.contains_key(&entry.key) {
            return Err(entry);
        }
        self.by_key.insert(entry.key.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Insert under `base_key`, appending `_2`, `_3`, … on collision.
    /// Returns the key actually used.
    pub fn insert_unique(
        &mut self,
        base_key: &str,
        css_selector: impl Into<String>,
        element_kind: ElementKind,
    ) -> String {
        let mut key = base_key.to_string();
        let mut n = 2;
        while self.by_key.contains_key(&key) {
            key = format!("{}_{}", base_key, n);
            n += 1;
        }
        self.by_key.insert(key.clone(), self.entries.len());
        self.entries.push(SelectorEntry {
            key: key.clone(),
            css_selector: css_selector.into(),
            element_kind,
        });
        key
    }

    pub fn get(&self, key: &str) -> Option<&SelectorEntry> {
        self.by_key.get(key).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SelectorEntry> {
        self.entries.iter()
    }
}

impl FromIterator<SelectorEntry> for SelectorMap {
    /// Later entries with an already-present key are dropped.
    fn from_iter<I: IntoIterator<Item = SelectorEntry>>(iter: I) -> Self {
        let mut map = SelectorMap::new();
        for entry in iter {
            let _ = map.insert(entry);
        }
        map
    }
}

#[derive(Serialize)]
struct EntryBody<'a> {
    css_selector: &'a str,
    element_kind: ElementKind,
}

/// Serializes as a JSON object in insertion order:
/// `{"input_email": {"css_selector": "#email", "element_kind": "input"}}`.
impl Serialize for SelectorMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for e in &self.entries {
            map.serialize_entry(
                &e.key,
                &EntryBody {
                    css_selector: &e.css_selector,
                    element_kind: e.element_kind,
                },
            )?;
        }
        map.end()
    }
}

/// How to choose between several keys that match a request equally well.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The earliest inserted key, i.e. document order for extracted maps.
    #[default]
    FirstInserted,
    /// The longest key; equal lengths fall back to insertion order.
    LongestKey,
}

impl TieBreak {
    fn pick<'a>(
        &self,
        mut candidates: impl Iterator<Item = &'a SelectorEntry>,
    ) -> Option<&'a SelectorEntry> {
        match self {
            TieBreak::FirstInserted => candidates.next(),
            TieBreak::LongestKey => candidates.fold(None, |best: Option<&SelectorEntry>, e| match best {
                Some(b) if b.key.len() >= e.key.len() => Some(b),
                _ => Some(e),
            }),
        }
    }
}

/// How a request was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Substring,
    Normalized,
}

/// A selector request and the map entry it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSelector {
    pub request: String,
    pub key: String,
    pub css_selector: String,
    pub matched_by: MatchKind,
}

/// Outcome of resolving one test case's selector requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectorResolution {
    /// Resolved requests, in request order.
    pub resolved: Vec<ResolvedSelector>,
    /// Requests with no matching key, in request order.
    pub missing_selectors: Vec<String>,
    pub tie_break: TieBreak,
}

impl SelectorResolution {
    pub fn selector_for(&self, request: &str) -> Option<&str> {
        self.resolved
            .iter()
            .find(|r| r.request == request)
            .map(|r| r.css_selector.as_str())
    }
}

/// Resolve selector requests against `map`.
///
/// Requests are trimmed; blank and duplicate requests are ignored. An empty
/// map resolves nothing and reports every request as missing.
pub fn resolve(map: &SelectorMap, requests: &[String], tie_break: TieBreak) -> SelectorResolution {
    let mut resolution = SelectorResolution {
        resolved: Vec::new(),
        missing_selectors: Vec::new(),
        tie_break,
    };
    let mut seen = HashSet::new();

    for request in requests.iter().map(|r| r.trim()).filter(|r| !r.is_empty()) {
        if !seen.insert(request.to_string()) {
            continue;
        }
        match resolve_one(map, request, tie_break) {
            Some((entry, matched_by)) => resolution.resolved.push(ResolvedSelector {
                request: request.to_string(),
                key: entry.key.clone(),
                css_selector: entry.css_selector.clone(),
                matched_by,
            }),
            None => resolution.missing_selectors.push(request.to_string()),
        }
    }
    resolution
}

fn resolve_one<'a>(
    map: &'a SelectorMap,
    request: &str,
    tie_break: TieBreak,
) -> Option<(&'a SelectorEntry, MatchKind)> {
    if let Some(entry) = map.get(request) {
        return Some((entry, MatchKind::Exact));
    }

    let lowered = request.to_lowercase();
    if let Some(entry) = tie_break.pick(map.iter().filter(|e| e.key.to_lowercase().contains(&lowered))) {
        return Some((entry, MatchKind::Substring));
    }

    let normalized = normalize_key(request);
    if normalized.is_empty() || normalized == lowered {
        return None;
    }
    tie_break
        .pick(map.iter().filter(|e| e.key.contains(&normalized)))
        .map(|entry| (entry, MatchKind::Normalized))
}

/// Pick the selector a step acts on.
///
/// First the earliest resolved request whose text occurs in the step, then
/// the map entry sharing the most words with the step. Sharing only generic
/// kind words (`input`, `button`, …) does not count.
pub fn match_step(step: &str, resolution: &SelectorResolution, map: &SelectorMap) -> Option<String> {
    let step_lower = step.to_lowercase();
    let step_words: HashSet<String> = words(step).collect();

    for r in &resolution.resolved {
        let req = r.request.to_lowercase();
        let spaced = req.replace(['_', '-'], " ");
        if step_lower.contains(&req) || step_lower.contains(&spaced) {
            return Some(r.css_selector.clone());
        }
    }

    let mut best_score = 0usize;
    let mut best: Vec<&SelectorEntry> = Vec::new();
    for entry in map.iter() {
        let shared: Vec<String> = words(&entry.key)
            .filter(|w| step_words.contains(w))
            .collect();
        if !shared.iter().any(|w| !GENERIC_WORDS.contains(&w.as_str())) {
            continue;
        }
        if shared.len() > best_score {
            best_score = shared.len();
            best.clear();
        }
        if shared.len() == best_score {
            best.push(entry);
        }
    }
    resolution
        .tie_break
        .pick(best.into_iter())
        .map(|e| e.css_selector.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> SelectorMap {
        let mut map = SelectorMap::new();
        map.insert_unique("input_email", "#email", ElementKind::Input);
        map.insert_unique("input_email_confirm", "#email2", ElementKind::Input);
        map.insert_unique("input_discount_code", "#discount", ElementKind::Input);
        map.insert_unique("button_apply", "#apply", ElementKind::Button);
        map.insert_unique("div_error_message", "div.error", ElementKind::Message);
        map
    }

    fn reqs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn substring_match_and_missing() {
        let mut map = SelectorMap::new();
        map.insert_unique("input_email", "#email", ElementKind::Input);

        let res = resolve(&map, &reqs(&["email"]), TieBreak::FirstInserted);
        assert_eq!(res.selector_for("email"), Some("#email"));
        assert_eq!(res.resolved[0].matched_by, MatchKind::Substring);
        assert!(res.missing_selectors.is_empty());

        let res = resolve(&map, &reqs(&["phone"]), TieBreak::FirstInserted);
        assert!(res.resolved.is_empty());
        assert_eq!(res.missing_selectors, vec!["phone"]);
    }

    #[test]
    fn exact_match_wins_over_substring() {
        let map = sample_map();
        let res = resolve(&map, &reqs(&["input_email_confirm"]), TieBreak::FirstInserted);
        assert_eq!(res.selector_for("input_email_confirm"), Some("#email2"));
        assert_eq!(res.resolved[0].matched_by, MatchKind::Exact);
    }

    #[test]
    fn tie_break_policies() {
        let map = sample_map();
        let first = resolve(&map, &reqs(&["EMAIL"]), TieBreak::FirstInserted);
        assert_eq!(first.selector_for("EMAIL"), Some("#email"));
        let longest = resolve(&map, &reqs(&["EMAIL"]), TieBreak::LongestKey);
        assert_eq!(longest.selector_for("EMAIL"), Some("#email2"));
    }

    #[test]
    fn normalized_request_matches() {
        let map = sample_map();
        let res = resolve(&map, &reqs(&["Discount Code"]), TieBreak::FirstInserted);
        assert_eq!(res.selector_for("Discount Code"), Some("#discount"));
        assert_eq!(res.resolved[0].matched_by, MatchKind::Normalized);
    }

    #[test]
    fn empty_map_reports_everything_missing() {
        let res = resolve(
            &SelectorMap::new(),
            &reqs(&["email", " ", "apply", "email"]),
            TieBreak::FirstInserted,
        );
        assert!(res.resolved.is_empty());
        assert_eq!(res.missing_selectors, vec!["email", "apply"]);
    }

    #[test]
    fn insert_unique_suffixes_collisions() {
        let mut map = SelectorMap::new();
        assert_eq!(map.insert_unique("link_home", "a#h1", ElementKind::Link), "link_home");
        assert_eq!(map.insert_unique("link_home", "a#h2", ElementKind::Link), "link_home_2");
        assert_eq!(map.insert_unique("link_home", "a#h3", ElementKind::Link), "link_home_3");
        assert_eq!(map.len(), 3);
        assert!(map
            .insert(SelectorEntry {
                key: "link_home".into(),
                css_selector: "x".into(),
                element_kind: ElementKind::Link,
            })
            .is_err());
    }

    #[test]
    fn serializes_in_insertion_order() {
        let map = sample_map();
        let json = serde_json::to_string(&map).unwrap();
        let email = json.find("\"input_email\"").unwrap();
        let apply = json.find("\"button_apply\"").unwrap();
        assert!(email < apply);
        assert!(json.contains("\"element_kind\":\"button\""));
    }

    #[test]
    fn step_matching() {
        let map = sample_map();
        let res = resolve(&map, &reqs(&["discount", "apply"]), TieBreak::FirstInserted);

        assert_eq!(
            match_step("Enter \"SAVE10\" in the discount field", &res, &map).as_deref(),
            Some("#discount")
        );
        assert_eq!(match_step("Click Apply", &res, &map).as_deref(), Some("#apply"));
        // Falls back to word overlap with map keys.
        assert_eq!(
            match_step("Verify the error message is shown", &res, &map).as_deref(),
            Some("div.error")
        );
        // Generic words alone do not match.
        assert_eq!(match_step("Click the button", &res, &map), None);
        assert_eq!(match_step("Wait two seconds", &res, &map), None);
    }
}
