//! Script synthesis: test case + resolved selectors → automation script.
//!
//! [`synthesize`] pairs every step with the selector it acts on (or `None`),
//! keeping step order. [`render_selenium`] turns that into a Python
//! `unittest` + Selenium script. Steps without a selector still appear in
//! the script, as a `# MISSING SELECTOR:` comment and a `pass` placeholder,
//! so the output always parses.

use std::fmt::Write as _;

use crate::models::{ResolvedScript, ScriptAction, TestCase};
use crate::selectors::{match_step, normalize_key, SelectorMap, SelectorResolution};

/// Build the ordered action list for `test_case`.
pub fn synthesize(
    test_case: &TestCase,
    resolution: &SelectorResolution,
    map: &SelectorMap,
) -> ResolvedScript {
    ResolvedScript {
        ordered_actions: test_case
            .steps
            .iter()
            .map(|step| ScriptAction {
                step_text: step.clone(),
                selector: match_step(step, resolution, map),
            })
            .collect(),
        missing_selectors: resolution.missing_selectors.clone(),
    }
}

/// What a step does to its element.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StepAction {
    Type(Option<String>),
    Click,
    Assert,
    Locate,
}

const TYPE_VERBS: [&str; 8] = ["enter", "enters", "type", "types", "fill", "fills", "input", "inputs"];
const CLICK_VERBS: [&str; 10] = [
    "click", "clicks", "press", "presses", "submit", "submits", "tap", "taps", "select", "selects",
];
const ASSERT_VERBS: [&str; 12] = [
    "verify", "verifies", "check", "checks", "should", "see", "sees", "expect", "expects",
    "assert", "asserts", "displayed",
];

/// Infer the action from the first verb-like word in the step.
fn infer_action(step: &str) -> StepAction {
    for word in step
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let w = word.to_lowercase();
        if TYPE_VERBS.contains(&w.as_str()) {
            return StepAction::Type(quoted_value(step));
        }
        if CLICK_VERBS.contains(&w.as_str()) {
            return StepAction::Click;
        }
        if ASSERT_VERBS.contains(&w.as_str()) {
            return StepAction::Assert;
        }
    }
    StepAction::Locate
}

/// First `"double-quoted"` value, else the first `'single-quoted'` value
/// whose quotes sit on word boundaries (so apostrophes are ignored).
fn quoted_value(step: &str) -> Option<String> {
    let mut parts = step.splitn(3, '"');
    if let (Some(_), Some(value), Some(_)) = (parts.next(), parts.next(), parts.next()) {
        return Some(value.to_string());
    }

    let chars: Vec<char> = step.chars().collect();
    let is_boundary = |i: Option<&char>| i.map_or(true, |c| !c.is_alphanumeric());
    let mut open: Option<usize> = None;
    for (i, &c) in chars.iter().enumerate() {
        if c != '\'' {
            continue;
        }
        match open {
            None if is_boundary(i.checked_sub(1).and_then(|p| chars.get(p))) => open = Some(i),
            Some(start) if is_boundary(chars.get(i + 1)) => {
                return Some(chars[start + 1..i].iter().collect());
            }
            _ => {}
        }
    }
    None
}

/// Python double-quoted string literal.
fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Text safe to place on one comment or docstring line.
fn one_line(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\\', "\\\\")
        .replace("\"\"\"", "\\\"\\\"\\\"")
}

fn class_name(id: &str) -> String {
    let mut name = String::from("Test");
    for part in normalize_key(id).split('_').filter(|p| !p.is_empty()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    if name == "Test" {
        name.push_str("Case");
    }
    name
}

/// Render a Python Selenium script for `test_case`.
///
/// `script` is normally the output of [`synthesize`] for the same test case.
pub fn render_selenium(test_case: &TestCase, script: &ResolvedScript, base_url: &str) -> String {
    let mut out = String::new();
    let method = match normalize_key(&test_case.id) {
        k if k.is_empty() => "test_case".to_string(),
        k => format!("test_{}", k),
    };

    // Writing into a String cannot fail.
    let _ = writeln!(out, "\"\"\"");
    let _ = writeln!(out, "Test_ID: {}", one_line(&test_case.id));
    let _ = writeln!(out, "Feature: {}", one_line(&test_case.feature));
    let _ = writeln!(out, "Scenario: {}", one_line(&test_case.scenario));
    let _ = writeln!(out, "Type: {}", test_case.test_type.as_str());
    let _ = writeln!(out, "\"\"\"");
    if !script.missing_selectors.is_empty() {
        let _ = writeln!(
            out,
            "# WARNING: missing selectors: {}",
            one_line(&script.missing_selectors.join(", "))
        );
    }
    out.push_str(
        "import unittest\n\n\
         from selenium import webdriver\n\
         from selenium.webdriver.common.by import By\n\n\n",
    );

    let _ = writeln!(out, "class {}(unittest.TestCase):", class_name(&test_case.id));
    out.push_str("    def setUp(self):\n");
    out.push_str("        self.driver = webdriver.Chrome()\n");
    out.push_str("        self.driver.implicitly_wait(10)\n");
    let _ = writeln!(out, "        self.driver.get({})\n", py_str(base_url));
    out.push_str("    def tearDown(self):\n");
    out.push_str("        self.driver.quit()\n\n");

    let _ = writeln!(out, "    def {}(self):", method);
    out.push_str("        driver = self.driver\n");
    for pre in &test_case.preconditions {
        let _ = writeln!(out, "        # Precondition: {}", one_line(pre));
    }
    for (i, action) in script.ordered_actions.iter().enumerate() {
        let _ = writeln!(out, "        # Step {}: {}", i + 1, one_line(&action.step_text));
        let Some(selector) = &action.selector else {
            let _ = writeln!(out, "        # MISSING SELECTOR: no element matched this step");
            out.push_str("        pass\n");
            continue;
        };
        let locate = format!("driver.find_element(By.CSS_SELECTOR, {})", py_str(selector));
        match infer_action(&action.step_text) {
            StepAction::Type(Some(value)) => {
                let _ = writeln!(out, "        {}.send_keys({})", locate, py_str(&value));
            }
            StepAction::Type(None) => {
                out.push_str("        # no quoted value in step; element located only\n");
                let _ = writeln!(out, "        {}", locate);
            }
            StepAction::Click => {
                let _ = writeln!(out, "        {}.click()", locate);
            }
            StepAction::Assert => {
                let _ = writeln!(out, "        self.assertTrue({}.is_displayed())", locate);
            }
            StepAction::Locate => {
                let _ = writeln!(out, "        {}", locate);
            }
        }
    }
    let _ = writeln!(out, "        # Expected: {}", one_line(&test_case.expected_result));
    out.push_str("\n\nif __name__ == \"__main__\":\n    unittest.main()\n");
    out
}
