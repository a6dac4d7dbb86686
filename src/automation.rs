//! Test case + selector map → automation script, with gap reporting.
//!
//! Shared by `qah script` and `POST /script`.

use serde::Serialize;
use tracing::{info, warn};

use qa_harness_core::models::{ScriptAction, TestCase};
use qa_harness_core::script::{render_selenium, synthesize};
use qa_harness_core::selectors::{resolve, SelectorMap, SelectorResolution, TieBreak};

#[derive(Debug, Clone, Serialize)]
pub struct ScriptReport {
    pub test_id: String,
    pub script: String,
    pub ordered_actions: Vec<ScriptAction>,
    pub missing_selectors: Vec<String>,
    pub resolution: SelectorResolution,
}

pub fn build_script(
    test_case: &TestCase,
    map: &SelectorMap,
    tie_break: TieBreak,
    base_url: &str,
) -> ScriptReport {
    let resolution = resolve(map, &test_case.selectors_needed, tie_break);
    if !resolution.missing_selectors.is_empty() {
        warn!(
            test_id = %test_case.id,
            missing = ?resolution.missing_selectors,
            "unresolved selectors"
        );
    }
    let script = synthesize(test_case, &resolution, map);
    let unmatched_steps = script
        .ordered_actions
        .iter()
        .filter(|a| a.selector.is_none())
        .count();
    info!(
        test_id = %test_case.id,
        steps = script.ordered_actions.len(),
        unmatched_steps,
        "script synthesized"
    );

    ScriptReport {
        test_id: test_case.id.clone(),
        script: render_selenium(test_case, &script, base_url),
        ordered_actions: script.ordered_actions,
        missing_selectors: script.missing_selectors,
        resolution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_harness_core::models::TestType;

    #[test]
    fn test_empty_map_reports_every_request_missing() {
        let tc = TestCase {
            id: "TC-9".into(),
            feature: "Login".into(),
            scenario: "Valid login".into(),
            preconditions: vec![],
            steps: vec!["Enter \"ann\" in username".into(), "Click login".into()],
            expected_result: "Dashboard shown".into(),
            test_type: TestType::Positive,
            grounded_in: vec![],
            selectors_needed: vec!["username".into(), "login button".into()],
        };
        let report = build_script(&tc, &SelectorMap::new(), TieBreak::FirstInserted, "http://x");
        assert_eq!(report.missing_selectors, vec!["username", "login button"]);
        assert_eq!(report.ordered_actions.len(), 2);
        assert!(report.ordered_actions.iter().all(|a| a.selector.is_none()));
        assert_eq!(report.script.matches("# MISSING SELECTOR:").count(), 2);
    }
}
