use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn qah_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("qah");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("guides")).unwrap();
    fs::write(
        docs_dir.join("checkout.md"),
        "# Checkout\n\nCheckout allows discount codes. A valid code reduces the order total.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("guides/errors.txt"),
        "Errors show in red banner above the form.",
    )
    .unwrap();
    fs::write(docs_dir.join("empty.md"), "").unwrap();
    fs::write(docs_dir.join("logo.png"), "not a document").unwrap();

    let pages_dir = root.join("pages");
    fs::create_dir_all(&pages_dir).unwrap();
    fs::write(
        pages_dir.join("checkout.html"),
        r#"<html><body>
<input type="text" id="discount" name="discount_code">
<button id="apply">Apply</button>
<div class="error-banner"></div>
</body></html>"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[index]
path = "{root}/data/kb.json"

[chunking]
chunk_size = 200
chunk_overlap = 20

[retrieval]
top_k = 3

[embedding]
provider = "hash"
dims = 256

[script]
base_url = "http://shop.test/checkout"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("qah.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_qah(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = qah_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run qah binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, stdout))
}

fn root_of(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().to_path_buf()
}

#[test]
fn test_build_skips_empty_documents() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);

    let docs = root.join("docs");
    let (stdout, stderr, success) = run_qah(&config_path, &["build", docs.to_str().unwrap()]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);

    let out = json(&stdout);
    assert_eq!(out["status"], "ok");
    assert_eq!(out["distinct_sources"], 2);
    assert_eq!(out["model"], "fnv1a-256");
    assert_eq!(out["skipped_documents"], serde_json::json!(["empty.md"]));
    assert_eq!(
        out["sources"],
        serde_json::json!(["checkout.md", "guides/errors.txt"])
    );
    assert!(root.join("data/kb.json").exists());
    assert!(stderr.contains("skipping document with no text"));
}

#[test]
fn test_info_reports_index() {
    let (_tmp, config_path) = setup_test_env();
    let docs = root_of(&config_path).join("docs");

    let (stdout, _, success) = run_qah(&config_path, &["info"]);
    assert!(success);
    let out = json(&stdout);
    assert_eq!(out["index"]["resident"], false);
    assert!(out["load_error"].as_str().unwrap().contains("no index found"));

    run_qah(&config_path, &["build", docs.to_str().unwrap()]);
    let (stdout, _, success) = run_qah(&config_path, &["info"]);
    assert!(success);
    let out = json(&stdout);
    assert_eq!(out["index"]["resident"], true);
    assert_eq!(out["index"]["model"], "fnv1a-256");
    assert_eq!(out["index"]["dims"], 256);
    assert_eq!(out["index"]["active_model"], "fnv1a-256");
    assert_eq!(out["embedding_provider"], "hash");
}

#[test]
fn test_search_returns_citations() {
    let (_tmp, config_path) = setup_test_env();
    let docs = root_of(&config_path).join("docs");
    run_qah(&config_path, &["build", docs.to_str().unwrap()]);

    let (stdout, stderr, success) =
        run_qah(&config_path, &["search", "discount codes", "--top-k", "1"]);
    assert!(success, "search failed: stderr={}", stderr);
    let out = json(&stdout);
    let results = out["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["citation"], "checkout.md (chunk_0)");
}

#[test]
fn test_search_without_index_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_qah(&config_path, &["search", "anything"]);
    assert!(!success);
    assert!(stderr.contains("knowledge base unavailable"));
}

#[test]
fn test_failed_build_keeps_previous_index() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    run_qah(&config_path, &["build", root.join("docs").to_str().unwrap()]);
    let before = fs::read(root.join("data/kb.json")).unwrap();

    let blank = root.join("blank");
    fs::create_dir_all(&blank).unwrap();
    fs::write(blank.join("a.md"), "   \n").unwrap();

    let (stdout, _, success) = run_qah(&config_path, &["build", blank.to_str().unwrap()]);
    assert!(!success);
    assert_eq!(json(&stdout)["status"], "error");
    assert_eq!(fs::read(root.join("data/kb.json")).unwrap(), before);
}

#[test]
fn test_add_appends_to_index() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    run_qah(&config_path, &["build", root.join("docs").to_str().unwrap()]);

    let extra = root.join("login.md");
    fs::write(&extra, "Login requires an email and a password.").unwrap();
    let (stdout, stderr, success) = run_qah(&config_path, &["add", extra.to_str().unwrap()]);
    assert!(success, "add failed: stderr={}", stderr);
    let out = json(&stdout);
    assert_eq!(out["chunk_count"], 1);
    assert_eq!(out["total_chunks"], 3);
    assert_eq!(
        out["sources"],
        serde_json::json!(["checkout.md", "guides/errors.txt", "login.md"])
    );
}

#[test]
fn test_generate_requires_generation_provider() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    run_qah(&config_path, &["build", root.join("docs").to_str().unwrap()]);

    let (stdout, _, success) = run_qah(&config_path, &["generate", "discount codes"]);
    assert!(!success);
    let out = json(&stdout);
    assert_eq!(out["status"], "error");
    assert!(out["message"].as_str().unwrap().contains("disabled"));
}

#[test]
fn test_selectors_command() {
    let (_tmp, config_path) = setup_test_env();
    let page = root_of(&config_path).join("pages/checkout.html");

    let (stdout, stderr, success) = run_qah(&config_path, &["selectors", page.to_str().unwrap()]);
    assert!(success, "selectors failed: stderr={}", stderr);
    let out = json(&stdout);
    assert_eq!(out["input_discount_code"]["css_selector"], "#discount");
    assert_eq!(out["button_apply"]["element_kind"], "button");
    assert_eq!(out["div_error_message"]["element_kind"], "message");
}

#[test]
fn test_script_marks_missing_selectors() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    let cases = root.join("cases.json");
    fs::write(
        &cases,
        r#"[{"Test_ID": "TC-007", "Feature": "Discounts", "Test_Scenario": "Apply a code",
            "Preconditions": ["Cart has items"],
            "Steps": ["Enter \"SAVE10\" in the discount code field", "Click apply", "Enter phone number"],
            "Expected_Result": "Total is reduced", "Test_Type": "positive",
            "Grounded_In": ["checkout.md (chunk_0)"],
            "SelectorsNeeded": ["discount", "apply", "phone"]}]"#,
    )
    .unwrap();
    let page = root.join("pages/checkout.html");

    let (stdout, stderr, success) = run_qah(
        &config_path,
        &["script", cases.to_str().unwrap(), "--page", page.to_str().unwrap()],
    );
    assert!(success, "script failed: stderr={}", stderr);
    assert!(stdout.contains("class TestTc007(unittest.TestCase):"));
    assert!(stdout.contains("self.driver.get(\"http://shop.test/checkout\")"));
    assert!(stdout.contains("find_element(By.CSS_SELECTOR, \"#discount\").send_keys(\"SAVE10\")"));
    assert!(stdout.contains("find_element(By.CSS_SELECTOR, \"#apply\").click()"));
    assert!(stdout.contains("# MISSING SELECTOR:"));
    assert!(stdout.contains("# WARNING: missing selectors: phone"));

    let (stdout, _, success) = run_qah(
        &config_path,
        &[
            "script",
            cases.to_str().unwrap(),
            "--page",
            page.to_str().unwrap(),
            "--json",
        ],
    );
    assert!(success);
    let out = json(&stdout);
    assert_eq!(out["missing_selectors"], serde_json::json!(["phone"]));
    assert_eq!(out["ordered_actions"].as_array().unwrap().len(), 3);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_qah(&tmp.path().join("nope.toml"), &["info"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
