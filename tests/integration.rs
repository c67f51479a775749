use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn logcopilot_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_logcopilot"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let logs_dir = root.join("logs");
    fs::create_dir_all(logs_dir.join("k8s")).unwrap();
    fs::write(
        logs_dir.join("auth.log"),
        "ERROR pod-7 auth failed\nERROR pod-7 auth failed\nINFO ok",
    )
    .unwrap();
    fs::write(
        logs_dir.join("k8s/scheduler.log"),
        "WARN node-2 disk pressure\nINFO rescheduling pod-4 to node-3",
    )
    .unwrap();
    fs::write(logs_dir.join("core.dump"), [0u8, 1, 2, 3]).unwrap();

    let config_content = format!(
        r#"[data]
dir = "{root}/data"

[embedding]
provider = "hash"
dims = 128

[watch]
enabled = false

[[generation.backends]]
kind = "ollama"
model = "llama3.2"
url = "http://127.0.0.1:9"
timeout_secs = 2
"#,
        root = root.display()
    );

    let config_path = config_dir.join("logcopilot.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_logcopilot(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(logcopilot_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run logcopilot");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_status_on_fresh_store() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_logcopilot(&config, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("vectors:    0"));
    assert!(stdout.contains("dimension:  unbound"));
}

#[test]
fn test_ingest_directory_then_query_json() {
    let (tmp, config) = setup_test_env();
    let logs = tmp.path().join("logs");

    let (stdout, stderr, success) = run_logcopilot(&config, &["ingest", logs.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("2 files"), "unexpected output: {}", stdout);

    let (stdout, stderr, success) =
        run_logcopilot(&config, &["query", "auth failures", "--k", "2", "--json"]);
    assert!(success, "query failed: {}", stderr);

    let answer: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(answer["backend"], "extractive");
    assert!(answer["confidence"].as_f64().unwrap() > 0.0);
    assert!(answer["generation_error"].is_string());
    let evidence = answer["evidence"].as_array().unwrap();
    assert_eq!(evidence.len(), 2);
    assert!(evidence[0]["chunk_text"]
        .as_str()
        .unwrap()
        .contains("auth failed"));
}

#[test]
fn test_ingest_explicit_binary_file_fails() {
    let (tmp, config) = setup_test_env();
    let dump = tmp.path().join("logs/core.dump");
    let (_stdout, stderr, success) = run_logcopilot(&config, &["ingest", dump.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("binary_content"));
}

#[test]
fn test_empty_query_rejected() {
    let (_tmp, config) = setup_test_env();
    let (_stdout, stderr, success) = run_logcopilot(&config, &["query", "  "]);
    assert!(!success);
    assert!(stderr.contains("query must not be empty"));
}

#[test]
fn test_data_survives_between_invocations() {
    let (tmp, config) = setup_test_env();
    let logs = tmp.path().join("logs");
    run_logcopilot(&config, &["ingest", logs.to_str().unwrap()]);
    let (first, _, _) = run_logcopilot(&config, &["query", "disk pressure", "--json"]);
    let (second, _, _) = run_logcopilot(&config, &["query", "disk pressure", "--json"]);

    let a: serde_json::Value = serde_json::from_str(&first).unwrap();
    let b: serde_json::Value = serde_json::from_str(&second).unwrap();
    assert_eq!(a["evidence"], b["evidence"]);

    let (stdout, _, _) = run_logcopilot(&config, &["status"]);
    assert!(stdout.contains("vectors:    2"));
    assert!(stdout.contains("documents:  2"));
}
