//! HTTP server and directory watcher, driven end to end.

use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;

use log_copilot::app::App;
use log_copilot::config::Config;
use log_copilot::server::router;

fn test_config(tmp: &TempDir) -> Config {
    let content = format!(
        r#"
[data]
dir = "{root}/vectors"

[embedding]
provider = "hash"
dims = 64

[watch]
dir = "{root}/logs"
debounce_ms = 50

[[generation.backends]]
kind = "ollama"
model = "llama3.2"
url = "http://127.0.0.1:9"
timeout_secs = 2
"#,
        root = tmp.path().display()
    );
    toml::from_str(&content).unwrap()
}

/// Serve the app on an ephemeral port; returns the base URL.
async fn spawn_server(app: &App) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let routes = router(app.state());
    tokio::spawn(async move {
        axum::serve(listener, routes).await.unwrap();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Server did not become ready within 5 seconds");
}

#[tokio::test]
async fn test_health_and_status() {
    let tmp = TempDir::new().unwrap();
    let app = App::open(test_config(&tmp)).await.unwrap();
    let base = spawn_server(&app).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let status: Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["vectors"], 0);
    assert_eq!(status["metric"], "l2");
    assert!(status["dimension"].is_null());
    assert_eq!(status["generation_chain"][0], "ollama:llama3.2");
    assert_eq!(status["generation_chain"][1], "extractive");
}

#[tokio::test]
async fn test_ingest_then_query_falls_back() {
    let tmp = TempDir::new().unwrap();
    let app = App::open(test_config(&tmp)).await.unwrap();
    let base = spawn_server(&app).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/ingest", base))
        .json(&serde_json::json!({
            "doc_id": "auth.log",
            "content": "ERROR pod-7 auth failed\nERROR pod-7 auth failed\nINFO ok"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["chunks_indexed"], 1);

    let resp = client
        .post(format!("{}/query", base))
        .json(&serde_json::json!({"query": "auth failures", "k": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let answer: Value = resp.json().await.unwrap();
    assert_eq!(answer["query"], "auth failures");
    assert!(answer["confidence"].as_f64().unwrap() > 0.0);
    assert!(answer["evidence"][0]["chunk_text"]
        .as_str()
        .unwrap()
        .contains("auth failed"));
    assert_eq!(answer["evidence"][0]["doc_id"], "auth.log");
    assert!(answer["generation_error"].is_string());
}

#[tokio::test]
async fn test_validation_errors_are_client_errors() {
    let tmp = TempDir::new().unwrap();
    let app = App::open(test_config(&tmp)).await.unwrap();
    let base = spawn_server(&app).await;
    let client = reqwest::Client::new();

    for body in [serde_json::json!({}), serde_json::json!({"query": "   "})] {
        let resp = client
            .post(format!("{}/query", base))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"]["code"], "empty_query");
    }

    let resp = client
        .post(format!("{}/ingest", base))
        .json(&serde_json::json!({"doc_id": "blank.log", "content": "\n \n"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "empty_document");

    let resp = client
        .post(format!("{}/ingest/raw/core.bin", base))
        .body(vec![0u8, 159, 146, 150])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "binary_content");

    let resp = client
        .post(format!("{}/query", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert_eq!(app.store.len().await, 0);
}

#[tokio::test]
async fn test_raw_ingest() {
    let tmp = TempDir::new().unwrap();
    let app = App::open(test_config(&tmp)).await.unwrap();
    let base = spawn_server(&app).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/ingest/raw/nginx.log", base))
        .body("WARN upstream timed out\nERROR 502 bad gateway")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["doc_id"], "nginx.log");
    assert_eq!(app.store.len().await, 1);
}

#[tokio::test]
async fn test_watcher_ingests_existing_and_new_files() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    std::fs::create_dir_all(&cfg.watch.dir).unwrap();
    std::fs::write(cfg.watch.dir.join("boot.log"), "INFO service started").unwrap();

    let app = App::open(cfg.clone()).await.unwrap();
    let _watch = app.start_watching().await.unwrap().unwrap();
    assert_eq!(app.store.len().await, 1);

    std::fs::write(cfg.watch.dir.join("ignored.png"), "not a log").unwrap();
    std::fs::write(cfg.watch.dir.join("garbage.log"), [0u8, 1, 2, 3]).unwrap();
    std::fs::write(
        cfg.watch.dir.join("crash.log"),
        "ERROR pod-3 out of memory\nWARN restarting pod-3",
    )
    .unwrap();

    let mut found = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let answer = app.engine.answer("out of memory", Some(5)).await.unwrap();
        if answer.evidence.iter().any(|e| e.doc_id == "crash.log") {
            found = true;
            break;
        }
    }
    assert!(found, "watcher did not ingest crash.log");
    assert_eq!(
        app.store.verify_alignment().await.unwrap(),
        app.store.len().await
    );
}

#[tokio::test]
async fn test_restart_does_not_reingest_watched_files() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    std::fs::create_dir_all(&cfg.watch.dir).unwrap();
    std::fs::write(cfg.watch.dir.join("boot.log"), "INFO service started").unwrap();

    for _ in 0..3 {
        let app = App::open(cfg.clone()).await.unwrap();
        let watch = app.start_watching().await.unwrap();
        assert_eq!(app.store.len().await, 1);
        drop(watch);
        app.shutdown().await;
    }

    // A file that arrived while the server was down is picked up.
    std::fs::write(cfg.watch.dir.join("late.log"), "WARN disk at 91 percent").unwrap();
    let app = App::open(cfg.clone()).await.unwrap();
    let _watch = app.start_watching().await.unwrap();
    assert_eq!(app.store.len().await, 2);
    assert_eq!(app.store.stats().await.unwrap().documents, 2);
    app.shutdown().await;
}
