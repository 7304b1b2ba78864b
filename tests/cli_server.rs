//! Integration tests for the `docqa` binary and the HTTP API.
//!
//! The binary tests run with both providers disabled, so they exercise the
//! offline paths: ingestion failures recorded on the document, the
//! explanatory "no data" answer, health reporting and reset. The HTTP test
//! serves an in-process service built from deterministic providers.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use docqa::config::Config;
use docqa::server;
use docqa::service::RagService;
use docqa_core::embedding::Embedder;
use docqa_core::llm::{Generation, GenerationOptions, LanguageModel};
use docqa_core::store::memory::InMemoryChunkStore;

fn docqa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docqa");
    path
}

fn setup_test_env(port: u16) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.txt"),
        "Alpha handbook.\n\nThe warranty covers manufacturing defects for two years.",
    )
    .unwrap();
    fs::write(files_dir.join("logo.png"), b"\x89PNG\r\n\x1a\n").unwrap();

    let config_content = format!(
        r#"[storage]
data_dir = "{root}/data"

[embedding]
provider = "disabled"

[llm]
provider = "disabled"

[server]
bind = "127.0.0.1:{port}"

[logging]
filter = "warn"
"#,
        root = root.display(),
        port = port
    );

    let config_path = config_dir.join("docqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn start_server(config_path: &Path) -> Child {
    Command::new(docqa_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to start server: {}", e))
}

/// Poll the liveness endpoint until the server answers.
fn wait_for_server(port: u16) {
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        std::thread::sleep(std::time::Duration::from_millis(100));
        if let Ok(resp) = reqwest::blocking::get(&url) {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

// ─── CLI ────────────────────────────────────────────────────────────

#[test]
fn test_documents_empty_on_fresh_data_dir() {
    let (_tmp, config_path) = setup_test_env(find_free_port());
    let (stdout, stderr, success) = run_docqa(&config_path, &["documents"]);
    assert!(success, "documents failed: {}", stderr);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_docqa(&tmp.path().join("absent.toml"), &["documents"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_ingest_without_embedder_records_error() {
    let (tmp, config_path) = setup_test_env(find_free_port());
    let file = tmp.path().join("files").join("alpha.txt");

    let (stdout, stderr, success) =
        run_docqa(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("error"));
    assert!(stdout.contains("Embedding provider is disabled"));

    let (stdout, _, _) = run_docqa(&config_path, &["documents"]);
    assert!(stdout.contains("alpha.txt"));
    assert!(stdout.contains("error"));
}

#[test]
fn test_ingest_unsupported_type_fails() {
    let (tmp, config_path) = setup_test_env(find_free_port());
    let file = tmp.path().join("files").join("logo.png");

    let (_, stderr, success) = run_docqa(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported content type"));

    let (stdout, _, _) = run_docqa(&config_path, &["documents"]);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_ask_empty_corpus_explains() {
    let (_tmp, config_path) = setup_test_env(find_free_port());
    let (stdout, stderr, success) = run_docqa(&config_path, &["ask", "What is covered?"]);
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("No documents have been indexed yet"));
}

#[test]
fn test_health_fails_when_providers_disabled() {
    let (_tmp, config_path) = setup_test_env(find_free_port());
    let (stdout, _, success) = run_docqa(&config_path, &["health"]);
    assert!(!success);
    assert!(stdout.contains("status: unhealthy"));
    assert!(stdout.contains("file_storage"));
}

#[test]
fn test_reset_requires_confirmation() {
    let (tmp, config_path) = setup_test_env(find_free_port());
    let file = tmp.path().join("files").join("alpha.txt");
    run_docqa(&config_path, &["ingest", file.to_str().unwrap()]);

    let (_, stderr, success) = run_docqa(&config_path, &["reset"]);
    assert!(!success);
    assert!(stderr.contains("--yes"));

    let (stdout, stderr, success) = run_docqa(&config_path, &["reset", "--yes"]);
    assert!(success, "reset failed: {}", stderr);
    assert!(stdout.contains("System reset"));

    let (stdout, _, _) = run_docqa(&config_path, &["documents"]);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_stats_prints_summary() {
    let (_tmp, config_path) = setup_test_env(find_free_port());
    let (stdout, stderr, success) = run_docqa(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Document QA Stats"));
    assert!(stdout.contains("Backend:     sqlite"));
    assert!(stdout.contains("Chunks:      0"));
}

#[test]
fn test_server_liveness_and_upload() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_test_env(port);

    let mut server = start_server(&config_path);
    wait_for_server(port);

    let base = format!("http://127.0.0.1:{}", port);
    let resp = reqwest::blocking::get(format!("{}/health", base)).unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());

    let client = reqwest::blocking::Client::new();
    let resp = client
        .post(format!("{}/api/document-qa/upload?filename=logo.png", base))
        .header("content-type", "image/png")
        .body(b"\x89PNG".to_vec())
        .send()
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "unsupported_content_type");

    let resp = client
        .get(format!("{}/api/document-qa/health", base))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 503);

    server.kill().ok();
    server.wait().ok();
}

// ─── In-process HTTP round trip ─────────────────────────────────────

struct WordEmbedder;

#[async_trait]
impl Embedder for WordEmbedder {
    fn model_name(&self) -> &str {
        "words"
    }
    fn dims(&self) -> usize {
        16
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 16];
                for word in t.split_whitespace() {
                    v[word.len() % 15] += 1.0;
                }
                v[15] = 1.0;
                v
            })
            .collect())
    }
}

struct EchoModel;

#[async_trait]
impl LanguageModel for EchoModel {
    fn model_name(&self) -> &str {
        "echo"
    }
    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> anyhow::Result<Generation> {
        Ok(Generation {
            text: "The warranty lasts two years (alpha.txt).".to_string(),
            usage: None,
        })
    }
}

async fn wait_for_server_async(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

#[tokio::test]
async fn test_http_document_session_question_flow() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = tmp.path().join("data");
    config.llm.provider = "disabled".to_string();

    let service = Arc::new(
        RagService::with_components(
            config,
            Arc::new(InMemoryChunkStore::new()),
            Arc::new(WordEmbedder),
            Arc::new(EchoModel),
        )
        .await
        .unwrap(),
    );
    let bind = format!("127.0.0.1:{}", port);
    let server_handle = tokio::spawn(async move {
        server::serve(service, &bind).await.ok();
    });
    wait_for_server_async(port).await;

    let client = reqwest::Client::new();
    let api = format!("http://127.0.0.1:{}/api/document-qa", port);

    // Upload
    let resp = client
        .post(format!("{}/upload?filename=alpha.txt", api))
        .header("content-type", "text/plain")
        .body("Alpha handbook. The warranty covers manufacturing defects for two years.")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let doc: Value = resp.json().await.unwrap();
    assert_eq!(doc["status"], "ready");
    let doc_id = doc["id"].as_str().unwrap().to_string();

    // Listing and lookup
    let docs: Value = client
        .get(format!("{}/documents", api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(docs.as_array().unwrap().len(), 1);

    let resp = client
        .get(format!("{}/documents/does-not-exist", api))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    // Session scope
    let session: Value = client
        .post(format!("{}/sessions", api))
        .json(&json!({"session_id": "web"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["id"], "web");

    let resp = client
        .post(format!("{}/sessions/web/documents/{}", api, doc_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let members: Value = client
        .get(format!("{}/sessions/web/documents", api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members["documents"][0]["filename"], "alpha.txt");

    // Question
    let resp = client
        .post(format!("{}/question", api))
        .json(&json!({"question": "How long is the warranty?", "session_id": "web"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let answer: Value = resp.json().await.unwrap();
    assert!(answer["answer"].as_str().unwrap().contains("two years"));
    assert_eq!(answer["sources"][0]["file_name"], "alpha.txt");
    assert!(answer["token_usage"]["total_tokens"].as_u64().unwrap() > 0);

    let resp = client
        .post(format!("{}/question", api))
        .json(&json!({"question": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Sources
    let resp = client
        .post(format!("{}/expand-source", api))
        .json(&json!({"file_name": "alpha.txt", "query": "warranty"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let expanded: Value = resp.json().await.unwrap();
    assert!(expanded["highlighted_content"].as_str().unwrap().contains("**warranty**"));

    // Delete cascades out of the session
    let resp = client
        .delete(format!("{}/documents/{}", api, doc_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let members: Value = client
        .get(format!("{}/sessions/web/documents", api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(members["documents"].as_array().unwrap().is_empty());

    let resp = client
        .delete(format!("{}/documents/{}", api, doc_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Stats and reset
    let stats: Value = client
        .get(format!("{}/stats", api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["vector_store"]["total_vectors"], 0);
    assert_eq!(stats["token_usage"]["by_operation"]["query"]["calls"], 1);

    let reset: Value = client
        .post(format!("{}/reset", api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["status"], "success");

    server_handle.abort();
}
