//! HTTP API tests against a server bound to an ephemeral port.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    minimal_pdf_with_phrase, open_library, test_config, ContextEchoGenerator, FailingGenerator,
};
use folio_core::generation::Generator;
use folio::server::{router, AppState};
use folio::sessions::SessionStore;
use folio_core::chat::{RetrievalParams, DONT_KNOW};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Start the API on 127.0.0.1 with a random port; returns the base URL.
async fn start_server(tmp: &TempDir) -> String {
    start_server_with(tmp, Arc::new(ContextEchoGenerator)).await
}

async fn start_server_with(tmp: &TempDir, generator: Arc<dyn Generator>) -> String {
    let cfg = test_config(tmp);
    let library = Arc::new(open_library(&cfg).await);
    let sessions = Arc::new(SessionStore::new(
        library.retriever(generator, RetrievalParams::default()),
    ));
    let app = router(AppState::new(library, sessions), &cfg.server.allowed_origins).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn wait_for_documents(client: &reqwest::Client, base: &str, expected: u64) -> Value {
    for _ in 0..50 {
        let stats: Value = client
            .get(format!("{}/documents", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if stats["total_files"] == json!(expected) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("documents did not reach {} within 5 seconds", expected);
}

#[tokio::test]
async fn test_health_and_root() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
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
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let resp = client.get(&base).send().await.unwrap();
    assert!(resp.status().is_success());
}

#[tokio::test]
async fn test_upload_chat_delete_flow() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part(
        "files",
        reqwest::multipart::Part::bytes(minimal_pdf_with_phrase()).file_name("report.pdf"),
    );
    let resp = client
        .post(format!("{}/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["files_processed"], 1);
    let saved = body["files"][0].as_str().unwrap().to_string();
    assert!(saved.ends_with("_report.pdf"));

    let stats = wait_for_documents(&client, &base, 1).await;
    assert_eq!(stats["files"][0], json!(saved));
    assert!(stats["last_updated"].is_string());

    let reply: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "What is the phrase?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(reply["response"].as_str().unwrap().contains("demo test phrase"));
    let session_id = reply["session_id"].as_str().unwrap().to_string();
    assert!(reply["timestamp"].is_string());

    let history: Value = client
        .get(format!("{}/chat/history/{}", base, session_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["history"].as_array().unwrap().len(), 1);
    assert_eq!(history["history"][0]["user_message"], "What is the phrase?");

    let resp = client
        .delete(format!("{}/documents/{}", base, saved))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    wait_for_documents(&client, &base, 0).await;

    // Same session, now-empty index.
    let reply: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "And now?", "session_id": session_id }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["response"], DONT_KNOW);
}

#[tokio::test]
async fn test_unsupported_upload_rejected() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part(
        "files",
        reqwest::multipart::Part::bytes(b"MZ".to_vec()).file_name("setup.exe"),
    );
    let resp = client
        .post(format!("{}/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_format");

    let stats = wait_for_documents(&client, &base, 0).await;
    assert_eq!(stats["index_size"], 0);
    assert_eq!(std::fs::read_dir(tmp.path().join("docs")).unwrap().count(), 0);
}

#[tokio::test]
async fn test_not_found_errors() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .delete(format!("{}/documents/x.txt", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .get(format!("{}/chat/history/nope", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .delete(format!("{}/chat/history/nope", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_empty_chat_message_rejected() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_chat_failure_does_not_leak_provider_error() {
    let tmp = TempDir::new().unwrap();
    let base = start_server_with(&tmp, Arc::new(FailingGenerator)).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part(
        "files",
        reqwest::multipart::Part::bytes(b"Some indexed notes.".to_vec()).file_name("notes.txt"),
    );
    let resp = client
        .post(format!("{}/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    wait_for_documents(&client, &base, 1).await;

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "What do the notes say?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "chat_failed");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(!message.is_empty());
    assert!(!message.contains("sk-abc123"));
    assert!(!message.contains("/srv/internal/path"));
}

#[tokio::test]
async fn test_failed_upload_write_reports_generic_error() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    // Watched root vanishes underneath the server.
    std::fs::remove_dir_all(tmp.path().join("docs")).unwrap();

    let form = reqwest::multipart::Form::new().part(
        "files",
        reqwest::multipart::Part::bytes(b"text".to_vec()).file_name("a.txt"),
    );
    let resp = client
        .post(format!("{}/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "io");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(!message.contains(tmp.path().to_str().unwrap()));
}
