use std::sync::Arc;
use std::time::Duration;

use penelope::orchestrator::Assistant;
use penelope::pipeline::AssistantOptions;
use penelope::server::router;
use penelope::session::SessionManager;
use penelope::testing::{paper, FakeCollaborators};
use penelope_core::store::memory::InMemoryStore;
use serde_json::{json, Value};

/// Serve the router on an ephemeral port; returns the base URL.
async fn spawn_server(fakes: &FakeCollaborators) -> String {
    spawn_server_with_timeout(fakes, Duration::from_millis(300)).await
}

async fn spawn_server_with_timeout(fakes: &FakeCollaborators, timeout: Duration) -> String {
    let options = AssistantOptions {
        timeout,
        ..AssistantOptions::default()
    };
    let assistant = Assistant::new(fakes.collaborators(), Arc::new(InMemoryStore::new()), options);
    let app = router(Arc::new(SessionManager::new(Arc::new(assistant))));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn health_reports_version() {
    let base = spawn_server(&FakeCollaborators::new()).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn chat_summarize_then_fetch_document() {
    let fakes = FakeCollaborators::new();
    fakes
        .papers
        .set_results(vec![paper("2106.12345", "Bitcoin Paper")]);
    let base = spawn_server(&fakes).await;
    let client = reqwest::Client::new();

    let resp: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({"session_id": "s1", "message": "summarize arxiv: 2106.12345"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["kind"], "summarize_arxiv");
    assert_eq!(resp["is_error"], false);
    assert_eq!(resp["documents"][0]["id"], "2106.12345");

    let doc = client
        .get(format!("{}/kb/documents/2106.12345", base))
        .send()
        .await
        .unwrap();
    assert_eq!(doc.status(), 200);
    let doc: Value = doc.json().await.unwrap();
    assert_eq!(doc["source"], "arxiv");
    assert_eq!(doc["body"], "This paper studies Bitcoin transaction fees.");

    let stats: Value = client
        .get(format!("{}/kb/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["count"], 1);
    assert_eq!(stats["by_source"]["arxiv"], 1);

    let check: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({"session_id": "s1", "message": "check kb"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(check["kind"], "check_kb");
    assert_eq!(check["stats"]["count"], 1);
    assert_eq!(resp["documents"][0]["created_at"], doc["created_at"]);
}

#[tokio::test]
async fn failed_turn_is_a_normal_response() {
    let fakes = FakeCollaborators::new();
    fakes.papers.set_delay(Duration::from_secs(5));
    let base = spawn_server(&fakes).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({"message": "search arxiv: bitcoin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["is_error"], true);
    assert!(body["text"].as_str().unwrap().contains("paper search"));
}

#[tokio::test]
async fn missing_document_is_404() {
    let base = spawn_server(&FakeCollaborators::new()).await;
    let resp = reqwest::get(format!("{}/kb/documents/nope", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn manual_document_upload() {
    let base = spawn_server(&FakeCollaborators::new()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/kb/documents", base))
        .json(&json!({"title": "Taproot", "body": "Schnorr signatures.", "tags": ["Bitcoin"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let doc: Value = resp.json().await.unwrap();
    assert!(doc["id"].as_str().unwrap().starts_with("manual-"));
    assert_eq!(doc["tags"], json!(["bitcoin"]));

    let search: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({"message": "search kb: schnorr"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(search["documents"][0]["title"], "Taproot");

    let bad = client
        .post(format!("{}/kb/documents", base))
        .json(&json!({"title": " ", "body": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
}

#[tokio::test]
async fn speak_returns_audio() {
    let fakes = FakeCollaborators::new();
    let base = spawn_server(&fakes).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/speak", base))
        .json(&json!({"text": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "audio/mpeg");
    assert!(resp.bytes().await.unwrap().starts_with(b"ID3"));
    assert_eq!(fakes.speech.calls(), 1);

    let empty = client
        .post(format!("{}/speak", base))
        .json(&json!({"text": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);
}

#[tokio::test]
async fn different_sessions_run_concurrently() {
    let fakes = FakeCollaborators::new();
    fakes.chat.set_delay(Duration::from_millis(200));
    let base = spawn_server_with_timeout(&fakes, Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    let started = std::time::Instant::now();
    let mut handles = Vec::new();
    for session in ["a", "b", "c"] {
        let client = client.clone();
        let url = format!("{}/chat", base);
        handles.push(tokio::spawn(async move {
            client
                .post(url)
                .json(&json!({"session_id": session, "message": "hello"}))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap(), 200);
    }
    // serialized, three turns would take at least 600ms
    assert!(started.elapsed() < Duration::from_millis(550));
}
