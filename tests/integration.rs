//! End-to-end tests against the real `ragforge` binary: spawn it as a
//! subprocess bound to a scratch port with `DEMO_MODE=1` and an on-disk
//! SQLite file under a temp dir, then drive its HTTP surface with `reqwest`.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;

fn ragforge_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragforge");
    path
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

struct ServerHandle {
    child: Child,
    base_url: String,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

async fn spawn_server(tmp: &TempDir) -> ServerHandle {
    let port = free_port();
    let db_path = tmp.path().join("ragforge.sqlite3");

    let child = Command::new(ragforge_binary())
        .env("DEMO_MODE", "1")
        .env("BIND_ADDR", format!("127.0.0.1:{port}"))
        .env("DB_PATH", db_path.to_str().unwrap())
        .env("SEARCH_CACHE_TTL_SEC", "3600")
        .spawn()
        .unwrap_or_else(|e| panic!("failed to spawn ragforge binary: {e}"));

    let base_url = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();

    for _ in 0..100 {
        if client.get(format!("{base_url}/status")).send().await.is_ok() {
            return ServerHandle { child, base_url };
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server did not become ready at {base_url}");
}

async fn upload(client: &reqwest::Client, base_url: &str, filename: &str, text: &str, force: bool) -> serde_json::Value {
    let part = reqwest::multipart::Part::text(text.to_string()).file_name(filename.to_string());
    let mut form = reqwest::multipart::Form::new().part("file", part);
    if force {
        form = form.text("force", "true");
    }
    let response = client.post(format!("{base_url}/api/process/upload")).multipart(form).send().await.unwrap();
    assert!(response.status().is_success(), "upload failed: {}", response.status());
    response.json().await.unwrap()
}

#[tokio::test]
async fn healthz_is_a_cheap_liveness_probe() {
    let tmp = TempDir::new().unwrap();
    let server = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/healthz", server.base_url)).send().await.unwrap();
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn status_reports_demo_mode() {
    let tmp = TempDir::new().unwrap();
    let server = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client.get(format!("{}/status", server.base_url)).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["demo_mode"], serde_json::json!(true));
    assert_eq!(body["vector_store_ok"], serde_json::json!(true));
}

#[tokio::test]
async fn upload_then_search_finds_document() {
    let tmp = TempDir::new().unwrap();
    let server = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    upload(&client, &server.base_url, "mvp.txt", "Supervised learning uses labeled training data.", false).await;

    let response = client
        .post(format!("{}/api/search", server.base_url))
        .json(&serde_json::json!({"query": "Supervised learning uses labeled training data.", "top_k": 5}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["results"][0]["document"], serde_json::json!("mvp.txt"));
}

#[tokio::test]
async fn upload_then_ask_returns_sourced_answer() {
    let tmp = TempDir::new().unwrap();
    let server = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    upload(&client, &server.base_url, "mvp.txt", "Supervised learning uses labeled training data.", false).await;

    let response = client
        .post(format!("{}/api/ask", server.base_url))
        .json(&serde_json::json!({"question": "What does supervised learning use?"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["sources"], serde_json::json!(["mvp.txt"]));
}

#[tokio::test]
async fn duplicate_upload_without_force_reports_already_exists() {
    let tmp = TempDir::new().unwrap();
    let server = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    upload(&client, &server.base_url, "a.txt", "hello world", false).await;
    let second = upload(&client, &server.base_url, "a.txt", "hello world", false).await;
    assert_eq!(second["status"], serde_json::json!("already_exists"));
}

#[tokio::test]
async fn empty_query_search_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let server = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/search", server.base_url))
        .json(&serde_json::json!({"query": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn clear_documents_empties_registry() {
    let tmp = TempDir::new().unwrap();
    let server = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    upload(&client, &server.base_url, "a.txt", "hello world", false).await;
    let listed: serde_json::Value = client.get(format!("{}/api/documents", server.base_url)).send().await.unwrap().json().await.unwrap();
    assert!(listed.get("a.txt").is_some());

    let response = client.delete(format!("{}/api/documents", server.base_url)).send().await.unwrap();
    assert!(response.status().is_success());

    let listed: serde_json::Value = client.get(format!("{}/api/documents", server.base_url)).send().await.unwrap().json().await.unwrap();
    assert_eq!(listed, serde_json::json!({}));
}

#[tokio::test]
async fn logical_summaries_require_prior_basic_ingest() {
    let tmp = TempDir::new().unwrap();
    let server = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    let response = client.post(format!("{}/api/process/missing.txt/summaries", server.base_url)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
