//! End-to-end tests for the HTTP API.
//!
//! Each test starts the real server on a free port over a fresh database
//! and index, then drives it with `reqwest`.

use async_trait::async_trait;
use relay_search::config::Config;
use relay_search::relay::Relay;
use relay_search::server::{router, run_server};
use relay_search_core::models::{Filter, Record};
use relay_search_core::store::{EventStore, PageCursor};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir, port: u16, reindex: &str) -> Config {
    let toml = format!(
        r#"[db]
path = "{root}/relay.sqlite"

[index]
root = "{root}/search"
writer_heap_bytes = 15000000

[server]
bind = "127.0.0.1:{port}"

[reindex]
{reindex}
"#,
        root = tmp.path().display(),
    );
    toml::from_str(&toml).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

struct TestServer {
    _tmp: TempDir,
    base: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(reindex: &str) -> Self {
        let port = find_free_port();
        let tmp = TempDir::new().unwrap();
        let cfg = test_config(&tmp, port, reindex);
        let handle = tokio::spawn(async move {
            run_server(&cfg).await.unwrap();
        });
        wait_for_server(port).await;
        Self {
            _tmp: tmp,
            base: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn save(&self, id: &str, name: &str, created_at: i64) {
        let resp = self
            .client
            .post(self.url("/events"))
            .json(&json!({
                "id": id,
                "pubkey": "pk",
                "created_at": created_at,
                "kind": 31237,
                "tags": [["name", name]],
                "content": "",
                "sig": "sig",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["saved"], true);
    }

    async fn query(&self, filter: Value) -> Vec<String> {
        let resp = self
            .client
            .post(self.url("/query"))
            .json(&filter)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap().to_string())
            .collect()
    }

    async fn status(&self) -> Value {
        self.client
            .get(self.url("/admin/indexing-status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn wait_for_phase(&self, phase: &str) -> Value {
        for _ in 0..200 {
            let status = self.status().await;
            if status["phase"] == phase {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("indexing never reached phase {phase}");
    }
}

/// A primary store whose backend is unreachable.
struct UnreachableStore;

#[async_trait]
impl EventStore for UnreachableStore {
    async fn save(&self, _: &Record) -> anyhow::Result<bool> {
        anyhow::bail!("database is locked")
    }
    async fn delete(&self, _: &str) -> anyhow::Result<bool> {
        anyhow::bail!("database is locked")
    }
    async fn query_by_ids(&self, _: &[String]) -> anyhow::Result<Vec<Record>> {
        anyhow::bail!("database is locked")
    }
    async fn query_by_filter(&self, _: &Filter) -> anyhow::Result<Vec<Record>> {
        anyhow::bail!("database is locked")
    }
    async fn count_by_filter(&self, _: &Filter) -> anyhow::Result<u64> {
        anyhow::bail!("database is locked")
    }
    async fn page_by_created_at(
        &self,
        _: &Filter,
        _: usize,
        _: Option<&PageCursor>,
    ) -> anyhow::Result<Vec<Record>> {
        anyhow::bail!("database is locked")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let server = TestServer::start("").await;
    let body: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_search_puts_exact_name_first() {
    let server = TestServer::start("").await;
    server.save("fm", "Jazz Radio FM", 30).await;
    server.save("jr", "Jazz Radio", 10).await;
    server.save("rock", "Rock Radio", 20).await;

    let ids = server.query(json!({ "search": "Jazz Radio" })).await;
    assert_eq!(&ids[..2], &["jr", "fm"]);
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len(), "no record may appear twice");
}

#[tokio::test]
async fn test_operator_only_search_equals_plain_filter() {
    let server = TestServer::start("").await;
    for i in 0..3 {
        server.save(&format!("s{i}"), &format!("Station {i}"), i).await;
    }

    let plain = server.query(json!({ "kinds": [31237] })).await;
    let degenerate = server
        .query(json!({ "kinds": [31237], "search": "((()))" }))
        .await;
    assert_eq!(plain, degenerate);
    assert_eq!(plain, vec!["s2", "s1", "s0"]);
}

#[tokio::test]
async fn test_get_and_delete() {
    let server = TestServer::start("").await;
    server.save("a", "Blues Cafe", 1).await;

    let resp = server.client.get(server.url("/events/a")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind_name"], "Radio Station");
    assert_eq!(body["pubkey"], "pk");

    let resp = server.client.delete(server.url("/events/a")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(server.query(json!({ "search": "blues" })).await.is_empty());

    let resp = server.client.delete(server.url("/events/a")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_get_unknown_id_is_not_found() {
    let server = TestServer::start("").await;
    let resp = server.client.get(server.url("/events/nope")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_store_failure_is_internal_error() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, port, "");
    let relay = Arc::new(Relay::new(&cfg, Arc::new(UnreachableStore), None));
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router(relay)).await.unwrap();
    });
    wait_for_server(port).await;

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/events/abc", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "internal");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("database is locked"));
    handle.abort();
}

#[tokio::test]
async fn test_oversized_limit_is_clamped() {
    let server = TestServer::start("").await;
    for i in 0..3 {
        server.save(&format!("s{i}"), &format!("Jazz {i}"), i).await;
    }

    let ids = server
        .query(json!({ "search": "jazz", "limit": 1_000_000_000_000_000u64 }))
        .await;
    assert_eq!(ids.len(), 3);
    let health = server.client.get(server.url("/health")).send().await.unwrap();
    assert!(health.status().is_success());
}

#[tokio::test]
async fn test_reset_index_conflict_while_running() {
    let server = TestServer::start("batch_size = 1\npause_ms = 150").await;
    for i in 0..4 {
        server.save(&format!("s{i}"), &format!("Station {i}"), i).await;
    }

    let first = server
        .client
        .post(server.url("/admin/reset-search-index"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 202);
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["status"], "accepted");

    let running = server.wait_for_phase("indexing").await;
    assert_eq!(running["is_indexing"], true);

    let second = server
        .client
        .post(server.url("/admin/reset-search-index"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["error"]["code"], "conflict");
    assert_eq!(body["error"]["message"], "indexing already in progress");

    let done = server.wait_for_phase("completed").await;
    assert_eq!(done["processed"], 4);
    assert_eq!(done["total"], 4);
    assert_eq!(done["percent"], 100.0);
    assert_eq!(done["is_indexing"], false);
    assert_eq!(done["generation"], done["live_generation"]);

    assert_eq!(server.query(json!({ "search": "station" })).await.len(), 4);
}

#[tokio::test]
async fn test_inspect_search() {
    let server = TestServer::start("").await;
    server.save("a", "Jazz Radio", 1).await;

    let body: Value = server
        .client
        .get(server.url("/admin/inspect-search?q=jazz%20include:spam&limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["terms"], json!(["jazz"]));
    assert_eq!(body["extensions"]["include"], "spam");
    assert_eq!(body["hits"][0]["id"], "a");
    assert_eq!(body["hits"][0]["name"], "Jazz Radio");

    let resp = server
        .client
        .get(server.url("/admin/inspect-search"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_idle_status() {
    let server = TestServer::start("").await;
    let status = server.status().await;
    assert_eq!(status["phase"], "idle");
    assert_eq!(status["is_indexing"], false);
    assert_eq!(status["processed"], 0);
    assert!(status["error"].is_null());
}
