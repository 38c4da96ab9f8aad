//! HTTP API tests against a server bound to an ephemeral port.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use code_sage::app::{Components, Services};
use code_sage::config::{
    Config, DbConfig, EmbeddingConfig, GithubConfig, IndexingConfig, LlmConfig, RetrievalConfig,
    ServerConfig,
};
use code_sage::embedding::create_embedder;
use code_sage::llm::create_model;
use code_sage::server;
use code_sage::walker::{RepoSnapshot, RepositorySource};
use code_sage_core::prompt::INSUFFICIENT_CONTEXT_ANSWER;
use code_sage_core::store::memory::InMemoryStore;

/// An empty repository whose listing waits until the test opens the gate.
struct GatedRepo {
    gate: Semaphore,
}

#[async_trait]
impl RepositorySource for GatedRepo {
    async fn list_files(&self, _repo_url: &str, _token: Option<&str>) -> Result<RepoSnapshot> {
        let _permit = self.gate.acquire().await?;
        Ok(RepoSnapshot::default())
    }
}

fn test_config() -> Config {
    Config {
        db: DbConfig {
            path: PathBuf::from("unused.sqlite"),
        },
        github: GithubConfig::default(),
        llm: LlmConfig::default(),
        chat_llm: None,
        embedding: EmbeddingConfig::default(),
        indexing: IndexingConfig::default(),
        retrieval: RetrievalConfig::default(),
        server: ServerConfig::default(),
    }
}

async fn start() -> (String, Arc<GatedRepo>) {
    let config = test_config();
    let repo = Arc::new(GatedRepo {
        gate: Semaphore::new(0),
    });
    let services = Services::from_components(
        config.clone(),
        Components {
            store: Arc::new(InMemoryStore::new()),
            source: repo.clone(),
            model: create_model(&config.llm).unwrap(),
            chat_model: create_model(config.chat_llm()).unwrap(),
            embedder: create_embedder(&config.embedding).unwrap(),
        },
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(server::serve(listener, services));
    (base, repo)
}

async fn create_project(client: &reqwest::Client, base: &str) -> String {
    let resp = client
        .post(format!("{}/projects", base))
        .json(&json!({ "name": "demo", "repoUrl": "https://github.com/acme/demo" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_version() {
    let (base, _) = start().await;
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
async fn project_lifecycle_and_error_contract() {
    let (base, _) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/projects", base))
        .json(&json!({ "name": "demo", "repoUrl": "https://example.com/not-github" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_repo_url");

    let id = create_project(&client, &base).await;

    let list: Value = client
        .get(format!("{}/projects", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["repoUrl"], "https://github.com/acme/demo");
    assert!(list[0].get("accessToken").is_none());

    let resp = client
        .delete(format!("{}/projects/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .get(format!("{}/projects/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .delete(format!("{}/projects/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn second_index_request_conflicts_while_a_run_is_in_flight() {
    let (base, repo) = start().await;
    let client = reqwest::Client::new();
    let id = create_project(&client, &base).await;

    let progress: Value = client
        .get(format!("{}/projects/{}/progress", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        progress,
        json!({ "currentStep": 0, "totalSteps": 0, "failedSteps": 0, "isFinished": false })
    );

    let resp = client
        .post(format!("{}/projects/{}/index", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["projectId"], id.as_str());
    assert_eq!(body["status"], "indexing");

    let resp = client
        .post(format!("{}/projects/{}/index?full=true", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "indexing_in_progress");

    repo.gate.add_permits(1);
    let mut finished = false;
    for _ in 0..100 {
        let progress: Value = client
            .get(format!("{}/projects/{}/progress", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if progress["isFinished"] == true {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(finished, "indexing run never finished");
}

#[tokio::test]
async fn ask_streams_an_error_then_the_fallback_when_retrieval_fails() {
    let (base, _) = start().await;
    let client = reqwest::Client::new();
    let id = create_project(&client, &base).await;

    let resp = client
        .post(format!("{}/projects/{}/ask", base, id))
        .json(&json!({ "question": "Where is login handled?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = resp.text().await.unwrap();
    let references = body.find("event: references").unwrap();
    let error = body.find("event: error").unwrap();
    let delta = body.find("event: delta").unwrap();
    let done = body.find("event: done").unwrap();
    assert!(references < error && error < delta && delta < done, "{}", body);
    assert!(body.contains(INSUFFICIENT_CONTEXT_ANSWER));
}

#[tokio::test]
async fn ask_on_unknown_project_is_not_found() {
    let (base, _) = start().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/projects/nope/ask", base))
        .json(&json!({ "question": "anything?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn saved_questions_list_newest_first() {
    let (base, _) = start().await;
    let client = reqwest::Client::new();
    let id = create_project(&client, &base).await;

    for question in ["first?", "second?"] {
        let resp = client
            .post(format!("{}/projects/{}/questions", base, id))
            .json(&json!({
                "userId": "u1",
                "question": question,
                "answer": "because",
                "fileReferences": [
                    { "fileName": "src/auth.rs", "summary": "login", "sourceCode": "fn login() {}", "similarity": 0.9 }
                ]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let list: Value = client
        .get(format!("{}/projects/{}/questions", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["question"], "second?");
    assert_eq!(list[0]["fileReferences"][0]["fileName"], "src/auth.rs");
}
