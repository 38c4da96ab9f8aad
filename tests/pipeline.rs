//! End-to-end pipeline tests with in-process fakes: a fixed repository,
//! an echoing model, and a keyword embedder over the in-memory store.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use code_sage::app::{Components, Services};
use code_sage::config::{
    Config, DbConfig, EmbeddingConfig, GithubConfig, IndexingConfig, LlmConfig, RetrievalConfig,
    ServerConfig,
};
use code_sage::error::SageError;
use code_sage::llm::{LanguageModel, TokenStream};
use code_sage::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use code_sage::walker::{RepoSnapshot, RepositorySource};
use code_sage_core::embedding::Embedder;
use code_sage_core::models::{Project, SourceFile};
use code_sage_core::prompt::{PromptParts, PromptStyle, INSUFFICIENT_CONTEXT_ANSWER};
use code_sage_core::store::memory::InMemoryStore;
use code_sage_core::store::Store;

struct FakeRepo {
    files: Mutex<Vec<SourceFile>>,
    failures: Vec<String>,
    unreachable: AtomicBool,
}

impl FakeRepo {
    fn new(files: &[(&str, &str)], failures: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(
                files
                    .iter()
                    .map(|(path, content)| SourceFile {
                        path: path.to_string(),
                        content: content.to_string(),
                    })
                    .collect(),
            ),
            failures: failures.iter().map(|p| p.to_string()).collect(),
            unreachable: AtomicBool::new(false),
        })
    }

    fn replace(&self, path: &str, content: &str) {
        let mut files = self.files.lock().unwrap();
        for f in files.iter_mut().filter(|f| f.path == path) {
            f.content = content.to_string();
        }
    }
}

#[async_trait]
impl RepositorySource for FakeRepo {
    async fn list_files(&self, _repo_url: &str, _token: Option<&str>) -> Result<RepoSnapshot> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(anyhow!("GitHub API error 404 for /repos/acme/demo/contents"));
        }
        Ok(RepoSnapshot {
            files: self.files.lock().unwrap().clone(),
            failures: self.failures.clone(),
        })
    }
}

/// Summaries echo the prompt; answers stream two fixed tokens.
#[derive(Default)]
struct EchoModel {
    summaries: AtomicUsize,
    answers: AtomicUsize,
}

#[async_trait]
impl LanguageModel for EchoModel {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &PromptParts) -> Result<String> {
        self.summaries.fetch_add(1, Ordering::SeqCst);
        if prompt.user.contains("PANIC_BUTTON") {
            return Err(anyhow!("model refused"));
        }
        Ok(prompt.user.clone())
    }

    async fn stream(&self, _prompt: &PromptParts) -> Result<TokenStream> {
        self.answers.fetch_add(1, Ordering::SeqCst);
        let tokens = vec!["Login is ", "handled in auth.rs."];
        Ok(stream::iter(tokens.into_iter().map(|t| Ok::<_, anyhow::Error>(t.to_string()))).boxed())
    }
}

/// One axis per keyword, plus a small constant so no vector is zero.
struct KeywordEmbedder;

const KEYWORDS: [&str; 3] = ["login", "sqlx", "widget"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len() + 1
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = KEYWORDS
            .iter()
            .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
            .collect();
        v.push(0.1);
        Ok(v)
    }
}

#[derive(Default)]
struct RecordingReporter {
    steps: Mutex<Vec<(u64, u64)>>,
    finished: Mutex<Option<(u64, u64)>>,
}

impl IndexProgressReporter for RecordingReporter {
    fn report(&self, event: IndexProgressEvent) {
        match event {
            IndexProgressEvent::Indexing { n, total, .. } => self.steps.lock().unwrap().push((n, total)),
            IndexProgressEvent::Finished { total, failed, .. } => {
                *self.finished.lock().unwrap() = Some((total, failed))
            }
            IndexProgressEvent::Discovering { .. } => {}
        }
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
        indexing: IndexingConfig {
            concurrency: 2,
            ..IndexingConfig::default()
        },
        retrieval: RetrievalConfig::default(),
        server: ServerConfig::default(),
    }
}

struct Harness {
    services: Services,
    repo: Arc<FakeRepo>,
    model: Arc<EchoModel>,
    project: Project,
}

async fn harness(files: &[(&str, &str)], failures: &[&str]) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let repo = FakeRepo::new(files, failures);
    let model = Arc::new(EchoModel::default());
    let services = Services::from_components(
        test_config(),
        Components {
            store: store.clone(),
            source: repo.clone(),
            model: model.clone(),
            chat_model: model.clone(),
            embedder: Arc::new(KeywordEmbedder),
        },
    );
    let project = Project::new("demo", "https://github.com/acme/demo", None);
    store.create_project(&project).await.unwrap();
    Harness {
        services,
        repo,
        model,
        project,
    }
}

fn three_files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("src/auth.rs", "pub fn login(user: &str) -> Session { todo!() }"),
        ("src/db.rs", "pub async fn connect() -> sqlx::SqlitePool { todo!() }"),
        ("src/ui/panel.rs", "pub fn draw_widget(frame: &mut Frame) {}"),
    ]
}

#[tokio::test]
async fn indexing_twice_does_no_new_work() {
    let h = harness(&three_files(), &[]).await;

    let first = h
        .services
        .indexer(false)
        .index_project(&h.project.id, &NoProgress)
        .await
        .unwrap();
    assert_eq!(first.indexed, 3);
    assert_eq!(first.skipped, 0);
    assert_eq!(h.model.summaries.load(Ordering::SeqCst), 3);

    let second = h
        .services
        .indexer(false)
        .index_project(&h.project.id, &NoProgress)
        .await
        .unwrap();
    assert_eq!(second.indexed, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(h.model.summaries.load(Ordering::SeqCst), 3);

    let progress = h.services.store.get_progress(&h.project.id).await.unwrap().unwrap();
    assert_eq!(progress.current_step, 3);
    assert_eq!(progress.total_steps, 3);
    assert!(progress.is_finished);
}

#[tokio::test]
async fn full_mode_redoes_only_changed_files() {
    let h = harness(&three_files(), &[]).await;
    h.services
        .indexer(false)
        .index_project(&h.project.id, &NoProgress)
        .await
        .unwrap();

    h.repo.replace("src/db.rs", "pub async fn connect_pool() -> sqlx::SqlitePool { todo!() }");
    let report = h
        .services
        .indexer(true)
        .index_project(&h.project.id, &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(h.model.summaries.load(Ordering::SeqCst), 4);

    let paths = h.services.store.indexed_paths(&h.project.id).await.unwrap();
    assert_eq!(paths.len(), 3);
    assert_eq!(
        paths["src/db.rs"],
        code_sage_core::models::content_hash("pub async fn connect_pool() -> sqlx::SqlitePool { todo!() }")
    );
}

#[tokio::test]
async fn failures_count_as_steps_and_do_not_stop_the_run() {
    let mut files = three_files();
    files.push(("src/broken.rs", "// PANIC_BUTTON"));
    let h = harness(&files, &["src/huge.bin"]).await;
    let reporter = RecordingReporter::default();

    let report = h
        .services
        .indexer(false)
        .index_project(&h.project.id, &reporter)
        .await
        .unwrap();
    assert_eq!(report.discovered, 5);
    assert_eq!(report.indexed, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(report.fetch_failures, 1);

    let progress = h.services.store.get_progress(&h.project.id).await.unwrap().unwrap();
    assert_eq!(progress.total_steps, 5);
    assert_eq!(progress.current_step, 5);
    assert_eq!(progress.failed_steps, 2);
    assert!(progress.is_finished);

    let steps = reporter.steps.lock().unwrap().clone();
    assert!(!steps.is_empty());
    for pair in steps.windows(2) {
        assert!(pair[0].0 < pair[1].0, "progress went backwards: {:?}", steps);
    }
    assert_eq!(steps.last().copied(), Some((5, 5)));
    assert_eq!(*reporter.finished.lock().unwrap(), Some((5, 2)));

    let paths = h.services.store.indexed_paths(&h.project.id).await.unwrap();
    assert!(!paths.contains_key("src/broken.rs"));
}

#[tokio::test]
async fn failed_listing_does_not_leave_the_previous_run_finished() {
    let h = harness(&three_files(), &[]).await;
    h.services
        .indexer(false)
        .index_project(&h.project.id, &NoProgress)
        .await
        .unwrap();
    let progress = h.services.store.get_progress(&h.project.id).await.unwrap().unwrap();
    assert!(progress.is_finished);

    h.repo.unreachable.store(true, Ordering::SeqCst);
    let result = h
        .services
        .indexer(true)
        .index_project(&h.project.id, &NoProgress)
        .await;
    assert!(result.is_err());

    let progress = h.services.store.get_progress(&h.project.id).await.unwrap().unwrap();
    assert!(!progress.is_finished);
    assert_eq!(progress.current_step, 0);
    assert_eq!(progress.total_steps, 0);
    assert_eq!(progress.failed_steps, 0);
}

#[tokio::test]
async fn question_matching_two_files_cites_both_in_order() {
    let files = [
        ("src/auth.rs", "pub fn login(user: &str) -> Session { todo!() }"),
        ("src/session.rs", "pub async fn store_login(pool: &sqlx::SqlitePool) {}"),
        ("src/ui/panel.rs", "pub fn draw_widget(frame: &mut Frame) {}"),
    ];
    let h = harness(&files, &[]).await;
    h.services
        .indexer(false)
        .index_project(&h.project.id, &NoProgress)
        .await
        .unwrap();

    let answer = h
        .services
        .assistant
        .ask(&h.project.id, "How does login work?", PromptStyle::Qa, &[])
        .await
        .unwrap();
    let cited: Vec<&str> = answer.references.iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(cited, vec!["src/auth.rs", "src/session.rs"]);
    for r in &answer.references {
        assert!(r.similarity > 0.5 && r.similarity <= 1.0 + 1e-5, "{:?}", r.similarity);
    }
    assert!(answer.references[0].similarity >= answer.references[1].similarity);

    let collected = answer.stream.collect_answer().await;
    assert_eq!(collected.text, "Login is handled in auth.rs.");
    assert_eq!(h.model.answers.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn question_about_login_cites_only_the_auth_file() {
    let h = harness(&three_files(), &[]).await;
    h.services
        .indexer(false)
        .index_project(&h.project.id, &NoProgress)
        .await
        .unwrap();

    let answer = h
        .services
        .assistant
        .ask(&h.project.id, "How does login work?", PromptStyle::Qa, &[])
        .await
        .unwrap();
    let cited: Vec<&str> = answer.references.iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(cited, vec!["src/auth.rs"]);
    assert!(answer.references[0].similarity > 0.99);

    let collected = answer.stream.collect_answer().await;
    assert_eq!(collected.text, "Login is handled in auth.rs.");
    assert_eq!(collected.error, None);
    assert_eq!(h.model.answers.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unindexed_project_gets_the_fallback_without_a_model_call() {
    let h = harness(&three_files(), &[]).await;

    let answer = h
        .services
        .assistant
        .ask(&h.project.id, "How does login work?", PromptStyle::Chat, &[])
        .await
        .unwrap();
    assert!(answer.references.is_empty());

    let collected = answer.stream.collect_answer().await;
    assert_eq!(collected.text, INSUFFICIENT_CONTEXT_ANSWER);
    assert_eq!(h.model.answers.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_project_is_not_found() {
    let h = harness(&[], &[]).await;

    let err = h
        .services
        .indexer(false)
        .index_project("missing", &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SageError>(),
        Some(SageError::ProjectNotFound(_))
    ));

    let err = h
        .services
        .assistant
        .ask("missing", "anything?", PromptStyle::Qa, &[])
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<SageError>(),
        Some(SageError::ProjectNotFound(_))
    ));
}

#[tokio::test]
async fn add_project_rejects_non_github_urls() {
    let h = harness(&[], &[]).await;

    let err = h
        .services
        .add_project("other", "https://gitlab.com/acme/demo", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SageError>(),
        Some(SageError::InvalidRepoUrl(_))
    ));

    let project = h
        .services
        .add_project("  demo2 ", "https://github.com/acme/demo2", Some(" ".to_string()))
        .await
        .unwrap();
    assert_eq!(project.name, "demo2");
    assert_eq!(project.access_token, None);
    assert_eq!(h.services.store.list_projects().await.unwrap().len(), 2);
}
