//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/projects` | Link a repository |
//! | `GET`    | `/projects` | List live projects |
//! | `GET`    | `/projects/{id}` | One project |
//! | `DELETE` | `/projects/{id}` | Soft delete |
//! | `POST`   | `/projects/{id}/index` | Start indexing in the background (`?full=true` for a full re-index) |
//! | `GET`    | `/projects/{id}/progress` | Progress of the latest run |
//! | `POST`   | `/projects/{id}/ask` | Server-Sent Events answer stream |
//! | `POST`   | `/projects/{id}/questions` | Save a question and answer |
//! | `GET`    | `/projects/{id}/questions` | Saved questions, newest first |
//! | `POST`   | `/projects/{id}/commits/poll` | Summarize new commits |
//! | `GET`    | `/projects/{id}/commits` | Stored commit summaries |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "project not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` / `invalid_repo_url` (400), `not_found` (404),
//! `timeout` (408), `indexing_in_progress` (409), `internal` (500).
//!
//! # Answer stream
//!
//! `POST /projects/{id}/ask` responds with `text/event-stream`:
//!
//! ```text
//! event: references   data: [{"fileName":…,"summary":…,"sourceCode":…,"similarity":…}]
//! event: delta        data: {"text":"…"}            (repeated)
//! event: done         data: {}
//! event: error        data: {"message":"…"}
//! ```
//!
//! Closing the connection drops the answer stream, which cancels the model
//! request.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use code_sage_core::models::{
    CommitRecord, FileReference, IndexingProgress, Project, Question,
};
use code_sage_core::prompt::PromptStyle;
use code_sage_core::DimensionMismatch;

use crate::answer::AnswerEvent;
use crate::app::Services;
use crate::commits::CommitReport;
use crate::config::Config;
use crate::error::SageError;
use crate::progress::NoProgress;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    services: Services,
    /// Projects with an indexing run in flight.
    running: Arc<Mutex<HashSet<String>>>,
}

/// Removes a project from the running set when its run ends, however it ends.
struct RunGuard {
    running: Arc<Mutex<HashSet<String>>>,
    project_id: String,
}

impl RunGuard {
    fn acquire(running: &Arc<Mutex<HashSet<String>>>, project_id: &str) -> Option<Self> {
        let mut set = running.lock().ok()?;
        if !set.insert(project_id.to_string()) {
            return None;
        }
        Some(Self {
            running: Arc::clone(running),
            project_id: project_id.to_string(),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.running.lock() {
            set.remove(&self.project_id);
        }
    }
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let services = Services::open(config.clone()).await?;
    let listener = TcpListener::bind(&bind_addr).await?;
    println!("Code Sage listening on http://{}", bind_addr);
    serve(listener, services).await
}

/// Serve the API on an already-bound listener.
pub async fn serve(listener: TcpListener, services: Services) -> anyhow::Result<()> {
    axum::serve(listener, router(services)).await?;
    Ok(())
}

pub fn router(services: Services) -> Router {
    let state = AppState {
        services,
        running: Arc::new(Mutex::new(HashSet::new())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/projects", post(handle_create_project).get(handle_list_projects))
        .route(
            "/projects/{id}",
            get(handle_get_project).delete(handle_delete_project),
        )
        .route("/projects/{id}/index", post(handle_index))
        .route("/projects/{id}/progress", get(handle_progress))
        .route("/projects/{id}/ask", post(handle_ask))
        .route(
            "/projects/{id}/questions",
            post(handle_save_question).get(handle_list_questions),
        )
        .route("/projects/{id}/commits/poll", post(handle_poll_commits))
        .route("/projects/{id}/commits", get(handle_list_commits))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(project_id: &str) -> AppError {
    SageError::ProjectNotFound(project_id.to_string()).into()
}

impl From<SageError> for AppError {
    fn from(err: SageError) -> Self {
        let (status, code) = match &err {
            SageError::InvalidRepoUrl(_) => (StatusCode::BAD_REQUEST, "invalid_repo_url"),
            SageError::ProjectNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            SageError::IndexingInProgress(_) => (StatusCode::CONFLICT, "indexing_in_progress"),
            SageError::Timeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

/// Typed failures keep their status; everything else is a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<SageError>() {
            Ok(sage) => sage.into(),
            Err(err) => {
                let code = if err.downcast_ref::<DimensionMismatch>().is_some() {
                    "dimension_mismatch"
                } else {
                    "internal"
                };
                tracing::error!(error = %err, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    message: err.to_string(),
                }
            }
        }
    }
}

async fn require_project(state: &AppState, id: &str) -> Result<Project, AppError> {
    state
        .services
        .store
        .get_project(id)
        .await?
        .ok_or_else(|| not_found(id))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Projects ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectRequest {
    name: String,
    repo_url: String,
    #[serde(default)]
    access_token: Option<String>,
}

async fn handle_create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    if req.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    let project = state
        .services
        .add_project(&req.name, &req.repo_url, req.access_token)
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn handle_list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<Project>>, AppError> {
    Ok(Json(state.services.store.list_projects().await?))
}

async fn handle_get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(require_project(&state, &id).await?))
}

async fn handle_delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.services.store.soft_delete_project(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&id))
    }
}

// ============ Indexing ============

#[derive(Deserialize, Default)]
struct IndexParams {
    #[serde(default)]
    full: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexAccepted {
    project_id: String,
    status: &'static str,
}

/// Fire-and-forget: the run continues after the response is sent. Clients
/// poll `/progress`.
async fn handle_index(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<IndexParams>,
) -> Result<(StatusCode, Json<IndexAccepted>), AppError> {
    require_project(&state, &id).await?;

    let guard = RunGuard::acquire(&state.running, &id)
        .ok_or_else(|| AppError::from(SageError::IndexingInProgress(id.clone())))?;

    let indexer = state.services.indexer(params.full);
    let project_id = id.clone();
    tokio::spawn(async move {
        let _guard = guard;
        if let Err(e) = indexer.index_project(&project_id, &NoProgress).await {
            tracing::error!(project = %project_id, error = %e, "indexing run failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(IndexAccepted {
            project_id: id,
            status: "indexing",
        }),
    ))
}

async fn handle_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IndexingProgress>, AppError> {
    require_project(&state, &id).await?;
    let progress = state
        .services
        .store
        .get_progress(&id)
        .await?
        .unwrap_or(IndexingProgress {
            current_step: 0,
            total_steps: 0,
            failed_steps: 0,
            is_finished: false,
        });
    Ok(Json(progress))
}

// ============ POST /projects/{id}/ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    /// `qa` (default) or `chat`.
    #[serde(default)]
    mode: Option<String>,
    /// Earlier questions of the conversation, oldest first.
    #[serde(default)]
    history: Vec<String>,
}

fn json_event(name: &'static str, data: serde_json::Value) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|_| Event::default().event(name).data("{}"))
}

fn answer_event(event: AnswerEvent) -> Event {
    match event {
        AnswerEvent::Delta(text) => json_event("delta", serde_json::json!({ "text": text })),
        AnswerEvent::Done => json_event("done", serde_json::json!({})),
        AnswerEvent::Error(message) => {
            json_event("error", serde_json::json!({ "message": message }))
        }
    }
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let style = match req.mode.as_deref() {
        None => PromptStyle::Qa,
        Some(mode) => PromptStyle::parse(mode)
            .ok_or_else(|| bad_request(format!("unknown mode: {}", mode)))?,
    };

    let answer = state
        .services
        .assistant
        .ask(&id, &req.question, style, &req.history)
        .await?;

    let references = json_event(
        "references",
        serde_json::to_value(&answer.references).unwrap_or_default(),
    );
    let events = stream::once(async move { references })
        .chain(answer.stream.map(answer_event))
        .map(Ok::<_, Infallible>);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ============ Questions ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveQuestionRequest {
    user_id: String,
    question: String,
    answer: String,
    #[serde(default)]
    file_references: Vec<FileReference>,
}

async fn handle_save_question(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SaveQuestionRequest>,
) -> Result<(StatusCode, Json<Question>), AppError> {
    require_project(&state, &id).await?;
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let question = Question::new(
        &id,
        &req.user_id,
        &req.question,
        &req.answer,
        req.file_references,
    );
    state.services.store.save_question(&question).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

async fn handle_list_questions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Question>>, AppError> {
    require_project(&state, &id).await?;
    Ok(Json(state.services.store.list_questions(&id).await?))
}

// ============ Commits ============

async fn handle_poll_commits(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommitReport>, AppError> {
    let poller = state.services.commit_poller()?;
    Ok(Json(poller.poll_commits(&id).await?))
}

async fn handle_list_commits(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<CommitRecord>>, AppError> {
    require_project(&state, &id).await?;
    Ok(Json(state.services.store.list_commits(&id).await?))
}
