//! Storage abstraction for Code Sage.
//!
//! The [`Store`] trait defines every storage operation the indexing and
//! retrieval pipelines need, so the SQLite backend and the in-memory
//! backend used in tests are interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::{CommitRecord, IndexEntry, IndexingProgress, Project, Question, VectorCandidate};

/// Abstract storage backend for Code Sage.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_project`](Store::create_project) | Insert a new project |
/// | [`get_project`](Store::get_project) | Fetch a live (not soft-deleted) project |
/// | [`list_projects`](Store::list_projects) | List live projects |
/// | [`soft_delete_project`](Store::soft_delete_project) | Mark a project deleted |
/// | [`indexed_paths`](Store::indexed_paths) | Path → content hash for a project |
/// | [`write_index_entry`](Store::write_index_entry) | Atomically write a file row and its vector |
/// | [`vector_candidates`](Store::vector_candidates) | All vectors of a project |
/// | [`begin_progress`](Store::begin_progress) | Reset progress for a new run |
/// | [`advance_progress`](Store::advance_progress) | Atomic step increment |
/// | [`record_failure`](Store::record_failure) | Atomic failure increment |
/// | [`finish_progress`](Store::finish_progress) | Mark the run finished |
/// | [`get_progress`](Store::get_progress) | Read progress |
/// | [`save_question`](Store::save_question) / [`list_questions`](Store::list_questions) | Saved Q&A |
/// | [`commit_hashes`](Store::commit_hashes) / [`insert_commit`](Store::insert_commit) / [`list_commits`](Store::list_commits) | Commit summaries |
/// | [`clear_all`](Store::clear_all) | Delete every row of every table |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_project(&self, project: &Project) -> Result<()>;

    /// Returns `None` for unknown and soft-deleted projects.
    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Returns `false` if the project does not exist or was already deleted.
    async fn soft_delete_project(&self, id: &str) -> Result<bool>;

    /// Map of every indexed path of a project to its stored content hash.
    async fn indexed_paths(&self, project_id: &str) -> Result<HashMap<String, String>>;

    /// Insert or replace the row for `(project_id, path)`, vector included,
    /// as one atomic write.
    ///
    /// Fails with [`DimensionMismatch`](crate::DimensionMismatch) when the
    /// vector length differs from vectors already stored for the project.
    async fn write_index_entry(&self, entry: &IndexEntry) -> Result<()>;

    async fn vector_candidates(&self, project_id: &str) -> Result<Vec<VectorCandidate>>;

    /// Start a run: `current_step = 0`, `total_steps = total`, not finished.
    async fn begin_progress(&self, project_id: &str, total: i64) -> Result<()>;

    /// Increment `current_step` by one, never past `total_steps`.
    async fn advance_progress(&self, project_id: &str) -> Result<()>;

    async fn record_failure(&self, project_id: &str) -> Result<()>;

    /// Set `is_finished`, with `current_step` pinned to `total_steps`.
    async fn finish_progress(&self, project_id: &str) -> Result<()>;

    async fn get_progress(&self, project_id: &str) -> Result<Option<IndexingProgress>>;

    async fn save_question(&self, question: &Question) -> Result<()>;

    /// Newest first.
    async fn list_questions(&self, project_id: &str) -> Result<Vec<Question>>;

    async fn commit_hashes(&self, project_id: &str) -> Result<Vec<String>>;

    /// Ignores a commit whose hash is already stored for the project.
    async fn insert_commit(&self, commit: &CommitRecord) -> Result<()>;

    /// Newest first by commit date.
    async fn list_commits(&self, project_id: &str) -> Result<Vec<CommitRecord>>;

    async fn clear_all(&self) -> Result<()>;
}
