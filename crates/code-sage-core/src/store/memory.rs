//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`/`Mutex`. Each
//! operation takes its lock once, so progress increments are atomic.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::error::DimensionMismatch;
use crate::models::{
    CommitRecord, IndexEntry, IndexingProgress, Project, Question, VectorCandidate,
};

use super::Store;

/// In-memory store keyed by project.
pub struct InMemoryStore {
    projects: RwLock<Vec<Project>>,
    files: RwLock<HashMap<String, Vec<IndexEntry>>>,
    progress: Mutex<HashMap<String, IndexingProgress>>,
    questions: RwLock<Vec<Question>>,
    commits: RwLock<Vec<CommitRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(Vec::new()),
            files: RwLock::new(HashMap::new()),
            progress: Mutex::new(HashMap::new()),
            questions: RwLock::new(Vec::new()),
            commits: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored file rows for a project.
    pub fn file_count(&self, project_id: &str) -> usize {
        self.files
            .read()
            .unwrap()
            .get(project_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_project(&self, project: &Project) -> Result<()> {
        let mut projects = self.projects.write().unwrap();
        if projects.iter().any(|p| p.id == project.id) {
            anyhow::bail!("project {} already exists", project.id);
        }
        projects.push(project.clone());
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let projects = self.projects.read().unwrap();
        Ok(projects
            .iter()
            .find(|p| p.id == id && !p.is_deleted())
            .cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let projects = self.projects.read().unwrap();
        let mut live: Vec<Project> = projects.iter().filter(|p| !p.is_deleted()).cloned().collect();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(live)
    }

    async fn soft_delete_project(&self, id: &str) -> Result<bool> {
        let mut projects = self.projects.write().unwrap();
        match projects.iter_mut().find(|p| p.id == id && !p.is_deleted()) {
            Some(p) => {
                p.deleted_at = Some(Utc::now().timestamp());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn indexed_paths(&self, project_id: &str) -> Result<HashMap<String, String>> {
        let files = self.files.read().unwrap();
        Ok(files
            .get(project_id)
            .map(|rows| {
                rows.iter()
                    .map(|e| (e.path.clone(), e.content_hash.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write_index_entry(&self, entry: &IndexEntry) -> Result<()> {
        let mut files = self.files.write().unwrap();
        let rows = files.entry(entry.project_id.clone()).or_default();

        if let Some(existing) = rows.iter().find(|e| e.path != entry.path) {
            DimensionMismatch::check(existing.embedding.len(), entry.embedding.len())?;
        }

        match rows.iter_mut().find(|e| e.path == entry.path) {
            Some(row) => *row = entry.clone(),
            None => rows.push(entry.clone()),
        }
        Ok(())
    }

    async fn vector_candidates(&self, project_id: &str) -> Result<Vec<VectorCandidate>> {
        let files = self.files.read().unwrap();
        Ok(files
            .get(project_id)
            .map(|rows| {
                rows.iter()
                    .map(|e| VectorCandidate {
                        path: e.path.clone(),
                        summary: e.summary.clone(),
                        content: e.content.clone(),
                        embedding: e.embedding.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn begin_progress(&self, project_id: &str, total: i64) -> Result<()> {
        let mut progress = self.progress.lock().unwrap();
        progress.insert(
            project_id.to_string(),
            IndexingProgress {
                current_step: 0,
                total_steps: total.max(0),
                failed_steps: 0,
                is_finished: false,
            },
        );
        Ok(())
    }

    async fn advance_progress(&self, project_id: &str) -> Result<()> {
        let mut progress = self.progress.lock().unwrap();
        if let Some(p) = progress.get_mut(project_id) {
            p.current_step = (p.current_step + 1).min(p.total_steps);
        }
        Ok(())
    }

    async fn record_failure(&self, project_id: &str) -> Result<()> {
        let mut progress = self.progress.lock().unwrap();
        if let Some(p) = progress.get_mut(project_id) {
            p.failed_steps += 1;
        }
        Ok(())
    }

    async fn finish_progress(&self, project_id: &str) -> Result<()> {
        let mut progress = self.progress.lock().unwrap();
        if let Some(p) = progress.get_mut(project_id) {
            p.current_step = p.total_steps;
            p.is_finished = true;
        }
        Ok(())
    }

    async fn get_progress(&self, project_id: &str) -> Result<Option<IndexingProgress>> {
        Ok(self.progress.lock().unwrap().get(project_id).copied())
    }

    async fn save_question(&self, question: &Question) -> Result<()> {
        self.questions.write().unwrap().push(question.clone());
        Ok(())
    }

    async fn list_questions(&self, project_id: &str) -> Result<Vec<Question>> {
        let questions = self.questions.read().unwrap();
        let mut found: Vec<Question> = questions
            .iter()
            .filter(|q| q.project_id == project_id)
            .cloned()
            .collect();
        found.reverse();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn commit_hashes(&self, project_id: &str) -> Result<Vec<String>> {
        let commits = self.commits.read().unwrap();
        Ok(commits
            .iter()
            .filter(|c| c.project_id == project_id)
            .map(|c| c.hash.clone())
            .collect())
    }

    async fn insert_commit(&self, commit: &CommitRecord) -> Result<()> {
        let mut commits = self.commits.write().unwrap();
        if !commits
            .iter()
            .any(|c| c.project_id == commit.project_id && c.hash == commit.hash)
        {
            commits.push(commit.clone());
        }
        Ok(())
    }

    async fn list_commits(&self, project_id: &str) -> Result<Vec<CommitRecord>> {
        let commits = self.commits.read().unwrap();
        let mut found: Vec<CommitRecord> = commits
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.committed_at.cmp(&a.committed_at));
        Ok(found)
    }

    async fn clear_all(&self) -> Result<()> {
        self.projects.write().unwrap().clear();
        self.files.write().unwrap().clear();
        self.progress.lock().unwrap().clear();
        self.questions.write().unwrap().clear();
        self.commits.write().unwrap().clear();
        Ok(())
    }
}
