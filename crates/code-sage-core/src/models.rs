//! Core data models shared by the indexing and retrieval pipelines.
//!
//! Every entity is owned by a [`Project`]. Timestamps are Unix seconds,
//! matching the `INTEGER` columns of the SQLite schema.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A linked repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub repo_url: String,
    /// Per-project token; falls back to the configured default when absent.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub created_at: i64,
    /// Set by soft delete. Deleted projects are invisible to lookups.
    pub deleted_at: Option<i64>,
}

impl Project {
    pub fn new(name: &str, repo_url: &str, access_token: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            repo_url: repo_url.to_string(),
            access_token,
            created_at: Utc::now().timestamp(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A file fetched from a repository, before any model work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// One row of the vector index: a file, its summary and the summary's
/// embedding. Written in a single atomic operation.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub project_id: String,
    pub path: String,
    pub content: String,
    pub summary: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
}

/// A stored vector plus the fields needed to build a [`FileMatch`].
#[derive(Debug, Clone)]
pub struct VectorCandidate {
    pub path: String,
    pub summary: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A retrieved file with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMatch {
    pub path: String,
    pub summary: String,
    pub content: String,
    pub similarity: f32,
}

/// Citation returned to callers alongside a streamed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    pub file_name: String,
    pub summary: String,
    pub source_code: String,
    #[serde(default)]
    pub similarity: f32,
}

impl From<&FileMatch> for FileReference {
    fn from(m: &FileMatch) -> Self {
        Self {
            file_name: m.path.clone(),
            summary: m.summary.clone(),
            source_code: m.content.clone(),
            similarity: m.similarity,
        }
    }
}

/// Progress of the most recent indexing run for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingProgress {
    pub current_step: i64,
    pub total_steps: i64,
    pub failed_steps: i64,
    pub is_finished: bool,
}

/// A saved question and answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    pub file_references: Vec<FileReference>,
    pub created_at: i64,
}

impl Question {
    pub fn new(
        project_id: &str,
        user_id: &str,
        question: &str,
        answer: &str,
        file_references: Vec<FileReference>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            file_references,
            created_at: Utc::now().timestamp(),
        }
    }
}

/// A summarized commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub id: String,
    pub project_id: String,
    pub hash: String,
    pub message: String,
    pub author_name: String,
    pub author_avatar: String,
    /// Author date as reported by the hosting API (RFC 3339).
    pub committed_at: String,
    pub summary: String,
}

/// SHA-256 of file content, hex encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }

    #[test]
    fn progress_serializes_camel_case() {
        let p = IndexingProgress {
            current_step: 2,
            total_steps: 5,
            failed_steps: 0,
            is_finished: false,
        };
        let json = serde_json::to_value(p).unwrap();
        assert_eq!(json["currentStep"], 2);
        assert_eq!(json["totalSteps"], 5);
        assert_eq!(json["isFinished"], false);
    }

    #[test]
    fn project_token_is_not_serialized() {
        let p = Project::new("demo", "https://github.com/a/b", Some("secret".into()));
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("secret"));
    }
}
