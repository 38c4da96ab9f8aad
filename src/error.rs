//! Typed failures of the indexing and query pipelines.
//!
//! Functions return `anyhow::Result` and raise these variants where a
//! caller needs to tell failures apart (the HTTP layer maps them to status
//! codes with `downcast_ref`).

use thiserror::Error;

pub use code_sage_core::DimensionMismatch;

#[derive(Debug, Error)]
pub enum SageError {
    #[error("invalid repository url: {0}")]
    InvalidRepoUrl(String),

    #[error("failed to fetch {path}: {message}")]
    FileFetch { path: String, message: String },

    #[error("summarization failed for {subject}: {message}")]
    Summarization { subject: String, message: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("project {0} is already being indexed")]
    IndexingInProgress(String),

    #[error("answer stream failed: {0}")]
    Streaming(String),

    #[error("{subject} timed out after {secs}s")]
    Timeout { subject: String, secs: u64 },
}
