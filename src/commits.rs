//! Commit polling: summarize the newest commits a project has not seen.
//!
//! A poll lists the `commit_limit` newest commits of the configured branch,
//! drops hashes already stored for the project, and for each remaining
//! commit fetches its diff and asks the model for a summary. Only
//! summarized commits are stored, so a commit that failed is retried by
//! the next poll.

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use code_sage_core::models::CommitRecord;
use code_sage_core::store::Store;

use crate::config::GithubConfig;
use crate::error::SageError;
use crate::github::{parse_repo_url, CommitInfo, GithubClient, RepoRef};
use crate::summarize::Summarizer;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    /// Commits returned by the listing (at most `commit_limit`).
    pub fetched: usize,
    /// Commits not yet stored for the project.
    pub new: usize,
    pub summarized: usize,
    pub failed: usize,
}

pub struct CommitPoller {
    store: Arc<dyn Store>,
    client: GithubClient,
    summarizer: Summarizer,
    branch: String,
    limit: usize,
    default_token: Option<String>,
}

impl CommitPoller {
    pub fn new(store: Arc<dyn Store>, summarizer: Summarizer, config: &GithubConfig) -> Result<Self> {
        Ok(Self {
            store,
            client: GithubClient::new(config)?,
            summarizer,
            branch: config.branch.clone(),
            limit: config.commit_limit,
            default_token: config.default_token(),
        })
    }

    pub async fn poll_commits(&self, project_id: &str) -> Result<CommitReport> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| SageError::ProjectNotFound(project_id.to_string()))?;
        let repo = parse_repo_url(&project.repo_url)?;
        let token = project.access_token.clone().or_else(|| self.default_token.clone());

        let commits = self
            .client
            .list_commits(&repo, &self.branch, self.limit, token.as_deref())
            .await?;
        let processed: HashSet<String> = self.store.commit_hashes(project_id).await?.into_iter().collect();
        let unprocessed: Vec<CommitInfo> = commits
            .iter()
            .filter(|c| !processed.contains(&c.hash))
            .cloned()
            .collect();

        let mut report = CommitReport {
            fetched: commits.len(),
            new: unprocessed.len(),
            ..Default::default()
        };

        let mut pending = Vec::with_capacity(unprocessed.len());
        for commit in &unprocessed {
            pending.push(self.summarize_commit(&repo, commit, token.as_deref()));
        }
        let results = join_all(pending).await;

        for (commit, result) in unprocessed.into_iter().zip(results) {
            match result {
                Ok(summary) => {
                    let record = CommitRecord {
                        id: Uuid::new_v4().to_string(),
                        project_id: project_id.to_string(),
                        hash: commit.hash,
                        message: commit.message,
                        author_name: commit.author_name,
                        author_avatar: commit.author_avatar,
                        committed_at: commit.date,
                        summary,
                    };
                    self.store.insert_commit(&record).await?;
                    report.summarized += 1;
                }
                Err(e) => {
                    tracing::warn!(commit = %commit.hash, error = %e, "failed to summarize commit");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            project = %project.name,
            fetched = report.fetched,
            new = report.new,
            summarized = report.summarized,
            failed = report.failed,
            "commit poll complete"
        );
        Ok(report)
    }

    async fn summarize_commit(
        &self,
        repo: &RepoRef,
        commit: &CommitInfo,
        token: Option<&str>,
    ) -> Result<String> {
        let diff = self.client.commit_diff(repo, &commit.hash, token).await?;
        self.summarizer.summarize_commit(&commit.hash, &diff).await
    }
}
