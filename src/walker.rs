//! Repository walker.
//!
//! Lists a repository tree through the contents API and fetches every file
//! that survives the [`IgnoreRules`]. Directory pages and file fetches are
//! dispatched concurrently; every API request holds one slot of a shared
//! [`ConcurrencyLimiter`] for its duration only, never across a descent
//! into a sub-directory.
//!
//! ```text
//! list_files(url)
//!   └─ walk("")                 page 1..n, until a short page
//!        ├─ fetch("README.md")  ─┐
//!        ├─ walk("src")          ├─ concurrent, ≤ limit requests in flight
//!        └─ (node_modules)       ┘  skipped: ignored name
//! ```
//!
//! A failing file fetch or sub-directory listing is logged and counted; the
//! walk continues. A listing page after the first that fails is counted the
//! same way, and the files from earlier pages are kept. Only a failing first
//! page of the root listing fails the whole walk.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::HashSet;
use std::sync::Mutex;

use code_sage_core::models::SourceFile;

use crate::config::GithubConfig;
use crate::github::{parse_repo_url, EntryKind, GithubClient, RepoRef};
use crate::ignore::IgnoreRules;
use crate::limiter::ConcurrencyLimiter;

/// Files fetched from one walk, plus the paths that could not be fetched.
#[derive(Debug, Default)]
pub struct RepoSnapshot {
    pub files: Vec<SourceFile>,
    pub failures: Vec<String>,
}

/// Anything that can produce the files of a repository.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// List and fetch every non-ignored file. Output order is unspecified.
    async fn list_files(&self, repo_url: &str, access_token: Option<&str>) -> Result<RepoSnapshot>;
}

pub struct GithubWalker {
    client: GithubClient,
    rules: IgnoreRules,
    limiter: ConcurrencyLimiter,
    branch: String,
    page_size: usize,
    default_token: Option<String>,
}

struct WalkState {
    repo: RepoRef,
    token: Option<String>,
    seen: Mutex<HashSet<String>>,
    failures: Mutex<Vec<String>>,
}

impl WalkState {
    fn fail(&self, path: &str) {
        self.failures.lock().unwrap().push(path.to_string());
    }
}

impl GithubWalker {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        Ok(Self {
            client: GithubClient::new(config)?,
            rules: IgnoreRules::with_defaults(&config.extra_ignore)?,
            limiter: ConcurrencyLimiter::new(config.concurrency),
            branch: config.branch.clone(),
            page_size: config.page_size,
            default_token: config.default_token(),
        })
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    fn walk_dir<'a>(&'a self, state: &'a WalkState, path: String) -> BoxFuture<'a, Result<Vec<SourceFile>>> {
        async move {
            let mut files = Vec::new();
            let mut page = 1;

            loop {
                let listed = {
                    let _slot = self.limiter.acquire().await?;
                    self.client
                        .list_directory(
                            &state.repo,
                            &path,
                            &self.branch,
                            page,
                            self.page_size,
                            state.token.as_deref(),
                        )
                        .await
                };
                // Files from earlier pages are kept when a later page fails.
                let entries = match listed {
                    Ok(entries) => entries,
                    Err(e) if page == 1 => return Err(e),
                    Err(e) => {
                        tracing::warn!(path = %path, page, error = %e, "stopping directory listing");
                        state.fail(if path.is_empty() { "/" } else { &path });
                        break;
                    }
                };
                let count = entries.len();

                let mut tasks: Vec<BoxFuture<'a, Vec<SourceFile>>> = Vec::new();
                for entry in entries {
                    if self.rules.is_ignored(&entry.name) {
                        tracing::debug!(path = %entry.path, "ignored");
                        continue;
                    }
                    match entry.kind {
                        EntryKind::Dir => tasks.push(
                            async move {
                                match self.walk_dir(state, entry.path.clone()).await {
                                    Ok(files) => files,
                                    Err(e) => {
                                        tracing::warn!(path = %entry.path, error = %e, "skipping directory");
                                        state.fail(&entry.path);
                                        Vec::new()
                                    }
                                }
                            }
                            .boxed(),
                        ),
                        EntryKind::File => {
                            if !state.seen.lock().unwrap().insert(entry.path.clone()) {
                                continue;
                            }
                            tasks.push(
                                async move {
                                    match self.fetch_file(state, &entry.path).await {
                                        Ok(content) => vec![SourceFile {
                                            path: entry.path,
                                            content,
                                        }],
                                        Err(e) => {
                                            tracing::warn!(path = %entry.path, error = %e, "skipping file");
                                            state.fail(&entry.path);
                                            Vec::new()
                                        }
                                    }
                                }
                                .boxed(),
                            );
                        }
                        other => {
                            tracing::debug!(path = %entry.path, kind = ?other, "skipping non-file entry");
                        }
                    }
                }

                for batch in join_all(tasks).await {
                    files.extend(batch);
                }

                if count < self.page_size {
                    break;
                }
                page += 1;
            }

            Ok(files)
        }
        .boxed()
    }

    async fn fetch_file(&self, state: &WalkState, path: &str) -> Result<String> {
        let _slot = self.limiter.acquire().await?;
        self.client
            .file_content(&state.repo, path, &self.branch, state.token.as_deref())
            .await
    }
}

#[async_trait]
impl RepositorySource for GithubWalker {
    async fn list_files(&self, repo_url: &str, access_token: Option<&str>) -> Result<RepoSnapshot> {
        let repo = parse_repo_url(repo_url)?;
        let token = access_token
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.default_token.clone());
        if token.is_none() {
            tracing::warn!(%repo, "no GitHub token configured; using unauthenticated requests");
        }

        let state = WalkState {
            repo,
            token,
            seen: Mutex::new(HashSet::new()),
            failures: Mutex::new(Vec::new()),
        };

        let files = self.walk_dir(&state, String::new()).await?;
        let failures = state.failures.into_inner().unwrap_or_default();

        tracing::info!(
            repo = %state.repo,
            files = files.len(),
            failures = failures.len(),
            peak_requests = self.limiter.peak(),
            "repository walk complete"
        );

        Ok(RepoSnapshot { files, failures })
    }
}
