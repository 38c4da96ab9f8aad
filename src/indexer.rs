//! Indexing pipeline: walk → pre-filter → summarize → embed → write.
//!
//! # Pipeline
//!
//! ```text
//! index_project(id)
//!   1. resolve project (live only), begin_progress(0)
//!   2. RepositorySource::list_files      ─ fetch failures become failed steps
//!   3. Store::indexed_paths (once)       ─ pre-filter: skipped files advance at once
//!   4. begin_progress(total)
//!   5. pending files, `concurrency` at a time, each under `file_timeout`:
//!        summarize → embed → write_index_entry
//!      every file advances one step; errors also record a failure
//!   6. finish_progress
//! ```
//!
//! Per-file errors never abort a run. Whole-run errors (unknown project,
//! invalid URL, a failing root listing, store errors) do.
//!
//! In the default mode a path that already has a row is skipped without
//! any model call. With `full` set, a path is skipped only when its stored
//! content hash matches the fetched content; changed files are summarized
//! again and their rows overwritten in place.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use code_sage_core::embedding::Embedder;
use code_sage_core::models::{content_hash, IndexEntry, SourceFile};
use code_sage_core::store::Store;
use code_sage_core::tree::build_folder_structure;

use crate::error::SageError;
use crate::progress::{IndexProgressEvent, IndexProgressReporter};
use crate::summarize::Summarizer;
use crate::walker::RepositorySource;

#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub concurrency: usize,
    pub file_timeout: Duration,
    /// Re-process files whose content changed since they were indexed.
    pub full: bool,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            file_timeout: Duration::from_secs(180),
            full: false,
        }
    }
}

/// Outcome counts of one run. `failed` includes `fetch_failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub discovered: usize,
    pub skipped: usize,
    pub indexed: usize,
    pub failed: usize,
    pub fetch_failures: usize,
}

pub struct Indexer {
    store: Arc<dyn Store>,
    source: Arc<dyn RepositorySource>,
    summarizer: Summarizer,
    embedder: Arc<dyn Embedder>,
    settings: IndexerSettings,
}

/// Owned handles for one file's work, so pending futures borrow nothing.
#[derive(Clone)]
struct FileWorker {
    store: Arc<dyn Store>,
    summarizer: Summarizer,
    embedder: Arc<dyn Embedder>,
    project_id: String,
    timeout: Duration,
}

impl FileWorker {
    async fn run(self, file: SourceFile) -> (String, Result<()>) {
        let path = file.path.clone();
        let secs = self.timeout.as_secs();
        let result = match tokio::time::timeout(self.timeout, self.process(file)).await {
            Ok(result) => result,
            Err(_) => Err(SageError::Timeout {
                subject: path.clone(),
                secs,
            }
            .into()),
        };
        (path, result)
    }

    async fn process(&self, file: SourceFile) -> Result<()> {
        let summary = self.summarizer.summarize(&file.path, &file.content).await?;
        let embedding = self.embedder.embed(&summary).await?;
        let entry = IndexEntry {
            project_id: self.project_id.clone(),
            content_hash: content_hash(&file.content),
            path: file.path,
            content: file.content,
            summary,
            embedding,
        };
        self.store.write_index_entry(&entry).await
    }
}

impl Indexer {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn RepositorySource>,
        summarizer: Summarizer,
        embedder: Arc<dyn Embedder>,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            store,
            source,
            summarizer,
            embedder,
            settings,
        }
    }

    pub async fn index_project(
        &self,
        project_id: &str,
        reporter: &dyn IndexProgressReporter,
    ) -> Result<IndexReport> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| SageError::ProjectNotFound(project_id.to_string()))?;

        reporter.report(IndexProgressEvent::Discovering {
            project: project.name.clone(),
        });
        // A run that fails while listing must not leave the last run's
        // finished record behind.
        self.store.begin_progress(project_id, 0).await?;
        let snapshot = self
            .source
            .list_files(&project.repo_url, project.access_token.as_deref())
            .await?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            let tree = build_folder_structure(snapshot.files.iter().map(|f| f.path.as_str()));
            tracing::debug!(project = %project.name, "folder structure:\n{}", tree.render());
        }

        let indexed = self.store.indexed_paths(project_id).await?;
        let (pending, skipped): (Vec<SourceFile>, Vec<SourceFile>) =
            snapshot.files.into_iter().partition(|file| match indexed.get(&file.path) {
                None => true,
                Some(stored_hash) => self.settings.full && *stored_hash != content_hash(&file.content),
            });

        let mut report = IndexReport {
            discovered: pending.len() + skipped.len() + snapshot.failures.len(),
            skipped: skipped.len(),
            fetch_failures: snapshot.failures.len(),
            failed: snapshot.failures.len(),
            indexed: 0,
        };
        let total = report.discovered as u64;
        let mut step = 0u64;

        tracing::info!(
            project = %project.name,
            discovered = report.discovered,
            pending = pending.len(),
            skipped = report.skipped,
            "indexing started"
        );

        self.store.begin_progress(project_id, total as i64).await?;

        for _ in &skipped {
            self.store.advance_progress(project_id).await?;
            step += 1;
        }
        for path in &snapshot.failures {
            tracing::debug!(path = %path, "counting fetch failure");
            self.store.record_failure(project_id).await?;
            self.store.advance_progress(project_id).await?;
            step += 1;
        }
        if step > 0 {
            reporter.report(IndexProgressEvent::Indexing {
                project: project.name.clone(),
                n: step,
                total,
                failed: report.failed as u64,
            });
        }

        let worker = FileWorker {
            store: Arc::clone(&self.store),
            summarizer: self.summarizer.clone(),
            embedder: Arc::clone(&self.embedder),
            project_id: project_id.to_string(),
            timeout: self.settings.file_timeout,
        };
        let mut results = stream::iter(pending)
            .map(move |file| worker.clone().run(file))
            .buffer_unordered(self.settings.concurrency.max(1));

        while let Some((path, result)) = results.next().await {
            match result {
                Ok(()) => {
                    report.indexed += 1;
                    tracing::debug!(path = %path, "indexed");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(path = %path, error = %e, "failed to index file");
                    self.store.record_failure(project_id).await?;
                }
            }
            self.store.advance_progress(project_id).await?;
            step += 1;
            reporter.report(IndexProgressEvent::Indexing {
                project: project.name.clone(),
                n: step,
                total,
                failed: report.failed as u64,
            });
        }

        self.store.finish_progress(project_id).await?;
        reporter.report(IndexProgressEvent::Finished {
            project: project.name.clone(),
            total,
            failed: report.failed as u64,
        });

        tracing::info!(
            project = %project.name,
            indexed = report.indexed,
            skipped = report.skipped,
            failed = report.failed,
            "indexing finished"
        );

        Ok(report)
    }
}
