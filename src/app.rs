//! Wiring: builds the store, clients and pipelines from a [`Config`].
//!
//! CLI commands and HTTP handlers both go through [`Services`], so every
//! entry point shares one set of components.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

use code_sage_core::embedding::Embedder;
use code_sage_core::models::Project;
use code_sage_core::store::Store;

use crate::answer::Assistant;
use crate::commits::CommitPoller;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::github::parse_repo_url;
use crate::indexer::{Indexer, IndexerSettings};
use crate::llm::{create_model, LanguageModel};
use crate::retrieve::Retriever;
use crate::sqlite_store::SqliteStore;
use crate::summarize::Summarizer;
use crate::walker::{GithubWalker, RepositorySource};

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub source: Arc<dyn RepositorySource>,
    pub summarizer: Summarizer,
    pub embedder: Arc<dyn Embedder>,
    pub assistant: Assistant,
}

/// Components that tests may replace.
pub struct Components {
    pub store: Arc<dyn Store>,
    pub source: Arc<dyn RepositorySource>,
    pub model: Arc<dyn LanguageModel>,
    pub chat_model: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
}

impl Services {
    /// Open the SQLite database and build every client from `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let components = Components {
            store,
            source: Arc::new(GithubWalker::new(&config.github)?),
            model: create_model(&config.llm)?,
            chat_model: create_model(config.chat_llm())?,
            embedder: create_embedder(&config.embedding)?,
        };
        Ok(Self::from_components(config, components))
    }

    pub fn from_components(config: Config, c: Components) -> Self {
        let summarizer = Summarizer::new(Arc::clone(&c.model), config.indexing.max_content_chars);
        let retriever = Retriever::new(Arc::clone(&c.store), Arc::clone(&c.embedder));
        let assistant = Assistant::new(
            Arc::clone(&c.store),
            retriever,
            c.model,
            c.chat_model,
            config.retrieval.clone(),
        );
        Self {
            config: Arc::new(config),
            store: c.store,
            source: c.source,
            summarizer,
            embedder: c.embedder,
            assistant,
        }
    }

    pub fn indexer(&self, full: bool) -> Indexer {
        Indexer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.source),
            self.summarizer.clone(),
            Arc::clone(&self.embedder),
            IndexerSettings {
                concurrency: self.config.indexing.concurrency,
                file_timeout: Duration::from_secs(self.config.indexing.file_timeout_secs),
                full,
            },
        )
    }

    pub fn commit_poller(&self) -> Result<CommitPoller> {
        CommitPoller::new(
            Arc::clone(&self.store),
            self.summarizer.clone(),
            &self.config.github,
        )
    }

    /// Validate and store a new project.
    pub async fn add_project(
        &self,
        name: &str,
        repo_url: &str,
        access_token: Option<String>,
    ) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            bail!("project name must not be empty");
        }
        parse_repo_url(repo_url)?;
        let token = access_token.filter(|t| !t.trim().is_empty());
        let project = Project::new(name, repo_url.trim(), token);
        self.store.create_project(&project).await?;
        tracing::info!(project = %project.id, name = %project.name, "project created");
        Ok(project)
    }
}
