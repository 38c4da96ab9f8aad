//! Query-side retrieval: embed the question, rank the project's vectors.

use anyhow::Result;
use std::sync::Arc;

use code_sage_core::embedding::Embedder;
use code_sage_core::models::FileMatch;
use code_sage_core::prompt::PromptStyle;
use code_sage_core::retrieval::{retrieve, RetrievalParams};
use code_sage_core::store::Store;

use crate::config::RetrievalConfig;

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Best matches for `query`, most similar first. No match above the
    /// threshold yields an empty list.
    pub async fn retrieve(
        &self,
        project_id: &str,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<FileMatch>> {
        let query_vec = self.embedder.embed(query).await?;
        let matches = retrieve(self.store.as_ref(), project_id, &query_vec, params).await?;
        tracing::debug!(
            project = project_id,
            matches = matches.len(),
            top = matches.first().map(|m| m.similarity),
            "retrieved"
        );
        Ok(matches)
    }
}

/// Parameters for a call site: the Q&A path reads more files than chat.
pub fn params_for(style: PromptStyle, config: &RetrievalConfig) -> RetrievalParams {
    RetrievalParams {
        limit: match style {
            PromptStyle::Qa => config.qa_limit,
            PromptStyle::Chat => config.chat_limit,
        },
        threshold: config.threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_sites_use_their_own_limits() {
        let config = RetrievalConfig::default();
        assert_eq!(params_for(PromptStyle::Qa, &config).limit, 10);
        assert_eq!(params_for(PromptStyle::Chat, &config).limit, 5);
        assert_eq!(params_for(PromptStyle::Chat, &config).threshold, 0.5);
    }
}
