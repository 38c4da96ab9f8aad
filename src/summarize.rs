//! Summaries of source files and commit diffs.

use anyhow::Result;
use std::sync::Arc;

use code_sage_core::prompt::{
    commit_summary_prompt, source_summary_prompt, truncate_chars, PromptParts,
};

use crate::error::SageError;
use crate::llm::LanguageModel;

/// Turns code and diffs into short natural-language summaries.
///
/// Input is cut to `max_chars` characters before prompting. A model error
/// or a blank response is a [`SageError::Summarization`]; no empty summary
/// is ever returned.
#[derive(Clone)]
pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    max_chars: usize,
}

impl Summarizer {
    pub fn new(model: Arc<dyn LanguageModel>, max_chars: usize) -> Self {
        Self { model, max_chars }
    }

    pub async fn summarize(&self, path: &str, content: &str) -> Result<String> {
        let prompt = source_summary_prompt(path, truncate_chars(content, self.max_chars));
        self.complete(path, prompt).await
    }

    pub async fn summarize_commit(&self, hash: &str, diff: &str) -> Result<String> {
        let prompt = commit_summary_prompt(truncate_chars(diff, self.max_chars));
        self.complete(hash, prompt).await
    }

    async fn complete(&self, subject: &str, prompt: String) -> Result<String> {
        let parts = PromptParts {
            system: None,
            user: prompt,
        };
        let text = self
            .model
            .generate(&parts)
            .await
            .map_err(|e| SageError::Summarization {
                subject: subject.to_string(),
                message: e.to_string(),
            })?;

        let text = text.trim();
        if text.is_empty() {
            return Err(SageError::Summarization {
                subject: subject.to_string(),
                message: "model returned an empty summary".to_string(),
            }
            .into());
        }
        Ok(text.to_string())
    }
}
