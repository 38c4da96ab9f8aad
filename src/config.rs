use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::credentials::KeyRotator;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    /// Model used for the conversational answer path. Falls back to `llm`.
    #[serde(default)]
    pub chat_llm: Option<LlmConfig>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Environment variable holding the default token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_github_retries")]
    pub max_retries: u32,
    /// Patterns appended to the built-in ignore list.
    #[serde(default)]
    pub extra_ignore: Vec<String>,
    #[serde(default = "default_commit_limit")]
    pub commit_limit: usize,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            branch: default_branch(),
            token_env: default_token_env(),
            concurrency: default_concurrency(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_github_retries(),
            extra_ignore: Vec::new(),
            commit_limit: default_commit_limit(),
        }
    }
}

impl GithubConfig {
    /// The default token from the environment, if set and non-empty.
    pub fn default_token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_concurrency() -> usize {
    10
}
fn default_page_size() -> usize {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_github_retries() -> u32 {
    2
}
fn default_commit_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override (Groq, proxies, test servers).
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variables holding API keys. Each may hold a
    /// comma-separated list; all keys are rotated round-robin.
    #[serde(default)]
    pub api_key_env: Vec<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            api_key_env: Vec::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Key env vars to read, falling back to the provider's conventional name.
    pub fn key_rotator(&self) -> KeyRotator {
        KeyRotator::from_env(&key_envs(&self.api_key_env, &self.provider))
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            api_key_env: Vec::new(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn key_rotator(&self) -> KeyRotator {
        KeyRotator::from_env(&key_envs(&self.api_key_env, &self.provider))
    }
}

fn key_envs(configured: &[String], provider: &str) -> Vec<String> {
    if !configured.is_empty() {
        return configured.to_vec();
    }
    match provider {
        "gemini" => vec!["GEMINI_API_KEY".to_string()],
        "openai" => vec!["OPENAI_API_KEY".to_string()],
        _ => Vec::new(),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Characters of file content sent to the summarizer.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    /// Files summarized and embedded concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Upper bound on summarize + embed + write for one file.
    #[serde(default = "default_file_timeout_secs")]
    pub file_timeout_secs: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
            concurrency: default_concurrency(),
            file_timeout_secs: default_file_timeout_secs(),
        }
    }
}

fn default_max_content_chars() -> usize {
    10_000
}
fn default_file_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_qa_limit")]
    pub qa_limit: usize,
    #[serde(default = "default_chat_limit")]
    pub chat_limit: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            qa_limit: default_qa_limit(),
            chat_limit: default_chat_limit(),
            history_window: default_history_window(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_threshold() -> f32 {
    0.5
}
fn default_qa_limit() -> usize {
    10
}
fn default_chat_limit() -> usize {
    5
}
fn default_history_window() -> usize {
    3
}
fn default_channel_capacity() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// The model config for the conversational path.
    pub fn chat_llm(&self) -> &LlmConfig {
        self.chat_llm.as_ref().unwrap_or(&self.llm)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.github.concurrency == 0 {
        anyhow::bail!("github.concurrency must be > 0");
    }
    if config.github.page_size == 0 || config.github.page_size > 100 {
        anyhow::bail!("github.page_size must be in [1, 100]");
    }

    if config.indexing.max_content_chars == 0 {
        anyhow::bail!("indexing.max_content_chars must be > 0");
    }
    if config.indexing.concurrency == 0 {
        anyhow::bail!("indexing.concurrency must be > 0");
    }

    if !(-1.0..=1.0).contains(&config.retrieval.threshold) {
        anyhow::bail!("retrieval.threshold must be in [-1.0, 1.0]");
    }
    if config.retrieval.qa_limit == 0 || config.retrieval.chat_limit == 0 {
        anyhow::bail!("retrieval.qa_limit and retrieval.chat_limit must be >= 1");
    }
    if config.retrieval.channel_capacity == 0 {
        anyhow::bail!("retrieval.channel_capacity must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "gemini" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, gemini, openai, or ollama.",
            other
        ),
    }

    for (section, llm) in [("llm", Some(&config.llm)), ("chat_llm", config.chat_llm.as_ref())] {
        let Some(llm) = llm else { continue };
        match llm.provider.as_str() {
            "disabled" | "gemini" | "openai" => {}
            other => anyhow::bail!(
                "Unknown {} provider: '{}'. Must be disabled, gemini, or openai.",
                section,
                other
            ),
        }
        if llm.is_enabled() && llm.model.is_none() {
            anyhow::bail!(
                "{}.model must be specified when provider is '{}'",
                section,
                llm.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/sage.sqlite\"\n").unwrap();
        assert_eq!(config.github.branch, "main");
        assert_eq!(config.github.concurrency, 10);
        assert_eq!(config.github.page_size, 100);
        assert_eq!(config.github.token_env, "GITHUB_TOKEN");
        assert_eq!(config.retrieval.threshold, 0.5);
        assert_eq!(config.retrieval.qa_limit, 10);
        assert_eq!(config.retrieval.chat_limit, 5);
        assert_eq!(config.retrieval.history_window, 3);
        assert!(!config.llm.is_enabled());
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn chat_llm_falls_back_to_llm() {
        let config = parse(
            r#"
[db]
path = "x.sqlite"

[llm]
provider = "gemini"
model = "gemini-1.5-flash"
"#,
        )
        .unwrap();
        assert_eq!(config.chat_llm().provider, "gemini");
    }

    #[test]
    fn enabled_embedding_requires_dims() {
        let err = parse(
            r#"
[db]
path = "x.sqlite"

[embedding]
provider = "gemini"
model = "text-embedding-004"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn unknown_llm_provider_is_rejected() {
        let err = parse(
            r#"
[db]
path = "x.sqlite"

[chat_llm]
provider = "mystery"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("chat_llm"));
    }

    #[test]
    fn page_size_above_api_max_is_rejected() {
        let err = parse("[db]\npath = \"x\"\n[github]\npage_size = 500\n").unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }
}
