//! Embedding providers.
//!
//! Concrete implementations of the core [`Embedder`] trait:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`HttpEmbedder`]**: one of three wire formats, chosen by provider:
//!   - `gemini`: `models/{model}:embedContent`
//!   - `openai`: any OpenAI-compatible `/embeddings` endpoint
//!   - `ollama`: a local Ollama instance's `/api/embed`
//!
//! Every provider checks what it returns: an empty vector is an
//! [`SageError::Embedding`] and a vector whose length differs from the
//! configured `dims` is a [`DimensionMismatch`]. Neither ever reaches the
//! index.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//! - Each attempt uses the next key from the configured pool

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use code_sage_core::embedding::Embedder;
use code_sage_core::DimensionMismatch;

use crate::config::EmbeddingConfig;
use crate::credentials::CredentialProvider;
use crate::error::SageError;
use crate::http::{JsonPost, KeyPlacement};

/// Instantiate the embedder named by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "gemini" | "openai" | "ollama" => Ok(Arc::new(HttpEmbedder::new(
            config,
            Arc::new(config.key_rotator()),
        )?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Reject empty vectors and vectors of the wrong length.
pub fn check_vector(vec: Vec<f32>, dims: usize) -> Result<Vec<f32>> {
    if vec.is_empty() {
        return Err(SageError::Embedding("provider returned an empty vector".to_string()).into());
    }
    DimensionMismatch::check(dims, vec.len())?;
    Ok(vec)
}

/// `None` unless `values` is an array of numbers only.
fn floats(values: &Value) -> Option<Vec<f32>> {
    values
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ HTTP providers ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Api {
    Gemini,
    OpenAi,
    Ollama,
}

/// One HTTP embedding backend; the wire format follows `api`.
pub struct HttpEmbedder {
    api: Api,
    http: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    max_retries: u32,
    timeout: Duration,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let (api, default_url) = match config.provider.as_str() {
            "gemini" => (Api::Gemini, "https://generativelanguage.googleapis.com"),
            "openai" => (Api::OpenAi, "https://api.openai.com/v1"),
            "ollama" => (Api::Ollama, "http://localhost:11434"),
            other => bail!("Unknown embedding provider: {}", other),
        };
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for provider '{}'", config.provider))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for provider '{}'", config.provider))?;

        Ok(Self {
            api,
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            dims,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
            credentials,
        })
    }

    fn request(&self, text: &str) -> (String, Value, KeyPlacement, &'static str) {
        match self.api {
            Api::Gemini => (
                format!("{}/v1beta/models/{}:embedContent", self.base_url, self.model),
                json!({
                    "model": format!("models/{}", self.model),
                    "content": { "parts": [{ "text": text }] },
                }),
                KeyPlacement::Header("x-goog-api-key"),
                "Gemini",
            ),
            Api::OpenAi => (
                format!("{}/embeddings", self.base_url),
                json!({ "model": self.model, "input": [text] }),
                KeyPlacement::Bearer,
                "Embeddings",
            ),
            Api::Ollama => (
                format!("{}/api/embed", self.base_url),
                json!({ "model": self.model, "input": [text] }),
                KeyPlacement::Bearer,
                "Ollama",
            ),
        }
    }

    fn parse(&self, json: &Value) -> Result<Vec<f32>> {
        let values = match self.api {
            Api::Gemini => json.pointer("/embedding/values"),
            Api::OpenAi => json.pointer("/data/0/embedding"),
            Api::Ollama => json.pointer("/embeddings/0"),
        };
        values
            .and_then(floats)
            .ok_or_else(|| SageError::Embedding(format!("unexpected response shape from {:?}", self.api)).into())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let (url, body, placement, service) = self.request(text);
        let response = JsonPost {
            client: &self.http,
            url: &url,
            body: &body,
            placement,
            credentials: self.credentials.as_ref(),
            max_retries: self.max_retries,
            timeout: Some(self.timeout),
            service,
        }
        .send()
        .await?;

        let json: Value = response.json().await?;
        check_vector(self.parse(&json)?, self.dims)
    }
}
