//! Generative model clients.
//!
//! [`LanguageModel`] is the seam between the pipelines and a hosted model.
//! Two backends are provided:
//!
//! - **[`GeminiModel`]**: `generateContent` / `streamGenerateContent`.
//! - **[`OpenAiModel`]**: any OpenAI-compatible `/chat/completions`
//!   endpoint (OpenAI, Groq, local proxies).
//!
//! Both draw keys from a [`CredentialProvider`] and retry 429/5xx with
//! exponential backoff. Streamed completions are delivered as a stream of
//! text deltas in the order the provider produced them.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use code_sage_core::prompt::PromptParts;

use crate::config::LlmConfig;
use crate::credentials::CredentialProvider;
use crate::http::{sse_data, JsonPost, KeyPlacement};

/// Ordered text deltas of one streamed completion.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// One complete response.
    async fn generate(&self, prompt: &PromptParts) -> Result<String>;

    /// A response delivered incrementally.
    async fn stream(&self, prompt: &PromptParts) -> Result<TokenStream>;
}

/// Instantiate the model named by `config.provider`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiModel::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiModel::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledModel)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Fails every call. Used when `llm.provider = "disabled"`.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &PromptParts) -> Result<String> {
        bail!("LLM provider is disabled")
    }

    async fn stream(&self, _prompt: &PromptParts) -> Result<TokenStream> {
        bail!("LLM provider is disabled")
    }
}

struct ModelSettings {
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    max_retries: u32,
}

impl ModelSettings {
    fn from_config(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required for provider '{}'", config.provider))?;
        Ok(Self {
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        })
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

// ============ Gemini ============

pub struct GeminiModel {
    http: reqwest::Client,
    base_url: String,
    settings: ModelSettings,
    credentials: Arc<dyn CredentialProvider>,
}

impl GeminiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Self::with_credentials(config, Arc::new(config.key_rotator()))
    }

    pub fn with_credentials(
        config: &LlmConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            settings: ModelSettings::from_config(config)?,
            credentials,
        })
    }

    fn body(&self, prompt: &PromptParts) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt.user }] }],
            "generationConfig": {
                "temperature": self.settings.temperature,
                "maxOutputTokens": self.settings.max_tokens,
            },
        });
        if let Some(system) = &prompt.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.base_url, self.settings.model, method
        )
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    async fn generate(&self, prompt: &PromptParts) -> Result<String> {
        let url = self.url("generateContent");
        let body = self.body(prompt);
        let response = JsonPost {
            client: &self.http,
            url: &url,
            body: &body,
            placement: KeyPlacement::Header("x-goog-api-key"),
            credentials: self.credentials.as_ref(),
            max_retries: self.settings.max_retries,
            timeout: Some(self.settings.timeout),
            service: "Gemini",
        }
        .send()
        .await?;

        let json: Value = response.json().await?;
        gemini_text(&json)?.ok_or_else(|| anyhow!("Gemini returned no text"))
    }

    async fn stream(&self, prompt: &PromptParts) -> Result<TokenStream> {
        let url = format!("{}?alt=sse", self.url("streamGenerateContent"));
        let body = self.body(prompt);
        let response = JsonPost {
            client: &self.http,
            url: &url,
            body: &body,
            placement: KeyPlacement::Header("x-goog-api-key"),
            credentials: self.credentials.as_ref(),
            max_retries: self.settings.max_retries,
            timeout: None,
            service: "Gemini",
        }
        .send()
        .await?;

        Ok(sse_data(response)
            .filter_map(|data| {
                future::ready(match data {
                    Ok(data) => serde_json::from_str::<Value>(&data)
                        .map_err(anyhow::Error::from)
                        .and_then(|json| gemini_text(&json))
                        .transpose(),
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed())
    }
}

/// Concatenated text parts of the first candidate. `Ok(None)` when the
/// chunk carries no text (e.g. a final usage-only chunk).
fn gemini_text(json: &Value) -> Result<Option<String>> {
    if let Some(err) = json.get("error") {
        bail!("Gemini error: {}", err);
    }
    let text: String = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();
    Ok(if text.is_empty() { None } else { Some(text) })
}

// ============ OpenAI-compatible ============

pub struct OpenAiModel {
    http: reqwest::Client,
    base_url: String,
    settings: ModelSettings,
    credentials: Arc<dyn CredentialProvider>,
}

impl OpenAiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Self::with_credentials(config, Arc::new(config.key_rotator()))
    }

    pub fn with_credentials(
        config: &LlmConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            settings: ModelSettings::from_config(config)?,
            credentials,
        })
    }

    fn body(&self, prompt: &PromptParts, stream: bool) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &prompt.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt.user }));
        json!({
            "model": self.settings.model,
            "messages": messages,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "stream": stream,
        })
    }

    async fn post(&self, body: &Value, timeout: Option<Duration>) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        JsonPost {
            client: &self.http,
            url: &url,
            body,
            placement: KeyPlacement::Bearer,
            credentials: self.credentials.as_ref(),
            max_retries: self.settings.max_retries,
            timeout,
            service: "Chat completion",
        }
        .send()
        .await
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    async fn generate(&self, prompt: &PromptParts) -> Result<String> {
        let body = self.body(prompt, false);
        let json: Value = self
            .post(&body, Some(self.settings.timeout))
            .await?
            .json()
            .await?;
        if let Some(err) = json.get("error") {
            bail!("Chat completion error: {}", err);
        }
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Chat completion returned no content"))
    }

    async fn stream(&self, prompt: &PromptParts) -> Result<TokenStream> {
        let body = self.body(prompt, true);
        let response = self.post(&body, None).await?;

        Ok(sse_data(response)
            .take_while(|data| future::ready(!matches!(data, Ok(d) if d == "[DONE]")))
            .filter_map(|data| {
                future::ready(match data {
                    Ok(data) => openai_delta(&data).transpose(),
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed())
    }
}

fn openai_delta(data: &str) -> Result<Option<String>> {
    let json: Value = serde_json::from_str(data)?;
    if let Some(err) = json.get("error") {
        bail!("Chat completion error: {}", err);
    }
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}
