//! Shared plumbing for model and embedding HTTP calls: keyed JSON POSTs
//! with retry, and Server-Sent Events decoding for streamed completions.

use anyhow::{anyhow, bail, Result};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response};
use std::time::Duration;

use crate::credentials::CredentialProvider;

/// Where the API key goes on the request.
#[derive(Debug, Clone, Copy)]
pub(crate) enum KeyPlacement {
    Bearer,
    Header(&'static str),
}

/// A JSON POST, retried like the embedding calls: 429/5xx/network errors
/// back off exponentially and retry, other 4xx fail at once. Each attempt
/// draws a fresh credential, so retries rotate through the key pool.
pub(crate) struct JsonPost<'a> {
    pub client: &'a Client,
    pub url: &'a str,
    pub body: &'a serde_json::Value,
    pub placement: KeyPlacement,
    pub credentials: &'a dyn CredentialProvider,
    pub max_retries: u32,
    /// Whole-request timeout. `None` for streamed responses.
    pub timeout: Option<Duration>,
    /// Service name used in error messages.
    pub service: &'a str,
}

impl JsonPost<'_> {
    pub(crate) async fn send(&self) -> Result<Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .post(self.url)
                .header("Content-Type", "application/json")
                .json(self.body);
            if let Some(timeout) = self.timeout {
                req = req.timeout(timeout);
            }
            if let Some(key) = self.credentials.next_credential() {
                req = match self.placement {
                    KeyPlacement::Bearer => req.bearer_auth(key),
                    KeyPlacement::Header(name) => req.header(name, key),
                };
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(service = self.service, %status, attempt, "retrying");
                        last_err = Some(anyhow!("{} API error {}: {}", self.service, status, body_text));
                        continue;
                    }

                    bail!("{} API error {}: {}", self.service, status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", self.service)))
    }
}

/// Decode a `text/event-stream` body into the payloads of its `data:`
/// lines, in order. Lines are split on raw bytes so multi-byte characters
/// spanning network chunks survive intact.
pub(crate) fn sse_data(response: Response) -> BoxStream<'static, Result<String>> {
    let bytes = response.bytes_stream().boxed();

    stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buf, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    if let Some(data) = data_payload(&line) {
                        return Some((Ok(data), (bytes, buf, false)));
                    }
                    continue;
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(e.into()), (bytes, buf, true))),
                    None => {
                        let rest = std::mem::take(&mut buf);
                        return data_payload(&rest).map(|data| (Ok(data), (bytes, buf, true)));
                    }
                }
            }
        },
    )
    .boxed()
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    line.strip_prefix("data:").map(|d| d.trim_start().to_string())
}
