//! GitHub REST API client.
//!
//! Thin wrapper over the endpoints the walker and the commit summarizer
//! need: directory listings, file contents, commit lists, and commit
//! diffs. All requests share one `reqwest::Client` with a per-request
//! timeout and the same retry policy as the model clients:
//!
//! - HTTP 429 and 5xx → retry with exponential backoff
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, … capped at 32s

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Response, Url};
use serde::Deserialize;
use std::time::Duration;

use crate::config::GithubConfig;
use crate::error::SageError;

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const DIFF_MEDIA_TYPE: &str = "application/vnd.github.v3.diff";

/// Owner and repository name parsed from a GitHub URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Parse `…github.com/<owner>/<repo>…` into a [`RepoRef`].
///
/// Accepts scheme-less URLs, trailing path segments, and a `.git` suffix.
pub fn parse_repo_url(url: &str) -> Result<RepoRef> {
    let invalid = || SageError::InvalidRepoUrl(url.to_string());

    let rest = url
        .find("github.com/")
        .map(|idx| &url[idx + "github.com/".len()..])
        .ok_or_else(invalid)?;

    let mut segments = rest
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .split('/');
    let owner = segments.next().unwrap_or_default();
    let repo = segments.next().unwrap_or_default();
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    if owner.is_empty() || repo.is_empty() {
        return Err(invalid().into());
    }

    Ok(RepoRef {
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Submodule,
    #[serde(other)]
    Other,
}

/// One entry of a contents-API directory listing.
#[derive(Debug, Clone, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

#[derive(Debug, Deserialize)]
struct FileBody {
    content: Option<String>,
    encoding: Option<String>,
}

/// A commit as reported by the commits API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author_name: String,
    pub author_avatar: String,
    pub date: String,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitDetail,
    author: Option<ApiUser>,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    message: String,
    author: Option<ApiGitAuthor>,
}

#[derive(Debug, Deserialize)]
struct ApiGitAuthor {
    name: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    avatar_url: Option<String>,
}

pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    max_retries: u32,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    fn repo_url(&self, repo: &RepoRef, tail: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .with_context(|| format!("Invalid github.api_url: {}", self.api_url))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("github.api_url cannot be a base URL"))?;
            segments
                .pop_if_empty()
                .extend(["repos", repo.owner.as_str(), repo.repo.as_str()]);
            segments.extend(tail.iter().flat_map(|t| t.split('/')).filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    async fn get(&self, url: Url, accept: &str, token: Option<&str>) -> Result<Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .http
                .get(url.clone())
                .header(ACCEPT, accept)
                .header(USER_AGENT, concat!("code-sage/", env!("CARGO_PKG_VERSION")));
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(%url, %status, attempt, "retryable GitHub response");
                        last_err = Some(anyhow!("GitHub API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("GitHub API error {} for {}: {}", status, url.path(), body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("GitHub request failed after retries")))
    }

    /// One page of a directory listing. A body that is not an array (the
    /// path named a file) yields an empty page.
    pub async fn list_directory(
        &self,
        repo: &RepoRef,
        path: &str,
        branch: &str,
        page: usize,
        per_page: usize,
        token: Option<&str>,
    ) -> Result<Vec<DirEntry>> {
        let mut url = self.repo_url(repo, &["contents", path])?;
        url.query_pairs_mut()
            .append_pair("ref", branch)
            .append_pair("per_page", &per_page.to_string())
            .append_pair("page", &page.to_string());

        let json: serde_json::Value = self.get(url, JSON_MEDIA_TYPE, token).await?.json().await?;
        if !json.is_array() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(json)?)
    }

    /// Decoded text content of one file.
    pub async fn file_content(
        &self,
        repo: &RepoRef,
        path: &str,
        branch: &str,
        token: Option<&str>,
    ) -> Result<String> {
        let mut url = self.repo_url(repo, &["contents", path])?;
        url.query_pairs_mut().append_pair("ref", branch);

        let body: FileBody = self.get(url, JSON_MEDIA_TYPE, token).await?.json().await?;
        decode_content(path, body)
    }

    /// The newest `limit` commits on `branch`, sorted by author date (desc).
    pub async fn list_commits(
        &self,
        repo: &RepoRef,
        branch: &str,
        limit: usize,
        token: Option<&str>,
    ) -> Result<Vec<CommitInfo>> {
        let mut url = self.repo_url(repo, &["commits"])?;
        url.query_pairs_mut()
            .append_pair("sha", branch)
            .append_pair("per_page", &limit.clamp(1, 100).to_string());

        let commits: Vec<ApiCommit> = self.get(url, JSON_MEDIA_TYPE, token).await?.json().await?;

        let mut infos: Vec<CommitInfo> = commits
            .into_iter()
            .map(|c| {
                let (name, date) = c
                    .commit
                    .author
                    .map(|a| (a.name.unwrap_or_default(), a.date.unwrap_or_default()))
                    .unwrap_or_default();
                CommitInfo {
                    hash: c.sha,
                    message: c.commit.message,
                    author_name: name,
                    author_avatar: c.author.and_then(|u| u.avatar_url).unwrap_or_default(),
                    date,
                }
            })
            .collect();

        infos.sort_by(|a, b| commit_time(&b.date).cmp(&commit_time(&a.date)));
        infos.truncate(limit);
        Ok(infos)
    }

    /// Unified diff of one commit.
    pub async fn commit_diff(&self, repo: &RepoRef, sha: &str, token: Option<&str>) -> Result<String> {
        let url = self.repo_url(repo, &["commits", sha])?;
        Ok(self.get(url, DIFF_MEDIA_TYPE, token).await?.text().await?)
    }
}

fn commit_time(date: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(date)
        .map(|d| d.timestamp())
        .unwrap_or(i64::MIN)
}

fn decode_content(path: &str, body: FileBody) -> Result<String> {
    let fetch_err = |message: String| SageError::FileFetch {
        path: path.to_string(),
        message,
    };

    let content = body
        .content
        .ok_or_else(|| fetch_err("response has no content".to_string()))?;

    match body.encoding.as_deref() {
        Some("base64") => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map_err(|e| fetch_err(format!("invalid base64: {}", e)))?;
            String::from_utf8(bytes).map_err(|_| fetch_err("content is not valid UTF-8".into()).into())
        }
        _ => Ok(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_url_shapes() {
        let expected = RepoRef {
            owner: "docker".to_string(),
            repo: "genai-stack".to_string(),
        };
        for url in [
            "https://github.com/docker/genai-stack",
            "github.com/docker/genai-stack",
            "https://github.com/docker/genai-stack.git",
            "https://github.com/docker/genai-stack/tree/main/src",
            "https://github.com/docker/genai-stack?tab=readme",
        ] {
            assert_eq!(parse_repo_url(url).unwrap(), expected, "{}", url);
        }
    }

    #[test]
    fn rejects_urls_without_owner_and_repo() {
        for url in [
            "https://gitlab.com/a/b",
            "https://github.com/",
            "https://github.com/owner",
            "https://github.com/owner/",
            "not a url",
        ] {
            let err = parse_repo_url(url).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<SageError>(), Some(SageError::InvalidRepoUrl(_))),
                "{}",
                url
            );
        }
    }

    #[test]
    fn decodes_wrapped_base64() {
        let body = FileBody {
            content: Some("Zm4gbWFp\nbigpIHt9\n".to_string()),
            encoding: Some("base64".to_string()),
        };
        assert_eq!(decode_content("main.rs", body).unwrap(), "fn main() {}");
    }

    #[test]
    fn non_utf8_content_is_a_fetch_error() {
        let body = FileBody {
            content: Some(base64::engine::general_purpose::STANDARD.encode([0xff, 0xfe, 0x00])),
            encoding: Some("base64".to_string()),
        };
        let err = decode_content("blob.bin", body).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SageError>(),
            Some(SageError::FileFetch { .. })
        ));
    }

    #[test]
    fn missing_content_is_a_fetch_error() {
        let body = FileBody {
            content: None,
            encoding: None,
        };
        assert!(decode_content("x", body).is_err());
    }

    #[test]
    fn builds_contents_urls() {
        let client = GithubClient::new(&GithubConfig {
            api_url: "http://localhost:9999/".to_string(),
            ..GithubConfig::default()
        })
        .unwrap();
        let repo = RepoRef {
            owner: "o".to_string(),
            repo: "r".to_string(),
        };
        let root = client.repo_url(&repo, &["contents", ""]).unwrap();
        assert_eq!(root.path(), "/repos/o/r/contents");
        let nested = client.repo_url(&repo, &["contents", "src/lib.rs"]).unwrap();
        assert_eq!(nested.path(), "/repos/o/r/contents/src/lib.rs");
    }
}
