//! GitHub content API client.
//!
//! A blocking client shared by branch resolution, the tarball stream, raw
//! file fetches, and the repository analytics calls. Requests hitting the
//! rate limiter (HTTP 403/429) sleep until the advertised reset time when
//! the `X-RateLimit-Reset` header is present (capped at 60s), otherwise
//! back off exponentially (capped at 32s), up to a configured attempt
//! count. After the attempts are exhausted the last response is returned
//! as-is for the caller to inspect.

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::models::RepoRef;

const API_BASE: &str = "https://api.github.com";
const RAW_BASE: &str = "https://raw.githubusercontent.com";

const ACCEPT_JSON: &str = "application/vnd.github.v3+json";
const ACCEPT_RAW: &str = "application/vnd.github.v3.raw";
const ACCEPT_TOPICS: &str = "application/vnd.github.mercy-preview+json";

const MAX_RESET_WAIT: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(32);

/// Characters of readme kept in the analytics blob.
const README_PREVIEW_CHARS: usize = 3000;

#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    token: Option<String>,
    max_attempts: u32,
}

impl GithubClient {
    pub fn new(token: Option<String>, max_attempts: u32) -> Result<Self> {
        // No whole-request timeout: the tarball body streams for as long as
        // the ingestion budgets allow.
        let client = Client::builder()
            .user_agent(concat!("gitrag/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(None)
            .build()?;
        Ok(Self {
            client,
            token,
            max_attempts: max_attempts.max(1),
        })
    }

    /// Resolve the repository's default branch, falling back to `"main"`
    /// when the field is missing from the response.
    pub fn default_branch(&self, repo: &RepoRef) -> Result<String> {
        let url = format!("{API_BASE}/repos/{}/{}", repo.owner, repo.name);
        let resp = self.request_with_backoff(&url, ACCEPT_JSON)?;
        if !resp.status().is_success() {
            bail!(
                "Failed to resolve default branch for {}/{} (status {})",
                repo.owner,
                repo.name,
                resp.status()
            );
        }
        let body: Value = resp.json().context("Invalid repository response")?;
        Ok(body
            .get("default_branch")
            .and_then(|v| v.as_str())
            .unwrap_or("main")
            .to_string())
    }

    /// Open a streaming gzipped-tarball transfer of the tree at `reference`.
    /// The returned response body implements `Read` and is consumed lazily.
    pub fn open_tarball(&self, repo: &RepoRef, reference: &str) -> Result<Response> {
        let url = format!(
            "{API_BASE}/repos/{}/{}/tarball/{}",
            repo.owner, repo.name, reference
        );
        let resp = self.request_with_backoff(&url, ACCEPT_JSON)?;
        if !resp.status().is_success() {
            bail!(
                "Failed to open archive stream for {}/{}@{} (status {})",
                repo.owner,
                repo.name,
                reference,
                resp.status()
            );
        }
        Ok(resp)
    }

    /// Fetch one file's raw content at `branch`.
    pub fn raw_file(&self, repo: &RepoRef, branch: &str, path: &str) -> Result<String> {
        let url = format!(
            "{RAW_BASE}/{}/{}/{}/{}",
            repo.owner, repo.name, branch, path
        );
        let resp = self.request_with_backoff(&url, ACCEPT_RAW)?;
        if !resp.status().is_success() {
            bail!("Failed to fetch '{}' (status {})", path, resp.status());
        }
        resp.text().context("Failed to read file body")
    }

    /// Assemble the repository analytics blob. The repo-info call is
    /// required; the auxiliary fetches degrade to empty values so a flaky
    /// endpoint cannot sink the whole blob.
    pub fn repo_analytics(&self, repo: &RepoRef) -> Result<Value> {
        let base = format!("{API_BASE}/repos/{}/{}", repo.owner, repo.name);
        let info = self.get_json(&base, ACCEPT_JSON)?;
        let languages = self.get_json(&format!("{base}/languages"), ACCEPT_JSON);
        let contributors = self.get_json(&format!("{base}/contributors"), ACCEPT_JSON);
        let topics = self.get_json(&format!("{base}/topics"), ACCEPT_TOPICS);
        let releases = self.get_json(&format!("{base}/releases"), ACCEPT_JSON);
        let readme = self.fetch_text(&format!("{base}/readme"), ACCEPT_RAW);

        Ok(build_analytics(
            &info,
            languages.unwrap_or_default(),
            contributors.unwrap_or_default(),
            topics.unwrap_or_default(),
            releases.unwrap_or_default(),
            &readme.unwrap_or_default(),
        ))
    }

    /// GET with rate-limit-aware retry. Statuses other than 403/429 are
    /// returned on the first attempt; the caller inspects them.
    pub fn request_with_backoff(&self, url: &str, accept: &str) -> Result<Response> {
        let mut last_resp: Option<Response> = None;
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..self.max_attempts {
            match self.send(url, accept) {
                Ok(resp) => {
                    let status = resp.status();
                    if status != StatusCode::FORBIDDEN
                        && status != StatusCode::TOO_MANY_REQUESTS
                    {
                        debug!(%url, %status, "github request");
                        return Ok(resp);
                    }
                    let wait = rate_limit_wait(&resp).unwrap_or_else(|| backoff_delay(attempt));
                    last_resp = Some(resp);
                    if attempt + 1 < self.max_attempts {
                        warn!(%url, %status, wait_secs = wait.as_secs(), "rate limited, retrying");
                        std::thread::sleep(wait);
                    }
                }
                Err(e) => {
                    last_err = Some(e.into());
                    if attempt + 1 < self.max_attempts {
                        std::thread::sleep(backoff_delay(attempt));
                    }
                }
            }
        }

        match last_resp {
            Some(resp) => Ok(resp),
            None => Err(last_err
                .unwrap_or_else(|| anyhow::anyhow!("Request failed without response: {url}"))),
        }
    }

    fn send(&self, url: &str, accept: &str) -> reqwest::Result<Response> {
        let mut req = self.client.get(url).header("Accept", accept);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("token {token}"));
        }
        req.send()
    }

    fn get_json(&self, url: &str, accept: &str) -> Result<Value> {
        let resp = self.request_with_backoff(url, accept)?;
        if !resp.status().is_success() {
            bail!("GET {} returned status {}", url, resp.status());
        }
        resp.json().context("Invalid JSON response")
    }

    fn fetch_text(&self, url: &str, accept: &str) -> Result<String> {
        let resp = self.request_with_backoff(url, accept)?;
        if !resp.status().is_success() {
            bail!("GET {} returned status {}", url, resp.status());
        }
        resp.text().context("Failed to read response body")
    }
}

/// Seconds until the advertised rate-limit reset, capped.
fn rate_limit_wait(resp: &Response) -> Option<Duration> {
    let reset: u64 = resp
        .headers()
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .parse()
        .ok()?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(Duration::from_secs(reset.saturating_sub(now)).min(MAX_RESET_WAIT))
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.min(5)).min(MAX_BACKOFF)
}

fn build_analytics(
    info: &Value,
    languages: Value,
    contributors: Value,
    topics: Value,
    releases: Value,
    readme: &str,
) -> Value {
    let contributors: Vec<Value> = contributors
        .as_array()
        .map(|list| {
            list.iter()
                .take(10)
                .map(|c| {
                    serde_json::json!({
                        "login": c.get("login"),
                        "contributions": c.get("contributions"),
                        "avatar_url": c.get("avatar_url"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let releases: Vec<Value> = releases
        .as_array()
        .map(|list| {
            list.iter()
                .take(5)
                .map(|r| {
                    serde_json::json!({
                        "name": r.get("name"),
                        "tag": r.get("tag_name"),
                        "published_at": r.get("published_at"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    serde_json::json!({
        "repo_name": info.get("name"),
        "owner": info.pointer("/owner/login"),
        "description": info.get("description"),
        "stars": info.get("stargazers_count"),
        "forks": info.get("forks_count"),
        "open_issues": info.get("open_issues_count"),
        "watchers": info.get("subscribers_count"),
        "default_branch": info.get("default_branch"),
        "license": info.pointer("/license/name"),
        "created_at": info.get("created_at"),
        "updated_at": info.get("updated_at"),
        "pushed_at": info.get("pushed_at"),
        "homepage": info.get("homepage"),
        "size_kb": info.get("size"),
        "language": info.get("language"),
        "languages": languages,
        "topics": topics.get("names").cloned().unwrap_or_else(|| Value::Array(vec![])),
        "contributors": contributors,
        "releases": releases,
        "readme": readme_preview(readme),
    })
}

fn readme_preview(readme: &str) -> String {
    let preview: String = readme.chars().take(README_PREVIEW_CHARS).collect();
    if readme.chars().count() > README_PREVIEW_CHARS {
        format!("{preview}...")
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_then_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(16));
        assert_eq!(backoff_delay(5), Duration::from_secs(32));
        assert_eq!(backoff_delay(12), Duration::from_secs(32));
    }

    #[test]
    fn test_readme_preview_truncates_with_ellipsis() {
        let long = "x".repeat(README_PREVIEW_CHARS + 10);
        let preview = readme_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), README_PREVIEW_CHARS + 3);

        assert_eq!(readme_preview("short"), "short");
    }

    #[test]
    fn test_build_analytics_shape() {
        let info = serde_json::json!({
            "name": "cargo",
            "owner": {"login": "rust-lang"},
            "stargazers_count": 42,
            "license": {"name": "MIT"},
        });
        let contributors = serde_json::json!([
            {"login": "alice", "contributions": 10, "avatar_url": "u1", "extra": true},
        ]);
        let analytics = build_analytics(
            &info,
            serde_json::json!({"Rust": 1000}),
            contributors,
            serde_json::json!({"names": ["build", "tooling"]}),
            serde_json::json!([]),
            "readme body",
        );

        assert_eq!(analytics["repo_name"], "cargo");
        assert_eq!(analytics["owner"], "rust-lang");
        assert_eq!(analytics["stars"], 42);
        assert_eq!(analytics["license"], "MIT");
        assert_eq!(analytics["topics"][0], "build");
        assert_eq!(analytics["contributors"][0]["login"], "alice");
        assert!(analytics["contributors"][0].get("extra").is_none());
        assert_eq!(analytics["readme"], "readme body");
    }
}
