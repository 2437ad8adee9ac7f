//! REST client for the version-control host.
//!
//! Status codes map onto the error taxonomy: 401/403/404 are auth
//! failures (fatal for the calling run), 429 and 5xx are retryable.
//! Retryable calls get up to 3 attempts with capped exponential
//! backoff and ±20% jitter.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use std::time::Duration;

use prdigest_core::config::HostConfig;
use prdigest_core::error::{DigestError, Result};
use prdigest_core::types::{ChangedFile, PullRequest};

const MAX_ATTEMPTS: u32 = 3;
pub const PAGE_SIZE: u32 = 100;

pub struct HostClient {
    http: reqwest::Client,
    api_base: String,
}

impl HostClient {
    pub fn new(config: &HostConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DigestError::Host(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// One page of pull requests, most recently updated first.
    pub async fn list_pull_requests(
        &self,
        owner: &str,
        name: &str,
        token: &str,
        page: u32,
    ) -> Result<Vec<Value>> {
        let url = format!(
            "{}/repos/{owner}/{name}/pulls?state=all&sort=updated&direction=desc&per_page={PAGE_SIZE}&page={page}",
            self.api_base
        );
        let body = self.get_with_retry(&url, Some(token)).await?;
        body.as_array()
            .cloned()
            .ok_or_else(|| DigestError::Host("pull request list is not an array".into()))
    }

    /// First page of changed files for one pull request.
    pub async fn list_pr_files(
        &self,
        owner: &str,
        name: &str,
        number: u64,
        token: &str,
        per_page: usize,
    ) -> Result<Vec<Value>> {
        let url = format!(
            "{}/repos/{owner}/{name}/pulls/{number}/files?per_page={per_page}",
            self.api_base
        );
        let body = self.get_with_retry(&url, Some(token)).await?;
        body.as_array()
            .cloned()
            .ok_or_else(|| DigestError::Host("file list is not an array".into()))
    }

    /// Credential-less fallback: host-wide author search restricted to
    /// the window. Cannot see private repositories.
    pub async fn search_author_prs(
        &self,
        author: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        let query = format!(
            "author:{author} is:pr updated:{}..{}",
            from.format("%Y-%m-%dT%H:%M:%SZ"),
            to.format("%Y-%m-%dT%H:%M:%SZ"),
        );
        let url = format!(
            "{}/search/issues?q={}&per_page={PAGE_SIZE}",
            self.api_base,
            urlencode(&query)
        );
        let body = self.get_with_retry(&url, None).await?;
        body["items"]
            .as_array()
            .cloned()
            .ok_or_else(|| DigestError::Host("search result has no items array".into()))
    }

    async fn get_with_retry(&self, url: &str, token: Option<&str>) -> Result<Value> {
        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.get_json(url, token).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        url,
                        attempt,
                        "transient host error, retrying in {:.1}s: {e}",
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| DigestError::Host("retry budget exhausted".into())))
    }

    async fn get_json(&self, url: &str, token: Option<&str>) -> Result<Value> {
        let mut req = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DigestError::Host(format!("host request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json()
                .await
                .map_err(|e| DigestError::Host(format!("host response parse failed: {e}")));
        }

        let text = resp.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &text))
    }
}

/// Map a non-success status onto the error taxonomy.
fn classify_status(status: u16, body: &str) -> DigestError {
    let detail = body.chars().take(200).collect::<String>();
    match status {
        401 | 403 => DigestError::HostAuth(format!("host rejected credential ({status}): {detail}")),
        404 => DigestError::HostAuth(format!("repository not visible (404): {detail}")),
        429 => DigestError::HostRate(format!("host rate limit (429): {detail}")),
        s if s >= 500 => DigestError::Host(format!("host error ({s}): {detail}")),
        s => DigestError::HostRejected(format!("unexpected host status ({s}): {detail}")),
    }
}

/// `min(2^attempt, 30)` seconds with ±20% jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = (1u64 << attempt.min(5)).min(30) as f64;
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64(base * jitter)
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(ch),
            ' ' => out.push('+'),
            _ => {
                let mut buf = [0u8; 4];
                for b in ch.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    out
}

/// Parse one pull request object from the host's JSON.
pub fn parse_pull_request(v: &Value, repository: &str) -> Option<PullRequest> {
    let labels = v["labels"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|l| l["name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    Some(PullRequest {
        number: v["number"].as_u64()?,
        title: v["title"].as_str().unwrap_or("").to_string(),
        state: v["state"].as_str().unwrap_or("open").to_string(),
        author_login: v["user"]["login"].as_str().unwrap_or("").to_string(),
        created_at: parse_instant(&v["created_at"]),
        updated_at: parse_instant(&v["updated_at"]),
        html_url: v["html_url"].as_str().unwrap_or("").to_string(),
        body: v["body"].as_str().map(String::from),
        labels,
        repository: repository.to_string(),
        files: Vec::new(),
    })
}

/// Parse one changed-file object from the host's JSON.
pub fn parse_changed_file(v: &Value) -> Option<ChangedFile> {
    Some(ChangedFile {
        filename: v["filename"].as_str()?.to_string(),
        status: v["status"].as_str().unwrap_or("modified").to_string(),
        additions: v["additions"].as_u64().unwrap_or(0),
        deletions: v["deletions"].as_u64().unwrap_or(0),
        patch: v["patch"].as_str().map(String::from),
    })
}

/// Derive `owner/name` from a search item's `repository_url`.
pub fn repository_from_search_item(v: &Value) -> String {
    v["repository_url"]
        .as_str()
        .and_then(|u| {
            let mut parts = u.rsplit('/');
            let name = parts.next()?;
            let owner = parts.next()?;
            Some(format!("{owner}/{name}"))
        })
        .unwrap_or_default()
}

fn parse_instant(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}
