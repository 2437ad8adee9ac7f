//! Summarise stage — OpenAI-compatible chat completion with
//! client-side pacing and retries.
//!
//! The pacer enforces a minimum interval between requests process-wide;
//! it lives on the summariser, whose lifetime matches the executor's.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use prdigest_core::config::LlmConfig;
use prdigest_core::error::{DigestError, Result};
use prdigest_core::traits::SummaryProvider;
use prdigest_core::types::ActivityBundle;

use crate::prompt::build_prompt;

const MAX_ATTEMPTS: u32 = 3;

pub struct LlmSummarizer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl LlmSummarizer {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(DigestError::Config("LLM API key is not configured".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DigestError::Llm(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            min_interval: Duration::from_secs(config.min_interval_secs),
            last_request: Mutex::new(None),
        })
    }

    /// Wait out the remainder of the minimum inter-request interval.
    async fn pace(&self) {
        let wait = {
            let last = self.last_request.lock().await;
            last.map(|t| self.min_interval.saturating_sub(t.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tracing::debug!("pacing LLM request for {:.1}s", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
        *self.last_request.lock().await = Some(Instant::now());
    }

    async fn chat(&self, prompt: &str) -> std::result::Result<String, ChatError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Retryable(format!("LLM request failed: {e}")))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let text = resp.text().await.unwrap_or_default();
            let detail: String = text.chars().take(200).collect();
            let msg = format!("LLM error ({status}): {detail}");
            return if retryable_status(status) {
                Err(ChatError::Retryable(msg))
            } else {
                Err(ChatError::Fatal(msg))
            };
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| ChatError::Fatal(format!("LLM response parse failed: {e}")))?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChatError::Fatal("LLM returned no completion text".into()))
    }
}

/// Transport-level outcome of a single chat call.
enum ChatError {
    Retryable(String),
    Fatal(String),
}

/// `2^attempt · 15 + uniform(0, 5)` seconds.
fn retry_delay(attempt: u32) -> Duration {
    let base = (1u64 << attempt.min(5)) as f64 * 15.0;
    let jitter = rand::thread_rng().gen_range(0.0..5.0);
    Duration::from_secs_f64(base + jitter)
}

fn retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

#[async_trait]
impl SummaryProvider for LlmSummarizer {
    async fn summarize(&self, bundle: &ActivityBundle, instruction: &str) -> Result<String> {
        if !bundle.has_activity {
            return Err(DigestError::Llm("nothing to summarise".into()));
        }
        let prompt = build_prompt(bundle, instruction);

        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            self.pace().await;
            match self.chat(&prompt).await {
                Ok(text) => return Ok(text),
                Err(ChatError::Retryable(msg)) if attempt < MAX_ATTEMPTS => {
                    let delay = retry_delay(attempt);
                    tracing::warn!(
                        attempt,
                        "transient LLM error, retrying in {:.1}s: {msg}",
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(msg);
                }
                Err(ChatError::Retryable(msg)) | Err(ChatError::Fatal(msg)) => {
                    return Err(DigestError::Llm(msg));
                }
            }
        }
        Err(DigestError::Llm(
            last_error.unwrap_or_else(|| "retry budget exhausted".into()),
        ))
    }
}
