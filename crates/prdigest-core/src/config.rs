//! prdigest configuration system.
//!
//! Loaded once at startup from `~/.prdigest/config.toml` (or an
//! explicit path); every knob has a default so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DigestError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Tick loop period in seconds.
    #[serde(default = "default_poll_period")]
    pub poll_period_secs: u64,
    /// How long an in-progress run may outlive a shutdown signal, and
    /// the age past which the reaper abandons a started run.
    #[serde(default = "default_grace_window")]
    pub grace_window_secs: u64,
    /// Fetch window used when an entry has never run before.
    #[serde(default = "default_fetch_window")]
    pub default_fetch_window_hours: i64,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_database_path() -> String {
    DigestConfig::home_dir()
        .join("prdigest.db")
        .to_string_lossy()
        .to_string()
}
fn default_poll_period() -> u64 {
    60
}
fn default_grace_window() -> u64 {
    300
}
fn default_fetch_window() -> i64 {
    24
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            poll_period_secs: default_poll_period(),
            grace_window_secs: default_grace_window(),
            default_fetch_window_hours: default_fetch_window(),
            host: HostConfig::default(),
            llm: LlmConfig::default(),
            smtp: SmtpConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl DigestConfig {
    /// Load config from the default path (~/.prdigest/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DigestError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DigestError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the prdigest home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".prdigest")
    }
}

/// Version-control host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Process-global access token, used when a repository carries no
    /// credential of its own. Empty = rely on the search fallback.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_host_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.github.com".into()
}
fn default_user_agent() -> String {
    "prdigest".into()
}
fn default_host_timeout() -> u64 {
    15
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: String::new(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_host_timeout(),
        }
    }
}

/// LLM provider configuration (OpenAI-compatible chat endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Minimum seconds between requests, process-wide.
    #[serde(default = "default_llm_min_interval")]
    pub min_interval_secs: u64,
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1".into()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn default_llm_min_interval() -> u64 {
    2
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.4
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: String::new(),
            model: default_llm_model(),
            min_interval_secs: default_llm_min_interval(),
            request_timeout_secs: default_llm_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// SMTP delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Recognized providers: "gmail", "zoho".
    #[serde(default = "default_smtp_provider")]
    pub provider: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub app_password: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_smtp_timeout")]
    pub operation_timeout_secs: u64,
}

fn default_smtp_provider() -> String {
    "gmail".into()
}
fn default_from_name() -> String {
    "prdigest".into()
}
fn default_smtp_timeout() -> u64 {
    30
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            provider: default_smtp_provider(),
            user: String::new(),
            app_password: String::new(),
            from_name: default_from_name(),
            operation_timeout_secs: default_smtp_timeout(),
        }
    }
}

/// Credential-at-rest encryption configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Passphrase the AEAD key is derived from. Overridable via
    /// PRDIGEST_CREDENTIAL_KEY; empty disables repository credentials.
    #[serde(default)]
    pub credential_key: String,
}

impl SecurityConfig {
    /// Resolve the passphrase, preferring the environment.
    pub fn resolved_key(&self) -> String {
        std::env::var("PRDIGEST_CREDENTIAL_KEY").unwrap_or_else(|_| self.credential_key.clone())
    }
}
