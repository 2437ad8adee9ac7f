//! Stage seams consumed by the run executor.
//!
//! Each pipeline stage is behind an object-safe trait so the executor
//! can be driven with in-memory fakes in tests and with the real host,
//! LLM, and SMTP clients in production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::ActivityBundle;

/// What the fetch stage needs to know for one run.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub owner: String,
    pub name: String,
    pub author_login: String,
    /// Decrypted access token. None selects the credential-less
    /// author-search fallback (public repositories only).
    pub credential: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Enumerates a target author's pull-request activity on one
/// repository within a time window.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<ActivityBundle>;
}

/// Turns a fetched bundle into an email-ready body text (no subject,
/// no greeting, no signature).
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    async fn summarize(&self, bundle: &ActivityBundle, instruction: &str) -> Result<String>;
}

/// Delivers one message to a recipient list.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(&self, recipients: &[String], subject: &str, body: &str) -> Result<()>;
}
