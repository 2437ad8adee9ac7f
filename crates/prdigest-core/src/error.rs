//! Error types for prdigest-core

use thiserror::Error;

/// Main error type shared across all prdigest crates.
///
/// Pipeline stages surface their failure domain through a dedicated
/// variant so the run executor can pick the right terminal state for
/// a run without string-matching.
#[derive(Error, Debug)]
pub enum DigestError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Store gateway error (queries, serialization of stored shapes)
    #[error("store error: {0}")]
    Store(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Host rejected our credential (401/403) or the repository is
    /// invisible to it (404)
    #[error("host auth error: {0}")]
    HostAuth(String),

    /// Host rate limit still in effect after the retry budget
    #[error("host rate limited: {0}")]
    HostRate(String),

    /// The host rejected the request itself (a 4xx outside the auth
    /// and rate-limit sets); retrying cannot change the answer
    #[error("host rejected request: {0}")]
    HostRejected(String),

    /// Transient host trouble: transport failures and 5xx responses
    #[error("host error: {0}")]
    Host(String),

    /// LLM call failed (after retries, or a non-retryable 4xx)
    #[error("LLM error: {0}")]
    Llm(String),

    /// SMTP transport failure
    #[error("delivery error: {0}")]
    Delivery(String),

    /// A plan limit blocked the operation
    #[error("quota reached: {0}")]
    Quota(String),

    /// Credential encryption/decryption failure
    #[error("security error: {0}")]
    Security(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DigestError {
    /// Whether a host-side failure is worth another attempt (rate
    /// limits and transient transport errors are, auth failures never).
    pub fn is_retryable(&self) -> bool {
        matches!(self, DigestError::HostRate(_) | DigestError::Host(_))
    }
}

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, DigestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DigestError::HostRate("429".into()).is_retryable());
        assert!(DigestError::Host("502 bad gateway".into()).is_retryable());
        assert!(!DigestError::HostAuth("401".into()).is_retryable());
        assert!(!DigestError::HostRejected("422".into()).is_retryable());
        assert!(!DigestError::Llm("400".into()).is_retryable());
    }
}
