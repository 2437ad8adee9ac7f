//! # prdigest-store
//!
//! Persistence for the run engine: the SQLite store gateway, the
//! plan-limit quota gate, and credential sealing for repository
//! access tokens.

pub mod db;
pub mod quota;
pub mod secrets;

pub use db::{Store, UsageKind};
pub use quota::QuotaGate;
pub use secrets::CredentialCipher;
