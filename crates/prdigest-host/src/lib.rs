//! # prdigest-host
//!
//! Everything that talks to the version-control host: the REST client
//! with retry/backoff and status classification, and the fetch stage
//! that turns a monitoring window into an activity bundle.

pub mod client;
pub mod fetch;

pub use client::HostClient;
pub use fetch::{FetchCaps, HostActivitySource};
