//! Lookup client abstraction
//!
//! The coordinator talks to the network only through [`LookupClient`]. One
//! call is one network attempt; retries, caching and throttling all live in
//! the coordinator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured response returned by a successful lookup.
///
/// `isValid` is the canonical name of the validity flag; `valid` is accepted
/// on input. Fields the service returns beyond the typed ones are kept in
/// `extra` so the payload round-trips unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LookupPayload {
    #[serde(alias = "valid", skip_serializing_if = "Option::is_none")]
    pub is_valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LookupPayload {
    /// A complete payload for a registered identifier.
    pub fn valid(request_date: impl Into<String>) -> Self {
        Self {
            is_valid: Some(true),
            request_date: Some(request_date.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Both the validity flag and the response timestamp are present.
    pub fn is_complete(&self) -> bool {
        self.is_valid.is_some() && self.request_date.is_some()
    }

    /// Validity flag, `false` when absent.
    pub fn is_registered(&self) -> bool {
        self.is_valid.unwrap_or(false)
    }
}

/// Classified failure of a single lookup attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupFailure {
    /// Timeout, connection refused, TLS failure and the like.
    #[error("network error: {0}")]
    Transport(String),

    #[error("rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    /// A server-side status configured as transient.
    #[error("server error {status}")]
    ServerError { status: u16 },

    #[error("not found (HTTP 404)")]
    NotFound,

    /// Success status with a body that could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Any other status; never retried.
    #[error("HTTP error: {status}")]
    Rejected { status: u16 },
}

/// How the coordinator reacts to a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry after `backoff_base * attempt`.
    Linear,
    /// Retry after exactly `backoff_base`.
    Fixed,
    /// Give up immediately.
    Terminal,
}

impl LookupFailure {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } | Self::ServerError { .. } => {
                RetryClass::Linear
            }
            Self::Malformed(_) => RetryClass::Fixed,
            Self::NotFound | Self::Rejected { .. } => RetryClass::Terminal,
        }
    }
}

/// A single-attempt lookup against a remote registry.
///
/// Implementations must be safe to call concurrently from several workers.
#[async_trait]
pub trait LookupClient: Send + Sync {
    /// Short identifier used in logs (e.g. "vies").
    fn source_id(&self) -> &'static str;

    /// Perform one lookup.
    ///
    /// * `jurisdiction` - two-letter upper-case code
    /// * `identifier` - canonical identifier without the jurisdiction prefix
    async fn lookup(
        &self,
        jurisdiction: &str,
        identifier: &str,
    ) -> Result<LookupPayload, LookupFailure>;
}
