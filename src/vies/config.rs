//! VIES client configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::lookup::LookupFailure;

pub const VIES_API_BASE: &str = "https://ec.europa.eu/taxation_customs/vies/rest-api";

/// Maps non-success HTTP statuses onto [`LookupFailure`] classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPolicy {
    /// Statuses reported as transient server errors. 429 is always rate
    /// limiting, whether listed here or not.
    pub retryable_statuses: BTreeSet<u16>,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            retryable_statuses: [503, 504].into_iter().collect(),
        }
    }
}

impl StatusPolicy {
    pub fn with_retryable<I: IntoIterator<Item = u16>>(statuses: I) -> Self {
        Self {
            retryable_statuses: statuses.into_iter().collect(),
        }
    }

    pub fn classify(&self, status: u16) -> LookupFailure {
        if status == 429 {
            LookupFailure::RateLimited { status }
        } else if self.retryable_statuses.contains(&status) {
            LookupFailure::ServerError { status }
        } else if status == 404 {
            LookupFailure::NotFound
        } else {
            LookupFailure::Rejected { status }
        }
    }
}

/// Configuration for [`super::ViesClient`].
#[derive(Debug, Clone)]
pub struct ViesClientConfig {
    /// Root of the REST API; `/ms/{cc}/vat/{number}` is appended.
    pub base_url: String,

    /// Per-attempt timeout covering connect, send and body read.
    pub timeout: Duration,

    pub user_agent: String,

    pub status_policy: StatusPolicy,
}

impl Default for ViesClientConfig {
    fn default() -> Self {
        Self {
            base_url: VIES_API_BASE.to_string(),
            timeout: Duration::from_secs(15),
            user_agent: format!("vies-batch/{}", env!("CARGO_PKG_VERSION")),
            status_policy: StatusPolicy::default(),
        }
    }
}

impl ViesClientConfig {
    /// Read overrides from `VIES_BASE_URL`, `VIES_TIMEOUT_SECS`,
    /// `VIES_USER_AGENT` and `VIES_RETRYABLE_STATUSES` (comma separated).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("VIES_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(raw) = std::env::var("VIES_TIMEOUT_SECS") {
            let secs = parse_env::<u64>("VIES_TIMEOUT_SECS", &raw)?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Ok(agent) = std::env::var("VIES_USER_AGENT") {
            config.user_agent = agent;
        }
        if let Ok(raw) = std::env::var("VIES_RETRYABLE_STATUSES") {
            config.status_policy = parse_status_list(&raw)?;
        }

        config.parsed_base_url()?;
        Ok(config)
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn status_policy(mut self, policy: StatusPolicy) -> Self {
        self.status_policy = policy;
        self
    }

    /// Parse `base_url`, rejecting URLs that cannot carry path segments.
    pub fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: "URL cannot be a base".to_string(),
            });
        }
        Ok(url)
    }
}

pub(crate) fn parse_env<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnv {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_status_list(raw: &str) -> Result<StatusPolicy, ConfigError> {
    let statuses = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_env::<u16>("VIES_RETRYABLE_STATUSES", s))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(StatusPolicy::with_retryable(statuses))
}
