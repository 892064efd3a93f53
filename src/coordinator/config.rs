//! Coordinator configuration.

use std::time::Duration;

use crate::error::ConfigError;
use crate::jurisdiction::{validate_code, JurisdictionSet};
use crate::lookup::RetryClass;
use crate::vies::config::parse_env;

/// Configuration for a [`super::BatchCoordinator`], fixed per instance.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on simultaneously running lookups.
    pub max_concurrent_workers: usize,

    /// Sleep each worker takes before every network call.
    pub inter_request_delay: Duration,

    /// Maximum network attempts per request (not retries after the first).
    pub max_retries: u32,

    /// Backoff unit. Transient failures wait `base * attempt`; incomplete
    /// or malformed payloads wait `base`.
    pub retry_backoff_base: Duration,

    /// Jurisdiction assumed for identifiers without a recognized prefix.
    /// `None` fails them without a network call.
    pub default_jurisdiction: Option<String>,

    /// Prefixes recognized by the normalizer.
    pub jurisdictions: JurisdictionSet,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 4,
            inter_request_delay: Duration::from_millis(250),
            max_retries: 3,
            retry_backoff_base: Duration::from_millis(500),
            default_jurisdiction: None,
            jurisdictions: JurisdictionSet::vies(),
        }
    }
}

impl CoordinatorConfig {
    /// Defaults overridden by `VIES_MAX_WORKERS`, `VIES_REQUEST_DELAY_MS`,
    /// `VIES_MAX_RETRIES`, `VIES_RETRY_BACKOFF_MS` and `VIES_DEFAULT_COUNTRY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("VIES_MAX_WORKERS") {
            config.max_concurrent_workers = parse_env("VIES_MAX_WORKERS", &raw)?;
        }
        if let Ok(raw) = std::env::var("VIES_REQUEST_DELAY_MS") {
            config.inter_request_delay =
                Duration::from_millis(parse_env("VIES_REQUEST_DELAY_MS", &raw)?);
        }
        if let Ok(raw) = std::env::var("VIES_MAX_RETRIES") {
            config.max_retries = parse_env("VIES_MAX_RETRIES", &raw)?;
        }
        if let Ok(raw) = std::env::var("VIES_RETRY_BACKOFF_MS") {
            config.retry_backoff_base =
                Duration::from_millis(parse_env("VIES_RETRY_BACKOFF_MS", &raw)?);
        }
        if let Ok(code) = std::env::var("VIES_DEFAULT_COUNTRY") {
            if !code.trim().is_empty() {
                config.default_jurisdiction = Some(code);
            }
        }

        config.validate()
    }

    /// Configuration with every delay set to zero.
    pub fn without_delays() -> Self {
        Self {
            inter_request_delay: Duration::ZERO,
            retry_backoff_base: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn max_concurrent_workers(mut self, workers: usize) -> Self {
        self.max_concurrent_workers = workers;
        self
    }

    pub fn inter_request_delay(mut self, delay: Duration) -> Self {
        self.inter_request_delay = delay;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_backoff_base(mut self, base: Duration) -> Self {
        self.retry_backoff_base = base;
        self
    }

    pub fn default_jurisdiction(mut self, code: impl Into<String>) -> Self {
        self.default_jurisdiction = Some(code.into());
        self
    }

    pub fn jurisdictions(mut self, set: JurisdictionSet) -> Self {
        self.jurisdictions = set;
        self
    }

    /// Check bounds and upper-case the default jurisdiction.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.max_concurrent_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if let Some(code) = self.default_jurisdiction.take() {
            self.default_jurisdiction = Some(validate_code(&code)?);
        }
        Ok(self)
    }

    /// Delay after a failed `attempt` (1-indexed).
    pub fn backoff(&self, class: RetryClass, attempt: u32) -> Duration {
        match class {
            RetryClass::Linear => self.retry_backoff_base * attempt,
            RetryClass::Fixed | RetryClass::Terminal => self.retry_backoff_base,
        }
    }
}
