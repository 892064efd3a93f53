//! Error types for the VIES batch system
//!
//! Per-request failures never surface here: they are folded into
//! [`crate::LookupResult`] values. These enums cover the few conditions that
//! stop a caller before or outside a batch.

use thiserror::Error;

/// Invalid coordinator or client configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_concurrent_workers must be at least 1")]
    NoWorkers,

    #[error("max_retries must be at least 1")]
    NoAttempts,

    #[error("Invalid jurisdiction code '{0}': expected two ASCII letters")]
    InvalidJurisdiction(String),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Errors that abort a batch as a whole
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot start worker pool: no tokio runtime available ({0})")]
    NoRuntime(String),
}

/// CSV import/export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("No identifiers found in column '{0}'")]
    NoIdentifiers(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message() {
        let err = ExportError::MissingColumns(vec!["Importe".into(), "Tipo".into()]);
        assert_eq!(err.to_string(), "Missing required columns: Importe, Tipo");
    }

    #[test]
    fn test_config_error_converts_into_batch_error() {
        let err: BatchError = ConfigError::NoWorkers.into();
        assert!(matches!(err, BatchError::Config(ConfigError::NoWorkers)));
    }
}
