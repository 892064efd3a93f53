//! VIES batch verification
//!
//! Validates EU VAT numbers against the VIES lookup service, one at a time or
//! in concurrent batches.
//!
//! ## Architecture
//! Caller (CLI / CSV import) -> BatchCoordinator -> LookupClient (VIES over HTTP)
//!
//! The coordinator owns a success-only cache, bounds the number of in-flight
//! lookups, retries transient failures with linear backoff and streams
//! [`BatchEvent`]s back to the caller in completion order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vies_batch::{BatchCoordinator, BatchEvent, CoordinatorConfig, LookupRequest, ViesClient};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let client = Arc::new(ViesClient::new()?);
//! let coordinator = BatchCoordinator::new(client, CoordinatorConfig::default())?;
//!
//! let mut batch = coordinator.run(vec![LookupRequest::new("IT00743110157")])?;
//! while let Some(event) = batch.next_event().await {
//!     if let BatchEvent::Result(result) = event {
//!         println!("{} -> {:?}", result.full_identifier, result.outcome);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Jurisdiction codes and identifier normalization
pub mod jurisdiction;

// Lookup client abstraction (the coordinator's only network seam)
pub mod lookup;

// VIES REST client
pub mod vies;

// Batch coordinator: worker pool, retries, cache, events
pub mod coordinator;

// CSV import/export for callers
pub mod export;

pub use coordinator::{
    BatchCoordinator, BatchEvent, BatchHandle, BatchReport, BatchSummary, CoordinatorConfig,
    FailureKind, LookupOutcome, LookupRequest, LookupResult, Metadata, Progress, StopSignal,
};
pub use error::{BatchError, ConfigError, ExportError};
pub use export::{read_requests, write_results, ImportOptions};
pub use jurisdiction::{normalize, JurisdictionSet, NormalizedIdentifier};
pub use lookup::{LookupClient, LookupFailure, LookupPayload};
pub use vies::{StatusPolicy, ViesClient, ViesClientConfig};
