//! Batch lookup coordination
//!
//! This module provides:
//! - Request/result/event types for batch lookups
//! - The coordinator with its worker pool, retry loop and success-only cache
//! - The caller-side handle with cooperative cancellation

pub mod batch;
mod cache;
pub mod config;
pub mod handle;
pub mod types;

pub use batch::BatchCoordinator;
pub use config::CoordinatorConfig;
pub use handle::{BatchHandle, BatchReport, StopSignal};
pub use types::{
    BatchEvent, BatchSummary, FailureKind, LookupOutcome, LookupRequest, LookupResult, Metadata,
    Progress, COUNTRY_CODE_KEY,
};
