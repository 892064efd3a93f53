//! Request, result and event types for batch lookups

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jurisdiction::UNKNOWN_JURISDICTION;
use crate::lookup::LookupPayload;

/// Caller-supplied fields carried from request to result, in insertion order.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key holding a pre-resolved jurisdiction code.
pub const COUNTRY_CODE_KEY: &str = "country_code";

// =============================================================================
// Requests
// =============================================================================

/// One identifier to verify, plus the metadata to hand back with its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRequest {
    raw_identifier: String,
    #[serde(default)]
    metadata: Metadata,
}

impl LookupRequest {
    pub fn new(raw_identifier: impl Into<String>) -> Self {
        Self {
            raw_identifier: raw_identifier.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Skip prefix detection and look the identifier up under `code`.
    pub fn with_country_code(self, code: impl Into<String>) -> Self {
        self.with_field(COUNTRY_CODE_KEY, code.into())
    }

    pub fn raw_identifier(&self) -> &str {
        &self.raw_identifier
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn into_metadata(self) -> Metadata {
        self.metadata
    }

    /// Non-blank `country_code` string from the metadata, if any.
    pub fn pre_resolved_jurisdiction(&self) -> Option<&str> {
        self.metadata
            .get(COUNTRY_CODE_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

// =============================================================================
// Results
// =============================================================================

/// Why a lookup did not produce a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No jurisdiction could be derived; no network call was made.
    UnresolvedJurisdiction,
    Transport,
    RateLimitedOrServerError,
    /// Unparseable body, or a body missing the validity flag or request date.
    MalformedResponse,
    /// Not found, bad request and every other terminal status.
    NonRetryableRemote,
    /// The worker task panicked.
    InternalTaskError,
    /// Stopped between attempts.
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnresolvedJurisdiction => write!(f, "unresolved-jurisdiction"),
            Self::Transport => write!(f, "transport"),
            Self::RateLimitedOrServerError => write!(f, "rate-limited-or-server-error"),
            Self::MalformedResponse => write!(f, "malformed-response"),
            Self::NonRetryableRemote => write!(f, "non-retryable-remote"),
            Self::InternalTaskError => write!(f, "internal-task-error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupOutcome {
    Success { payload: LookupPayload },
    Failure { kind: FailureKind, reason: String },
}

impl LookupOutcome {
    pub fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            reason: reason.into(),
        }
    }
}

/// The single result produced for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    /// Jurisdiction code followed by the canonical identifier.
    pub full_identifier: String,
    /// Resolved code, or `UNKNOWN`.
    pub jurisdiction_code: String,
    pub outcome: LookupOutcome,
    /// Network attempts behind `outcome`; for cache hits, those of the
    /// lookup that filled the cache.
    pub attempts: u32,
    pub metadata: Metadata,
}

impl LookupResult {
    /// Failure for an identifier whose jurisdiction could not be resolved.
    pub fn unresolved(request: LookupRequest) -> Self {
        Self::untargeted(
            request,
            LookupOutcome::failure(
                FailureKind::UnresolvedJurisdiction,
                "no resolvable jurisdiction code",
            ),
        )
    }

    /// Failure for a request whose task died before producing a result.
    pub fn internal_error(request: LookupRequest, reason: impl Into<String>) -> Self {
        Self::untargeted(
            request,
            LookupOutcome::failure(FailureKind::InternalTaskError, reason),
        )
    }

    fn untargeted(request: LookupRequest, outcome: LookupOutcome) -> Self {
        let full_identifier = request.raw_identifier().trim().to_string();
        Self {
            full_identifier,
            jurisdiction_code: UNKNOWN_JURISDICTION.to_string(),
            outcome,
            attempts: 0,
            metadata: request.into_metadata(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, LookupOutcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&LookupPayload> {
        match &self.outcome {
            LookupOutcome::Success { payload } => Some(payload),
            LookupOutcome::Failure { .. } => None,
        }
    }

    /// Successful lookup reporting the identifier as registered.
    pub fn is_registered(&self) -> bool {
        self.payload().is_some_and(LookupPayload::is_registered)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            LookupOutcome::Failure { kind, .. } => Some(*kind),
            LookupOutcome::Success { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            LookupOutcome::Failure { reason, .. } => Some(reason),
            LookupOutcome::Success { .. } => None,
        }
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Whole-number percentage, rounded down; an empty batch is 100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.completed.min(self.total) * 100 / self.total) as u8
    }
}

/// Events emitted by a running batch.
///
/// Every completed request produces `Progress` followed by `Result`. A batch
/// that runs to completion ends with `Finished`; a stopped batch just ends.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Progress(Progress),
    Result(LookupResult),
    /// All results, in completion order.
    Finished(Vec<LookupResult>),
}

/// Counts over a set of results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub valid: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[LookupResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            succeeded,
            valid: results.iter().filter(|r| r.is_registered()).count(),
            failed: results.len() - succeeded,
        }
    }
}
