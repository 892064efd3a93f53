//! Batch lookup coordinator
//!
//! A fixed pool of tokio workers pulls requests from a shared queue. Each
//! request is resolved on its own task so that a panic becomes a failed
//! result instead of taking the worker down. After every completion the
//! worker bumps the shared counter and emits progress, then the result, while
//! holding the counter lock; emission order therefore matches completion
//! order and progress never goes backwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::BatchError;
use crate::jurisdiction::{normalize, NormalizedIdentifier};
use crate::lookup::{LookupClient, LookupFailure, RetryClass};

use super::cache::{CachedSuccess, SuccessCache};
use super::config::CoordinatorConfig;
use super::handle::{BatchHandle, StopSignal};
use super::types::{
    BatchEvent, FailureKind, LookupOutcome, LookupRequest, LookupResult, Progress,
};

/// Resolves lookup requests against a [`LookupClient`] with bounded
/// concurrency, retries and a success-only cache.
///
/// The cache belongs to the coordinator and is shared by every batch it runs.
pub struct BatchCoordinator<C: LookupClient + ?Sized> {
    inner: Arc<Inner<C>>,
}

impl<C: LookupClient + ?Sized> Clone for BatchCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C: LookupClient + ?Sized> {
    client: Arc<C>,
    config: CoordinatorConfig,
    cache: SuccessCache,
}

/// Counter and results shared by the workers of one batch.
struct BatchState {
    completed: usize,
    results: Vec<LookupResult>,
}

struct Batch {
    queue: Mutex<VecDeque<LookupRequest>>,
    state: Mutex<BatchState>,
    events: mpsc::UnboundedSender<BatchEvent>,
    stop: StopSignal,
    total: usize,
}

impl<C: LookupClient + ?Sized + 'static> BatchCoordinator<C> {
    pub fn new(client: Arc<C>, config: CoordinatorConfig) -> Result<Self, BatchError> {
        let config = config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                cache: SuccessCache::default(),
            }),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Number of cached successful lookups.
    pub fn cached_len(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Resolve one request outside a batch. Shares the batch cache.
    pub async fn resolve(&self, request: LookupRequest) -> LookupResult {
        let never_stopped = StopSignal::new();
        let fallback = request.clone();
        match self.inner.resolve(request, &never_stopped).await {
            Some(result) => result,
            None => LookupResult::internal_error(fallback, "lookup was not started"),
        }
    }

    /// Verify a single VAT number, optionally forcing its jurisdiction.
    pub async fn verify_one(&self, raw: &str, country_code: Option<&str>) -> LookupResult {
        let mut request = LookupRequest::new(raw);
        if let Some(code) = country_code {
            request = request.with_country_code(code);
        }
        self.resolve(request).await
    }

    /// Start a batch on the current tokio runtime.
    ///
    /// Fails only if no runtime is available to host the worker pool.
    pub fn run(&self, requests: Vec<LookupRequest>) -> Result<BatchHandle, BatchError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BatchError::NoRuntime(e.to_string()))?;

        let total = requests.len();
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = StopSignal::new();
        let workers = self.inner.config.max_concurrent_workers.min(total);

        info!(
            total,
            workers,
            source = self.inner.client.source_id(),
            "Batch lookup started"
        );

        if total == 0 {
            let _ = tx.send(BatchEvent::Finished(Vec::new()));
            return Ok(BatchHandle::new(rx, stop, total));
        }

        let batch = Arc::new(Batch {
            queue: Mutex::new(requests.into()),
            state: Mutex::new(BatchState {
                completed: 0,
                results: Vec::with_capacity(total),
            }),
            events: tx,
            stop: stop.clone(),
            total,
        });

        for worker_id in 0..workers {
            let inner = Arc::clone(&self.inner);
            let batch = Arc::clone(&batch);
            runtime.spawn(async move { inner.work(worker_id, batch).await });
        }

        Ok(BatchHandle::new(rx, stop, total))
    }
}

impl<C: LookupClient + ?Sized + 'static> Inner<C> {
    /// Worker loop: take requests until the queue is empty or the batch stops.
    async fn work(self: Arc<Self>, worker_id: usize, batch: Arc<Batch>) {
        debug!(worker_id, "Worker started");

        loop {
            if batch.stop.is_stopped() {
                break;
            }
            let next = batch
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(request) = next else {
                break;
            };

            let task = {
                let inner = Arc::clone(&self);
                let stop = batch.stop.clone();
                let request = request.clone();
                tokio::spawn(async move { inner.resolve(request, &stop).await })
            };

            let result = match task.await {
                Ok(Some(result)) => result,
                // Stopped before the first attempt: the request never started.
                Ok(None) => break,
                Err(e) => {
                    error!(
                        worker_id,
                        identifier = request.raw_identifier(),
                        error = %e,
                        "Lookup task failed"
                    );
                    LookupResult::internal_error(request, format!("internal error: {e}"))
                }
            };

            if !batch.complete(result) {
                // Nobody is listening any more.
                batch.stop.stop();
                break;
            }
        }

        debug!(worker_id, "Worker stopped");
    }

    /// Resolve one request. `None` means it was stopped before any attempt.
    async fn resolve(&self, request: LookupRequest, stop: &StopSignal) -> Option<LookupResult> {
        let Some(target) = self.target(&request) else {
            debug!(
                identifier = request.raw_identifier(),
                "No resolvable jurisdiction"
            );
            return Some(LookupResult::unresolved(request));
        };
        let full_identifier = target.full();

        if let Some(hit) = self.cache.get(&full_identifier) {
            debug!(identifier = %full_identifier, "Cache hit");
            return Some(hit.to_result(request.into_metadata()));
        }

        let gate = self.cache.gate(&full_identifier);
        let resolved = {
            let _guard = gate.lock().await;
            match self.cache.get(&full_identifier) {
                Some(hit) => {
                    debug!(identifier = %full_identifier, "Cache hit after wait");
                    Some((hit.to_result(Default::default()).outcome, hit.attempts))
                }
                None => self.lookup_with_retries(&target, &full_identifier, stop).await,
            }
        };
        self.cache.release_gate(&full_identifier, gate);

        let (outcome, attempts) = resolved?;
        if let LookupOutcome::Success { payload } = &outcome {
            self.cache.insert(CachedSuccess {
                full_identifier: full_identifier.clone(),
                jurisdiction_code: target.jurisdiction.clone(),
                payload: payload.clone(),
                attempts,
            });
        }

        Some(LookupResult {
            full_identifier,
            jurisdiction_code: target.jurisdiction,
            outcome,
            attempts,
            metadata: request.into_metadata(),
        })
    }

    /// Pre-resolved `country_code`, then the normalizer, then the default.
    fn target(&self, request: &LookupRequest) -> Option<NormalizedIdentifier> {
        let raw = request.raw_identifier().trim().to_uppercase();

        if let Some(code) = request.pre_resolved_jurisdiction() {
            let jurisdiction = code.to_uppercase();
            let canonical = raw
                .strip_prefix(jurisdiction.as_str())
                .unwrap_or(raw.as_str());
            return Some(NormalizedIdentifier {
                canonical: canonical.to_string(),
                jurisdiction,
            });
        }

        normalize(&raw, &self.config.jurisdictions).or_else(|| {
            self.config
                .default_jurisdiction
                .as_ref()
                .filter(|_| !raw.is_empty())
                .map(|code| NormalizedIdentifier {
                    jurisdiction: code.clone(),
                    canonical: raw.clone(),
                })
        })
    }

    /// The bounded retry loop. `None` if stopped before the first attempt.
    async fn lookup_with_retries(
        &self,
        target: &NormalizedIdentifier,
        full_identifier: &str,
        stop: &StopSignal,
    ) -> Option<(LookupOutcome, u32)> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0u32;

        loop {
            if stop.sleep(self.config.inter_request_delay).await {
                return (attempt > 0).then(|| (cancelled(attempt), attempt));
            }

            attempt += 1;
            debug!(identifier = full_identifier, attempt, max_retries, "Lookup attempt");

            let (class, kind, reason) = match self
                .client
                .lookup(&target.jurisdiction, &target.canonical)
                .await
            {
                Ok(payload) if payload.is_complete() => {
                    return Some((LookupOutcome::Success { payload }, attempt));
                }
                Ok(_) => (
                    RetryClass::Fixed,
                    FailureKind::MalformedResponse,
                    "incomplete response payload (missing isValid or requestDate)".to_string(),
                ),
                Err(failure) => (failure.retry_class(), failure_kind(&failure), failure.to_string()),
            };

            if class == RetryClass::Terminal {
                debug!(identifier = full_identifier, attempt, %reason, "Lookup failed, not retrying");
                return Some((LookupOutcome::failure(kind, reason), attempt));
            }

            if attempt >= max_retries {
                warn!(identifier = full_identifier, attempt, %reason, "Lookup failed, retries exhausted");
                return Some((
                    LookupOutcome::failure(
                        kind,
                        format!("{reason}, failed after {max_retries} retries"),
                    ),
                    attempt,
                ));
            }

            let backoff = self.config.backoff(class, attempt);
            warn!(
                identifier = full_identifier,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                %reason,
                "Lookup failed, retrying"
            );
            if stop.sleep(backoff).await {
                return Some((cancelled(attempt), attempt));
            }
        }
    }
}

impl Batch {
    /// Record a completion and emit progress then the result, plus the final
    /// aggregate after the last one unless stopped. Returns `false` when the
    /// receiver is gone.
    fn complete(&self, result: LookupResult) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.completed += 1;
        state.results.push(result.clone());

        let progress = Progress {
            completed: state.completed,
            total: self.total,
        };
        let delivered = self.events.send(BatchEvent::Progress(progress)).is_ok()
            && self.events.send(BatchEvent::Result(result)).is_ok();

        if state.completed == self.total {
            if self.stop.is_stopped() {
                info!(completed = state.completed, "Batch lookup stopped");
            } else {
                info!(total = self.total, "Batch lookup finished");
                let results = std::mem::take(&mut state.results);
                let _ = self.events.send(BatchEvent::Finished(results));
            }
        }

        delivered
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        let completed = self
            .state
            .lock()
            .map(|s| s.completed)
            .unwrap_or_else(|e| e.into_inner().completed);
        if completed < self.total {
            info!(completed, total = self.total, "Batch lookup stopped early");
        }
    }
}

fn failure_kind(failure: &LookupFailure) -> FailureKind {
    match failure {
        LookupFailure::Transport(_) => FailureKind::Transport,
        LookupFailure::RateLimited { .. } | LookupFailure::ServerError { .. } => {
            FailureKind::RateLimitedOrServerError
        }
        LookupFailure::Malformed(_) => FailureKind::MalformedResponse,
        LookupFailure::NotFound | LookupFailure::Rejected { .. } => {
            FailureKind::NonRetryableRemote
        }
    }
}

fn cancelled(attempts: u32) -> LookupOutcome {
    LookupOutcome::failure(
        FailureKind::Cancelled,
        format!("stopped after {attempts} attempt(s)"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::LookupPayload;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every lookup with a complete payload and counts calls.
    #[derive(Default)]
    struct EchoClient {
        calls: AtomicUsize,
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl LookupClient for EchoClient {
        fn source_id(&self) -> &'static str {
            "echo"
        }

        async fn lookup(
            &self,
            jurisdiction: &str,
            identifier: &str,
        ) -> Result<LookupPayload, LookupFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((jurisdiction.to_string(), identifier.to_string()));
            Ok(LookupPayload::valid("2025-06-02"))
        }
    }

    fn coordinator(config: CoordinatorConfig) -> (Arc<EchoClient>, BatchCoordinator<EchoClient>) {
        let client = Arc::new(EchoClient::default());
        let coordinator = BatchCoordinator::new(client.clone(), config).unwrap();
        (client, coordinator)
    }

    #[tokio::test]
    async fn test_target_prefers_pre_resolved_code() {
        let (client, coordinator) = coordinator(CoordinatorConfig::without_delays());

        let result = coordinator.verify_one("it00743110157", Some("it")).await;
        assert_eq!(result.full_identifier, "IT00743110157");
        assert_eq!(result.jurisdiction_code, "IT");

        let bare = coordinator.verify_one("B12345678", Some("ES")).await;
        assert_eq!(bare.full_identifier, "ESB12345678");

        let seen = client.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("IT".to_string(), "00743110157".to_string()),
                ("ES".to_string(), "B12345678".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_default_jurisdiction_fallback() {
        let config = CoordinatorConfig::without_delays().default_jurisdiction("IT");
        let (client, coordinator) = coordinator(config);

        let result = coordinator.verify_one("00743110157", None).await;
        assert!(result.is_success());
        assert_eq!(result.full_identifier, "IT00743110157");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        let blank = coordinator.verify_one("   ", None).await;
        assert_eq!(blank.failure_kind(), Some(FailureKind::UnresolvedJurisdiction));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unresolved_without_default() {
        let (client, coordinator) = coordinator(CoordinatorConfig::without_delays());
        let result = coordinator.verify_one("00743110157", None).await;
        assert_eq!(result.attempts, 0);
        assert_eq!(result.jurisdiction_code, "UNKNOWN");
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_populates_cache() {
        let (client, coordinator) = coordinator(CoordinatorConfig::without_delays());
        assert_eq!(coordinator.cached_len(), 0);

        coordinator.verify_one("DE123456789", None).await;
        coordinator.verify_one(" de123456789 ", None).await;
        assert_eq!(coordinator.cached_len(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        coordinator.clear_cache();
        coordinator.verify_one("DE123456789", None).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_finishes_immediately() {
        let (_, coordinator) = coordinator(CoordinatorConfig::without_delays());
        let report = coordinator.run(Vec::new()).unwrap().collect().await;
        assert!(report.results.is_empty());
        assert!(report.progress.is_empty());
        assert_eq!(report.finished, Some(Vec::new()));
    }

    #[test]
    fn test_run_outside_runtime_fails() {
        let (_, coordinator) = coordinator(CoordinatorConfig::without_delays());
        let err = coordinator.run(vec![LookupRequest::new("IT1")]).err().unwrap();
        assert!(matches!(err, BatchError::NoRuntime(_)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let client = Arc::new(EchoClient::default());
        let result = BatchCoordinator::new(
            client,
            CoordinatorConfig::default().max_concurrent_workers(0),
        );
        assert!(matches!(result, Err(BatchError::Config(_))));
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            failure_kind(&LookupFailure::Transport("x".into())),
            FailureKind::Transport
        );
        assert_eq!(
            failure_kind(&LookupFailure::RateLimited { status: 429 }),
            FailureKind::RateLimitedOrServerError
        );
        assert_eq!(
            failure_kind(&LookupFailure::Malformed("x".into())),
            FailureKind::MalformedResponse
        );
        assert_eq!(
            failure_kind(&LookupFailure::NotFound),
            FailureKind::NonRetryableRemote
        );
    }
}
