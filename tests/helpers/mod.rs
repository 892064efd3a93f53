//! Scripted lookup client shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use vies_batch::{LookupClient, LookupFailure, LookupPayload, LookupRequest};

/// One scripted answer.
#[derive(Clone)]
pub enum Step {
    Reply(Result<LookupPayload, LookupFailure>),
    /// Block until notified, then reply.
    Wait(Arc<Notify>, Result<LookupPayload, LookupFailure>),
    Panic,
}

pub fn ok() -> Step {
    Step::Reply(Ok(LookupPayload::valid("2025-06-02").with_name("ACME")))
}

pub fn fail(failure: LookupFailure) -> Step {
    Step::Reply(Err(failure))
}

pub fn transport() -> Step {
    fail(LookupFailure::Transport("connection reset".to_string()))
}

pub fn rate_limited() -> Step {
    fail(LookupFailure::RateLimited { status: 429 })
}

/// Lookup client answering from per-identifier scripts.
///
/// Scripts are keyed by full identifier (`IT123`); once a script runs dry,
/// or for unscripted identifiers, the default step is used.
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    default: Step,
    latency: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Option<mpsc::UnboundedSender<String>>,
}

impl ScriptedClient {
    /// Every lookup succeeds.
    pub fn new() -> Self {
        Self::with_default(ok())
    }

    pub fn with_default(default: Step) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started: None,
        }
    }

    pub fn script(self, full_identifier: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(full_identifier.to_string(), steps.into());
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Receive the full identifier of every call as it starts.
    pub fn notify_starts(mut self) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.started = Some(tx);
        (self, rx)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, full_identifier: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == full_identifier)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, full_identifier: &str) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(full_identifier)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl LookupClient for ScriptedClient {
    fn source_id(&self) -> &'static str {
        "scripted"
    }

    async fn lookup(
        &self,
        jurisdiction: &str,
        identifier: &str,
    ) -> Result<LookupPayload, LookupFailure> {
        let full_identifier = format!("{jurisdiction}{identifier}");
        self.calls.lock().unwrap().push(full_identifier.clone());
        if let Some(started) = &self.started {
            let _ = started.send(full_identifier.clone());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next_step(&full_identifier) {
            Step::Reply(reply) => reply,
            Step::Wait(notify, reply) => {
                notify.notified().await;
                reply
            }
            Step::Panic => panic!("scripted panic for {full_identifier}"),
        }
    }
}

pub fn requests(ids: &[&str]) -> Vec<LookupRequest> {
    ids.iter()
        .enumerate()
        .map(|(row, id)| LookupRequest::new(*id).with_field("row", row))
        .collect()
}
