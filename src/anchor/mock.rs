// src/anchor/mock.rs
// --- Test helper ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::ledger::{Ledger, LedgerError, ReceiptId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Ok,
    InsufficientCapacity,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Fingerprint(String),
    ChangeEvent {
        prior: Option<String>,
        old: String,
        new: String,
    },
}

/// Scripted in-memory ledger. Outcomes are consumed one per call; once the
/// script runs out every call uses the fallback outcome (`Ok` by default).
/// Receipts are `rcpt-1`, `rcpt-2`, ... counting successful commits.
pub struct MockLedger {
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: Mutex<MockOutcome>,
    calls: Mutex<Vec<LedgerCall>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    issued: AtomicU64,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(MockOutcome::Ok),
            calls: Mutex::new(Vec::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            issued: AtomicU64::new(0),
        }
    }

    /// Every commit sleeps for `delay` while counted as in flight.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn set_fallback(&self, outcome: MockOutcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn commit(&self, call: LedgerCall) -> Result<ReceiptId, LedgerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call);

        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }

        let outcome = {
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(*self.fallback.lock().unwrap())
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            MockOutcome::Ok => {
                let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("rcpt-{n}"))
            }
            MockOutcome::InsufficientCapacity => Err(LedgerError::InsufficientCapacity(
                "Insufficient funds".into(),
            )),
            MockOutcome::Transient => Err(LedgerError::TransientFailure("broadcast failed".into())),
        }
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn commit_fingerprint(&self, hash: &str) -> Result<ReceiptId, LedgerError> {
        self.commit(LedgerCall::Fingerprint(hash.to_string())).await
    }

    async fn commit_change_event(
        &self,
        prior_receipt: Option<&str>,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<ReceiptId, LedgerError> {
        self.commit(LedgerCall::ChangeEvent {
            prior: prior_receipt.map(str::to_string),
            old: old_hash.to_string(),
            new: new_hash.to_string(),
        })
        .await
    }
}
