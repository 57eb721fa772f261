//! # Anchoring gate
//!
//! Every ledger write in the process goes through one [`AnchorGate`]. Writes
//! spend a non-reusable unit of ledger capacity, and two writes racing on the
//! same account corrupt each other, so the gate admits exactly one commit at a
//! time, in call order. Waiting callers are parked on a fair async mutex; no
//! thread is blocked.
//!
//! The gate also carries a sticky circuit. An `InsufficientCapacity` failure
//! opens it, after which every call returns `None` without touching the ledger
//! until [`AnchorGate::reset`] is called. The reconciliation sweeper resets it
//! once per pass to let a single probe through.
//!
//! `anchor` never fails: every ledger error is logged and reported as `None`.

pub mod ledger;
pub mod mock;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use tokio::sync::Mutex;

pub use ledger::{Ledger, LedgerError, ReceiptId};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("anchor_attempts_total", "Ledger writes attempted.");
        describe_counter!("anchor_success_total", "Ledger writes that returned a receipt.");
        describe_counter!("anchor_failures_total", "Ledger writes that failed, by kind.");
        describe_counter!(
            "anchor_short_circuit_total",
            "Anchor calls refused while the capacity circuit was open."
        );
        describe_gauge!("anchor_circuit_open", "1 while ledger capacity is exhausted.");
        describe_histogram!("anchor_commit_ms", "Ledger commit latency in milliseconds.");
    });
}

/// What gets committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorPayload {
    /// A bare content fingerprint.
    Fingerprint(String),
    /// A transition between two fingerprints, chained to the receipt the item
    /// held before the change (if any).
    ChangeEvent {
        prior_receipt: Option<ReceiptId>,
        old_hash: String,
        new_hash: String,
    },
}

impl AnchorPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            AnchorPayload::Fingerprint(_) => "fingerprint",
            AnchorPayload::ChangeEvent { .. } => "change_event",
        }
    }
}

/// Capacity circuit. `Open` means the ledger account is believed to be dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
        }
    }
}

pub struct AnchorGate {
    ledger: Arc<dyn Ledger>,
    /// Held for the whole duration of one commit; tokio's mutex queues FIFO.
    turn: Mutex<()>,
    capacity_exhausted: AtomicBool,
}

impl AnchorGate {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        ensure_metrics_described();
        Self {
            ledger,
            turn: Mutex::new(()),
            capacity_exhausted: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CircuitState {
        if self.capacity_exhausted.load(Ordering::SeqCst) {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Close the circuit so the next call probes the ledger again.
    pub fn reset(&self) {
        if self.capacity_exhausted.swap(false, Ordering::SeqCst) {
            tracing::info!(target: "anchor", "capacity circuit reset; probing ledger");
        }
        gauge!("anchor_circuit_open").set(0.0);
    }

    fn trip(&self) {
        self.capacity_exhausted.store(true, Ordering::SeqCst);
        gauge!("anchor_circuit_open").set(1.0);
    }

    fn short_circuit(&self, payload: &AnchorPayload) -> Option<ReceiptId> {
        counter!("anchor_short_circuit_total").increment(1);
        tracing::debug!(target: "anchor", kind = payload.kind(), "circuit open, skipping ledger write");
        None
    }

    /// Commit `payload`, waiting for every earlier call to finish first.
    /// Returns the receipt, or `None` on any failure.
    pub async fn anchor(&self, payload: AnchorPayload) -> Option<ReceiptId> {
        if self.is_open() {
            return self.short_circuit(&payload);
        }

        let _turn = self.turn.lock().await;

        // The circuit may have opened while this call was queued.
        if self.is_open() {
            return self.short_circuit(&payload);
        }

        counter!("anchor_attempts_total").increment(1);
        let t0 = std::time::Instant::now();
        let result = match &payload {
            AnchorPayload::Fingerprint(hash) => self.ledger.commit_fingerprint(hash).await,
            AnchorPayload::ChangeEvent {
                prior_receipt,
                old_hash,
                new_hash,
            } => {
                self.ledger
                    .commit_change_event(prior_receipt.as_deref(), old_hash, new_hash)
                    .await
            }
        };
        histogram!("anchor_commit_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok(receipt) => {
                counter!("anchor_success_total").increment(1);
                tracing::info!(target: "anchor", kind = payload.kind(), receipt = %receipt, "anchored");
                Some(receipt)
            }
            Err(LedgerError::InsufficientCapacity(msg)) => {
                self.trip();
                counter!("anchor_failures_total", "kind" => "insufficient_capacity").increment(1);
                tracing::warn!(
                    target: "anchor",
                    kind = payload.kind(),
                    error = %msg,
                    "insufficient ledger capacity; pausing writes until the next sweep"
                );
                None
            }
            Err(e) => {
                counter!("anchor_failures_total", "kind" => "transient").increment(1);
                tracing::error!(target: "anchor", kind = payload.kind(), error = %e, "anchor failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{LedgerCall, MockLedger, MockOutcome};
    use super::*;
    use std::time::Duration;

    fn fp(s: &str) -> AnchorPayload {
        AnchorPayload::Fingerprint(s.to_string())
    }

    #[tokio::test]
    async fn success_returns_receipt() {
        let ledger = Arc::new(MockLedger::new());
        let gate = AnchorGate::new(ledger.clone());
        assert_eq!(gate.anchor(fp("sha256:aa")).await.as_deref(), Some("rcpt-1"));
        assert_eq!(ledger.calls(), vec![LedgerCall::Fingerprint("sha256:aa".into())]);
    }

    #[tokio::test]
    async fn capacity_failure_is_sticky_until_reset() {
        let ledger = Arc::new(MockLedger::new());
        ledger.push_outcomes([MockOutcome::InsufficientCapacity]);
        let gate = AnchorGate::new(ledger.clone());

        assert_eq!(gate.anchor(fp("sha256:aa")).await, None);
        assert_eq!(gate.state(), CircuitState::Open);

        for _ in 0..3 {
            assert_eq!(gate.anchor(fp("sha256:bb")).await, None);
        }
        assert_eq!(ledger.call_count(), 1, "open circuit must not reach the ledger");

        gate.reset();
        assert_eq!(gate.state(), CircuitState::Closed);
        assert!(gate.anchor(fp("sha256:bb")).await.is_some());
        assert_eq!(ledger.call_count(), 2);
    }

    #[tokio::test]
    async fn transient_failure_does_not_open_circuit() {
        let ledger = Arc::new(MockLedger::new());
        ledger.push_outcomes([MockOutcome::Transient]);
        let gate = AnchorGate::new(ledger.clone());

        assert_eq!(gate.anchor(fp("sha256:aa")).await, None);
        assert_eq!(gate.state(), CircuitState::Closed);
        assert!(gate.anchor(fp("sha256:aa")).await.is_some());
        assert_eq!(ledger.call_count(), 2);
    }

    #[tokio::test]
    async fn queued_calls_complete_in_submission_order() {
        let ledger = Arc::new(MockLedger::with_delay(Duration::from_millis(5)));
        let gate = Arc::new(AnchorGate::new(ledger.clone()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let g = gate.clone();
            handles.push(tokio::spawn(async move {
                g.anchor(fp(&format!("sha256:{i}"))).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_some());
        }

        let order: Vec<LedgerCall> = (0..5)
            .map(|i| LedgerCall::Fingerprint(format!("sha256:{i}")))
            .collect();
        assert_eq!(ledger.calls(), order);
    }

    #[tokio::test]
    async fn queued_calls_short_circuit_after_capacity_trip() {
        let ledger = Arc::new(MockLedger::with_delay(Duration::from_millis(5)));
        ledger.push_outcomes([MockOutcome::InsufficientCapacity]);
        let gate = Arc::new(AnchorGate::new(ledger.clone()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let g = gate.clone();
            handles.push(tokio::spawn(async move {
                g.anchor(fp(&format!("sha256:{i}"))).await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), None);
        }
        assert_eq!(ledger.call_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn at_most_one_commit_in_flight() {
        let ledger = Arc::new(MockLedger::with_delay(Duration::from_millis(2)));
        let gate = Arc::new(AnchorGate::new(ledger.clone()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let g = gate.clone();
            handles.push(tokio::spawn(async move {
                let payload = if i % 2 == 0 {
                    fp(&format!("sha256:{i}"))
                } else {
                    AnchorPayload::ChangeEvent {
                        prior_receipt: None,
                        old_hash: "sha256:old".into(),
                        new_hash: format!("sha256:{i}"),
                    }
                };
                g.anchor(payload).await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(ledger.call_count(), 16);
        assert_eq!(ledger.max_in_flight(), 1);
    }
}
