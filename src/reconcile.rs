//! Reconciliation sweep: retry everything the pipeline left unanchored.
//!
//! A pass loads every tracked item and change record without a receipt. If
//! there is anything to do it closes the capacity circuit once, letting a
//! single probe through, then walks items before changes in creation order.
//! A `None` from the gate with the circuit open ends the current loop; a
//! `None` with the circuit closed was transient and the walk moves on.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::anchor::{AnchorGate, AnchorPayload};
use crate::store::Store;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("reconcile_runs_total", "Sweep passes that found pending work.");
        describe_counter!("reconcile_anchored_total", "Records anchored by the sweeper.");
        describe_gauge!("reconcile_pending", "Unanchored records at the start of the last pass.");
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pending_items: usize,
    pub pending_changes: usize,
    pub anchored_items: usize,
    pub anchored_changes: usize,
    /// Changes satisfied by an item anchor of the same fingerprint.
    pub backfilled_changes: usize,
    /// Records that hit a storage error.
    pub failed: usize,
    /// The pass ended early because ledger capacity ran out.
    pub capacity_exhausted: bool,
}

impl SweepReport {
    pub fn pending(&self) -> usize {
        self.pending_items + self.pending_changes
    }

    pub fn retried(&self) -> usize {
        self.anchored_items + self.anchored_changes + self.backfilled_changes
    }
}

pub struct Sweeper {
    store: Arc<dyn Store>,
    gate: Arc<AnchorGate>,
}

impl Sweeper {
    pub fn new(store: Arc<dyn Store>, gate: Arc<AnchorGate>) -> Self {
        ensure_metrics_described();
        Self { store, gate }
    }

    /// Run one pass. Storage errors on a single record are logged and skipped;
    /// failing to load the pending sets skips the pass.
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let items = match self.store.unanchored_items().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "reconcile", error = ?e, "loading unanchored items failed");
                return report;
            }
        };
        let changes = match self.store.unanchored_changes().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "reconcile", error = ?e, "loading unanchored changes failed");
                return report;
            }
        };

        report.pending_items = items.len();
        report.pending_changes = changes.len();
        if report.pending() == 0 {
            return report;
        }

        counter!("reconcile_runs_total").increment(1);
        gauge!("reconcile_pending").set(report.pending() as f64);
        self.gate.reset();

        let mut backfilled: HashSet<i64> = HashSet::new();

        for item in &items {
            let payload = AnchorPayload::Fingerprint(item.fingerprint.clone());
            let Some(receipt) = self.gate.anchor(payload).await else {
                if self.gate.is_open() {
                    report.capacity_exhausted = true;
                    break;
                }
                continue;
            };

            if let Err(e) = self.store.set_item_receipt(item.id, &receipt).await {
                report.failed += 1;
                tracing::warn!(target: "reconcile", item = item.id, error = ?e, "persisting item receipt failed");
                continue;
            }
            report.anchored_items += 1;

            match self
                .store
                .backfill_change_receipts(&item.fingerprint, &receipt)
                .await
            {
                Ok(ids) => {
                    report.backfilled_changes += ids
                        .iter()
                        .filter(|id| changes.iter().any(|c| c.id == **id))
                        .count();
                    backfilled.extend(ids);
                }
                Err(e) => {
                    tracing::warn!(target: "reconcile", item = item.id, error = ?e, "backfilling change receipts failed");
                }
            }
        }

        for change in changes.iter().filter(|c| !backfilled.contains(&c.id)) {
            let payload = AnchorPayload::ChangeEvent {
                prior_receipt: change.prior_receipt_id.clone(),
                old_hash: change.old_fingerprint.clone(),
                new_hash: change.new_fingerprint.clone(),
            };
            let Some(receipt) = self.gate.anchor(payload).await else {
                if self.gate.is_open() {
                    report.capacity_exhausted = true;
                    break;
                }
                continue;
            };

            match self.store.set_change_receipt(change.id, &receipt).await {
                Ok(()) => report.anchored_changes += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(target: "reconcile", change = change.id, error = ?e, "persisting change receipt failed");
                }
            }
        }

        counter!("reconcile_anchored_total").increment(report.retried() as u64);
        tracing::info!(
            target: "reconcile",
            retried = report.retried(),
            pending = report.pending(),
            "reconciliation pass: retried {}/{}",
            report.retried(),
            report.pending()
        );
        if report.capacity_exhausted {
            tracing::warn!(
                target: "reconcile",
                waiting = report.pending().saturating_sub(report.retried()),
                "ledger capacity exhausted; remaining records wait for the next pass"
            );
        }

        report
    }

    /// Run once immediately, then every `period`.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
