use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::counter;

use crate::anchor::{AnchorGate, AnchorPayload};
use crate::ingest::types::NormalizedItem;
use crate::store::{ItemContent, NewChangeRecord, NewTrackedItem, Source, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    Unchanged,
    Changed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionSummary {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Classifies normalized items against stored state and records new items
/// and edits. The only writer of item and change content.
pub struct ChangeDetector {
    store: Arc<dyn Store>,
    gate: Arc<AnchorGate>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn Store>, gate: Arc<AnchorGate>) -> Self {
        Self { store, gate }
    }

    /// Process one fetched batch. A failing item is logged and skipped; the
    /// rest of the batch still runs.
    pub async fn process(&self, source: &Source, items: &[NormalizedItem]) -> DetectionSummary {
        let mut summary = DetectionSummary::default();

        for item in items {
            match self.process_item(source, item).await {
                Ok(Classification::New) => summary.new += 1,
                Ok(Classification::Changed) => summary.changed += 1,
                Ok(Classification::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        target: "detector",
                        source = %source.name,
                        url = %item.url,
                        error = ?e,
                        "item processing failed"
                    );
                }
            }
        }

        counter!("detector_new_total").increment(summary.new as u64);
        counter!("detector_changed_total").increment(summary.changed as u64);

        if summary.new > 0 || summary.changed > 0 {
            tracing::info!(
                target: "detector",
                source = %source.name,
                new = summary.new,
                changed = summary.changed,
                "detected content"
            );
        }
        summary
    }

    pub async fn process_item(
        &self,
        source: &Source,
        item: &NormalizedItem,
    ) -> Result<Classification> {
        let existing = self
            .store
            .item_by_url(&item.url)
            .await
            .context("looking up tracked item")?;

        let Some(existing) = existing else {
            let receipt_id = self
                .gate
                .anchor(AnchorPayload::Fingerprint(item.fingerprint.clone()))
                .await;
            self.store
                .insert_item(NewTrackedItem {
                    source_id: source.id,
                    title: item.title.clone(),
                    description: item.description.clone(),
                    url: item.url.clone(),
                    fingerprint: item.fingerprint.clone(),
                    receipt_id,
                    first_seen_at: Utc::now(),
                })
                .await?;
            return Ok(Classification::New);
        };

        if existing.fingerprint == item.fingerprint {
            return Ok(Classification::Unchanged);
        }

        // The transition itself, chained to whatever the item was last anchored as.
        let change_receipt = self
            .gate
            .anchor(AnchorPayload::ChangeEvent {
                prior_receipt: existing.receipt_id.clone(),
                old_hash: existing.fingerprint.clone(),
                new_hash: item.fingerprint.clone(),
            })
            .await;

        self.store
            .insert_change(NewChangeRecord {
                item_id: existing.id,
                old_title: existing.title.clone(),
                new_title: item.title.clone(),
                old_description: existing.description.clone(),
                new_description: item.description.clone(),
                old_fingerprint: existing.fingerprint.clone(),
                new_fingerprint: item.fingerprint.clone(),
                prior_receipt_id: existing.receipt_id.clone(),
                receipt_id: change_receipt,
                detected_at: Utc::now(),
            })
            .await?;

        // The item's receipt must always match its current fingerprint.
        let receipt_id = self
            .gate
            .anchor(AnchorPayload::Fingerprint(item.fingerprint.clone()))
            .await;

        self.store
            .update_item_content(
                existing.id,
                ItemContent {
                    title: item.title.clone(),
                    description: item.description.clone(),
                    fingerprint: item.fingerprint.clone(),
                    receipt_id,
                },
            )
            .await?;

        Ok(Classification::Changed)
    }
}
