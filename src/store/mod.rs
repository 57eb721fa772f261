//! Persistence for sources, tracked items and their change history.
//!
//! The pipeline only talks to the [`Store`] trait. Two backends ship with the
//! crate: [`memory::MemoryStore`] for tests and ephemeral runs, and
//! [`sqlite::SqliteStore`] for the service.
//!
//! Rows are read-then-written without compare-and-swap. Each URL belongs to
//! exactly one source's feed, so concurrent detector passes never touch the
//! same item; nothing here enforces that.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured feed as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub feed_url: String,
    pub poll_interval_secs: u64,
    pub enabled: bool,
}

/// A feed entry from external configuration, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub feed_url: String,
    pub poll_interval_secs: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub fingerprint: String,
    /// `None` until the current fingerprint has been anchored.
    pub receipt_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTrackedItem {
    pub source_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub fingerprint: String,
    pub receipt_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

/// Audit row for one fingerprint transition of a tracked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    pub item_id: i64,
    pub old_title: String,
    pub new_title: String,
    pub old_description: Option<String>,
    pub new_description: Option<String>,
    pub old_fingerprint: String,
    pub new_fingerprint: String,
    /// Receipt the item carried when the change was detected.
    pub prior_receipt_id: Option<String>,
    /// Receipt of the change-event itself.
    pub receipt_id: Option<String>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChangeRecord {
    pub item_id: i64,
    pub old_title: String,
    pub new_title: String,
    pub old_description: Option<String>,
    pub new_description: Option<String>,
    pub old_fingerprint: String,
    pub new_fingerprint: String,
    pub prior_receipt_id: Option<String>,
    pub receipt_id: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// New content for an existing item.
#[derive(Debug, Clone)]
pub struct ItemContent {
    pub title: String,
    pub description: Option<String>,
    pub fingerprint: String,
    pub receipt_id: Option<String>,
}

/// Tracked item joined with its source name, for read APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemView {
    #[serde(flatten)]
    pub item: TrackedItem,
    pub source_name: String,
}

/// Change record joined with the item's URL, current receipt and source name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeView {
    #[serde(flatten)]
    pub change: ChangeRecord,
    pub url: String,
    pub item_receipt_id: Option<String>,
    pub source_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub headlines: u64,
    pub changes: u64,
    pub sources: u64,
    pub anchored: u64,
}

/// 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    /// Clamp raw query values into a valid window. Zero counts as absent.
    pub fn clamped(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.filter(|&p| p > 0).unwrap_or(1),
            limit: limit
                .filter(|&l| l > 0)
                .unwrap_or(Self::DEFAULT_LIMIT)
                .min(Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Create or update a source keyed by feed URL.
    async fn upsert_source(&self, spec: &SourceSpec) -> Result<Source>;
    async fn enabled_sources(&self) -> Result<Vec<Source>>;
    async fn all_sources(&self) -> Result<Vec<Source>>;

    async fn item_by_url(&self, url: &str) -> Result<Option<TrackedItem>>;
    /// Fails if an item with the same URL already exists.
    async fn insert_item(&self, item: NewTrackedItem) -> Result<TrackedItem>;
    async fn update_item_content(&self, id: i64, content: ItemContent) -> Result<()>;
    async fn set_item_receipt(&self, id: i64, receipt_id: &str) -> Result<()>;

    async fn insert_change(&self, change: NewChangeRecord) -> Result<ChangeRecord>;
    async fn set_change_receipt(&self, id: i64, receipt_id: &str) -> Result<()>;
    /// Set `receipt_id` on every change whose new fingerprint is `fingerprint`
    /// and which has no receipt yet. Returns the ids touched.
    async fn backfill_change_receipts(&self, fingerprint: &str, receipt_id: &str)
        -> Result<Vec<i64>>;

    /// Items with no receipt, in creation order.
    async fn unanchored_items(&self) -> Result<Vec<TrackedItem>>;
    /// Changes with no receipt, in creation order.
    async fn unanchored_changes(&self) -> Result<Vec<ChangeRecord>>;

    async fn recent_items(&self, page: Page, source: Option<&str>) -> Result<Vec<ItemView>>;
    async fn item_by_id(&self, id: i64) -> Result<Option<ItemView>>;
    async fn recent_changes(&self, page: Page, source: Option<&str>) -> Result<Vec<ChangeView>>;
    async fn change_by_id(&self, id: i64) -> Result<Option<ChangeView>>;
    async fn stats(&self) -> Result<Stats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_is_clamped() {
        assert_eq!(Page::clamped(None, None), Page { page: 1, limit: 20 });
        assert_eq!(Page::clamped(Some(0), Some(0)), Page { page: 1, limit: 20 });
        assert_eq!(Page::clamped(None, Some(1)).limit, 1);
        assert_eq!(Page::clamped(Some(3), Some(500)).limit, 100);
        assert_eq!(Page::clamped(Some(3), Some(10)).offset(), 20);
    }
}
