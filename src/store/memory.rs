// src/store/memory.rs
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{
    ChangeRecord, ChangeView, ItemContent, ItemView, NewChangeRecord, NewTrackedItem, Page,
    Source, SourceSpec, Stats, Store, TrackedItem,
};

/// In-process store. Vectors are append-only and ids are `index + 1`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    sources: Vec<Source>,
    items: Vec<TrackedItem>,
    changes: Vec<ChangeRecord>,
}

impl Inner {
    fn source_name(&self, id: i64) -> String {
        self.sources
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    fn item_mut(&mut self, id: i64) -> Result<&mut TrackedItem> {
        self.items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| anyhow!("tracked item {id} not found"))
    }

    fn item_view(&self, item: &TrackedItem) -> ItemView {
        ItemView {
            item: item.clone(),
            source_name: self.source_name(item.source_id),
        }
    }

    fn change_view(&self, change: &ChangeRecord) -> Option<ChangeView> {
        let item = self.items.iter().find(|i| i.id == change.item_id)?;
        Some(ChangeView {
            change: change.clone(),
            url: item.url.clone(),
            item_receipt_id: item.receipt_id.clone(),
            source_name: self.source_name(item.source_id),
        })
    }

    fn source_matches(&self, source_id: i64, source: Option<&str>) -> bool {
        source.map_or(true, |name| {
            self.sources
                .iter()
                .any(|s| s.id == source_id && s.name == name)
        })
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store mutex poisoned"))
    }
}

fn window<T>(rows: Vec<T>, page: Page) -> Vec<T> {
    rows.into_iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_source(&self, spec: &SourceSpec) -> Result<Source> {
        let mut g = self.lock()?;
        if g
            .sources
            .iter()
            .any(|s| s.name == spec.name && s.feed_url != spec.feed_url)
        {
            bail!("source name {:?} already used by another feed", spec.name);
        }
        if let Some(existing) = g.sources.iter_mut().find(|s| s.feed_url == spec.feed_url) {
            existing.name = spec.name.clone();
            existing.poll_interval_secs = spec.poll_interval_secs;
            existing.enabled = spec.enabled;
            return Ok(existing.clone());
        }
        let source = Source {
            id: g.sources.len() as i64 + 1,
            name: spec.name.clone(),
            feed_url: spec.feed_url.clone(),
            poll_interval_secs: spec.poll_interval_secs,
            enabled: spec.enabled,
        };
        g.sources.push(source.clone());
        Ok(source)
    }

    async fn enabled_sources(&self) -> Result<Vec<Source>> {
        let g = self.lock()?;
        Ok(g.sources.iter().filter(|s| s.enabled).cloned().collect())
    }

    async fn all_sources(&self) -> Result<Vec<Source>> {
        Ok(self.lock()?.sources.clone())
    }

    async fn item_by_url(&self, url: &str) -> Result<Option<TrackedItem>> {
        let g = self.lock()?;
        Ok(g.items.iter().find(|i| i.url == url).cloned())
    }

    async fn insert_item(&self, item: NewTrackedItem) -> Result<TrackedItem> {
        let mut g = self.lock()?;
        if g.items.iter().any(|i| i.url == item.url) {
            bail!("tracked item with url {:?} already exists", item.url);
        }
        let row = TrackedItem {
            id: g.items.len() as i64 + 1,
            source_id: item.source_id,
            title: item.title,
            description: item.description,
            url: item.url,
            fingerprint: item.fingerprint,
            receipt_id: item.receipt_id,
            first_seen_at: item.first_seen_at,
        };
        g.items.push(row.clone());
        Ok(row)
    }

    async fn update_item_content(&self, id: i64, content: ItemContent) -> Result<()> {
        let mut g = self.lock()?;
        let item = g.item_mut(id)?;
        item.title = content.title;
        item.description = content.description;
        item.fingerprint = content.fingerprint;
        item.receipt_id = content.receipt_id;
        Ok(())
    }

    async fn set_item_receipt(&self, id: i64, receipt_id: &str) -> Result<()> {
        let mut g = self.lock()?;
        g.item_mut(id)?.receipt_id = Some(receipt_id.to_string());
        Ok(())
    }

    async fn insert_change(&self, change: NewChangeRecord) -> Result<ChangeRecord> {
        let mut g = self.lock()?;
        if !g.items.iter().any(|i| i.id == change.item_id) {
            bail!("change references unknown item {}", change.item_id);
        }
        let row = ChangeRecord {
            id: g.changes.len() as i64 + 1,
            item_id: change.item_id,
            old_title: change.old_title,
            new_title: change.new_title,
            old_description: change.old_description,
            new_description: change.new_description,
            old_fingerprint: change.old_fingerprint,
            new_fingerprint: change.new_fingerprint,
            prior_receipt_id: change.prior_receipt_id,
            receipt_id: change.receipt_id,
            detected_at: change.detected_at,
        };
        g.changes.push(row.clone());
        Ok(row)
    }

    async fn set_change_receipt(&self, id: i64, receipt_id: &str) -> Result<()> {
        let mut g = self.lock()?;
        let change = g
            .changes
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow!("change record {id} not found"))?;
        change.receipt_id = Some(receipt_id.to_string());
        Ok(())
    }

    async fn backfill_change_receipts(
        &self,
        fingerprint: &str,
        receipt_id: &str,
    ) -> Result<Vec<i64>> {
        let mut g = self.lock()?;
        let mut touched = Vec::new();
        for c in g
            .changes
            .iter_mut()
            .filter(|c| c.new_fingerprint == fingerprint && c.receipt_id.is_none())
        {
            c.receipt_id = Some(receipt_id.to_string());
            touched.push(c.id);
        }
        Ok(touched)
    }

    async fn unanchored_items(&self) -> Result<Vec<TrackedItem>> {
        let g = self.lock()?;
        Ok(g.items
            .iter()
            .filter(|i| i.receipt_id.is_none())
            .cloned()
            .collect())
    }

    async fn unanchored_changes(&self) -> Result<Vec<ChangeRecord>> {
        let g = self.lock()?;
        Ok(g.changes
            .iter()
            .filter(|c| c.receipt_id.is_none())
            .cloned()
            .collect())
    }

    async fn recent_items(&self, page: Page, source: Option<&str>) -> Result<Vec<ItemView>> {
        let g = self.lock()?;
        let mut rows: Vec<&TrackedItem> = g
            .items
            .iter()
            .filter(|i| g.source_matches(i.source_id, source))
            .collect();
        rows.sort_by(|a, b| (b.first_seen_at, b.id).cmp(&(a.first_seen_at, a.id)));
        let views = rows.into_iter().map(|i| g.item_view(i)).collect();
        Ok(window(views, page))
    }

    async fn item_by_id(&self, id: i64) -> Result<Option<ItemView>> {
        let g = self.lock()?;
        Ok(g.items.iter().find(|i| i.id == id).map(|i| g.item_view(i)))
    }

    async fn recent_changes(&self, page: Page, source: Option<&str>) -> Result<Vec<ChangeView>> {
        let g = self.lock()?;
        let mut rows: Vec<ChangeView> = g
            .changes
            .iter()
            .filter_map(|c| g.change_view(c))
            .filter(|v| source.map_or(true, |name| v.source_name == name))
            .collect();
        rows.sort_by(|a, b| {
            (b.change.detected_at, b.change.id).cmp(&(a.change.detected_at, a.change.id))
        });
        Ok(window(rows, page))
    }

    async fn change_by_id(&self, id: i64) -> Result<Option<ChangeView>> {
        let g = self.lock()?;
        Ok(g.changes
            .iter()
            .find(|c| c.id == id)
            .and_then(|c| g.change_view(c)))
    }

    async fn stats(&self) -> Result<Stats> {
        let g = self.lock()?;
        Ok(Stats {
            headlines: g.items.len() as u64,
            changes: g.changes.len() as u64,
            sources: g.sources.iter().filter(|s| s.enabled).count() as u64,
            anchored: g.items.iter().filter(|i| i.receipt_id.is_some()).count() as u64,
        })
    }
}
