// src/store/sqlite.rs
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{
    ChangeRecord, ChangeView, ItemContent, ItemView, NewChangeRecord, NewTrackedItem, Page,
    Source, SourceSpec, Stats, Store, TrackedItem,
};

const DEFAULT_POLL_SECS: u64 = 300;

const ITEM_COLUMNS: &str = "i.id, i.source_id, i.title, i.description, i.url, i.fingerprint, \
     i.receipt_id, i.first_seen_at";

const CHANGE_COLUMNS: &str = "c.id, c.item_id, c.old_title, c.new_title, c.old_description, \
     c.new_description, c.old_fingerprint, c.new_fingerprint, c.prior_receipt_id, c.receipt_id, \
     c.detected_at";

/// SQLite-backed store (WAL mode, schema created on open).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("opening sqlite db {}", path.display()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                feed_url TEXT NOT NULL UNIQUE,
                enabled INTEGER NOT NULL DEFAULT 1,
                poll_interval_secs INTEGER NOT NULL DEFAULT 300
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL REFERENCES sources(id),
                title TEXT NOT NULL,
                description TEXT,
                url TEXT NOT NULL UNIQUE,
                fingerprint TEXT NOT NULL,
                receipt_id TEXT,
                first_seen_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS change_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES tracked_items(id),
                old_title TEXT NOT NULL,
                new_title TEXT NOT NULL,
                old_description TEXT,
                new_description TEXT,
                old_fingerprint TEXT NOT NULL,
                new_fingerprint TEXT NOT NULL,
                prior_receipt_id TEXT,
                receipt_id TEXT,
                detected_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_change_records_new_fp \
             ON change_records(new_fingerprint)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let poll: i64 = row.try_get("poll_interval_secs")?;
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        feed_url: row.try_get("feed_url")?,
        poll_interval_secs: u64::try_from(poll).unwrap_or(DEFAULT_POLL_SECS),
        enabled: row.try_get("enabled")?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<TrackedItem> {
    let first_seen: String = row.try_get("first_seen_at")?;
    Ok(TrackedItem {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        url: row.try_get("url")?,
        fingerprint: row.try_get("fingerprint")?,
        receipt_id: row.try_get("receipt_id")?,
        first_seen_at: parse_ts(&first_seen)?,
    })
}

fn change_from_row(row: &SqliteRow) -> Result<ChangeRecord> {
    let detected: String = row.try_get("detected_at")?;
    Ok(ChangeRecord {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        old_title: row.try_get("old_title")?,
        new_title: row.try_get("new_title")?,
        old_description: row.try_get("old_description")?,
        new_description: row.try_get("new_description")?,
        old_fingerprint: row.try_get("old_fingerprint")?,
        new_fingerprint: row.try_get("new_fingerprint")?,
        prior_receipt_id: row.try_get("prior_receipt_id")?,
        receipt_id: row.try_get("receipt_id")?,
        detected_at: parse_ts(&detected)?,
    })
}

fn item_view_from_row(row: &SqliteRow) -> Result<ItemView> {
    Ok(ItemView {
        item: item_from_row(row)?,
        source_name: row.try_get("source_name")?,
    })
}

fn change_view_from_row(row: &SqliteRow) -> Result<ChangeView> {
    Ok(ChangeView {
        change: change_from_row(row)?,
        url: row.try_get("url")?,
        item_receipt_id: row.try_get("item_receipt_id")?,
        source_name: row.try_get("source_name")?,
    })
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or_default()
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_source(&self, spec: &SourceSpec) -> Result<Source> {
        let row = sqlx::query(
            r#"
            INSERT INTO sources (name, feed_url, enabled, poll_interval_secs)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(feed_url) DO UPDATE SET
                name = excluded.name,
                enabled = excluded.enabled,
                poll_interval_secs = excluded.poll_interval_secs
            RETURNING id, name, feed_url, enabled, poll_interval_secs
            "#,
        )
        .bind(&spec.name)
        .bind(&spec.feed_url)
        .bind(spec.enabled)
        .bind(i64::try_from(spec.poll_interval_secs).unwrap_or(i64::MAX))
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("upserting source {:?}", spec.name))?;
        source_from_row(&row)
    }

    async fn enabled_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn all_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn item_by_url(&self, url: &str) -> Result<Option<TrackedItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM tracked_items i WHERE i.url = ?");
        let row = sqlx::query(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn insert_item(&self, item: NewTrackedItem) -> Result<TrackedItem> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tracked_items
                (source_id, title, description, url, fingerprint, receipt_id, first_seen_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(item.source_id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(&item.url)
        .bind(&item.fingerprint)
        .bind(&item.receipt_id)
        .bind(item.first_seen_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("inserting tracked item {:?}", item.url))?;

        Ok(TrackedItem {
            id,
            source_id: item.source_id,
            title: item.title,
            description: item.description,
            url: item.url,
            fingerprint: item.fingerprint,
            receipt_id: item.receipt_id,
            first_seen_at: item.first_seen_at,
        })
    }

    async fn update_item_content(&self, id: i64, content: ItemContent) -> Result<()> {
        sqlx::query(
            "UPDATE tracked_items SET title = ?, description = ?, fingerprint = ?, receipt_id = ? \
             WHERE id = ?",
        )
        .bind(&content.title)
        .bind(&content.description)
        .bind(&content.fingerprint)
        .bind(&content.receipt_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("updating tracked item {id}"))?;
        Ok(())
    }

    async fn set_item_receipt(&self, id: i64, receipt_id: &str) -> Result<()> {
        sqlx::query("UPDATE tracked_items SET receipt_id = ? WHERE id = ?")
            .bind(receipt_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_change(&self, change: NewChangeRecord) -> Result<ChangeRecord> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO change_records
                (item_id, old_title, new_title, old_description, new_description,
                 old_fingerprint, new_fingerprint, prior_receipt_id, receipt_id, detected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(change.item_id)
        .bind(&change.old_title)
        .bind(&change.new_title)
        .bind(&change.old_description)
        .bind(&change.new_description)
        .bind(&change.old_fingerprint)
        .bind(&change.new_fingerprint)
        .bind(&change.prior_receipt_id)
        .bind(&change.receipt_id)
        .bind(change.detected_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("inserting change for item {}", change.item_id))?;

        Ok(ChangeRecord {
            id,
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
        })
    }

    async fn set_change_receipt(&self, id: i64, receipt_id: &str) -> Result<()> {
        sqlx::query("UPDATE change_records SET receipt_id = ? WHERE id = ?")
            .bind(receipt_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn backfill_change_receipts(
        &self,
        fingerprint: &str,
        receipt_id: &str,
    ) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "UPDATE change_records SET receipt_id = ? \
             WHERE new_fingerprint = ? AND receipt_id IS NULL RETURNING id",
        )
        .bind(receipt_id)
        .bind(fingerprint)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn unanchored_items(&self) -> Result<Vec<TrackedItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM tracked_items i WHERE i.receipt_id IS NULL ORDER BY i.id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn unanchored_changes(&self) -> Result<Vec<ChangeRecord>> {
        let sql = format!(
            "SELECT {CHANGE_COLUMNS} FROM change_records c WHERE c.receipt_id IS NULL ORDER BY c.id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(change_from_row).collect()
    }

    async fn recent_items(&self, page: Page, source: Option<&str>) -> Result<Vec<ItemView>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS}, s.name AS source_name FROM tracked_items i \
             JOIN sources s ON i.source_id = s.id \
             WHERE (?1 IS NULL OR s.name = ?1) \
             ORDER BY i.first_seen_at DESC, i.id DESC LIMIT ?2 OFFSET ?3"
        );
        let rows = sqlx::query(&sql)
            .bind(source)
            .bind(i64::from(page.limit))
            .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_view_from_row).collect()
    }

    async fn item_by_id(&self, id: i64) -> Result<Option<ItemView>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS}, s.name AS source_name FROM tracked_items i \
             JOIN sources s ON i.source_id = s.id WHERE i.id = ?"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_view_from_row).transpose()
    }

    async fn recent_changes(&self, page: Page, source: Option<&str>) -> Result<Vec<ChangeView>> {
        let sql = format!(
            "SELECT {CHANGE_COLUMNS}, i.url, i.receipt_id AS item_receipt_id, \
             s.name AS source_name FROM change_records c \
             JOIN tracked_items i ON c.item_id = i.id \
             JOIN sources s ON i.source_id = s.id \
             WHERE (?1 IS NULL OR s.name = ?1) \
             ORDER BY c.detected_at DESC, c.id DESC LIMIT ?2 OFFSET ?3"
        );
        let rows = sqlx::query(&sql)
            .bind(source)
            .bind(i64::from(page.limit))
            .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(change_view_from_row).collect()
    }

    async fn change_by_id(&self, id: i64) -> Result<Option<ChangeView>> {
        let sql = format!(
            "SELECT {CHANGE_COLUMNS}, i.url, i.receipt_id AS item_receipt_id, \
             s.name AS source_name FROM change_records c \
             JOIN tracked_items i ON c.item_id = i.id \
             JOIN sources s ON i.source_id = s.id WHERE c.id = ?"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(change_view_from_row).transpose()
    }

    async fn stats(&self) -> Result<Stats> {
        let headlines: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracked_items")
            .fetch_one(&self.pool)
            .await?;
        let changes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM change_records")
            .fetch_one(&self.pool)
            .await?;
        let sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources WHERE enabled = 1")
            .fetch_one(&self.pool)
            .await?;
        let anchored: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tracked_items WHERE receipt_id IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(Stats {
            headlines: count(headlines),
            changes: count(changes),
            sources: count(sources),
            anchored: count(anchored),
        })
    }
}
