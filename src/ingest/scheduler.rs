// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use crate::change_detector::{ChangeDetector, DetectionSummary};
use crate::ingest::types::{FeedFetcher, FetchError};
use crate::store::Source;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_STAGGER: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug)]
pub struct PollerCfg {
    pub fetch_timeout: Duration,
    /// Source `i` starts polling after `stagger * i`.
    pub stagger: Duration,
}

impl Default for PollerCfg {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            stagger: DEFAULT_STAGGER,
        }
    }
}

/// Drives fetch → normalize → detect for each source on its own timer.
pub struct Poller {
    fetcher: Arc<dyn FeedFetcher>,
    detector: Arc<ChangeDetector>,
    cfg: PollerCfg,
}

/// Timers started by [`Poller::spawn_all`].
pub struct PollerHandle {
    handles: Vec<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn stop(self) {
        for h in &self.handles {
            h.abort();
        }
        tracing::info!(target: "ingest", timers = self.handles.len(), "stopped all polling");
    }
}

impl Poller {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, detector: Arc<ChangeDetector>, cfg: PollerCfg) -> Self {
        crate::ingest::ensure_metrics_described();
        Self {
            fetcher,
            detector,
            cfg,
        }
    }

    /// One tick for one source. Fetch failures are logged and swallowed;
    /// `None` means nothing reached the detector.
    pub async fn poll_source(&self, source: &Source) -> Option<DetectionSummary> {
        let timeout = self.cfg.fetch_timeout;
        let fetched = match tokio::time::timeout(timeout, self.fetcher.fetch(&source.feed_url, timeout))
            .await
        {
            Ok(res) => res,
            Err(_) => Err(FetchError::Timeout(timeout)),
        };

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => {
                counter!("feed_fetch_errors_total").increment(1);
                tracing::warn!(target: "ingest", source = %source.name, error = %e, "feed fetch failed");
                return None;
            }
        };

        let (items, skipped) = crate::ingest::normalize_all(&raw);
        counter!("feed_items_total").increment(items.len() as u64);
        counter!("feed_skipped_total").increment(skipped as u64);
        gauge!("feed_last_poll_ts").set(chrono::Utc::now().timestamp() as f64);

        if items.is_empty() {
            return None;
        }
        Some(self.detector.process(source, &items).await)
    }

    /// Start one timer per enabled source, staggered by position.
    pub fn spawn_all(self: Arc<Self>, sources: Vec<Source>) -> PollerHandle {
        let enabled: Vec<Source> = sources.into_iter().filter(|s| s.enabled).collect();
        tracing::info!(target: "ingest", sources = enabled.len(), "starting feed polling");

        let handles = enabled
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let poller = self.clone();
                let initial_delay = poller.cfg.stagger * index as u32;
                let period = Duration::from_secs(source.poll_interval_secs.max(1));
                tokio::spawn(async move {
                    tokio::time::sleep(initial_delay).await;
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        poller.poll_source(&source).await;
                    }
                })
            })
            .collect();

        PollerHandle { handles }
    }
}
