// src/bootstrap.rs
// Process wiring shared by the binary and the integration tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::anchor::{AnchorGate, Ledger};
use crate::change_detector::ChangeDetector;
use crate::config::AppConfig;
use crate::ingest::config::{load_sources_default, load_sources_from};
use crate::ingest::scheduler::{Poller, PollerCfg, PollerHandle};
use crate::ingest::types::FeedFetcher;
use crate::reconcile::Sweeper;
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::{Source, SourceSpec, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON lines; anything else is compact.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }
}

/// Install the global subscriber: `EnvFilter` (default
/// `headline_anchor=info,warn`) plus a compact or JSON `fmt` layer.
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("headline_anchor=info,warn"));
    let registry = tracing_subscriber::registry().with(filter);
    let res = match LogFormat::from_env() {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
    res.is_ok()
}

/// SQLite at `cfg.db_path`, or the in-memory store for `:memory:`.
pub async fn open_store(cfg: &AppConfig) -> Result<Arc<dyn Store>> {
    if cfg.uses_memory_store() {
        tracing::info!("using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::open(&cfg.db_path)
        .await
        .with_context(|| format!("opening store at {}", cfg.db_path.display()))?;
    tracing::info!(path = %cfg.db_path.display(), "sqlite store ready");
    Ok(Arc::new(store))
}

/// Read the configured sources file (explicit path or default lookup).
pub fn configured_sources(cfg: &AppConfig) -> Result<Vec<SourceSpec>> {
    match &cfg.sources_path {
        Some(p) => load_sources_from(p),
        None => load_sources_default(),
    }
}

/// Upsert every spec and return the sources that should be polled.
pub async fn seed_sources(store: &dyn Store, specs: &[SourceSpec]) -> Result<Vec<Source>> {
    for spec in specs {
        store
            .upsert_source(spec)
            .await
            .with_context(|| format!("registering source {}", spec.name))?;
    }
    store.enabled_sources().await
}

/// The shared components: one store, one gate, one detector.
pub struct Pipeline {
    pub store: Arc<dyn Store>,
    pub gate: Arc<AnchorGate>,
    pub detector: Arc<ChangeDetector>,
    pub poller: Arc<Poller>,
    pub sweeper: Arc<Sweeper>,
}

/// Background tasks started by [`Pipeline::start`].
pub struct Running {
    pub poller: PollerHandle,
    pub sweeper: JoinHandle<()>,
}

impl Running {
    pub fn stop(self) {
        self.sweeper.abort();
        self.poller.stop();
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn Ledger>,
        fetcher: Arc<dyn FeedFetcher>,
        poller_cfg: PollerCfg,
    ) -> Self {
        let gate = Arc::new(AnchorGate::new(ledger));
        let detector = Arc::new(ChangeDetector::new(store.clone(), gate.clone()));
        let poller = Arc::new(Poller::new(fetcher, detector.clone(), poller_cfg));
        let sweeper = Arc::new(Sweeper::new(store.clone(), gate.clone()));
        Self {
            store,
            gate,
            detector,
            poller,
            sweeper,
        }
    }

    /// Sweeper first so leftovers from a previous run are retried before new
    /// items compete for the gate.
    pub async fn start(&self, sweep_interval: Duration) -> Result<Running> {
        let sources = self.store.enabled_sources().await?;
        let sweeper = self.sweeper.clone().spawn(sweep_interval);
        let poller = self.poller.clone().spawn_all(sources);
        Ok(Running { poller, sweeper })
    }
}
