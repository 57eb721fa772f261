//! headline-anchor service entrypoint.
//! Wires the store, the anchoring gate, feed pollers and the sweeper, then
//! serves the read-only API.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;

use headline_anchor::anchor::ledger::HttpLedger;
use headline_anchor::api::{self, AppState};
use headline_anchor::bootstrap::{
    configured_sources, init_tracing, open_store, seed_sources, Pipeline,
};
use headline_anchor::config::AppConfig;
use headline_anchor::ingest::providers::rss::RssFetcher;
use headline_anchor::metrics::Metrics;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    if !init_tracing() {
        tracing::warn!("tracing subscriber already installed; LOG_FORMAT ignored");
    }

    let cfg = AppConfig::from_env();
    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics exporter disabled");
            None
        }
    };

    let store = open_store(&cfg).await?;
    let specs = configured_sources(&cfg).context("loading sources config")?;
    let sources = seed_sources(store.as_ref(), &specs).await?;
    if sources.is_empty() {
        tracing::warn!("no enabled sources configured; only the sweeper will run");
    }

    let ledger = HttpLedger::new(&cfg.ledger_endpoint, cfg.ledger_token.clone(), cfg.ledger_timeout)?;
    let fetcher = RssFetcher::new(&cfg.user_agent).context("building feed client")?;
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(ledger),
        Arc::new(fetcher),
        cfg.poller_cfg(),
    );
    // Tasks live for the life of the process.
    let _running = pipeline.start(cfg.sweep_interval).await?;
    tracing::info!(
        sources = sources.len(),
        ledger = %cfg.ledger_endpoint,
        "pipeline started"
    );

    let router = api::router(AppState::new(store), metrics.as_ref());
    Ok(router.into())
}
