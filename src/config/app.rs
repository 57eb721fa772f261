// src/config/app.rs
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, time::Duration};

use crate::ingest::providers::rss::DEFAULT_USER_AGENT;
use crate::ingest::scheduler::{PollerCfg, DEFAULT_FETCH_TIMEOUT, DEFAULT_STAGGER};
use crate::reconcile::DEFAULT_SWEEP_INTERVAL;

pub const DEFAULT_DB_PATH: &str = "data/headline-anchor.db";
pub const DEFAULT_LEDGER_ENDPOINT: &str = "http://127.0.0.1:8090";
/// `HEADLINE_DB_PATH` value that selects the in-memory store.
pub const IN_MEMORY_DB: &str = ":memory:";

/// Process settings, read from the environment (after `.env`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub db_path: PathBuf,
    /// Explicit sources file; `None` uses the default lookup order.
    pub sources_path: Option<PathBuf>,
    pub ledger_endpoint: String,
    pub ledger_token: Option<String>,
    pub ledger_timeout: Duration,
    pub fetch_timeout: Duration,
    pub poll_stagger: Duration,
    pub sweep_interval: Duration,
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            sources_path: None,
            ledger_endpoint: DEFAULT_LEDGER_ENDPOINT.to_string(),
            ledger_token: None,
            ledger_timeout: Duration::from_secs(30),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            poll_stagger: DEFAULT_STAGGER,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Seconds from env; unparsable values fall back to `default`, and so does
/// zero unless `allow_zero`.
fn env_secs(key: &str, default: Duration, allow_zero: bool) -> Duration {
    match env_str(key).map(|v| v.parse::<u64>()) {
        Some(Ok(secs)) if secs > 0 || allow_zero => Duration::from_secs(secs),
        Some(_) => {
            tracing::warn!(key, "ignoring invalid duration, using default");
            default
        }
        None => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            db_path: env_str("HEADLINE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.db_path),
            sources_path: env_str(crate::ingest::config::ENV_PATH).map(PathBuf::from),
            ledger_endpoint: env_str("LEDGER_ENDPOINT").unwrap_or(d.ledger_endpoint),
            ledger_token: env_str("LEDGER_API_TOKEN"),
            ledger_timeout: env_secs("LEDGER_TIMEOUT_SECS", d.ledger_timeout, false),
            fetch_timeout: env_secs("FEED_TIMEOUT_SECS", d.fetch_timeout, false),
            // Zero stagger starts every source at once.
            poll_stagger: env_secs("POLL_STAGGER_SECS", d.poll_stagger, true),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS", d.sweep_interval, false),
            user_agent: env_str("FEED_USER_AGENT").unwrap_or(d.user_agent),
        }
    }

    pub fn uses_memory_store(&self) -> bool {
        self.db_path.as_os_str() == IN_MEMORY_DB
    }

    pub fn poller_cfg(&self) -> PollerCfg {
        PollerCfg {
            fetch_timeout: self.fetch_timeout,
            stagger: self.poll_stagger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 9] = [
        "HEADLINE_DB_PATH",
        "SOURCES_CONFIG_PATH",
        "LEDGER_ENDPOINT",
        "LEDGER_API_TOKEN",
        "LEDGER_TIMEOUT_SECS",
        "FEED_TIMEOUT_SECS",
        "POLL_STAGGER_SECS",
        "SWEEP_INTERVAL_SECS",
        "FEED_USER_AGENT",
    ];

    #[serial_test::serial]
    #[test]
    fn env_overrides_defaults() {
        for k in KEYS {
            env::remove_var(k);
        }
        assert_eq!(AppConfig::from_env(), AppConfig::default());

        env::set_var("HEADLINE_DB_PATH", ":memory:");
        env::set_var("LEDGER_ENDPOINT", "https://ledger.test");
        env::set_var("FEED_TIMEOUT_SECS", "3");
        env::set_var("SWEEP_INTERVAL_SECS", "abc");
        env::set_var("POLL_STAGGER_SECS", "0");
        env::set_var("LEDGER_TIMEOUT_SECS", "0");
        let cfg = AppConfig::from_env();
        assert!(cfg.uses_memory_store());
        assert_eq!(cfg.ledger_endpoint, "https://ledger.test");
        assert_eq!(cfg.fetch_timeout, Duration::from_secs(3));
        assert_eq!(cfg.sweep_interval, DEFAULT_SWEEP_INTERVAL);
        assert_eq!(cfg.poll_stagger, Duration::ZERO);
        assert_eq!(cfg.poller_cfg().stagger, Duration::ZERO);
        assert_eq!(cfg.ledger_timeout, AppConfig::default().ledger_timeout);

        env::set_var("POLL_STAGGER_SECS", "-2");
        assert_eq!(AppConfig::from_env().poll_stagger, DEFAULT_STAGGER);

        for k in KEYS {
            env::remove_var(k);
        }
    }
}
