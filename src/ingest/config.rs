// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::store::SourceSpec;

pub const ENV_PATH: &str = "SOURCES_CONFIG_PATH";

pub const DEFAULT_POLL_SECS: u64 = 300;
pub const MIN_POLL_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct SourceEntry {
    name: String,
    #[serde(alias = "feedUrl", alias = "url")]
    feed_url: String,
    #[serde(default, alias = "pollInterval", alias = "poll_interval_secs")]
    poll_interval: Option<u64>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Load sources from an explicit path. Supports TOML or JSON formats.
pub fn load_sources_from(path: &Path) -> Result<Vec<SourceSpec>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Load sources using env var + fallbacks:
/// 1) $SOURCES_CONFIG_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
/// 4) sources.config.json
pub fn load_sources_default() -> Result<Vec<SourceSpec>> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        } else {
            return Err(anyhow!("SOURCES_CONFIG_PATH points to non-existent path"));
        }
    }
    for candidate in [
        "config/sources.toml",
        "config/sources.json",
        "sources.config.json",
    ] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_sources_from(&p);
        }
    }
    Ok(Vec::new())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<SourceSpec>> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported sources config format"))
}

fn parse_toml(s: &str) -> Result<Vec<SourceSpec>> {
    #[derive(Deserialize)]
    struct TomlSources {
        sources: Vec<SourceEntry>,
    }
    let v: TomlSources = toml::from_str(s)?;
    Ok(clean_list(v.sources))
}

/// Either a bare array or `{"sources": [...]}`.
fn parse_json(s: &str) -> Result<Vec<SourceSpec>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum JsonSources {
        List(Vec<SourceEntry>),
        Wrapped { sources: Vec<SourceEntry> },
    }
    let entries = match serde_json::from_str::<JsonSources>(s)? {
        JsonSources::List(v) => v,
        JsonSources::Wrapped { sources } => sources,
    };
    Ok(clean_list(entries))
}

/// Trim, drop blanks, keep the first entry per feed URL and per name,
/// and clamp poll intervals.
fn clean_list(items: Vec<SourceEntry>) -> Vec<SourceSpec> {
    use std::collections::HashSet;
    let mut urls = HashSet::new();
    let mut names = HashSet::new();
    let mut out = Vec::new();
    for it in items {
        let name = it.name.trim();
        let feed_url = it.feed_url.trim();
        if name.is_empty() || feed_url.is_empty() {
            continue;
        }
        if !urls.insert(feed_url.to_string()) || !names.insert(name.to_string()) {
            tracing::warn!(target: "ingest", source = name, "duplicate source entry ignored");
            continue;
        }
        out.push(SourceSpec {
            name: name.to_string(),
            feed_url: feed_url.to_string(),
            poll_interval_secs: it
                .poll_interval
                .unwrap_or(DEFAULT_POLL_SECS)
                .max(MIN_POLL_SECS),
            enabled: it.enabled,
        });
    }
    out
}
