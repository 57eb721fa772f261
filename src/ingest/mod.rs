// src/ingest/mod.rs
pub mod config;
pub mod providers;
pub mod scheduler;
pub mod types;

use crate::ingest::types::{NormalizedItem, RawFeedItem, SummaryVariant};
use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

/// Upper bound on description length, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 1024;

/// Prefix carried by every fingerprint string.
pub const FINGERPRINT_PREFIX: &str = "sha256:";

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_items_total", "Items surviving normalization.");
        describe_counter!("feed_skipped_total", "Items dropped for empty title/url.");
        describe_counter!("feed_fetch_errors_total", "Feed fetch/parse errors.");
        describe_gauge!("feed_last_poll_ts", "Unix ts of the last successful poll.");
    });
}

/// Fold markup into plain text: decode entities, strip tags, collapse whitespace.
pub fn strip_markup(s: &str) -> String {
    // Tags first so that encoded angle brackets survive as text.
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    let out = re_tags.replace_all(s, " ");
    let out = html_escape::decode_html_entities(&out).to_string();
    collapse_whitespace(&out)
}

fn collapse_whitespace(s: &str) -> String {
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(s, " ").trim().to_string()
}

/// `sha256:<hex>` over `title|description`.
pub fn compute_fingerprint(title: &str, description: Option<&str>) -> String {
    use std::fmt::Write as _;

    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(description.unwrap_or_default().as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(FINGERPRINT_PREFIX.len() + 64);
    out.push_str(FINGERPRINT_PREFIX);
    for b in digest.iter() {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// A link is degenerate when it is not an absolute http(s) URL or points at a
/// bare domain with nothing after it.
fn is_degenerate_link(link: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(link) else {
        return true;
    };
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return true;
    }
    matches!(parsed.path(), "" | "/") && parsed.query().is_none() && parsed.fragment().is_none()
}

/// Pick the canonical URL: the link unless it is missing or degenerate,
/// otherwise the guid. A degenerate link is never used as identity.
pub fn resolve_url(link: Option<&str>, guid: Option<&str>) -> Option<String> {
    let link = link.map(str::trim).filter(|l| !l.is_empty());
    let guid = guid.map(str::trim).filter(|g| !g.is_empty());
    match link {
        Some(l) if !is_degenerate_link(l) => Some(l.to_string()),
        _ => guid.map(str::to_string),
    }
}

fn pick_description(variants: &[SummaryVariant]) -> Option<String> {
    variants
        .iter()
        .map(|v| match v {
            SummaryVariant::Text(t) => collapse_whitespace(t),
            SummaryVariant::Markup(m) => strip_markup(m),
        })
        .find(|d| !d.is_empty())
        .map(|d| {
            if d.chars().count() > MAX_DESCRIPTION_CHARS {
                d.chars().take(MAX_DESCRIPTION_CHARS).collect()
            } else {
                d
            }
        })
}

/// Reduce a raw feed item to canonical form. `None` means skip
/// (empty title or no usable URL).
pub fn normalize(raw: &RawFeedItem) -> Option<NormalizedItem> {
    let title = raw.title.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return None;
    }
    let url = resolve_url(raw.link.as_deref(), raw.guid.as_deref())?;
    let description = pick_description(&raw.summary_variants);
    let fingerprint = compute_fingerprint(title, description.as_deref());

    Some(NormalizedItem {
        title: title.to_string(),
        description,
        url,
        fingerprint,
    })
}

/// Normalize a fetched batch, dropping skipped items. Returns (kept, skipped).
pub fn normalize_all(raw: &[RawFeedItem]) -> (Vec<NormalizedItem>, usize) {
    let kept: Vec<NormalizedItem> = raw.iter().filter_map(normalize).collect();
    let skipped = raw.len() - kept.len();
    (kept, skipped)
}
