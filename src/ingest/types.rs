// src/ingest/types.rs
use std::time::Duration;

/// One entry as it comes out of a feed, before normalization.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RawFeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    /// Alternative description fields in preference order
    /// (plain-text snippet, content, summary).
    pub summary_variants: Vec<SummaryVariant>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum SummaryVariant {
    /// Already plain text; only whitespace is folded.
    Text(String),
    /// HTML fragment; tags are stripped and entities decoded.
    Markup(String),
}

/// A feed item reduced to its canonical form plus content fingerprint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct NormalizedItem {
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub fingerprint: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed responded with status {0}")]
    Status(u16),
    #[error("feed timed out after {0:?}")]
    Timeout(Duration),
    #[error("feed could not be parsed: {0}")]
    Parse(String),
}

#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, endpoint: &str, timeout: Duration)
        -> Result<Vec<RawFeedItem>, FetchError>;
}
