// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use headline_anchor::ingest::providers::rss::parse_feed;
use headline_anchor::ingest::types::{FeedFetcher, FetchError, RawFeedItem};
use headline_anchor::store::SourceSpec;

pub const WIRE_V1: &str = include_str!("../fixtures/wire_v1.xml");
pub const WIRE_V2: &str = include_str!("../fixtures/wire_v2.xml");
pub const PAPER_ATOM: &str = include_str!("../fixtures/paper_atom.xml");

/// Serves a swappable document per endpoint; unknown endpoints return 404.
#[derive(Default)]
pub struct FixtureFetcher {
    docs: Mutex<HashMap<String, String>>,
}

impl FixtureFetcher {
    pub fn serve(&self, endpoint: &str, xml: &str) {
        self.docs
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), xml.to_string());
    }
}

#[async_trait]
impl FeedFetcher for FixtureFetcher {
    async fn fetch(&self, endpoint: &str, _timeout: Duration) -> Result<Vec<RawFeedItem>, FetchError> {
        let doc = self.docs.lock().unwrap().get(endpoint).cloned();
        match doc {
            Some(xml) => parse_feed(&xml),
            None => Err(FetchError::Status(404)),
        }
    }
}

pub fn spec(name: &str, feed_url: &str) -> SourceSpec {
    SourceSpec {
        name: name.into(),
        feed_url: feed_url.into(),
        poll_interval_secs: 60,
        enabled: true,
    }
}
