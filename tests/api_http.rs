// tests/api_http.rs
//
// HTTP-level tests for the read-only Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;

use serde_json::Value as Json;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use common::{spec, FixtureFetcher, WIRE_V1, WIRE_V2};
use headline_anchor::anchor::mock::MockLedger;
use headline_anchor::api::{self, AppState};
use headline_anchor::bootstrap::{seed_sources, Pipeline};
use headline_anchor::ingest::scheduler::PollerCfg;
use headline_anchor::store::memory::MemoryStore;
use headline_anchor::store::Store;

const BODY_LIMIT: usize = 1024 * 1024;
const WIRE: &str = "https://wire.test/rss";

/// Store holding two wire items, one of them edited once.
async fn populated_router() -> Router {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(FixtureFetcher::default());
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(MockLedger::new()),
        fetcher.clone(),
        PollerCfg::default(),
    );
    let sources = seed_sources(store.as_ref(), &[spec("Wire", WIRE)])
        .await
        .expect("seed");
    fetcher.serve(WIRE, WIRE_V1);
    pipeline.poller.poll_source(&sources[0]).await;
    fetcher.serve(WIRE, WIRE_V2);
    pipeline.poller.poll_source(&sources[0]).await;

    api::router(AppState::new(store as Arc<dyn Store>), None)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, json)
}

#[tokio::test]
async fn health_returns_ok() {
    let app = api::router(AppState::new(Arc::new(MemoryStore::new())), None);
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");
    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn headlines_are_paged_newest_first() {
    let app = populated_router().await;

    let (status, body) = get(app.clone(), "/api/headlines").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 1);
    assert_eq!(body["limit"], 20);
    let data = body["data"].as_array().expect("data array");
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["source_name"], "Wire");
    assert!(data[0]["fingerprint"].as_str().unwrap().starts_with("sha256:"));

    let (_, body) = get(app.clone(), "/api/headlines?page=2&limit=1").await;
    assert_eq!(body["limit"], 1);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Garbage and out-of-range values are clamped, never rejected.
    let (status, body) = get(app.clone(), "/api/headlines?page=abc&limit=5000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 1);
    assert_eq!(body["limit"], 100);

    // A zero limit means "use the default", like a missing one.
    let (status, body) = get(app.clone(), "/api/headlines?limit=0&page=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 1);
    assert_eq!(body["limit"], 20);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = get(app,"/api/headlines?source=Nobody").await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn single_headline_and_missing_ids() {
    let app = populated_router().await;

    let (status, body) = get(app.clone(), "/api/headlines/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://wire.test/news/harbour-budget");
    assert_eq!(body["title"], "Council rejects harbour budget");

    let (status, body) = get(app.clone(), "/api/headlines/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not found");

    let (status, _) = get(app, "/api/headlines/not-a-number").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn changes_carry_item_context() {
    let app = populated_router().await;

    let (status, body) = get(app.clone(), "/api/changes").await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["old_title"], "Council approves harbour budget");
    assert_eq!(data[0]["new_title"], "Council rejects harbour budget");
    assert_eq!(data[0]["url"], "https://wire.test/news/harbour-budget");
    assert_eq!(data[0]["prior_receipt_id"], "rcpt-1");

    let id = data[0]["id"].as_i64().unwrap();
    let (status, body) = get(app.clone(), &format!("/api/changes/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["receipt_id"], "rcpt-3");

    let (status, _) = get(app, "/api/changes/42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sources_and_stats() {
    let app = populated_router().await;

    let (_, body) = get(app.clone(), "/api/sources").await;
    let sources = body.as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["feed_url"], WIRE);

    let (status, body) = get(app, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["headlines"], 2);
    assert_eq!(body["changes"], 1);
    assert_eq!(body["sources"], 1);
    assert_eq!(body["anchored"], 2);
    assert!(body["uptime_seconds"].is_u64());
}
