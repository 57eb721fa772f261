// tests/pipeline.rs
//
// End-to-end runs of poll -> normalize -> detect -> anchor against the
// in-memory store and a scripted ledger.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{spec, FixtureFetcher, PAPER_ATOM, WIRE_V1, WIRE_V2};
use headline_anchor::anchor::mock::{LedgerCall, MockLedger, MockOutcome};
use headline_anchor::bootstrap::{seed_sources, Pipeline};
use headline_anchor::ingest::compute_fingerprint;
use headline_anchor::ingest::scheduler::PollerCfg;
use headline_anchor::store::memory::MemoryStore;
use headline_anchor::store::{Page, Store};

const WIRE: &str = "https://wire.test/rss";
const PAPER: &str = "https://paper.test/atom";

struct Harness {
    store: Arc<MemoryStore>,
    ledger: Arc<MockLedger>,
    fetcher: Arc<FixtureFetcher>,
    pipeline: Pipeline,
}

fn harness(ledger: MockLedger) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(ledger);
    let fetcher = Arc::new(FixtureFetcher::default());
    let pipeline = Pipeline::new(
        store.clone(),
        ledger.clone(),
        fetcher.clone(),
        PollerCfg::default(),
    );
    Harness {
        store,
        ledger,
        fetcher,
        pipeline,
    }
}

#[tokio::test]
async fn repeat_poll_is_free_and_edit_is_chained() {
    let h = harness(MockLedger::new());
    let sources = seed_sources(h.store.as_ref(), &[spec("Wire", WIRE)])
        .await
        .unwrap();
    let wire = &sources[0];
    h.fetcher.serve(WIRE, WIRE_V1);

    let first = h.pipeline.poller.poll_source(wire).await.unwrap();
    assert_eq!(first.new, 2);
    assert_eq!(h.ledger.call_count(), 2);

    let again = h.pipeline.poller.poll_source(wire).await.unwrap();
    assert_eq!(again.unchanged, 2);
    assert_eq!(h.ledger.call_count(), 2, "unchanged items never hit the ledger");

    h.fetcher.serve(WIRE, WIRE_V2);
    let edited = h.pipeline.poller.poll_source(wire).await.unwrap();
    assert_eq!(edited.changed, 1);
    assert_eq!(edited.unchanged, 1);

    let old_fp = compute_fingerprint(
        "Council approves harbour budget",
        Some("The council voted 7-2 on Tuesday."),
    );
    let new_fp = compute_fingerprint(
        "Council rejects harbour budget",
        Some("The council voted 7-2 on Tuesday."),
    );
    let calls = h.ledger.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0], LedgerCall::Fingerprint(old_fp.clone()));
    assert_eq!(
        calls[2],
        LedgerCall::ChangeEvent {
            prior: Some("rcpt-1".into()),
            old: old_fp.clone(),
            new: new_fp.clone(),
        }
    );
    assert_eq!(calls[3], LedgerCall::Fingerprint(new_fp.clone()));

    let item = h
        .store
        .item_by_url("https://wire.test/news/harbour-budget")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.title, "Council rejects harbour budget");
    assert_eq!(item.fingerprint, new_fp);
    assert_eq!(item.receipt_id.as_deref(), Some("rcpt-4"));

    let changes = h.store.recent_changes(Page::clamped(None, None), None).await.unwrap();
    assert_eq!(changes.len(), 1);
    let change = &changes[0].change;
    assert_eq!(change.old_fingerprint, old_fp);
    assert_eq!(change.new_fingerprint, new_fp);
    assert_eq!(change.prior_receipt_id.as_deref(), Some("rcpt-1"));
    assert_eq!(change.receipt_id.as_deref(), Some("rcpt-3"));
    assert_eq!(changes[0].source_name, "Wire");
}

#[tokio::test]
async fn atom_feed_resolves_degenerate_link_to_guid() {
    let h = harness(MockLedger::new());
    let sources = seed_sources(h.store.as_ref(), &[spec("Paper", PAPER)])
        .await
        .unwrap();
    h.fetcher.serve(PAPER, PAPER_ATOM);

    let summary = h.pipeline.poller.poll_source(&sources[0]).await.unwrap();
    assert_eq!(summary.new, 2);
    let interview = h
        .store
        .item_by_url("https://paper.test/2026/mayor-interview")
        .await
        .unwrap()
        .expect("guid used as url");
    assert_eq!(interview.description.as_deref(), Some("Full transcript inside."));
    assert!(h.store.item_by_url("https://paper.test/").await.unwrap().is_none());
}

#[tokio::test]
async fn capacity_exhaustion_leaves_work_for_the_sweeper() {
    let ledger = MockLedger::new();
    ledger.push_outcomes([MockOutcome::Ok, MockOutcome::InsufficientCapacity]);
    let h = harness(ledger);
    let sources = seed_sources(h.store.as_ref(), &[spec("Wire", WIRE), spec("Paper", PAPER)])
        .await
        .unwrap();
    h.fetcher.serve(WIRE, WIRE_V1);
    h.fetcher.serve(PAPER, PAPER_ATOM);

    for s in &sources {
        h.pipeline.poller.poll_source(s).await.unwrap();
    }
    // Two commits reached the ledger; the gate refused the rest.
    assert_eq!(h.ledger.call_count(), 2);
    assert!(h.pipeline.gate.is_open());
    let stats = h.store.stats().await.unwrap();
    assert_eq!(stats.headlines, 4);
    assert_eq!(stats.anchored, 1);

    let report = h.pipeline.sweeper.run_once().await;
    assert_eq!(report.pending_items, 3);
    assert_eq!(report.retried(), 3);
    assert!(!report.capacity_exhausted);
    assert_eq!(h.store.stats().await.unwrap().anchored, 4);
    assert!(h.store.unanchored_items().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sources_never_overlap_ledger_writes() {
    let h = harness(MockLedger::with_delay(Duration::from_millis(5)));
    let mut specs = Vec::new();
    for i in 0..6 {
        let url = format!("https://feed{i}.test/rss");
        specs.push(spec(&format!("Feed {i}"), &url));
        let xml = WIRE_V1.replace("wire.test/news", &format!("feed{i}.test/news"));
        h.fetcher.serve(&url, &xml);
    }
    let sources = seed_sources(h.store.as_ref(), &specs).await.unwrap();

    let tasks: Vec<_> = sources
        .into_iter()
        .map(|s| {
            let poller = h.pipeline.poller.clone();
            tokio::spawn(async move { poller.poll_source(&s).await })
        })
        .collect();
    for t in tasks {
        assert_eq!(t.await.unwrap().unwrap().new, 2);
    }

    assert_eq!(h.ledger.call_count(), 12);
    assert_eq!(h.ledger.max_in_flight(), 1);
    assert_eq!(h.store.stats().await.unwrap().anchored, 12);
}
