//! End-to-end refresh pipeline over the public API: source → scheduler →
//! durable store → restart → queries.

use async_trait::async_trait;
use statepop::services::{
    Cadence, CountySource, CycleOutcome, Fetcher, Hydration, QueryService, RefreshScheduler,
    SnapshotStore,
};
use statepop::types::{RawCountyRecord, Result, Snapshot, StatePopError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Upstream stand-in that serves batches in order, then fails
struct BatchSource {
    batches: Mutex<Vec<Vec<RawCountyRecord>>>,
    calls: AtomicUsize,
}

impl BatchSource {
    fn new(batches: Vec<Vec<RawCountyRecord>>) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(batches),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CountySource for BatchSource {
    fn name(&self) -> &str {
        "batches"
    }

    async fn fetch_counties(&self) -> Result<Vec<RawCountyRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut batches = self.batches.lock().unwrap();
        if batches.is_empty() {
            return Err(StatePopError::UpstreamUnavailable("exhausted".into()));
        }
        Ok(batches.remove(0))
    }
}

fn scheduler(source: Arc<BatchSource>, store: Arc<SnapshotStore>) -> RefreshScheduler {
    RefreshScheduler::new(Fetcher::new(source), store, Cadence::TopOfHour)
}

#[tokio::test]
async fn test_refresh_persist_restart_and_query() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("statePopulation.json");

    // First process: one good cycle
    {
        let store = Arc::new(SnapshotStore::new(path.clone()));
        let source = BatchSource::new(vec![vec![
            RawCountyRecord::new("Texas", "100"),
            RawCountyRecord::new("Texas", 200),
            RawCountyRecord::new("Ohio", 50),
            RawCountyRecord::new("", 10),
        ]]);
        let outcome = scheduler(source, store).run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Committed { states: 2, .. }));
    }

    // Second process: hydrate, then upstream is down
    let store = Arc::new(SnapshotStore::new(path.clone()));
    assert!(matches!(
        store.hydrate().unwrap(),
        Hydration::Restored { states: 2, .. }
    ));
    let source = BatchSource::new(vec![]);
    let outcome = scheduler(source.clone(), store.clone()).run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Skipped(_)));
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    let query = QueryService::new(store);
    assert_eq!(
        query.get_all().unwrap().snapshot,
        Snapshot::from_pairs([("Texas", 300), ("Ohio", 50)])
    );
    assert_eq!(query.get_by_state("TEXAS").unwrap().population, 300);
    assert!(matches!(
        query.get_by_state("Nevada"),
        Err(StatePopError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_corrupt_file_then_first_refresh_populates() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("statePopulation.json");
    std::fs::write(&path, "{\"version\":1,\"updated_at\":").unwrap();

    let store = Arc::new(SnapshotStore::new(path.clone()));
    assert!(matches!(
        store.hydrate(),
        Err(StatePopError::StoreHydration(_))
    ));
    let query = QueryService::new(store.clone());
    assert!(matches!(query.get_all(), Err(StatePopError::NoData)));

    let source = BatchSource::new(vec![vec![RawCountyRecord::new("Iowa", 3_190_369)]]);
    scheduler(source, store).run_cycle().await;

    assert_eq!(query.get_by_state("iowa").unwrap().state, "Iowa");
    assert!(SnapshotStore::load_file(&path).is_ok());
}

#[tokio::test]
async fn test_all_rejected_batch_never_erases_snapshot() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(SnapshotStore::new(temp.path().join("snap.json")));
    let source = BatchSource::new(vec![
        vec![RawCountyRecord::new("Ohio", 50)],
        vec![
            RawCountyRecord::new("", 10),
            RawCountyRecord::new("Iowa", "abc"),
        ],
    ]);
    let scheduler = scheduler(source, store.clone());

    scheduler.run_cycle().await;
    let before = store.current().unwrap();
    let outcome = scheduler.run_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Skipped(StatePopError::EmptyResult {
            received: 2,
            rejected: 2
        })
    ));
    assert_eq!(*store.current().unwrap(), *before);
    let on_disk = SnapshotStore::load_file(&temp.path().join("snap.json")).unwrap();
    assert_eq!(on_disk.snapshot, before.snapshot);
}
