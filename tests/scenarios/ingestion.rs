//! Ingestion driver scenarios over a real on-disk history: full runs,
//! cancellation, and partial-build invalidation.

use crate::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tracehist::{
    CancelToken, HistoryTree, IngestionDriver, ProgressSink, Result, StateError, StateProvider,
    StateSystem, StateValue, Timestamp,
};

/// Round-robin scheduler trace: `nb_events` context switches across two
/// CPUs, each flipping `CPUs/<n>/Current_thread`.
struct SchedProvider {
    nb_events: u64,
    cursor: u64,
    fail_at: Option<u64>,
    target: Option<Arc<StateSystem>>,
}

impl SchedProvider {
    fn new(nb_events: u64) -> Self {
        SchedProvider {
            nb_events,
            cursor: 0,
            fail_at: None,
            target: None,
        }
    }

    fn ts(n: u64) -> Timestamp {
        10 + n as Timestamp * 10
    }
}

impl StateProvider for SchedProvider {
    fn start_time(&self) -> Timestamp {
        Self::ts(0)
    }

    fn version(&self) -> u32 {
        1
    }

    fn assign_target(&mut self, target: Arc<StateSystem>) {
        self.target = Some(target);
    }

    fn process_next(&mut self) -> Result<Option<Timestamp>> {
        if self.fail_at == Some(self.cursor) {
            return Err(StateError::Provider("corrupt event".into()));
        }
        if self.cursor >= self.nb_events {
            return Ok(None);
        }
        let n = self.cursor;
        self.cursor += 1;
        let ss = self.target.as_ref().unwrap();
        let cpu = (n % 2).to_string();
        let q = ss.get_quark_absolute_and_add(&["CPUs", &cpu, "Current_thread"])?;
        ss.modify_attribute(Self::ts(n), StateValue::Int32((n / 2) as i32), q)?;
        Ok(Some(Self::ts(n)))
    }
}

struct CountingSink {
    reports: Mutex<Vec<(u64, Timestamp)>>,
}

impl ProgressSink for CountingSink {
    fn events_processed(&self, count: u64, current_ts: Timestamp) {
        self.reports.lock().push((count, current_ts));
    }
}

#[test]
fn test_full_ingestion_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("sched.ht");
    let tree = HistoryTree::create(
        tracehist::HistoryTreeConfig::new(&path, 10)
            .with_block_size(512)
            .with_max_children(4),
    )
    .unwrap();
    let target = Arc::new(StateSystem::new(Arc::new(tree)));

    let mut driver = IngestionDriver::new(Box::new(SchedProvider::new(800)), target.clone());
    let stats = driver.run(&CancelToken::new()).unwrap();
    assert_eq!(stats.events, 800);
    assert!(!stats.cancelled);
    assert_eq!(stats.end_time, 10 + 799 * 10);

    target.wait_until_built();
    let q0 = target
        .get_quark_absolute(&["CPUs", "0", "Current_thread"])
        .unwrap();
    // Event 2n lands on CPU 0 with thread n.
    let iv = target.query_single_state(10 + 200 * 10, q0).unwrap().unwrap();
    assert_eq!(iv.value, StateValue::Int32(100));

    // The file reopens cleanly with the same content.
    let reopened = reopen(&path);
    assert_eq!(
        value_at(&reopened, 10 + 200 * 10, q0),
        StateValue::Int32(100)
    );
}

#[test]
fn test_progress_reports() {
    let target = Arc::new(StateSystem::without_history(10));
    let sink = Arc::new(CountingSink {
        reports: Mutex::new(Vec::new()),
    });
    let mut driver = IngestionDriver::new(Box::new(SchedProvider::new(10)), target)
        .with_progress(Box::new(SinkHandle(sink.clone())));
    driver.run(&CancelToken::new()).unwrap();

    // Small run: only the final report fires.
    let reports = sink.reports.lock();
    assert_eq!(reports.as_slice(), &[(10, 10 + 9 * 10)]);
}

struct SinkHandle(Arc<CountingSink>);

impl ProgressSink for SinkHandle {
    fn events_processed(&self, count: u64, current_ts: Timestamp) {
        self.0.events_processed(count, current_ts);
    }
}

#[test]
fn test_aborted_ingestion_leaves_invalid_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("partial.ht");
    let tree = HistoryTree::create(tracehist::HistoryTreeConfig::new(&path, 10)).unwrap();
    let target = Arc::new(StateSystem::new(Arc::new(tree)));

    let mut provider = SchedProvider::new(100);
    provider.fail_at = Some(40);
    let mut driver = IngestionDriver::new(Box::new(provider), target);
    let err = driver.run(&CancelToken::new()).unwrap_err();
    assert!(matches!(err, StateError::Provider(_)));
    drop(driver);

    // The history was never closed, so the file must refuse to open.
    let err = HistoryTree::open(&path).unwrap_err();
    assert!(matches!(err, StateError::Format(_)));
}

#[test]
fn test_cancelled_run_closes_cleanly() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("cancelled.ht");
    let tree = HistoryTree::create(tracehist::HistoryTreeConfig::new(&path, 10)).unwrap();
    let target = Arc::new(StateSystem::new(Arc::new(tree)));

    let cancel = CancelToken::new();
    cancel.cancel();
    let mut driver = IngestionDriver::new(Box::new(SchedProvider::new(100)), target);
    let stats = driver.run(&cancel).unwrap();
    assert!(stats.cancelled);
    assert_eq!(stats.events, 0);

    // A cancelled build still produces a valid (shorter) history.
    let reopened = reopen(&path);
    assert_eq!(reopened.get_current_end_time(), 10);
}
