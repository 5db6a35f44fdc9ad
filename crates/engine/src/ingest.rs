//! Ingestion driver
//!
//! A [`StateProvider`] translates trace events into state changes on a
//! target [`StateSystem`]. The [`IngestionDriver`] pulls events from the
//! provider one at a time, which keeps cancellation and progress
//! reporting in the driver's hands rather than the provider's.

use crate::system::StateSystem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracehist_core::{Result, Timestamp};
use tracing::{debug, info, warn};

/// Events between two progress reports.
pub const PROGRESS_GRANULARITY: u64 = 50_000;

/// Translates trace events into state changes.
///
/// Implementations hold their own event source (a trace file, a socket,
/// a generator). `process_next` applies exactly one event's worth of
/// mutations to the assigned target and reports that event's timestamp,
/// so the driver can account for it.
pub trait StateProvider: Send {
    /// Timestamp of the first event.
    fn start_time(&self) -> Timestamp;

    /// Version of this provider's state layout. Bumped whenever the
    /// attribute tree shape or value encoding changes, so stale on-disk
    /// histories can be detected and rebuilt.
    fn version(&self) -> u32;

    /// Hand the provider the state system it will mutate. Called once,
    /// before the first `process_next`.
    fn assign_target(&mut self, target: Arc<StateSystem>);

    /// Apply the next event's state changes and return its timestamp, or
    /// `Ok(None)` once the trace is exhausted.
    fn process_next(&mut self) -> Result<Option<Timestamp>>;

    /// Release the provider's resources. Called at most once.
    fn dispose(&mut self) {}
}

/// Clonable cancellation flag shared between the ingestion worker and
/// whoever may want to stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next event boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Receives periodic progress reports during ingestion.
pub trait ProgressSink: Send + Sync {
    /// Called every [`PROGRESS_GRANULARITY`] events and once at the end.
    fn events_processed(&self, count: u64, current_ts: Timestamp);
}

struct NoProgress;

impl ProgressSink for NoProgress {
    fn events_processed(&self, _count: u64, _current_ts: Timestamp) {}
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    /// Events successfully applied.
    pub events: u64,
    /// Timestamp the history was closed at.
    pub end_time: Timestamp,
    /// Whether the run stopped on a cancellation request rather than end
    /// of trace.
    pub cancelled: bool,
}

/// Drives a [`StateProvider`] to completion against a [`StateSystem`].
pub struct IngestionDriver {
    provider: Box<dyn StateProvider>,
    target: Arc<StateSystem>,
    progress: Box<dyn ProgressSink>,
    end_time: Timestamp,
    disposed: bool,
}

impl IngestionDriver {
    /// Wire `provider` to `target`. The provider receives the target
    /// immediately.
    pub fn new(mut provider: Box<dyn StateProvider>, target: Arc<StateSystem>) -> Self {
        provider.assign_target(Arc::clone(&target));
        let end_time = provider.start_time();
        IngestionDriver {
            provider,
            target,
            progress: Box::new(NoProgress),
            end_time,
            disposed: false,
        }
    }

    /// Replace the no-op progress sink.
    pub fn with_progress(mut self, progress: Box<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Timestamp of the provider's first event.
    pub fn get_start_time(&self) -> Timestamp {
        self.provider.start_time()
    }

    /// Timestamp of the last event applied so far.
    pub fn get_end_time(&self) -> Timestamp {
        self.end_time
    }

    /// Pull events until end of trace or cancellation, then close the
    /// history at the last applied timestamp.
    ///
    /// A provider or backend error aborts the run without closing the
    /// history, so a partially-built history file stays unreadable.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<IngestStats> {
        let mut events: u64 = 0;
        let mut cancelled = false;
        debug!(start = self.get_start_time(), "ingestion starting");

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                warn!(events, end = self.end_time, "ingestion cancelled");
                break;
            }
            match self.provider.process_next()? {
                Some(ts) => {
                    self.end_time = ts;
                    events += 1;
                    if events % PROGRESS_GRANULARITY == 0 {
                        self.progress.events_processed(events, ts);
                    }
                }
                None => break,
            }
        }

        self.target.close_history(self.end_time)?;
        self.progress.events_processed(events, self.end_time);
        info!(events, end = self.end_time, cancelled, "ingestion finished");
        Ok(IngestStats {
            events,
            end_time: self.end_time,
            cancelled,
        })
    }

    /// Release the provider's resources. Safe to call more than once.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.provider.dispose();
            self.disposed = true;
        }
    }
}

impl Drop for IngestionDriver {
    fn drop(&mut self) {
        self.dispose();
    }
}
