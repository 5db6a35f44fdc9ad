//! Backend abstraction for the persistent interval store
//!
//! The transient state emits closed intervals into a
//! [`StateHistoryBackend`]; the state system routes past-time queries to
//! it. The real implementation is the history tree in `tracehist-storage`;
//! [`DiscardBackend`] is the null backend used for provider dry-runs, where
//! only the latest (ongoing) state is of interest.

use crate::errors::Result;
use crate::interval::StateInterval;
use crate::types::{Quark, Timestamp};
use crate::value::StateValue;

/// Persistent store of closed state intervals, queryable by time.
///
/// Implementations are single-writer, multi-reader: `insert_past_state`
/// and `finish` are only ever called from the construction worker, while
/// the query methods may be called concurrently from any thread, including
/// while construction is in progress.
pub trait StateHistoryBackend: Send + Sync {
    /// Earliest timestamp covered by this history.
    fn start_time(&self) -> Timestamp;

    /// Latest timestamp covered so far (grows during construction).
    fn end_time(&self) -> Timestamp;

    /// Insert one closed interval.
    ///
    /// Intervals must arrive with non-decreasing `end` timestamps; an
    /// out-of-order insertion fails with `StateError::TimeRange`.
    fn insert_past_state(
        &self,
        start: Timestamp,
        end: Timestamp,
        quark: Quark,
        value: StateValue,
    ) -> Result<()>;

    /// Close the history at `end_ts` and flush everything to stable
    /// storage. No insertion may follow.
    fn finish(&self, end_ts: Timestamp) -> Result<()>;

    /// The interval containing `t` for `quark`, or `None` if the attribute
    /// had no stored value at `t` (implicit null).
    fn query_single(&self, t: Timestamp, quark: Quark) -> Result<Option<StateInterval>>;

    /// Every stored interval containing `t`, at most one per quark, in no
    /// particular order.
    fn query_full(&self, t: Timestamp) -> Result<Vec<StateInterval>>;

    /// All intervals for `quark` intersecting `[from, to]`, in time order.
    fn query_range(&self, quark: Quark, from: Timestamp, to: Timestamp)
        -> Result<Vec<StateInterval>>;
}

/// Null backend: drops every interval and answers every query empty.
///
/// Constructing a state system on top of this gives a "current state only"
/// system, useful for provider dry-runs and statistics that never look at
/// the past.
#[derive(Debug)]
pub struct DiscardBackend {
    start: Timestamp,
}

impl DiscardBackend {
    /// Build a discard backend for a trace starting at `start`.
    pub fn new(start: Timestamp) -> Self {
        DiscardBackend { start }
    }
}

impl StateHistoryBackend for DiscardBackend {
    fn start_time(&self) -> Timestamp {
        self.start
    }

    fn end_time(&self) -> Timestamp {
        self.start
    }

    fn insert_past_state(
        &self,
        _start: Timestamp,
        _end: Timestamp,
        _quark: Quark,
        _value: StateValue,
    ) -> Result<()> {
        Ok(())
    }

    fn finish(&self, _end_ts: Timestamp) -> Result<()> {
        Ok(())
    }

    fn query_single(&self, _t: Timestamp, _quark: Quark) -> Result<Option<StateInterval>> {
        Ok(None)
    }

    fn query_full(&self, _t: Timestamp) -> Result<Vec<StateInterval>> {
        Ok(Vec::new())
    }

    fn query_range(
        &self,
        _quark: Quark,
        _from: Timestamp,
        _to: Timestamp,
    ) -> Result<Vec<StateInterval>> {
        Ok(Vec::new())
    }
}
