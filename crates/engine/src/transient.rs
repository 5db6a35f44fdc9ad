//! Transient state
//!
//! The in-memory table of currently-open intervals, one per quark. Every
//! state change closes the open interval (pushing it into the history
//! backend) and opens a new one; the final flush closes everything at the
//! end of the trace.
//!
//! Timestamps must be non-decreasing: this table is the write barrier
//! that turns an out-of-order provider into a hard error instead of a
//! corrupt history.

use tracehist_core::{
    Quark, Result, StateError, StateHistoryBackend, StateInterval, StateValue, Timestamp,
};

#[derive(Debug, Clone)]
struct TransientEntry {
    /// Start of the currently-open interval.
    start: Timestamp,
    /// Value held since `start`.
    value: StateValue,
}

/// Per-quark table of open intervals.
///
/// Not synchronized by itself; [`crate::StateSystem`] wraps it in a
/// reader/writer lock (writer-exclusive mutations, copy-out reads).
#[derive(Debug)]
pub struct TransientState {
    /// Indexed by quark; `None` means the attribute was never written
    /// (implicit null, no interval to close).
    entries: Vec<Option<TransientEntry>>,
    start_time: Timestamp,
    latest_time: Timestamp,
    active: bool,
}

impl TransientState {
    /// Empty table for a trace starting at `start_time`.
    pub fn new(start_time: Timestamp) -> Self {
        TransientState {
            entries: Vec::new(),
            start_time,
            latest_time: start_time,
            active: true,
        }
    }

    /// Latest timestamp seen by any state change.
    pub fn latest_time(&self) -> Timestamp {
        self.latest_time
    }

    /// Whether the table still accepts state changes.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop accepting state changes without flushing anything. Used when
    /// the table sits on top of an already-built history.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    fn ensure(&mut self, quark: Quark) -> Result<usize> {
        let idx = usize::try_from(quark)
            .map_err(|_| StateError::not_found(format!("<quark {quark}>")))?;
        if idx >= self.entries.len() {
            self.entries.resize(idx + 1, None);
        }
        Ok(idx)
    }

    fn entry(&self, quark: Quark) -> Option<&TransientEntry> {
        self.entries.get(quark as usize).and_then(Option::as_ref)
    }

    /// Current (ongoing) value of `quark`; null if never written.
    pub fn ongoing_value(&self, quark: Quark) -> StateValue {
        self.entry(quark)
            .map_or(StateValue::Null, |e| e.value.clone())
    }

    /// The ongoing interval of `quark` as it would look if the trace
    /// ended at `end`: `None` if the attribute was never written or its
    /// open interval starts after `t`.
    pub fn ongoing_interval(
        &self,
        quark: Quark,
        t: Timestamp,
        end: Timestamp,
    ) -> Option<StateInterval> {
        self.entry(quark).and_then(|e| {
            if e.start <= t {
                Some(StateInterval::new(e.start, end, quark, e.value.clone()))
            } else {
                None
            }
        })
    }

    /// Overwrite the ongoing value of `quark` in place, without emitting
    /// an interval. Used to patch a state whose real value is only known
    /// at its end (return values of system calls and the like).
    pub fn set_ongoing_value(&mut self, quark: Quark, value: StateValue) -> Result<()> {
        let idx = self.ensure(quark)?;
        match &mut self.entries[idx] {
            Some(entry) => entry.value = value,
            slot @ None => {
                *slot = Some(TransientEntry {
                    start: self.latest_time,
                    value,
                });
            }
        }
        Ok(())
    }

    /// The hot path: apply one state change at `ts`.
    ///
    /// - rewinds of the clock fail with `TimeRange`
    /// - writing the current value again only advances the clock
    ///   (coalescing)
    /// - a second change at the open interval's own start overwrites in
    ///   place, so the last write at a timestamp wins (provider order is
    ///   the tie-break)
    /// - otherwise the open interval is closed at `ts - 1`, pushed into
    ///   `backend`, and a new one opens at `ts`
    pub fn process_state_change(
        &mut self,
        backend: &dyn StateHistoryBackend,
        ts: Timestamp,
        value: StateValue,
        quark: Quark,
    ) -> Result<()> {
        if !self.active || ts < self.latest_time {
            return Err(StateError::TimeRange {
                t: ts,
                start: self.start_time,
                end: self.latest_time,
            });
        }
        let idx = self.ensure(quark)?;
        let slot = &mut self.entries[idx];
        match slot {
            None => {
                // First touch: the implicit null before `ts` stays
                // implicit, there is no interval to close.
                *slot = Some(TransientEntry { start: ts, value });
            }
            Some(entry) if entry.value == value => {
                // Coalesce: same value, nothing to emit.
            }
            Some(entry) if entry.start == ts => {
                entry.value = value;
            }
            Some(entry) => {
                backend.insert_past_state(entry.start, ts - 1, quark, entry.value.clone())?;
                entry.start = ts;
                entry.value = value;
            }
        }
        self.latest_time = ts;
        Ok(())
    }

    /// Close every open interval at `end_ts` and deactivate the table.
    /// Called once, at the end of the trace (or on cancellation).
    pub fn close(&mut self, backend: &dyn StateHistoryBackend, end_ts: Timestamp) -> Result<()> {
        if end_ts < self.latest_time {
            return Err(StateError::TimeRange {
                t: end_ts,
                start: self.start_time,
                end: self.latest_time,
            });
        }
        for (idx, slot) in self.entries.iter().enumerate() {
            if let Some(entry) = slot {
                backend.insert_past_state(
                    entry.start,
                    end_ts,
                    idx as Quark,
                    entry.value.clone(),
                )?;
            }
        }
        self.latest_time = end_ts;
        self.active = false;
        Ok(())
    }
}
