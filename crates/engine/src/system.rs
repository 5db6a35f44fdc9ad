//! State system façade
//!
//! [`StateSystem`] is the public API of the engine: quark operations,
//! state mutations (modify / increment / push / pop / remove), ongoing
//! queries against the transient state and historical queries against the
//! backend.
//!
//! The system is single-writer, multi-reader: the ingestion worker owns
//! all mutations, while queries may come from any thread at any time.
//! The attribute tree and the transient table each sit behind a
//! reader/writer lock; the backend synchronizes itself.

use crate::attribute::AttributeTree;
use crate::transient::TransientState;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::Arc;
use tracehist_core::{
    DiscardBackend, Quark, Result, StateError, StateHistoryBackend, StateInterval, StateValue,
    Timestamp, ROOT_QUARK,
};
use tracing::debug;

/// Maximum depth of a stack attribute.
///
/// Pushing past this is almost always a provider bug (unbalanced
/// push/pop) that would otherwise grow the attribute tree without bound,
/// so it surfaces as [`StateError::StackOverflow`].
pub const MAX_STACK_DEPTH: i32 = 10;

/// The state system: attribute namespace + transient state + history.
pub struct StateSystem {
    attributes: RwLock<AttributeTree>,
    transient: RwLock<TransientState>,
    backend: Arc<dyn StateHistoryBackend>,
    start_time: Timestamp,
    // Reopened histories carry no attribute tree: callers address
    // attributes by recorded quark, so query-side validation is relaxed.
    read_only: bool,
    built: Mutex<bool>,
    built_cv: Condvar,
}

impl StateSystem {
    /// State system writing its history into `backend`.
    pub fn new(backend: Arc<dyn StateHistoryBackend>) -> Self {
        let start_time = backend.start_time();
        StateSystem {
            attributes: RwLock::new(AttributeTree::new()),
            transient: RwLock::new(TransientState::new(start_time)),
            backend,
            start_time,
            read_only: false,
            built: Mutex::new(false),
            built_cv: Condvar::new(),
        }
    }

    /// State system with no history underneath: intervals are discarded
    /// and only the latest (ongoing) state can be queried. Used for
    /// provider dry-runs.
    pub fn without_history(start_time: Timestamp) -> Self {
        Self::new(Arc::new(DiscardBackend::new(start_time)))
    }

    /// Read-only state system over an already-built history. The
    /// attribute tree starts empty: callers address attributes by the
    /// quarks they recorded at build time.
    pub fn from_existing(backend: Arc<dyn StateHistoryBackend>) -> Self {
        let mut system = Self::new(backend);
        system.read_only = true;
        system.transient.write().deactivate();
        *system.built.lock() = true;
        system
    }

    fn validate_query_quark(&self, quark: Quark) -> Result<()> {
        if self.read_only {
            if quark < 0 {
                return Err(StateError::not_found(format!("quark {quark}")));
            }
            return Ok(());
        }
        self.attributes.read().validate(quark)
    }

    /// The backend this system writes to and queries.
    pub fn backend(&self) -> &Arc<dyn StateHistoryBackend> {
        &self.backend
    }

    // ========================================================================
    // Quark operations
    // ========================================================================

    /// Quark of an existing absolute path.
    pub fn get_quark_absolute(&self, path: &[&str]) -> Result<Quark> {
        self.attributes.read().get_quark(ROOT_QUARK, path)
    }

    /// Quark of an absolute path, creating missing segments.
    pub fn get_quark_absolute_and_add(&self, path: &[&str]) -> Result<Quark> {
        self.attributes.write().get_or_add_quark(ROOT_QUARK, path)
    }

    /// Quark of an existing path relative to `base`.
    pub fn get_quark_relative(&self, base: Quark, sub_path: &[&str]) -> Result<Quark> {
        self.attributes.read().get_quark(base, sub_path)
    }

    /// Quark of a path relative to `base`, creating missing segments.
    pub fn get_quark_relative_and_add(&self, base: Quark, sub_path: &[&str]) -> Result<Quark> {
        self.attributes.write().get_or_add_quark(base, sub_path)
    }

    /// Direct or recursive (pre-order) sub-attributes of `quark`.
    pub fn get_sub_attributes(&self, quark: Quark, recursive: bool) -> Result<Vec<Quark>> {
        self.attributes.read().sub_attributes(quark, recursive)
    }

    /// Last path component of `quark`.
    pub fn get_attribute_name(&self, quark: Quark) -> Result<String> {
        self.attributes
            .read()
            .attribute_name(quark)
            .map(str::to_string)
    }

    /// Slash-joined full path of `quark`.
    pub fn get_full_attribute_path(&self, quark: Quark) -> Result<String> {
        self.attributes.read().full_path(quark)
    }

    /// Number of attributes in the system.
    pub fn get_nb_attributes(&self) -> usize {
        self.attributes.read().len()
    }

    // ========================================================================
    // State mutations
    // ========================================================================

    /// Assign `value` to `quark` effective at `t`.
    pub fn modify_attribute(&self, t: Timestamp, value: StateValue, quark: Quark) -> Result<()> {
        self.attributes.read().validate(quark)?;
        self.transient
            .write()
            .process_state_change(self.backend.as_ref(), t, value, quark)
    }

    /// Increment the integer value of `quark` by one (null counts as 0).
    pub fn increment_attribute(&self, t: Timestamp, quark: Quark) -> Result<()> {
        let current = self.query_ongoing_value(quark)?;
        let previous = match &current {
            StateValue::Null => 0,
            other => other.unbox_int()?,
        };
        self.modify_attribute(t, StateValue::Int32(previous + 1), quark)
    }

    /// Push `value` onto the stack attribute `quark`.
    ///
    /// The attribute's own value is the stack depth; the pushed value
    /// lands in a child attribute named after the new depth.
    pub fn push_attribute(&self, t: Timestamp, value: StateValue, quark: Quark) -> Result<()> {
        let depth = match self.query_ongoing_value(quark)? {
            StateValue::Null => 0,
            other => other.unbox_int()?,
        };
        debug_assert!(depth >= 0, "negative stack depth on quark {quark}");
        if depth >= MAX_STACK_DEPTH {
            return Err(StateError::StackOverflow {
                quark,
                depth: depth + 1,
            });
        }
        let new_depth = depth + 1;
        let sub_quark = self.get_quark_relative_and_add(quark, &[&new_depth.to_string()])?;
        self.modify_attribute(t, StateValue::Int32(new_depth), quark)?;
        self.modify_attribute(t, value, sub_quark)
    }

    /// Pop the topmost value off the stack attribute `quark`.
    ///
    /// Popping an empty (or never-used) stack is silently ignored: traces
    /// routinely open with an exit event whose entry predates the trace.
    pub fn pop_attribute(&self, t: Timestamp, quark: Quark) -> Result<()> {
        let depth = match self.query_ongoing_value(quark)? {
            StateValue::Null => return Ok(()),
            other => other.unbox_int()?,
        };
        if depth == 0 {
            return Ok(());
        }
        debug_assert!(depth > 0, "negative stack depth on quark {quark}");
        let sub_quark = self.get_quark_relative(quark, &[&depth.to_string()])?;
        self.modify_attribute(t, StateValue::Int32(depth - 1), quark)?;
        self.remove_attribute(t, sub_quark)
    }

    /// Set `quark` and every attribute below it to null at `t`.
    pub fn remove_attribute(&self, t: Timestamp, quark: Quark) -> Result<()> {
        self.attributes.read().validate(quark)?;
        let descendants = self.attributes.read().sub_attributes(quark, true)?;
        for child in descendants {
            self.modify_attribute(t, StateValue::Null, child)?;
        }
        self.modify_attribute(t, StateValue::Null, quark)
    }

    // ========================================================================
    // Ongoing-state queries
    // ========================================================================

    /// Current (transient) value of `quark`. Never touches the disk.
    pub fn query_ongoing_value(&self, quark: Quark) -> Result<StateValue> {
        self.attributes.read().validate(quark)?;
        Ok(self.transient.read().ongoing_value(quark))
    }

    /// Overwrite the current value of `quark` without recording a state
    /// change. Only the ongoing state can be patched this way; past
    /// intervals are immutable once committed.
    pub fn update_ongoing_value(&self, quark: Quark, value: StateValue) -> Result<()> {
        self.attributes.read().validate(quark)?;
        self.transient.write().set_ongoing_value(quark, value)
    }

    // ========================================================================
    // Historical queries
    // ========================================================================

    /// Start time of the trace.
    pub fn get_start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Latest timestamp covered: the last seen state change while
    /// building, the trace end once closed.
    pub fn get_current_end_time(&self) -> Timestamp {
        self.backend
            .end_time()
            .max(self.transient.read().latest_time())
    }

    fn check_query_time(&self, t: Timestamp) -> Result<()> {
        let end = self.get_current_end_time();
        if t < self.start_time || t > end {
            return Err(StateError::TimeRange {
                t,
                start: self.start_time,
                end,
            });
        }
        Ok(())
    }

    /// The interval holding `quark`'s value at `t`, or `None` if the
    /// attribute had no value yet (implicit null).
    pub fn query_single_state(&self, t: Timestamp, quark: Quark) -> Result<Option<StateInterval>> {
        self.validate_query_quark(quark)?;
        self.check_query_time(t)?;
        let end = self.get_current_end_time();
        if let Some(iv) = self.transient.read().ongoing_interval(quark, t, end) {
            return Ok(Some(iv));
        }
        if t > self.backend.end_time() {
            // Open suffix with no transient entry covering t: the
            // attribute simply has no value there yet.
            return Ok(None);
        }
        self.backend.query_single(t, quark)
    }

    /// The value of every attribute at `t`, indexed by quark. `None`
    /// entries are attributes with no value at `t`.
    pub fn query_full_state(&self, t: Timestamp) -> Result<Vec<Option<StateInterval>>> {
        self.check_query_time(t)?;
        let mut stored = Vec::new();
        if t <= self.backend.end_time() {
            stored = self.backend.query_full(t)?;
        }
        // Read-only systems have no attribute tree, so size off the
        // stored quarks instead.
        let nb = self.get_nb_attributes().max(
            stored
                .iter()
                .map(|iv| iv.quark as usize + 1)
                .max()
                .unwrap_or(0),
        );
        let mut out: Vec<Option<StateInterval>> = vec![None; nb];
        for iv in stored {
            let idx = iv.quark as usize;
            out[idx] = Some(iv);
        }
        let end = self.get_current_end_time();
        let transient = self.transient.read();
        for (quark, slot) in out.iter_mut().enumerate() {
            if let Some(iv) = transient.ongoing_interval(quark as Quark, t, end) {
                *slot = Some(iv);
            }
        }
        Ok(out)
    }

    /// All intervals of `quark` intersecting `[from, to]`, in time order,
    /// including the ongoing one if it reaches into the window.
    pub fn query_history_range(
        &self,
        quark: Quark,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<StateInterval>> {
        self.validate_query_quark(quark)?;
        if from > to {
            return Err(StateError::TimeRange {
                t: from,
                start: self.start_time,
                end: to,
            });
        }
        self.check_query_time(from)?;
        self.check_query_time(to)?;

        let mut out = Vec::new();
        let backend_end = self.backend.end_time();
        if from <= backend_end {
            out = self
                .backend
                .query_range(quark, from, to.min(backend_end))?;
        }
        let end = self.get_current_end_time();
        let transient = self.transient.read();
        if let Some(ongoing) = transient.ongoing_interval(quark, to.min(end), end) {
            if out.last().map_or(true, |last| last.end < ongoing.start) {
                out.push(ongoing);
            }
        }
        Ok(out)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close every open interval at `end_ts` and flush the history to
    /// stable storage. Wakes anyone blocked in
    /// [`StateSystem::wait_until_built`].
    pub fn close_history(&self, end_ts: Timestamp) -> Result<()> {
        debug!(end_ts, attributes = self.get_nb_attributes(), "closing history");
        self.transient
            .write()
            .close(self.backend.as_ref(), end_ts)?;
        self.backend.finish(end_ts)?;
        let mut built = self.built.lock();
        *built = true;
        self.built_cv.notify_all();
        Ok(())
    }

    /// Block until the history is fully built and flushed. Readers that
    /// need read-your-writes across threads call this first.
    pub fn wait_until_built(&self) {
        let mut built = self.built.lock();
        while !*built {
            self.built_cv.wait(&mut built);
        }
    }
}
