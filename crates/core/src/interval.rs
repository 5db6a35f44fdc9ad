//! State intervals
//!
//! A [`StateInterval`] records that one attribute held one value over a
//! closed time range. Intervals for the same quark partition the timeline:
//! at most one stored interval contains any timestamp, and `Null` implicitly
//! fills the gap before the first write.

use crate::types::{Quark, Timestamp};
use crate::value::StateValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A closed time range `[start, end]` carrying one value for one attribute.
///
/// Invariant: `start <= end`. Once emitted by the transient state an
/// interval is never mutated; queries materialize fresh copies for callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateInterval {
    /// First timestamp covered, inclusive.
    pub start: Timestamp,
    /// Last timestamp covered, inclusive.
    pub end: Timestamp,
    /// Attribute this interval belongs to.
    pub quark: Quark,
    /// Value held over the whole range.
    pub value: StateValue,
}

impl StateInterval {
    /// Build an interval. Panics in debug builds if `start > end`; the
    /// engine never constructs such an interval on a well-ordered trace.
    pub fn new(start: Timestamp, end: Timestamp, quark: Quark, value: StateValue) -> Self {
        debug_assert!(start <= end, "interval start {start} after end {end}");
        StateInterval {
            start,
            end,
            quark,
            value,
        }
    }

    /// Whether `t` falls inside this interval (both bounds inclusive).
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.end
    }

    /// Whether this interval intersects the window `[from, to]`.
    pub fn intersects(&self, from: Timestamp, to: Timestamp) -> bool {
        self.start <= to && self.end >= from
    }
}

impl fmt::Display for StateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] q{} = {}",
            self.start, self.end, self.quark, self.value
        )
    }
}
