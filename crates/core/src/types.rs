//! Scalar identifier and time types
//!
//! Quarks are the dense integer handles the attribute tree hands out for
//! paths; timestamps are opaque trace time units (the engine only compares
//! and offsets them, it never interprets the unit).

/// Dense integer identifier for an attribute path.
///
/// Quarks are assigned at first sight of a path, are stable for the
/// lifetime of the state system, and form `0..N` with no gaps. Signed so
/// that [`ROOT_QUARK`] can act as the relative-lookup base for the root.
pub type Quark = i32;

/// Pseudo-quark designating the root of the attribute tree.
///
/// Only valid as the base of relative lookups; the root itself carries no
/// name and no value.
pub const ROOT_QUARK: Quark = -1;

/// Trace timestamp, in whatever unit the trace uses.
pub type Timestamp = i64;

/// Separator used when joining attribute names into a full path.
pub const PATH_SEPARATOR: char = '/';
