//! Canonical error type for the state-history engine
//!
//! Every fallible operation in the engine surfaces one of these variants.
//! Nothing is swallowed on the way up except the documented empty-stack
//! `pop_attribute`, which is a deliberate no-op.

use crate::types::{Quark, Timestamp};
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, StateError>;

/// All state-system errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Lookup of a path that does not exist (without `and_add`).
    #[error("attribute not found: {path}")]
    AttributeNotFound {
        /// The path or quark description that failed to resolve.
        path: String,
    },

    /// Unbox or arithmetic on a wrongly-typed state value.
    #[error("state value type mismatch: expected {expected}, found {found}")]
    ValueType {
        /// Variant the caller asked for.
        expected: &'static str,
        /// Variant actually stored.
        found: &'static str,
    },

    /// Query outside the trace range, or an out-of-order insertion.
    #[error("timestamp {t} outside valid range [{start}, {end}]")]
    TimeRange {
        /// Offending timestamp.
        t: Timestamp,
        /// Earliest valid timestamp.
        start: Timestamp,
        /// Latest valid timestamp.
        end: Timestamp,
    },

    /// Push past the maximum stack depth on a stack attribute.
    #[error("stack attribute {quark} exceeded maximum depth ({depth})")]
    StackOverflow {
        /// The stack attribute.
        quark: Quark,
        /// Depth the push would have reached.
        depth: i32,
    },

    /// Underlying I/O failure, including short reads.
    #[error("history backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupt or unsupported history file.
    #[error("invalid history file: {0}")]
    Format(String),

    /// Failure reported by the state provider during ingestion.
    #[error("state provider failed: {0}")]
    Provider(String),
}

impl StateError {
    /// Shorthand for an [`StateError::AttributeNotFound`] from path pieces.
    pub fn not_found(path: impl Into<String>) -> Self {
        StateError::AttributeNotFound { path: path.into() }
    }

    /// Shorthand for a [`StateError::Format`] error.
    pub fn format(reason: impl Into<String>) -> Self {
        StateError::Format(reason.into())
    }
}
