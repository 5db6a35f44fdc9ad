//! State values
//!
//! This module defines [`StateValue`], the tagged scalar carried in every
//! interval. The set of variants is closed and frozen: the on-disk format
//! assigns each variant a stable wire tag, so adding or reordering variants
//! is a format version bump.
//!
//! ## Equality rules
//!
//! - Different variants are never equal (no coercion): `Int32(1) != Int64(1)`
//! - `Null` only equals `Null`
//! - `Double` uses IEEE-754 equality

use crate::errors::{Result, StateError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of a [`StateValue`], without its payload.
///
/// The numeric wire tag for each variant is fixed by the history-file
/// format (see `tracehist-storage`); this enum deliberately does not expose
/// it. Use [`StateValueType::name`] for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateValueType {
    /// Absence of a value.
    Null,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit IEEE-754 floating point.
    Double,
    /// UTF-8 string.
    Str,
}

impl StateValueType {
    /// Human-readable variant name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            StateValueType::Null => "Null",
            StateValueType::Int32 => "Int32",
            StateValueType::Int64 => "Int64",
            StateValueType::Double => "Double",
            StateValueType::Str => "Str",
        }
    }
}

/// Tagged, immutable scalar assigned to an attribute over an interval.
///
/// `Null` is the implicit value of any attribute that was never written.
/// Values are cheap to clone (strings aside) and safe to share without
/// synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateValue {
    /// Absence of a value; also what `remove_attribute` writes.
    Null,
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit IEEE-754 floating point.
    Double(f64),
    /// UTF-8 string.
    Str(String),
}

impl StateValue {
    /// The null value.
    pub fn null() -> Self {
        StateValue::Null
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    /// The type of this value.
    pub fn value_type(&self) -> StateValueType {
        match self {
            StateValue::Null => StateValueType::Null,
            StateValue::Int32(_) => StateValueType::Int32,
            StateValue::Int64(_) => StateValueType::Int64,
            StateValue::Double(_) => StateValueType::Double,
            StateValue::Str(_) => StateValueType::Str,
        }
    }

    /// Unbox as `i32`.
    ///
    /// Fails with [`StateError::ValueType`] on any other variant.
    pub fn unbox_int(&self) -> Result<i32> {
        match self {
            StateValue::Int32(v) => Ok(*v),
            other => Err(other.type_error("Int32")),
        }
    }

    /// Unbox as `i64`.
    pub fn unbox_long(&self) -> Result<i64> {
        match self {
            StateValue::Int64(v) => Ok(*v),
            other => Err(other.type_error("Int64")),
        }
    }

    /// Unbox as `f64`.
    pub fn unbox_double(&self) -> Result<f64> {
        match self {
            StateValue::Double(v) => Ok(*v),
            other => Err(other.type_error("Double")),
        }
    }

    /// Unbox as a string slice.
    pub fn unbox_str(&self) -> Result<&str> {
        match self {
            StateValue::Str(v) => Ok(v.as_str()),
            other => Err(other.type_error("Str")),
        }
    }

    fn type_error(&self, expected: &'static str) -> StateError {
        StateError::ValueType {
            expected,
            found: self.value_type().name(),
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Null => write!(f, "null"),
            StateValue::Int32(v) => write!(f, "{v}"),
            StateValue::Int64(v) => write!(f, "{v}"),
            StateValue::Double(v) => write!(f, "{v}"),
            StateValue::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i32> for StateValue {
    fn from(v: i32) -> Self {
        StateValue::Int32(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Int64(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Double(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Str(v.to_string())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::Str(v)
    }
}
