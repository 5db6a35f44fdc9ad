//! Core types for the tracehist state-history engine
//!
//! This crate defines the fundamental types shared by every layer:
//! - [`StateValue`]: tagged, immutable scalar carried in intervals
//! - [`StateInterval`]: closed time range + quark + value
//! - [`StateError`]: canonical error type for all engine operations
//! - [`StateHistoryBackend`]: the trait the persistent interval store
//!   implements and the state system consumes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod errors;
pub mod interval;
pub mod types;
pub mod value;

pub use backend::{DiscardBackend, StateHistoryBackend};
pub use errors::{Result, StateError};
pub use interval::StateInterval;
pub use types::{Quark, Timestamp, PATH_SEPARATOR, ROOT_QUARK};
pub use value::{StateValue, StateValueType};
