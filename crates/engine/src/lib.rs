//! State system engine for tracehist
//!
//! This crate ties the attribute namespace, the in-memory transient state
//! and a history backend together behind the [`StateSystem`] façade, and
//! provides the ingestion driver that feeds it from a state provider.
//!
//! - [`attribute`]: path-to-quark interning and tree topology
//! - [`transient`]: per-quark open intervals and the write barrier
//! - [`system`]: the public state-system API
//! - [`ingest`]: provider trait, cancellation, ingestion driver

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod ingest;
pub mod system;
pub mod transient;

pub use attribute::AttributeTree;
pub use ingest::{CancelToken, IngestStats, IngestionDriver, ProgressSink, StateProvider};
pub use system::{StateSystem, MAX_STACK_DEPTH};
pub use transient::TransientState;
