//! # Tracehist
//!
//! State-history engine for trace analysis.
//!
//! Tracehist models the evolving state of a traced system as an attribute
//! tree whose values change over time. State changes stream in once, in
//! timestamp order; every past value stays queryable afterwards through a
//! disk-resident interval store (the history tree), so a timeline view can
//! ask "what was attribute X at time T?" without replaying the trace.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tracehist::prelude::*;
//! use std::sync::Arc;
//!
//! // Build a history on disk
//! let tree = HistoryTree::create(HistoryTreeConfig::new("./trace.ht", 0))?;
//! let ss = StateSystem::new(Arc::new(tree));
//!
//! // Record state changes as events arrive
//! let q = ss.get_quark_absolute_and_add(&["CPUs", "0", "Status"])?;
//! ss.modify_attribute(100, StateValue::Int32(1), q)?;
//! ss.modify_attribute(250, StateValue::Int32(2), q)?;
//! ss.close_history(400)?;
//!
//! // Query any past time
//! let interval = ss.query_single_state(120, q)?;
//! ```
//!
//! ## Layers
//!
//! - [`StateSystem`] - the façade: quarks, mutations, queries
//! - [`HistoryTree`] - the on-disk interval store
//! - [`IngestionDriver`] / [`StateProvider`] - event-to-state translation
//! - [`DiscardBackend`] - current-state-only systems with no history

#![warn(missing_docs)]

pub mod prelude;

// Core types
pub use tracehist_core::{
    Quark, Result, StateError, StateHistoryBackend, StateInterval, StateValue, StateValueType,
    Timestamp, DiscardBackend, PATH_SEPARATOR, ROOT_QUARK,
};

// Engine
pub use tracehist_engine::{
    AttributeTree, CancelToken, IngestStats, IngestionDriver, ProgressSink, StateProvider,
    StateSystem, TransientState, MAX_STACK_DEPTH,
};

// Storage
pub use tracehist_storage::{HistoryTree, HistoryTreeConfig};
