//! Convenient imports for Tracehist.
//!
//! Re-exports the types most programs need so a single import suffices:
//!
//! ```ignore
//! use tracehist::prelude::*;
//!
//! let ss = StateSystem::without_history(0);
//! let q = ss.get_quark_absolute_and_add(&["Threads", "42", "Status"])?;
//! ```

// Façade
pub use tracehist_engine::{StateSystem, MAX_STACK_DEPTH};

// Error handling
pub use tracehist_core::{Result, StateError};

// Values and intervals
pub use tracehist_core::{StateInterval, StateValue, StateValueType};

// Quarks and time
pub use tracehist_core::{Quark, Timestamp, ROOT_QUARK};

// Backends
pub use tracehist_core::{DiscardBackend, StateHistoryBackend};
pub use tracehist_storage::{HistoryTree, HistoryTreeConfig};

// Ingestion
pub use tracehist_engine::{CancelToken, IngestStats, IngestionDriver, ProgressSink, StateProvider};
