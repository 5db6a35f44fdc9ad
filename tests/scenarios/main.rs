//! End-to-End Scenario Test Suite
//!
//! Builds real state systems over real on-disk history trees and verifies
//! the engine's user-visible guarantees: interval boundaries, stack
//! discipline, coalescing, persistence across reopen, and the consistency
//! properties that hold for every quark and timestamp.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all scenario tests
//! cargo test --test scenarios
//!
//! # Run the persistence scenarios only
//! cargo test --test scenarios end_to_end::
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tracehist::{HistoryTree, HistoryTreeConfig, StateSystem, StateValue};

// Test modules
pub mod end_to_end;
pub mod ingestion;
pub mod properties;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

/// A state system over a freshly created on-disk history tree.
///
/// Returns the temp dir too: dropping it deletes the file, so callers keep
/// it alive for the duration of the test.
pub fn create_disk_system(trace_start: i64) -> (TempDir, PathBuf, Arc<StateSystem>) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("history.ht");
    let tree =
        HistoryTree::create(HistoryTreeConfig::new(&path, trace_start)).expect("create tree");
    let system = Arc::new(StateSystem::new(Arc::new(tree)));
    (dir, path, system)
}

/// Same, with a small block size and fan-out so even modest event counts
/// exercise node sealing, branch splits and root growth.
pub fn create_small_block_system(trace_start: i64) -> (TempDir, PathBuf, Arc<StateSystem>) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("history.ht");
    let config = HistoryTreeConfig::new(&path, trace_start)
        .with_block_size(512)
        .with_max_children(4);
    let tree = HistoryTree::create(config).expect("create tree");
    let system = Arc::new(StateSystem::new(Arc::new(tree)));
    (dir, path, system)
}

/// Reopen a built history file as a read-only state system.
pub fn reopen(path: &PathBuf) -> Arc<StateSystem> {
    let tree = HistoryTree::open(path).expect("reopen tree");
    Arc::new(StateSystem::from_existing(Arc::new(tree)))
}

/// The value stored at `(t, quark)`, flattening the interval away.
/// `StateValue::Null` covers both explicit nulls and "no interval".
pub fn value_at(system: &StateSystem, t: i64, quark: i32) -> StateValue {
    system
        .query_single_state(t, quark)
        .expect("query in range")
        .map_or(StateValue::Null, |iv| iv.value)
}
