//! History-tree storage backend for tracehist
//!
//! This crate implements the persistent interval store: a disk-resident
//! tree of fixed-size nodes optimized for range-stabbing queries.
//!
//! - [`format`]: on-disk byte layout (file header, node blocks, records)
//! - [`node`]: in-memory node representation and block codec
//! - [`cache`]: byte-bounded LRU of decoded nodes
//! - [`tree`]: the history tree itself, implementing
//!   [`tracehist_core::StateHistoryBackend`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod format;
pub mod node;
pub mod tree;

pub use format::HistoryTreeConfig;
pub use tree::HistoryTree;
