//! Byte-bounded LRU cache of decoded nodes
//!
//! Sealed nodes are immutable, so the cache hands out shared references;
//! a hit avoids one block read. The bound is expressed in bytes (each
//! decoded node is accounted at one block) and eviction is LRU. Nodes on
//! the open path never pass through here: they live in the tree's latest
//! branch until sealed.

use crate::node::HtNode;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Shared handle to a node. Open-branch nodes are mutated under the write
/// lock by the single writer; sealed nodes are only ever read.
pub type SharedNode = Arc<RwLock<HtNode>>;

#[derive(Debug)]
struct CacheSlot {
    node: SharedNode,
    last_used: u64,
}

/// LRU cache of decoded history-tree nodes, bounded in bytes.
#[derive(Debug)]
pub struct NodeCache {
    slots: FxHashMap<u32, CacheSlot>,
    max_bytes: usize,
    node_bytes: usize,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl NodeCache {
    /// Cache bounded at `max_bytes`, accounting `node_bytes` (the block
    /// size) per resident node.
    pub fn new(max_bytes: usize, node_bytes: usize) -> Self {
        NodeCache {
            slots: FxHashMap::default(),
            max_bytes,
            node_bytes,
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a node, refreshing its recency on hit.
    pub fn get(&mut self, seq: u32) -> Option<SharedNode> {
        self.tick += 1;
        match self.slots.get_mut(&seq) {
            Some(slot) => {
                slot.last_used = self.tick;
                self.hits += 1;
                Some(Arc::clone(&slot.node))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a node, evicting least-recently-used entries if the byte
    /// bound would be exceeded.
    pub fn insert(&mut self, seq: u32, node: SharedNode) {
        while !self.slots.is_empty()
            && (self.slots.len() + 1) * self.node_bytes > self.max_bytes
        {
            self.evict_lru();
        }
        self.tick += 1;
        self.slots.insert(
            seq,
            CacheSlot {
                node,
                last_used: self.tick,
            },
        );
    }

    fn evict_lru(&mut self) {
        let victim = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(seq, _)| *seq);
        if let Some(seq) = victim {
            self.slots.remove(&seq);
        }
    }

    /// Number of resident nodes.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// (hits, misses) counters, for diagnostics.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
