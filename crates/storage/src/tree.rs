//! The history tree
//!
//! A disk-resident tree of fixed-size nodes partitioning trace time into
//! ranges. Construction is append-only and single-writer: exactly one
//! branch of the tree (root down to one leaf, the "latest branch") is open
//! at any time; every other node is sealed on disk and immutable. Readers
//! may query concurrently with the writer: they hit the latest branch for
//! still-open nodes and the block cache (or one block read) for sealed
//! ones.
//!
//! ## Insertion
//!
//! Incoming intervals arrive with non-decreasing end times. An interval is
//! appended to the deepest open node whose window start is `<=` the
//! interval's start; intervals that reach back past a leaf boundary land
//! in an ancestor CORE node. When the chosen node is full the branch below
//! it is sealed at the current tree end and a fresh sibling branch is
//! opened; when the root itself runs out of child slots a new root adopts
//! it and the tree grows one level.
//!
//! New sibling branches start at `max(interval.start, tree_end + 1)`,
//! which keeps sibling windows disjoint and the query descent
//! unambiguous.

use crate::cache::{NodeCache, SharedNode};
use crate::format::{
    FileHeader, HistoryTreeConfig, CHILD_ENTRY_SIZE, DEFAULT_CACHE_BLOCKS, FILE_HEADER_FIELDS,
    NODE_HEADER_SIZE, NO_NODE, RECORD_BASE_SIZE,
};
use crate::node::{ChildEntry, HtNode};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tracehist_core::{
    Quark, Result, StateError, StateHistoryBackend, StateInterval, StateValue, Timestamp,
};
use tracing::{debug, info};

/// File handles of a history tree: one writer (absent for files opened
/// read-only) and one reader. Both are released on drop.
#[derive(Debug)]
struct HtIo {
    writer: Option<Mutex<File>>,
    reader: Mutex<File>,
    block_size: u64,
}

impl HtIo {
    fn create(path: &Path, block_size: u32) -> Result<Self> {
        let writer = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let reader = File::open(path)?;
        Ok(HtIo {
            writer: Some(Mutex::new(writer)),
            reader: Mutex::new(reader),
            block_size: u64::from(block_size),
        })
    }

    fn open(path: &Path, block_size: u32) -> Result<Self> {
        let reader = File::open(path)?;
        Ok(HtIo {
            writer: None,
            reader: Mutex::new(reader),
            block_size: u64::from(block_size),
        })
    }

    fn node_offset(&self, seq: u32) -> u64 {
        self.block_size * (1 + u64::from(seq))
    }

    fn write_block(&self, seq: u32, block: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| StateError::format("history file is read-only"))?;
        let mut file = writer.lock();
        file.seek(SeekFrom::Start(self.node_offset(seq)))?;
        file.write_all(block)?;
        Ok(())
    }

    fn read_block(&self, seq: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.block_size as usize];
        let mut file = self.reader.lock();
        file.seek(SeekFrom::Start(self.node_offset(seq)))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_header(&self, header: &FileHeader) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| StateError::format("history file is read-only"))?;
        let mut file = writer.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.encode())?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer.lock().sync_all()?;
        }
        Ok(())
    }
}

/// Persistent interval store organized as a tree of fixed-size nodes.
///
/// Implements [`StateHistoryBackend`]; see the module docs for the write
/// and read protocols.
#[derive(Debug)]
pub struct HistoryTree {
    config: HistoryTreeConfig,
    io: HtIo,
    /// Open path, root first. Doubles as the allocation lock: the writer
    /// holds the write lock across an insertion, readers take the read
    /// lock to find still-open nodes.
    latest_branch: RwLock<Vec<SharedNode>>,
    cache: Mutex<NodeCache>,
    node_count: AtomicU32,
    root_seq: AtomicU32,
    tree_end: AtomicI64,
    finished: AtomicBool,
}

impl HistoryTree {
    /// Create a new empty history file per `config`. The tree starts as a
    /// single open leaf; the header is written with an unset root so that
    /// an aborted build is rejected by [`HistoryTree::open`].
    pub fn create(config: HistoryTreeConfig) -> Result<Self> {
        let min_block = NODE_HEADER_SIZE
            + 4
            + config.max_children as usize * CHILD_ENTRY_SIZE
            + 2 * (RECORD_BASE_SIZE + 8);
        if (config.block_size as usize) < min_block {
            return Err(StateError::Format(format!(
                "block size {} too small for {} children (minimum {min_block})",
                config.block_size, config.max_children
            )));
        }

        let io = HtIo::create(&config.path, config.block_size)?;
        let root = HtNode::new_leaf(
            0,
            NO_NODE,
            config.trace_start,
            config.block_size as usize,
            config.max_children as usize,
        );
        let tree = HistoryTree {
            io,
            latest_branch: RwLock::new(vec![Arc::new(RwLock::new(root))]),
            cache: Mutex::new(NodeCache::new(
                config.cache_bytes,
                config.block_size as usize,
            )),
            node_count: AtomicU32::new(1),
            root_seq: AtomicU32::new(0),
            tree_end: AtomicI64::new(config.trace_start),
            finished: AtomicBool::new(false),
            config,
        };
        // Placeholder header: root_seq stays NO_NODE until finish().
        tree.io.write_header(&tree.header_with_root(NO_NODE))?;
        debug!(path = %tree.config.path.display(), "created history tree");
        Ok(tree)
    }

    /// Open a finished history file for querying.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut fields = [0u8; FILE_HEADER_FIELDS];
        {
            let mut file = File::open(path)?;
            file.read_exact(&mut fields)?;
        }
        let header = FileHeader::decode(&fields)?;
        if header.root_seq == NO_NODE {
            return Err(StateError::format(
                "history file was not closed cleanly (no root recorded)",
            ));
        }

        let config = HistoryTreeConfig {
            path: path.to_path_buf(),
            block_size: header.block_size,
            max_children: header.max_children,
            provider_version: header.provider_version,
            trace_start: header.trace_start,
            cache_bytes: (DEFAULT_CACHE_BLOCKS * header.block_size) as usize,
        };
        let io = HtIo::open(path, header.block_size)?;
        let tree = HistoryTree {
            io,
            latest_branch: RwLock::new(Vec::new()),
            cache: Mutex::new(NodeCache::new(
                config.cache_bytes,
                config.block_size as usize,
            )),
            node_count: AtomicU32::new(header.node_count),
            root_seq: AtomicU32::new(header.root_seq),
            tree_end: AtomicI64::new(header.trace_start),
            finished: AtomicBool::new(true),
            config,
        };
        // The root's window end is the trace end.
        let root = tree.get_node(header.root_seq)?;
        let end = root.read().end();
        tree.tree_end.store(end, Ordering::SeqCst);
        info!(
            path = %path.display(),
            nodes = header.node_count,
            end,
            "opened history tree"
        );
        Ok(tree)
    }

    /// Construction parameters (also available for reopened files, from
    /// the header).
    pub fn config(&self) -> &HistoryTreeConfig {
        &self.config
    }

    /// Provider version recorded in the header.
    pub fn provider_version(&self) -> u32 {
        self.config.provider_version
    }

    /// Number of nodes allocated so far.
    pub fn node_count(&self) -> u32 {
        self.node_count.load(Ordering::SeqCst)
    }

    fn header_with_root(&self, root_seq: u32) -> FileHeader {
        FileHeader {
            block_size: self.config.block_size,
            max_children: self.config.max_children,
            provider_version: self.config.provider_version,
            trace_start: self.config.trace_start,
            root_seq,
            node_count: self.node_count.load(Ordering::SeqCst),
        }
    }

    fn alloc_seq(&self) -> u32 {
        self.node_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Fetch a node: latest branch first, then cache, then one block read.
    fn get_node(&self, seq: u32) -> Result<SharedNode> {
        if seq >= self.node_count.load(Ordering::SeqCst) {
            return Err(StateError::Format(format!(
                "reference to nonexistent node {seq}"
            )));
        }
        {
            let branch = self.latest_branch.read();
            for node in branch.iter() {
                if node.read().seq() == seq {
                    return Ok(Arc::clone(node));
                }
            }
        }
        if let Some(node) = self.cache.lock().get(seq) {
            return Ok(node);
        }
        let block = self.io.read_block(seq)?;
        let node = Arc::new(RwLock::new(HtNode::read_block(
            &block,
            self.config.max_children as usize,
        )?));
        self.cache.lock().insert(seq, Arc::clone(&node));
        Ok(node)
    }

    fn seal_and_store(&self, node: &SharedNode, end: Timestamp) -> Result<()> {
        let block = {
            let mut guard = node.write();
            guard.seal(end);
            guard.write_block()?
        };
        let seq = node.read().seq();
        self.io.write_block(seq, &block)?;
        self.cache.lock().insert(seq, Arc::clone(node));
        Ok(())
    }

    /// Seal the branch below (and including) `full_idx` and open a new
    /// sibling branch of the same depth. Grows a new root if the current
    /// root has no child slot left.
    fn split_branch(
        &self,
        branch: &mut Vec<SharedNode>,
        full_idx: usize,
        trigger_start: Timestamp,
    ) -> Result<()> {
        let split_end = self.tree_end.load(Ordering::SeqCst);
        let new_start = trigger_start.max(split_end + 1);
        let depth = branch.len();

        // Highest level that must be replaced: walk up while the parent
        // has no room for another child.
        let mut top = full_idx;
        while top > 0 && !branch[top - 1].read().has_child_room() {
            top -= 1;
        }

        if top == 0 {
            // Root is full (of children or records): grow the tree by one
            // level. The new root spans the whole trace.
            let new_root_seq = self.alloc_seq();
            let (old_root_seq, old_root_start) = {
                let mut old_root = branch[0].write();
                old_root.set_parent_seq(new_root_seq);
                (old_root.seq(), old_root.start())
            };
            for node in branch.iter() {
                self.seal_and_store(node, split_end)?;
            }

            let mut new_root = HtNode::new_core(
                new_root_seq,
                NO_NODE,
                self.config.trace_start,
                self.config.block_size as usize,
                self.config.max_children as usize,
            );
            new_root.add_child(ChildEntry {
                seq: old_root_seq,
                start: old_root_start,
            });

            branch.clear();
            branch.push(Arc::new(RwLock::new(new_root)));
            // Fresh chain of CORE nodes plus one leaf, one level deeper
            // than before.
            self.push_new_chain(branch, depth, new_start);
            self.root_seq.store(new_root_seq, Ordering::SeqCst);
            debug!(root = new_root_seq, depth = depth + 1, "grew new root");
        } else {
            for node in branch.iter().skip(top) {
                self.seal_and_store(node, split_end)?;
            }
            branch.truncate(top);
            self.push_new_chain(branch, depth - top, new_start);
            debug!(levels = depth - top, start = new_start, "opened sibling branch");
        }
        Ok(())
    }

    /// Append `levels` fresh open nodes under the current last branch
    /// node: CORE nodes, then a leaf at the bottom.
    fn push_new_chain(&self, branch: &mut Vec<SharedNode>, levels: usize, start: Timestamp) {
        for level in 0..levels {
            let seq = self.alloc_seq();
            let parent = branch
                .last()
                .expect("branch always holds at least the root");
            let parent_seq = parent.read().seq();
            parent.write().add_child(ChildEntry { seq, start });

            let node = if level == levels - 1 {
                HtNode::new_leaf(
                    seq,
                    parent_seq,
                    start,
                    self.config.block_size as usize,
                    self.config.max_children as usize,
                )
            } else {
                HtNode::new_core(
                    seq,
                    parent_seq,
                    start,
                    self.config.block_size as usize,
                    self.config.max_children as usize,
                )
            };
            branch.push(Arc::new(RwLock::new(node)));
        }
    }

    fn check_query_time(&self, t: Timestamp) -> Result<()> {
        let start = self.config.trace_start;
        let end = self.tree_end.load(Ordering::SeqCst);
        if t < start || t > end {
            return Err(StateError::TimeRange { t, start, end });
        }
        Ok(())
    }

    fn insert_interval(&self, interval: StateInterval) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(StateError::format("history tree is already closed"));
        }
        let start = self.config.trace_start;
        let end = self.tree_end.load(Ordering::SeqCst);
        if interval.start < start || interval.start > interval.end {
            return Err(StateError::TimeRange {
                t: interval.start,
                start,
                end,
            });
        }
        // Ends must arrive in non-decreasing order; sealed nodes cannot
        // take on an earlier end retroactively.
        if interval.end < end {
            return Err(StateError::TimeRange {
                t: interval.end,
                start,
                end,
            });
        }
        // A record that cannot fit even in an empty node would make the
        // split loop spin forever; refuse it outright.
        let capacity = self.config.block_size as usize
            - NODE_HEADER_SIZE
            - 4
            - self.config.max_children as usize * CHILD_ENTRY_SIZE;
        if HtNode::size_of(&interval) > capacity {
            return Err(StateError::Format(format!(
                "interval record ({} bytes) exceeds node capacity ({capacity} bytes)",
                HtNode::size_of(&interval)
            )));
        }

        let mut branch = self.latest_branch.write();
        let new_end = interval.end;
        loop {
            // Deepest open node whose window starts at or before the
            // interval; out-of-order input would force us above the root.
            let mut idx = branch.len() - 1;
            while branch[idx].read().start() > interval.start {
                if idx == 0 {
                    return Err(StateError::TimeRange {
                        t: interval.start,
                        start,
                        end: self.tree_end.load(Ordering::SeqCst),
                    });
                }
                idx -= 1;
            }
            if branch[idx].write().try_append(interval.clone()) {
                break;
            }
            self.split_branch(&mut branch, idx, interval.start)?;
        }
        self.tree_end.fetch_max(new_end, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self, end_ts: Timestamp) -> Result<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut branch = self.latest_branch.write();
        let end = end_ts.max(self.tree_end.load(Ordering::SeqCst));
        for node in branch.iter() {
            self.seal_and_store(node, end)?;
        }
        branch.clear();
        self.tree_end.store(end, Ordering::SeqCst);
        self.io
            .write_header(&self.header_with_root(self.root_seq.load(Ordering::SeqCst)))?;
        self.io.sync()?;
        info!(
            nodes = self.node_count(),
            end,
            path = %self.config.path.display(),
            "history tree closed"
        );
        Ok(())
    }
}

impl StateHistoryBackend for HistoryTree {
    fn start_time(&self) -> Timestamp {
        self.config.trace_start
    }

    fn end_time(&self) -> Timestamp {
        self.tree_end.load(Ordering::SeqCst)
    }

    fn insert_past_state(
        &self,
        start: Timestamp,
        end: Timestamp,
        quark: Quark,
        value: StateValue,
    ) -> Result<()> {
        self.insert_interval(StateInterval {
            start,
            end,
            quark,
            value,
        })
    }

    fn finish(&self, end_ts: Timestamp) -> Result<()> {
        self.close(end_ts)
    }

    fn query_single(&self, t: Timestamp, quark: Quark) -> Result<Option<StateInterval>> {
        self.check_query_time(t)?;
        let mut seq = self.root_seq.load(Ordering::SeqCst);
        loop {
            let node = self.get_node(seq)?;
            let guard = node.read();
            if let Some(iv) = guard.scan_single(t, quark) {
                return Ok(Some(iv.clone()));
            }
            match guard.child_for(t) {
                Some(child) => seq = child,
                None => return Ok(None),
            }
        }
    }

    fn query_full(&self, t: Timestamp) -> Result<Vec<StateInterval>> {
        self.check_query_time(t)?;
        let mut found: FxHashMap<Quark, StateInterval> = FxHashMap::default();
        let mut seq = self.root_seq.load(Ordering::SeqCst);
        loop {
            let node = self.get_node(seq)?;
            let guard = node.read();
            guard.scan_full(t, &mut found);
            match guard.child_for(t) {
                Some(child) => seq = child,
                None => break,
            }
        }
        Ok(found.into_values().collect())
    }

    fn query_range(
        &self,
        quark: Quark,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<StateInterval>> {
        if from > to {
            return Err(StateError::TimeRange {
                t: from,
                start: self.config.trace_start,
                end: to,
            });
        }
        self.check_query_time(from)?;
        self.check_query_time(to)?;

        let mut out = Vec::new();
        let mut pending = vec![self.root_seq.load(Ordering::SeqCst)];
        while let Some(seq) = pending.pop() {
            let node = self.get_node(seq)?;
            let guard = node.read();
            guard.scan_range(quark, from, to, &mut out);
            pending.extend(guard.children_in_range(from, to));
        }
        out.sort_by_key(|iv| iv.start);
        Ok(out)
    }
}
