//! History-tree nodes
//!
//! A node is a fixed-size disk block holding a header, interval records
//! growing from the front, and a string section growing from the back. The
//! free region in the middle shrinks from both ends; a node is full when
//! an incoming record (plus its string payload) no longer fits.
//!
//! CORE nodes additionally carry a child table. Space for the full
//! `max_children` table is reserved up front so that adding a child can
//! never invalidate records already accepted.

use crate::format::{
    payload_size, string_section_size, value_tag, CHILD_ENTRY_SIZE, NODE_HEADER_SIZE, NO_NODE,
    RECORD_BASE_SIZE, TAG_DOUBLE, TAG_INT32, TAG_INT64, TAG_NULL, TAG_STR,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use std::io::Cursor;
use tracehist_core::{Quark, Result, StateError, StateInterval, StateValue, Timestamp};

/// Node kind, as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Internal node: carries a child table (and, like every node,
    /// intervals that span its children's boundaries).
    Core,
    /// Terminal node: intervals only.
    Leaf,
}

/// One entry of a CORE node's child table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEntry {
    /// Sequence number of the child node.
    pub seq: u32,
    /// Start of the child's time window. Windows of siblings are disjoint
    /// and sorted, so "the child containing `t`" is the one with the
    /// largest `start <= t`.
    pub start: Timestamp,
}

/// In-memory history-tree node.
#[derive(Debug)]
pub struct HtNode {
    kind: NodeKind,
    seq: u32,
    parent_seq: u32,
    start: Timestamp,
    /// Largest interval end seen while open; the final window end once
    /// sealed.
    end: Timestamp,
    is_done: bool,
    children: Vec<ChildEntry>,
    intervals: Vec<StateInterval>,
    record_bytes: usize,
    string_bytes: usize,
    block_size: usize,
    max_children: usize,
}

impl HtNode {
    /// Open a fresh leaf node starting at `start`.
    pub fn new_leaf(
        seq: u32,
        parent_seq: u32,
        start: Timestamp,
        block_size: usize,
        max_children: usize,
    ) -> Self {
        Self::new(NodeKind::Leaf, seq, parent_seq, start, block_size, max_children)
    }

    /// Open a fresh CORE node starting at `start`.
    pub fn new_core(
        seq: u32,
        parent_seq: u32,
        start: Timestamp,
        block_size: usize,
        max_children: usize,
    ) -> Self {
        Self::new(NodeKind::Core, seq, parent_seq, start, block_size, max_children)
    }

    fn new(
        kind: NodeKind,
        seq: u32,
        parent_seq: u32,
        start: Timestamp,
        block_size: usize,
        max_children: usize,
    ) -> Self {
        HtNode {
            kind,
            seq,
            parent_seq,
            start,
            end: start,
            is_done: false,
            children: Vec::new(),
            intervals: Vec::new(),
            record_bytes: 0,
            string_bytes: 0,
            block_size,
            max_children,
        }
    }

    /// Node kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Whether this is a leaf node.
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Sequence number of this node.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Sequence number of the parent, [`NO_NODE`] for the root.
    pub fn parent_seq(&self) -> u32 {
        self.parent_seq
    }

    /// Reparent this node (used when a new root adopts the old one).
    pub fn set_parent_seq(&mut self, parent_seq: u32) {
        self.parent_seq = parent_seq;
    }

    /// Start of this node's time window.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// End of this node's time window (grows while the node is open).
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Whether the node has been sealed.
    pub fn is_done(&self) -> bool {
        self.is_done
    }

    /// Number of interval records held.
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// Child table (empty for leaves).
    pub fn children(&self) -> &[ChildEntry] {
        &self.children
    }

    /// Whether another child entry can be added.
    pub fn has_child_room(&self) -> bool {
        self.kind == NodeKind::Core && self.children.len() < self.max_children
    }

    /// Register a child. Callers must have checked [`Self::has_child_room`].
    pub fn add_child(&mut self, entry: ChildEntry) {
        debug_assert!(self.kind == NodeKind::Core);
        debug_assert!(self.children.len() < self.max_children);
        debug_assert!(
            self.children.last().map_or(true, |c| c.start <= entry.start),
            "child windows must be appended in time order"
        );
        self.children.push(entry);
    }

    /// The child whose window contains `t`: largest `start <= t`, if any.
    pub fn child_for(&self, t: Timestamp) -> Option<u32> {
        self.children
            .iter()
            .rev()
            .find(|c| c.start <= t)
            .map(|c| c.seq)
    }

    /// Children whose windows intersect `[from, to]`. A child's window
    /// runs from its start to the next sibling's start (exclusive), the
    /// last one up to this node's end.
    pub fn children_in_range(&self, from: Timestamp, to: Timestamp) -> Vec<u32> {
        let mut out = Vec::new();
        for (i, c) in self.children.iter().enumerate() {
            let window_end = match self.children.get(i + 1) {
                Some(next) => next.start - 1,
                None => self.end,
            };
            if c.start <= to && window_end >= from {
                out.push(c.seq);
            }
        }
        out
    }

    fn reserved_bytes(&self) -> usize {
        match self.kind {
            NodeKind::Core => NODE_HEADER_SIZE + 4 + self.max_children * CHILD_ENTRY_SIZE,
            NodeKind::Leaf => NODE_HEADER_SIZE,
        }
    }

    /// Free bytes between the record section and the string section.
    pub fn free_space(&self) -> usize {
        self.block_size - self.reserved_bytes() - self.record_bytes - self.string_bytes
    }

    /// Total bytes `interval` would consume in this node.
    pub fn size_of(interval: &StateInterval) -> usize {
        RECORD_BASE_SIZE + payload_size(&interval.value) + string_section_size(&interval.value)
    }

    /// Append an interval if it fits. Returns `false` when the node is
    /// full; the caller then splits the branch.
    pub fn try_append(&mut self, interval: StateInterval) -> bool {
        if Self::size_of(&interval) > self.free_space() {
            return false;
        }
        self.record_bytes += RECORD_BASE_SIZE + payload_size(&interval.value);
        self.string_bytes += string_section_size(&interval.value);
        if interval.end > self.end {
            self.end = interval.end;
        }
        self.intervals.push(interval);
        true
    }

    /// Seal the node: fix its window end and mark it done.
    pub fn seal(&mut self, end: Timestamp) {
        debug_assert!(!self.is_done, "sealing a sealed node");
        self.end = end.max(self.end);
        self.is_done = true;
    }

    /// The record for `quark` containing `t`, if this node holds one.
    pub fn scan_single(&self, t: Timestamp, quark: Quark) -> Option<&StateInterval> {
        self.intervals
            .iter()
            .find(|iv| iv.quark == quark && iv.contains(t))
    }

    /// Collect every record containing `t` into `out`, keyed by quark.
    /// Later records supersede earlier ones.
    pub fn scan_full(&self, t: Timestamp, out: &mut FxHashMap<Quark, StateInterval>) {
        for iv in &self.intervals {
            if iv.contains(t) {
                out.insert(iv.quark, iv.clone());
            }
        }
    }

    /// Collect records for `quark` intersecting `[from, to]` into `out`.
    pub fn scan_range(
        &self,
        quark: Quark,
        from: Timestamp,
        to: Timestamp,
        out: &mut Vec<StateInterval>,
    ) {
        for iv in &self.intervals {
            if iv.quark == quark && iv.intersects(from, to) {
                out.push(iv.clone());
            }
        }
    }

    // ========================================================================
    // Block codec
    // ========================================================================

    /// Serialize into a `block_size` byte block.
    pub fn write_block(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.block_size];
        let string_section = self.block_size - self.string_bytes;

        {
            let mut cur = Cursor::new(&mut buf[..]);
            cur.write_u8(match self.kind {
                NodeKind::Core => 0,
                NodeKind::Leaf => 1,
            })?;
            cur.write_u8(u8::from(self.is_done))?;
            cur.write_u16::<LittleEndian>(0)?; // padding
            cur.write_u32::<LittleEndian>(self.seq)?;
            cur.write_u32::<LittleEndian>(self.parent_seq)?;
            cur.write_i64::<LittleEndian>(self.start)?;
            cur.write_i64::<LittleEndian>(self.end)?;
            cur.write_u32::<LittleEndian>(self.intervals.len() as u32)?;
            cur.write_u32::<LittleEndian>(string_section as u32)?;

            if self.kind == NodeKind::Core {
                cur.write_u32::<LittleEndian>(self.children.len() as u32)?;
                for c in &self.children {
                    cur.write_u32::<LittleEndian>(c.seq)?;
                    cur.write_i64::<LittleEndian>(c.start)?;
                }
            }

            // Records forward, string blobs packed at the back in record
            // order. The record stores the blob's section-relative offset.
            let mut string_cursor = 0usize;
            for iv in &self.intervals {
                cur.write_i64::<LittleEndian>(iv.start)?;
                cur.write_i64::<LittleEndian>(iv.end)?;
                cur.write_i32::<LittleEndian>(iv.quark)?;
                cur.write_u8(value_tag(&iv.value))?;
                match &iv.value {
                    StateValue::Null => {}
                    StateValue::Int32(v) => cur.write_i32::<LittleEndian>(*v)?,
                    StateValue::Int64(v) => cur.write_i64::<LittleEndian>(*v)?,
                    StateValue::Double(v) => cur.write_f64::<LittleEndian>(*v)?,
                    StateValue::Str(s) => {
                        cur.write_u32::<LittleEndian>(string_cursor as u32)?;
                        string_cursor += 4 + s.len();
                    }
                }
            }
            debug_assert!(cur.position() as usize <= string_section);
        }

        // Second pass for the string section itself.
        let mut pos = string_section;
        for iv in &self.intervals {
            if let StateValue::Str(s) = &iv.value {
                buf[pos..pos + 4].copy_from_slice(&(s.len() as u32).to_le_bytes());
                pos += 4;
                buf[pos..pos + s.len()].copy_from_slice(s.as_bytes());
                pos += s.len();
            }
        }
        debug_assert_eq!(pos, self.block_size);

        Ok(buf)
    }

    /// Decode a node from a raw block.
    pub fn read_block(buf: &[u8], max_children: usize) -> Result<Self> {
        let block_size = buf.len();
        let mut cur = Cursor::new(buf);

        let kind = match cur.read_u8()? {
            0 => NodeKind::Core,
            1 => NodeKind::Leaf,
            other => {
                return Err(StateError::Format(format!("unknown node kind {other}")));
            }
        };
        let is_done = cur.read_u8()? != 0;
        let _padding = cur.read_u16::<LittleEndian>()?;
        let seq = cur.read_u32::<LittleEndian>()?;
        let parent_seq = cur.read_u32::<LittleEndian>()?;
        let start = cur.read_i64::<LittleEndian>()?;
        let end = cur.read_i64::<LittleEndian>()?;
        let interval_count = cur.read_u32::<LittleEndian>()? as usize;
        let string_section = cur.read_u32::<LittleEndian>()? as usize;
        if string_section > block_size {
            return Err(StateError::format("string section offset out of bounds"));
        }

        let mut children = Vec::new();
        if kind == NodeKind::Core {
            let child_count = cur.read_u32::<LittleEndian>()? as usize;
            if child_count > max_children {
                return Err(StateError::Format(format!(
                    "node {seq} has {child_count} children (max {max_children})"
                )));
            }
            for _ in 0..child_count {
                let child_seq = cur.read_u32::<LittleEndian>()?;
                let child_start = cur.read_i64::<LittleEndian>()?;
                children.push(ChildEntry {
                    seq: child_seq,
                    start: child_start,
                });
            }
        }

        let mut intervals = Vec::with_capacity(interval_count);
        let mut record_bytes = 0usize;
        let mut string_bytes = 0usize;
        for _ in 0..interval_count {
            let iv_start = cur.read_i64::<LittleEndian>()?;
            let iv_end = cur.read_i64::<LittleEndian>()?;
            let quark = cur.read_i32::<LittleEndian>()?;
            let tag = cur.read_u8()?;
            let value = match tag {
                TAG_NULL => StateValue::Null,
                TAG_INT32 => StateValue::Int32(cur.read_i32::<LittleEndian>()?),
                TAG_INT64 => StateValue::Int64(cur.read_i64::<LittleEndian>()?),
                TAG_DOUBLE => StateValue::Double(cur.read_f64::<LittleEndian>()?),
                TAG_STR => {
                    let offset = cur.read_u32::<LittleEndian>()? as usize;
                    let at = string_section + offset;
                    if at + 4 > block_size {
                        return Err(StateError::format("string reference out of bounds"));
                    }
                    let len =
                        u32::from_le_bytes(buf[at..at + 4].try_into().expect("sized slice"))
                            as usize;
                    if at + 4 + len > block_size {
                        return Err(StateError::format("string blob out of bounds"));
                    }
                    let s = std::str::from_utf8(&buf[at + 4..at + 4 + len])
                        .map_err(|_| StateError::format("string blob is not UTF-8"))?;
                    StateValue::Str(s.to_string())
                }
                other => {
                    return Err(StateError::Format(format!("unknown value tag {other}")));
                }
            };
            if iv_start > iv_end {
                return Err(StateError::Format(format!(
                    "corrupt record: start {iv_start} after end {iv_end}"
                )));
            }
            record_bytes += RECORD_BASE_SIZE + payload_size(&value);
            string_bytes += string_section_size(&value);
            intervals.push(StateInterval {
                start: iv_start,
                end: iv_end,
                quark,
                value,
            });
        }

        Ok(HtNode {
            kind,
            seq,
            parent_seq,
            start,
            end,
            is_done,
            children,
            intervals,
            record_bytes,
            string_bytes,
            block_size,
            max_children,
        })
    }
}
