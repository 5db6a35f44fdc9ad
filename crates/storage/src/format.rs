//! On-disk byte format for history files
//!
//! A history file is a fixed-size header (padded to one block) followed by
//! a contiguous sequence of fixed-size node blocks numbered `0..M-1`. All
//! integers are little-endian.
//!
//! ## File header
//!
//! ```text
//! magic            [u8;4] = "HIST"
//! version          u32
//! block_size       u32
//! max_children     u32
//! provider_version u32
//! trace_start      i64
//! root_seq         u32
//! node_count       u32
//! (zero padding to block_size)
//! ```
//!
//! `root_seq` stays [`NO_NODE`] until a successful close; a reader that
//! finds it unset refuses the file, which is how an aborted build is
//! invalidated without any extra bookkeeping.
//!
//! ## Value wire tags
//!
//! The variant ordering is part of the format and frozen:
//! `Null=0, Int32=1, Int64=2, Double=3, Str=4`. String payloads are a
//! `u32` offset into the node's string section, pointing at a
//! `u32`-length-prefixed UTF-8 blob.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use std::path::PathBuf;
use tracehist_core::{Result, StateError, StateValue, Timestamp};

/// Magic bytes opening every history file.
pub const HISTORY_MAGIC: [u8; 4] = *b"HIST";

/// Current format version. Readers refuse anything else.
pub const FORMAT_VERSION: u32 = 1;

/// Default node block size: 64 KiB.
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;

/// Default maximum number of children per CORE node.
pub const DEFAULT_MAX_CHILDREN: u32 = 50;

/// Default node-cache bound, expressed in blocks (the cache itself is
/// bounded in bytes: this many times the block size).
pub const DEFAULT_CACHE_BLOCKS: u32 = 128;

/// Sentinel sequence number: "no node". Used as the parent of the root
/// and as the unset `root_seq` of an unfinished file.
pub const NO_NODE: u32 = u32::MAX;

/// Size of the fixed field region of the file header, before padding.
pub const FILE_HEADER_FIELDS: usize = 36;

/// Size of a node block header.
pub const NODE_HEADER_SIZE: usize = 36;

/// Size of one CORE-node child entry: `child_seq:u32, child_start:i64`.
pub const CHILD_ENTRY_SIZE: usize = 12;

/// Fixed part of an interval record: `start:i64, end:i64, quark:i32, tag:u8`.
pub const RECORD_BASE_SIZE: usize = 21;

/// Wire tag of a null value.
pub const TAG_NULL: u8 = 0;
/// Wire tag of a 32-bit integer.
pub const TAG_INT32: u8 = 1;
/// Wire tag of a 64-bit integer.
pub const TAG_INT64: u8 = 2;
/// Wire tag of a double.
pub const TAG_DOUBLE: u8 = 3;
/// Wire tag of a string.
pub const TAG_STR: u8 = 4;

/// Wire tag for a value.
pub fn value_tag(value: &StateValue) -> u8 {
    match value {
        StateValue::Null => TAG_NULL,
        StateValue::Int32(_) => TAG_INT32,
        StateValue::Int64(_) => TAG_INT64,
        StateValue::Double(_) => TAG_DOUBLE,
        StateValue::Str(_) => TAG_STR,
    }
}

/// Size of a value's in-record payload. Strings store a fixed `u32`
/// reference; their bytes live in the string section.
pub fn payload_size(value: &StateValue) -> usize {
    match value {
        StateValue::Null => 0,
        StateValue::Int32(_) => 4,
        StateValue::Int64(_) | StateValue::Double(_) => 8,
        StateValue::Str(_) => 4,
    }
}

/// Bytes a value consumes in the node's string section.
pub fn string_section_size(value: &StateValue) -> usize {
    match value {
        StateValue::Str(s) => 4 + s.len(),
        _ => 0,
    }
}

/// Construction parameters of a history tree.
#[derive(Debug, Clone)]
pub struct HistoryTreeConfig {
    /// Path of the history file.
    pub path: PathBuf,
    /// Node block size in bytes.
    pub block_size: u32,
    /// Maximum children per CORE node.
    pub max_children: u32,
    /// Version of the state provider that builds this history; stored in
    /// the header so a reader can detect a stale file.
    pub provider_version: u32,
    /// Start time of the trace.
    pub trace_start: Timestamp,
    /// Node-cache bound in bytes.
    pub cache_bytes: usize,
}

impl HistoryTreeConfig {
    /// Config with default sizes.
    pub fn new(path: impl Into<PathBuf>, trace_start: Timestamp) -> Self {
        HistoryTreeConfig {
            path: path.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
            provider_version: 0,
            trace_start,
            cache_bytes: (DEFAULT_CACHE_BLOCKS * DEFAULT_BLOCK_SIZE) as usize,
        }
    }

    /// Override the block size (mostly useful to force multi-node trees
    /// in tests).
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self.cache_bytes = (DEFAULT_CACHE_BLOCKS * block_size) as usize;
        self
    }

    /// Override the maximum child count of CORE nodes.
    pub fn with_max_children(mut self, max_children: u32) -> Self {
        self.max_children = max_children;
        self
    }

    /// Set the provider version recorded in the header.
    pub fn with_provider_version(mut self, version: u32) -> Self {
        self.provider_version = version;
        self
    }

    /// Bound the node cache to `bytes`.
    pub fn with_cache_bytes(mut self, bytes: usize) -> Self {
        self.cache_bytes = bytes;
        self
    }
}

/// Decoded file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Node block size in bytes.
    pub block_size: u32,
    /// Maximum children per CORE node.
    pub max_children: u32,
    /// Provider version recorded at build time.
    pub provider_version: u32,
    /// Start time of the trace.
    pub trace_start: Timestamp,
    /// Sequence number of the root node, or [`NO_NODE`] if unfinished.
    pub root_seq: u32,
    /// Number of node blocks in the file.
    pub node_count: u32,
}

impl FileHeader {
    /// Encode into a zero-padded block of `block_size` bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.block_size as usize];
        {
            let mut cur = Cursor::new(&mut buf[..]);
            // Writes into a sized in-memory buffer cannot fail.
            let w = &mut cur;
            std::io::Write::write_all(w, &HISTORY_MAGIC).expect("header write");
            w.write_u32::<LittleEndian>(FORMAT_VERSION).expect("header write");
            w.write_u32::<LittleEndian>(self.block_size).expect("header write");
            w.write_u32::<LittleEndian>(self.max_children).expect("header write");
            w.write_u32::<LittleEndian>(self.provider_version).expect("header write");
            w.write_i64::<LittleEndian>(self.trace_start).expect("header write");
            w.write_u32::<LittleEndian>(self.root_seq).expect("header write");
            w.write_u32::<LittleEndian>(self.node_count).expect("header write");
        }
        buf
    }

    /// Decode and validate a header read from the start of a file.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FILE_HEADER_FIELDS {
            return Err(StateError::format("truncated file header"));
        }
        let mut cur = Cursor::new(buf);
        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic)?;
        if magic != HISTORY_MAGIC {
            return Err(StateError::format("bad magic, not a history file"));
        }
        let version = cur.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(StateError::Format(format!(
                "unsupported format version {version} (expected {FORMAT_VERSION})"
            )));
        }
        let block_size = cur.read_u32::<LittleEndian>()?;
        let max_children = cur.read_u32::<LittleEndian>()?;
        let provider_version = cur.read_u32::<LittleEndian>()?;
        let trace_start = cur.read_i64::<LittleEndian>()?;
        let root_seq = cur.read_u32::<LittleEndian>()?;
        let node_count = cur.read_u32::<LittleEndian>()?;
        if block_size < (NODE_HEADER_SIZE + RECORD_BASE_SIZE) as u32 {
            return Err(StateError::Format(format!(
                "implausible block size {block_size}"
            )));
        }
        if max_children < 2 {
            return Err(StateError::Format(format!(
                "implausible max_children {max_children}"
            )));
        }
        Ok(FileHeader {
            block_size,
            max_children,
            provider_version,
            trace_start,
            root_seq,
            node_count,
        })
    }
}
