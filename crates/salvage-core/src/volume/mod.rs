//! Volume provider contract
//!
//! A volume provider owns the on-disk structures of the source medium and
//! exposes just enough of them for the copy engine: enumerate a directory,
//! open a node, open and read its data stream, and report metadata.
//!
//! Node handles (`Volume::Node`) are released when dropped. Node references
//! (`Volume::NodeRef`) are cheap to clone and can be re-opened at any time,
//! which is what lets archive entries be read long after the walker has moved
//! on to other directories.

use chrono::{DateTime, Utc};
use encoding_rs::{UTF_16LE, UTF_8};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

pub mod host;
pub mod memory;

pub use host::HostVolume;
pub use memory::{Faults, MemNodeId, MemoryVolume, ReadFault};

/// Lazy sequence of directory entries, yielded in the provider's native order.
pub type Entries<'a, R> = Box<dyn Iterator<Item = Result<DirEntry<R>, VolumeError>> + 'a>;

/// Errors reported by a volume provider
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("no such entry: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("node has no data stream")]
    NoData,
    #[error("medium error reading offset {offset}")]
    Unreadable { offset: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Classification of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Directory,
    File,
    /// Symbolic links, devices, reparse points and anything else the copy skips
    Other,
}

/// Namespace a directory entry's name belongs to.
///
/// Volumes with 8.3 support list a file once under its long name and once
/// more under a DOS alias; only the canonical name is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Posix,
    Win32,
    Dos,
    Win32AndDos,
}

impl NameKind {
    /// True for aliases of an entry that is also listed under its long name
    pub fn is_short_alias(self) -> bool {
        self == NameKind::Dos
    }
}

/// On-disk encoding of a raw entry name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameEncoding {
    Utf16Le,
    Utf8,
}

/// Entry name exactly as stored on the volume
#[derive(Clone, PartialEq, Eq)]
pub struct RawName {
    bytes: Vec<u8>,
    encoding: NameEncoding,
}

impl RawName {
    pub fn new(bytes: Vec<u8>, encoding: NameEncoding) -> Self {
        Self { bytes, encoding }
    }

    /// Encode UTF-16 code units the way NTFS and exFAT store them
    pub fn from_utf16(units: &[u16]) -> Self {
        let bytes = units.iter().flat_map(|unit| unit.to_le_bytes()).collect();
        Self::new(bytes, NameEncoding::Utf16Le)
    }

    pub fn from_utf8(name: &str) -> Self {
        Self::new(name.as_bytes().to_vec(), NameEncoding::Utf8)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> NameEncoding {
        self.encoding
    }

    /// Decode into the destination text encoding.
    ///
    /// Returns `None` when the name contains malformed sequences (for example
    /// an unpaired surrogate left behind by a damaged directory index).
    pub fn decode(&self) -> Option<String> {
        let decoded = match self.encoding {
            NameEncoding::Utf16Le => {
                if self.bytes.len() % 2 != 0 {
                    return None;
                }
                UTF_16LE.decode_without_bom_handling_and_without_replacement(&self.bytes)
            }
            NameEncoding::Utf8 => UTF_8.decode_without_bom_handling_and_without_replacement(&self.bytes),
        };
        decoded.map(|name| name.into_owned())
    }
}

impl fmt::Debug for RawName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Some(name) => write!(f, "{:?}", name),
            None => write!(f, "<{:?} {:02x?}>", self.encoding, self.bytes),
        }
    }
}

/// One entry yielded by `Volume::entries`
#[derive(Debug, Clone)]
pub struct DirEntry<R> {
    pub name: RawName,
    pub name_kind: NameKind,
    pub kind: EntryKind,
    pub node: R,
}

/// Per-entry metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub kind: EntryKind,
    /// Data stream length in bytes (0 for directories)
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// Provider-specific attribute flags
    pub attributes: u32,
}

impl NodeMetadata {
    /// Placeholder used when the provider cannot report metadata for a node
    pub fn unknown(kind: EntryKind) -> Self {
        Self {
            kind,
            size: 0,
            created: None,
            modified: None,
            attributes: 0,
        }
    }
}

/// General information about a mounted volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub provider: String,
    pub total_bytes: Option<u64>,
    pub read_only: bool,
}

/// Random-access view of a file's data
pub trait DataStream {
    /// Read into `buf` starting at `offset`. `Ok(0)` means end of stream.
    /// Errors are treated as transient by the caller and may be retried.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, VolumeError>;

    /// Length of the stream in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record size for streams that must be read in fixed, aligned units
    fn block_size(&self) -> Option<usize> {
        None
    }
}

/// A mounted source volume
pub trait Volume {
    /// Re-openable reference to a node
    type NodeRef: Clone + fmt::Debug;
    /// Open handle to a node; dropping it releases the node
    type Node;
    type Stream: DataStream;

    /// Reference to the root directory
    fn root(&self) -> Self::NodeRef;

    /// Resolve an absolute `/`-separated path to a node reference
    fn resolve(&self, path: &str) -> Result<Self::NodeRef, VolumeError>;

    fn open_node(&self, node: &Self::NodeRef) -> Result<Self::Node, VolumeError>;

    /// Enumerate a directory. The sequence is finite and not restartable.
    fn entries<'a>(&'a self, dir: &'a Self::Node) -> Result<Entries<'a, Self::NodeRef>, VolumeError>;

    /// Open the unnamed data stream of a file node
    fn open_stream(&self, node: &Self::Node) -> Result<Self::Stream, VolumeError>;

    fn metadata(&self, node: &Self::NodeRef) -> Result<NodeMetadata, VolumeError>;

    fn info(&self) -> VolumeInfo;
}
