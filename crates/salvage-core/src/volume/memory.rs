//! In-memory volume with fault injection
//!
//! Builds small directory trees for tests and demos and lets individual nodes
//! misbehave the way damaged media do: reads that fail a few times before
//! succeeding, regions that never read back, file records that cannot be
//! opened, names that do not decode.

use chrono::{DateTime, Utc};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{
    DataStream, DirEntry, Entries, EntryKind, NameKind, NodeMetadata, RawName, Volume, VolumeError,
    VolumeInfo,
};

/// Reference to a node of a `MemoryVolume`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemNodeId(usize);

/// How reads of a node's data stream fail
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReadFault {
    #[default]
    None,
    /// The first `n` read attempts on each opened stream fail
    FailFirst(u32),
    /// Every read fails
    Always,
    /// Reads touching `start..end` fail
    Region { start: u64, end: u64 },
}

/// Faults attached to a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    pub read: ReadFault,
    /// Opening the node fails
    pub open: bool,
    /// Listing the directory fails
    pub listing: bool,
}

struct Listing {
    name: RawName,
    name_kind: NameKind,
    target: MemNodeId,
}

struct MemNode {
    kind: EntryKind,
    parent: MemNodeId,
    data: Arc<[u8]>,
    listings: Vec<Listing>,
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    faults: Faults,
    block_size: Option<usize>,
}

impl MemNode {
    fn new(kind: EntryKind, parent: MemNodeId, data: Vec<u8>) -> Self {
        Self {
            kind,
            parent,
            data: data.into(),
            listings: Vec::new(),
            created: None,
            modified: None,
            faults: Faults::default(),
            block_size: None,
        }
    }
}

/// Counts one open handle for as long as it lives
struct HandleGuard {
    counter: Arc<AtomicUsize>,
}

impl HandleGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Open node of a `MemoryVolume`
pub struct MemHandle {
    id: MemNodeId,
    _guard: HandleGuard,
}

impl MemHandle {
    pub fn id(&self) -> MemNodeId {
        self.id
    }
}

/// Data stream of a `MemoryVolume` file
pub struct MemStream {
    data: Arc<[u8]>,
    fault: ReadFault,
    failures_left: u32,
    block_size: Option<usize>,
    _guard: HandleGuard,
}

impl DataStream for MemStream {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, VolumeError> {
        let len = self.data.len() as u64;
        if offset >= len || buf.is_empty() {
            return Ok(0);
        }
        if let Some(record) = self.block_size.filter(|size| *size > 0) {
            if offset % record as u64 != 0 || buf.len() > record {
                return Err(VolumeError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "reads must stay within one record",
                )));
            }
        }

        match self.fault {
            ReadFault::None => {}
            ReadFault::FailFirst(_) => {
                if self.failures_left > 0 {
                    self.failures_left -= 1;
                    return Err(VolumeError::Unreadable { offset });
                }
            }
            ReadFault::Always => return Err(VolumeError::Unreadable { offset }),
            ReadFault::Region { start, end } => {
                let read_end = offset + buf.len() as u64;
                if offset < end && read_end > start {
                    return Err(VolumeError::Unreadable { offset });
                }
            }
        }

        let start = offset as usize;
        let count = std::cmp::min(buf.len(), self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        Ok(count)
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn block_size(&self) -> Option<usize> {
        self.block_size
    }
}

/// Directory tree held in memory
pub struct MemoryVolume {
    name: String,
    nodes: Vec<MemNode>,
    open_handles: Arc<AtomicUsize>,
}

impl MemoryVolume {
    /// Create a volume containing only its root directory
    pub fn new(name: impl Into<String>) -> Self {
        let root = MemNode::new(EntryKind::Directory, MemNodeId(0), Vec::new());
        Self {
            name: name.into(),
            nodes: vec![root],
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn root_id(&self) -> MemNodeId {
        MemNodeId(0)
    }

    /// Add a directory under `parent`
    pub fn add_dir(&mut self, parent: MemNodeId, name: &str) -> MemNodeId {
        self.add_raw_entry(parent, RawName::from_utf16(&utf16(name)), EntryKind::Directory, Vec::new())
    }

    /// Add a file under `parent`
    pub fn add_file(&mut self, parent: MemNodeId, name: &str, data: impl Into<Vec<u8>>) -> MemNodeId {
        self.add_raw_entry(parent, RawName::from_utf16(&utf16(name)), EntryKind::File, data.into())
    }

    /// Add an entry the copy never materializes (symlink, device, ...)
    pub fn add_special(&mut self, parent: MemNodeId, name: &str) -> MemNodeId {
        self.add_raw_entry(parent, RawName::from_utf16(&utf16(name)), EntryKind::Other, Vec::new())
    }

    /// Add an entry with an arbitrary on-disk name
    pub fn add_raw_entry(
        &mut self,
        parent: MemNodeId,
        name: RawName,
        kind: EntryKind,
        data: Vec<u8>,
    ) -> MemNodeId {
        let id = MemNodeId(self.nodes.len());
        self.nodes.push(MemNode::new(kind, parent, data));
        self.nodes[parent.0].listings.push(Listing {
            name,
            name_kind: NameKind::Win32,
            target: id,
        });
        id
    }

    /// List `target` a second time under a DOS 8.3 alias
    pub fn add_short_name(&mut self, parent: MemNodeId, target: MemNodeId, alias: &str) {
        self.nodes[parent.0].listings.push(Listing {
            name: RawName::from_utf16(&utf16(alias)),
            name_kind: NameKind::Dos,
            target,
        });
    }

    pub fn set_faults(&mut self, id: MemNodeId, faults: Faults) {
        self.nodes[id.0].faults = faults;
    }

    /// Require reads of this node's stream in fixed-size records
    pub fn set_block_size(&mut self, id: MemNodeId, block_size: usize) {
        self.nodes[id.0].block_size = Some(block_size);
    }

    pub fn set_times(&mut self, id: MemNodeId, created: Option<DateTime<Utc>>, modified: Option<DateTime<Utc>>) {
        let node = &mut self.nodes[id.0];
        node.created = created;
        node.modified = modified;
    }

    /// Number of node handles and data streams currently open
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    fn node(&self, id: MemNodeId) -> Result<&MemNode, VolumeError> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| VolumeError::NotFound(format!("node #{}", id.0)))
    }

    fn child_named(&self, dir: MemNodeId, name: &str) -> Option<MemNodeId> {
        self.nodes[dir.0]
            .listings
            .iter()
            .filter(|listing| !listing.name_kind.is_short_alias())
            .find(|listing| listing.name.decode().as_deref() == Some(name))
            .map(|listing| listing.target)
    }
}

impl Volume for MemoryVolume {
    type NodeRef = MemNodeId;
    type Node = MemHandle;
    type Stream = MemStream;

    fn root(&self) -> MemNodeId {
        self.root_id()
    }

    fn resolve(&self, path: &str) -> Result<MemNodeId, VolumeError> {
        let mut current = self.root_id();
        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            if self.nodes[current.0].kind != EntryKind::Directory {
                return Err(VolumeError::NotADirectory(path.to_string()));
            }
            current = if component == ".." {
                self.nodes[current.0].parent
            } else {
                self.child_named(current, component)
                    .ok_or_else(|| VolumeError::NotFound(path.to_string()))?
            };
        }
        Ok(current)
    }

    fn open_node(&self, node: &MemNodeId) -> Result<MemHandle, VolumeError> {
        let record = self.node(*node)?;
        if record.faults.open {
            return Err(VolumeError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "corrupt file record",
            )));
        }
        Ok(MemHandle {
            id: *node,
            _guard: HandleGuard::acquire(&self.open_handles),
        })
    }

    fn entries<'a>(&'a self, dir: &'a MemHandle) -> Result<Entries<'a, MemNodeId>, VolumeError> {
        let record = self.node(dir.id)?;
        if record.kind != EntryKind::Directory {
            return Err(VolumeError::NotADirectory(format!("node #{}", dir.id.0)));
        }
        if record.faults.listing {
            return Err(VolumeError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "corrupt directory index",
            )));
        }

        let pseudo = [(".", dir.id), ("..", record.parent)].into_iter().map(|(name, target)| {
            Ok::<_, VolumeError>(DirEntry {
                name: RawName::from_utf16(&utf16(name)),
                name_kind: NameKind::Posix,
                kind: EntryKind::Directory,
                node: target,
            })
        });
        let children = record.listings.iter().map(move |listing| {
            Ok::<_, VolumeError>(DirEntry {
                name: listing.name.clone(),
                name_kind: listing.name_kind,
                kind: self.nodes[listing.target.0].kind,
                node: listing.target,
            })
        });

        Ok(Box::new(pseudo.chain(children)))
    }

    fn open_stream(&self, node: &MemHandle) -> Result<MemStream, VolumeError> {
        let record = self.node(node.id)?;
        if record.kind != EntryKind::File {
            return Err(VolumeError::NoData);
        }
        let failures_left = match record.faults.read {
            ReadFault::FailFirst(count) => count,
            _ => 0,
        };
        Ok(MemStream {
            data: Arc::clone(&record.data),
            fault: record.faults.read.clone(),
            failures_left,
            block_size: record.block_size,
            _guard: HandleGuard::acquire(&self.open_handles),
        })
    }

    fn metadata(&self, node: &MemNodeId) -> Result<NodeMetadata, VolumeError> {
        let record = self.node(*node)?;
        Ok(NodeMetadata {
            kind: record.kind,
            size: record.data.len() as u64,
            created: record.created,
            modified: record.modified,
            attributes: 0,
        })
    }

    fn info(&self) -> VolumeInfo {
        VolumeInfo {
            name: self.name.clone(),
            provider: "memory".to_string(),
            total_bytes: Some(self.nodes.iter().map(|node| node.data.len() as u64).sum()),
            read_only: true,
        }
    }
}

fn utf16(name: &str) -> Vec<u16> {
    name.encode_utf16().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (MemoryVolume, MemNodeId, MemNodeId) {
        let mut volume = MemoryVolume::new("sample");
        let docs = volume.add_dir(volume.root_id(), "docs");
        let report = volume.add_file(docs, "report.txt", b"quarterly".to_vec());
        volume.add_short_name(docs, report, "REPORT~1.TXT");
        (volume, docs, report)
    }

    #[test]
    fn test_resolve_paths() {
        let (volume, docs, report) = sample();
        assert_eq!(volume.resolve("/").unwrap(), volume.root_id());
        assert_eq!(volume.resolve("/docs/").unwrap(), docs);
        assert_eq!(volume.resolve("/docs/report.txt").unwrap(), report);
        assert!(matches!(volume.resolve("/missing"), Err(VolumeError::NotFound(_))));
        assert!(matches!(
            volume.resolve("/docs/report.txt/deeper"),
            Err(VolumeError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_entries_include_pseudo_entries_and_aliases() {
        let (volume, docs, _) = sample();
        let handle = volume.open_node(&docs).unwrap();
        let names: Vec<(String, NameKind)> = volume
            .entries(&handle)
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                (entry.name.decode().unwrap(), entry.name_kind)
            })
            .collect();

        assert_eq!(
            names,
            vec![
                (".".to_string(), NameKind::Posix),
                ("..".to_string(), NameKind::Posix),
                ("report.txt".to_string(), NameKind::Win32),
                ("REPORT~1.TXT".to_string(), NameKind::Dos),
            ]
        );
    }

    #[test]
    fn test_fail_first_recovers() {
        let (mut volume, _, report) = sample();
        volume.set_faults(
            report,
            Faults {
                read: ReadFault::FailFirst(2),
                open: false,
                ..Default::default()
            },
        );
        let handle = volume.open_node(&report).unwrap();
        let mut stream = volume.open_stream(&handle).unwrap();
        let mut buf = [0u8; 16];

        assert!(stream.read_at(0, &mut buf).is_err());
        assert!(stream.read_at(0, &mut buf).is_err());
        assert_eq!(stream.read_at(0, &mut buf).unwrap(), 9);
        assert_eq!(&buf[..9], b"quarterly");
    }

    #[test]
    fn test_region_fault_only_hits_overlapping_reads() {
        let (mut volume, _, report) = sample();
        volume.set_faults(
            report,
            Faults {
                read: ReadFault::Region { start: 4, end: 6 },
                open: false,
                ..Default::default()
            },
        );
        let handle = volume.open_node(&report).unwrap();
        let mut stream = volume.open_stream(&handle).unwrap();
        let mut buf = [0u8; 4];

        assert_eq!(stream.read_at(0, &mut buf).unwrap(), 4);
        assert!(stream.read_at(4, &mut buf).is_err());
        assert_eq!(stream.read_at(6, &mut buf[..3]).unwrap(), 3);
        assert_eq!(stream.read_at(9, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_block_size_requires_record_reads() {
        let (mut volume, _, report) = sample();
        volume.set_block_size(report, 4);
        let handle = volume.open_node(&report).unwrap();
        let mut stream = volume.open_stream(&handle).unwrap();
        let mut buf = [0u8; 8];

        assert_eq!(stream.block_size(), Some(4));
        assert_eq!(stream.read_at(4, &mut buf[..4]).unwrap(), 4);
        assert!(stream.read_at(0, &mut buf).is_err());
        assert!(stream.read_at(2, &mut buf[..2]).is_err());
    }

    #[test]
    fn test_handles_are_counted_until_dropped() {
        let (volume, docs, report) = sample();
        let dir = volume.open_node(&docs).unwrap();
        let file = volume.open_node(&report).unwrap();
        let stream = volume.open_stream(&file).unwrap();
        assert_eq!(volume.open_handles(), 3);

        drop(stream);
        drop(file);
        drop(dir);
        assert_eq!(volume.open_handles(), 0);
    }

    #[test]
    fn test_open_fault() {
        let (mut volume, _, report) = sample();
        volume.set_faults(
            report,
            Faults {
                read: ReadFault::None,
                open: true,
                ..Default::default()
            },
        );
        assert!(volume.open_node(&report).is_err());
        assert_eq!(volume.open_handles(), 0);
    }
}
