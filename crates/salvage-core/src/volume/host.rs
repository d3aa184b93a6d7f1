/// Volume provider backed by a directory of the host filesystem
///
/// Used to pull data off a volume that the operating system (or an external
/// recovery driver) can still mount read-only. Every read is a positioned
/// read, so a failing sector only affects the chunk that touches it.
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use super::{
    DataStream, DirEntry, Entries, EntryKind, NameKind, NodeMetadata, RawName, Volume, VolumeError,
    VolumeInfo,
};

/// A host directory exposed as a source volume
#[derive(Debug, Clone)]
pub struct HostVolume {
    root: PathBuf,
}

/// Open node of a `HostVolume`
#[derive(Debug)]
pub struct HostNode {
    path: PathBuf,
    kind: EntryKind,
}

/// Data stream of a host file
#[derive(Debug)]
pub struct HostStream {
    file: File,
    len: u64,
}

impl HostVolume {
    /// Mount `root`, which must be an existing directory
    pub fn open(root: impl AsRef<Path>) -> Result<Self, VolumeError> {
        let root = root.as_ref();
        let metadata = fs::metadata(root)?;
        if !metadata.is_dir() {
            return Err(VolumeError::NotADirectory(root.display().to_string()));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }
}

fn classify(file_type: fs::FileType) -> EntryKind {
    if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

#[cfg(unix)]
fn raw_name(name: &std::ffi::OsStr) -> RawName {
    use std::os::unix::ffi::OsStrExt;
    RawName::new(name.as_bytes().to_vec(), super::NameEncoding::Utf8)
}

#[cfg(windows)]
fn raw_name(name: &std::ffi::OsStr) -> RawName {
    use std::os::windows::ffi::OsStrExt;
    let units: Vec<u16> = name.encode_wide().collect();
    RawName::from_utf16(&units)
}

#[cfg(not(any(unix, windows)))]
fn raw_name(name: &std::ffi::OsStr) -> RawName {
    RawName::from_utf8(&name.to_string_lossy())
}

#[cfg(unix)]
fn attributes(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn attributes(metadata: &fs::Metadata) -> u32 {
    // FILE_ATTRIBUTE_READONLY
    u32::from(metadata.permissions().readonly())
}

impl Volume for HostVolume {
    type NodeRef = PathBuf;
    type Node = HostNode;
    type Stream = HostStream;

    fn root(&self) -> PathBuf {
        self.root.clone()
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, VolumeError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(VolumeError::NotFound(path.to_string()));
        }

        let resolved = self.root.join(relative);
        if fs::symlink_metadata(&resolved).is_err() {
            return Err(VolumeError::NotFound(path.to_string()));
        }
        Ok(resolved)
    }

    fn open_node(&self, node: &PathBuf) -> Result<HostNode, VolumeError> {
        let metadata = fs::symlink_metadata(node)?;
        Ok(HostNode {
            path: node.clone(),
            kind: classify(metadata.file_type()),
        })
    }

    fn entries<'a>(&'a self, dir: &'a HostNode) -> Result<Entries<'a, PathBuf>, VolumeError> {
        if dir.kind != EntryKind::Directory {
            return Err(VolumeError::NotADirectory(dir.path.display().to_string()));
        }

        let listing = fs::read_dir(&dir.path)?;
        Ok(Box::new(listing.map(|entry| -> Result<DirEntry<PathBuf>, VolumeError> {
            let entry = entry?;
            let kind = classify(entry.file_type()?);
            Ok(DirEntry {
                name: raw_name(&entry.file_name()),
                name_kind: NameKind::Posix,
                kind,
                node: entry.path(),
            })
        })))
    }

    fn open_stream(&self, node: &HostNode) -> Result<HostStream, VolumeError> {
        if node.kind != EntryKind::File {
            return Err(VolumeError::NoData);
        }
        let file = File::open(&node.path)?;
        let len = file.metadata()?.len();
        Ok(HostStream { file, len })
    }

    fn metadata(&self, node: &PathBuf) -> Result<NodeMetadata, VolumeError> {
        let metadata = fs::symlink_metadata(node)?;
        let kind = classify(metadata.file_type());
        Ok(NodeMetadata {
            kind,
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            attributes: attributes(&metadata),
        })
    }

    fn info(&self) -> VolumeInfo {
        VolumeInfo {
            name: self.root.display().to_string(),
            provider: "host".to_string(),
            total_bytes: None,
            read_only: fs::metadata(&self.root)
                .map(|metadata| metadata.permissions().readonly())
                .unwrap_or(false),
        }
    }
}

impl DataStream for HostStream {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, VolumeError> {
        if offset >= self.len {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(self.file.read(buf)?)
    }

    fn len(&self) -> u64 {
        self.len
    }
}
