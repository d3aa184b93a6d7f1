//! Pull-based source for archive entries
//!
//! Archive writers ask for file data on their own schedule, usually long after
//! the walker has closed the node and moved on. An adapter therefore keeps
//! only a re-openable node reference and opens its own data stream when the
//! archive writer starts pulling.
//!
//! ```text
//! Closed --on_open--> Open --on_read--> Reading --on_close--> Closed
//!                       \                  |
//!                        +------> Error <--+   (absorbing; on_close allowed)
//! ```

use chrono::{DateTime, Utc};
use std::io::{self, Read};
use thiserror::Error;

use crate::digest::ContentDigest;
use crate::error::{CopyError, ReadFailed};
use crate::reader::ResilientReader;
use crate::report::CopyStatistics;
use crate::volume::{DataStream, NodeMetadata, Volume, VolumeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Closed,
    Open,
    Reading,
    Error,
}

/// Error code reported by `on_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorCode {
    /// The node or its data stream could not be opened
    Open,
    /// A read exhausted its retries
    Read,
    /// A request arrived in a state that does not allow it
    State,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("data unavailable for `{path}`")]
    Unavailable {
        path: String,
        #[source]
        source: VolumeError,
    },
    #[error("`{path}` truncated: {source}")]
    Read {
        path: String,
        #[source]
        source: ReadFailed,
    },
    #[error("`{path}` cannot be read in state {state:?}")]
    NotReadable { path: String, state: AdapterState },
}

impl AdapterError {
    pub fn code(&self) -> AdapterErrorCode {
        match self {
            AdapterError::Unavailable { .. } => AdapterErrorCode::Open,
            AdapterError::Read { .. } => AdapterErrorCode::Read,
            AdapterError::NotReadable { .. } => AdapterErrorCode::State,
        }
    }
}

impl From<AdapterError> for CopyError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Unavailable { path, source } => CopyError::HandleOpenFailed { path, source },
            AdapterError::Read { path, source } => CopyError::ReadFailed { path, source },
            AdapterError::NotReadable { path, state } => CopyError::HandleOpenFailed {
                path,
                source: VolumeError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    format!("entry source in state {:?}", state),
                )),
            },
        }
    }
}

/// Size and time reported to the archive writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Lazily read source of one archive entry
pub struct ArchiveSourceAdapter<V: Volume> {
    node: V::NodeRef,
    path: String,
    metadata: NodeMetadata,
    state: AdapterState,
    stream: Option<V::Stream>,
    chunk_len: usize,
    offset: u64,
    size: u64,
    last_error: Option<(AdapterErrorCode, String)>,
    digest: ContentDigest,
}

impl<V: Volume> ArchiveSourceAdapter<V> {
    pub fn new(node: V::NodeRef, path: impl Into<String>, metadata: NodeMetadata, digest: ContentDigest) -> Self {
        let size = metadata.size;
        Self {
            node,
            path: path.into(),
            metadata,
            state: AdapterState::Closed,
            stream: None,
            chunk_len: 0,
            offset: 0,
            size,
            last_error: None,
            digest,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Bytes handed to the archive writer so far
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Open the node and its data stream
    pub fn on_open(&mut self, volume: &V, reader: &ResilientReader) -> Result<(), AdapterError> {
        match self.state {
            AdapterState::Open | AdapterState::Reading => return Ok(()),
            AdapterState::Error => return Err(self.not_readable()),
            AdapterState::Closed => {}
        }

        let opened = volume
            .open_node(&self.node)
            .and_then(|node| volume.open_stream(&node));
        match opened {
            Ok(stream) => {
                self.size = stream.len();
                self.chunk_len = reader.chunk_len(&stream);
                self.stream = Some(stream);
                self.offset = 0;
                self.state = AdapterState::Open;
                Ok(())
            }
            Err(source) => Err(self.fail(AdapterError::Unavailable {
                path: self.path.clone(),
                source,
            })),
        }
    }

    /// Read the next bytes of the entry into `buf`; `Ok(0)` ends the entry
    pub fn on_read(
        &mut self,
        buf: &mut [u8],
        reader: &ResilientReader,
        stats: &mut CopyStatistics,
    ) -> Result<usize, AdapterError> {
        if !matches!(self.state, AdapterState::Open | AdapterState::Reading) {
            return Err(self.not_readable());
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.not_readable());
        };
        if self.offset >= self.size || buf.is_empty() {
            return Ok(0);
        }

        let want = (self.size - self.offset)
            .min(self.chunk_len as u64)
            .min(buf.len() as u64) as usize;
        match reader.read_chunk(stream, self.offset, &mut buf[..want], stats) {
            Ok(count) => {
                self.offset += count as u64;
                self.digest.update(&buf[..count]);
                self.state = AdapterState::Reading;
                Ok(count)
            }
            Err(source) => Err(self.fail(AdapterError::Read {
                path: self.path.clone(),
                source,
            })),
        }
    }

    pub fn on_stat(&self) -> EntryStat {
        EntryStat {
            size: self.size,
            modified: self.metadata.modified,
        }
    }

    /// Code and reason of the most recent failure
    pub fn on_error(&self) -> Option<(AdapterErrorCode, &str)> {
        self.last_error.as_ref().map(|(code, reason)| (*code, reason.as_str()))
    }

    /// Release the data stream. Idempotent; `Error` stays absorbing.
    pub fn on_close(&mut self) {
        self.stream = None;
        if self.state != AdapterState::Error {
            self.state = AdapterState::Closed;
        }
    }

    /// Hex digest of every byte pulled so far, if digests are enabled
    pub fn take_digest(&mut self) -> Option<String> {
        std::mem::replace(&mut self.digest, ContentDigest::new(false)).finish()
    }

    /// `io::Read` view driven by the archive writer
    pub fn pull<'a>(&'a mut self, reader: &'a ResilientReader, stats: &'a mut CopyStatistics) -> AdapterReader<'a, V> {
        AdapterReader {
            adapter: self,
            reader,
            stats,
        }
    }

    fn fail(&mut self, err: AdapterError) -> AdapterError {
        self.state = AdapterState::Error;
        self.last_error = Some((err.code(), err.to_string()));
        err
    }

    fn not_readable(&self) -> AdapterError {
        AdapterError::NotReadable {
            path: self.path.clone(),
            state: self.state,
        }
    }
}

/// Pulls an adapter through `std::io::Read`
pub struct AdapterReader<'a, V: Volume> {
    adapter: &'a mut ArchiveSourceAdapter<V>,
    reader: &'a ResilientReader,
    stats: &'a mut CopyStatistics,
}

impl<V: Volume> Read for AdapterReader<'_, V> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.adapter
            .on_read(buf, self.reader, self.stats)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    }
}
