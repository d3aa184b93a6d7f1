//! Sink writing a ZIP archive
//!
//! Directory entries are written as the walker reaches them. File entries are
//! only registered; their contents are pulled through an
//! `ArchiveSourceAdapter` when the sink finishes, in the order the files
//! were found.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{FileEntry, Sink};
use crate::adapter::{AdapterError, AdapterState, ArchiveSourceAdapter};
use crate::config::{ArchiveCompression, CopyConfig, ExistingEntries};
use crate::context::CopyContext;
use crate::error::{CopyError, SinkError};
use crate::report::{FileRecord, FileStatus};
use crate::volume::{NodeMetadata, Volume};

/// Entries at or above this size need ZIP64 headers
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

pub struct ArchiveSink<'v, V: Volume, W: Write + Seek = File> {
    volume: &'v V,
    target: PathBuf,
    zip: ZipWriter<W>,
    pending: Vec<ArchiveSourceAdapter<V>>,
    names: HashSet<String>,
    on_existing: ExistingEntries,
    compression: CompressionMethod,
}

impl<'v, V: Volume> ArchiveSink<'v, V, File> {
    /// Create a new archive file at `path`. The file must not exist yet.
    pub fn create(volume: &'v V, path: &Path, config: &CopyConfig) -> Result<Self, CopyError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| CopyError::fatal_target(path, err))?;
        tracing::info!("Writing archive {}", path.display());
        Ok(Self::new(volume, file, path, config))
    }
}

impl<'v, V: Volume, W: Write + Seek> ArchiveSink<'v, V, W> {
    /// Write the archive to an already opened destination
    pub fn new(volume: &'v V, writer: W, target: impl Into<PathBuf>, config: &CopyConfig) -> Self {
        let compression = match config.compression {
            ArchiveCompression::Stored => CompressionMethod::Stored,
            ArchiveCompression::Deflated => CompressionMethod::Deflated,
        };
        Self {
            volume,
            target: target.into(),
            zip: ZipWriter::new(writer),
            pending: Vec::new(),
            names: HashSet::new(),
            on_existing: config.on_existing,
            compression,
        }
    }

    /// Files registered but not yet written
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn options(&self, modified: Option<DateTime<Utc>>, size: u64) -> FileOptions {
        let mut options = FileOptions::default()
            .compression_method(self.compression)
            .large_file(size >= ZIP64_THRESHOLD);
        if let Some(time) = modified.and_then(zip_time) {
            options = options.last_modified_time(time);
        }
        options
    }

    /// Returns `false` when a directory with this name was already added
    fn claim_name(&mut self, name: &str, directory: bool) -> Result<bool, SinkError> {
        if self.names.insert(name.to_string()) {
            return Ok(true);
        }
        if directory && self.on_existing == ExistingEntries::Merge {
            return Ok(false);
        }
        Err(SinkError::AlreadyExists {
            path: name.to_string(),
        })
    }

    /// Pull one registered file into the archive
    fn write_entry(&mut self, mut adapter: ArchiveSourceAdapter<V>, ctx: &mut CopyContext) {
        let path = adapter.path().to_string();
        let reader = ctx.reader;

        if let Err(err) = adapter.on_open(self.volume, &reader) {
            adapter.on_close();
            ctx.skip_entry(&path, err.into());
            return;
        }

        let stat = adapter.on_stat();
        let options = self.options(stat.modified, stat.size);
        if let Err(source) = self.zip.start_file(path.as_str(), options) {
            adapter.on_close();
            ctx.skip_entry(&path, SinkError::Archive { path: path.clone(), source }.into());
            return;
        }

        let copied = io::copy(&mut adapter.pull(&reader, &mut ctx.stats), &mut self.zip);
        let mut truncated = false;
        if let Err(err) = copied {
            truncated = true;
            let failure = if adapter.state() == AdapterState::Error {
                match err.into_inner().map(|inner| inner.downcast::<AdapterError>()) {
                    Some(Ok(adapter_err)) => CopyError::from(*adapter_err),
                    Some(Err(other)) => CopyError::Sink(SinkError::Write {
                        path: path.clone(),
                        attempts: 1,
                        source: io::Error::new(io::ErrorKind::Other, other),
                    }),
                    None => CopyError::Sink(SinkError::Write {
                        path: path.clone(),
                        attempts: 1,
                        source: io::Error::new(io::ErrorKind::Other, "entry source failed"),
                    }),
                }
            } else {
                ctx.stats.errors += 1;
                CopyError::Sink(SinkError::Write {
                    path: path.clone(),
                    attempts: 1,
                    source: err,
                })
            };
            ctx.note_failure(&path, failure);
        }
        adapter.on_close();

        let bytes_copied = adapter.bytes_read();
        let status = if truncated || bytes_copied < stat.size {
            FileStatus::Partial
        } else {
            FileStatus::Complete
        };
        ctx.file_copied(FileRecord {
            path,
            source_size: stat.size,
            bytes_copied,
            unreadable_chunks: u32::from(adapter.state() == AdapterState::Error),
            status,
            sha256: adapter.take_digest(),
        });
    }
}

impl<'v, V: Volume, W: Write + Seek> Sink<V> for ArchiveSink<'v, V, W> {
    fn make_directory(&mut self, path: &str, metadata: &NodeMetadata) -> Result<(), SinkError> {
        let name = entry_name(path);
        if name.is_empty() || !self.claim_name(name, true)? {
            return Ok(());
        }
        let options = self.options(metadata.modified, 0);
        self.zip
            .add_directory(name, options)
            .map_err(|source| SinkError::Archive {
                path: path.to_string(),
                source,
            })
    }

    fn add_file(&mut self, file: FileEntry<'_, V>, ctx: &mut CopyContext) -> Result<(), CopyError> {
        let name = entry_name(file.path).to_string();
        self.claim_name(&name, false)?;
        self.pending.push(ArchiveSourceAdapter::new(
            file.node_ref.clone(),
            name,
            file.metadata.clone(),
            ctx.digest(),
        ));
        Ok(())
    }

    fn finish(mut self, ctx: &mut CopyContext) -> Result<(), CopyError> {
        tracing::debug!("Writing {} archive entries", self.pending.len());
        for adapter in std::mem::take(&mut self.pending) {
            self.write_entry(adapter, ctx);
        }
        self.zip
            .finish()
            .map_err(|err| CopyError::fatal_target(&self.target, err))?;
        Ok(())
    }
}

/// Archive entries are relative
fn entry_name(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// ZIP timestamps only cover 1980 to 2107
fn zip_time(time: DateTime<Utc>) -> Option<zip::DateTime> {
    zip::DateTime::from_date_and_time(
        u16::try_from(time.year()).ok()?,
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
    )
    .ok()
}
