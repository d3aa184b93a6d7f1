//! Mutable state shared by the walker and the sinks during one copy

use crate::config::CopyConfig;
use crate::digest::ContentDigest;
use crate::error::CopyError;
use crate::reader::ResilientReader;
use crate::report::{CopyProgress, CopyStatistics, EntryFailure, FileRecord, FileStatus};

/// Callback receiving progress after each materialized entry
pub type ProgressCallback = Box<dyn FnMut(&CopyProgress) + Send>;

/// Statistics, records and the reader for one copy invocation
pub struct CopyContext {
    pub(crate) reader: ResilientReader,
    pub(crate) stats: CopyStatistics,
    compute_digests: bool,
    files: Vec<FileRecord>,
    failures: Vec<EntryFailure>,
    progress: Option<ProgressCallback>,
}

impl CopyContext {
    pub fn new(config: &CopyConfig) -> Self {
        Self {
            reader: ResilientReader::new(config.retry, config.chunk_size),
            stats: CopyStatistics::default(),
            compute_digests: config.compute_digests,
            files: Vec::new(),
            failures: Vec::new(),
            progress: None,
        }
    }

    pub fn set_progress_callback(&mut self, callback: Option<ProgressCallback>) {
        self.progress = callback;
    }

    pub fn reader(&self) -> &ResilientReader {
        &self.reader
    }

    pub fn stats(&self) -> &CopyStatistics {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut CopyStatistics {
        &mut self.stats
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.iter().find(|record| record.path == path)
    }

    pub fn failures(&self) -> &[EntryFailure] {
        &self.failures
    }

    pub(crate) fn digest(&self) -> ContentDigest {
        ContentDigest::new(self.compute_digests)
    }

    /// Record an entry that was not materialized at all
    pub fn skip_entry(&mut self, path: &str, error: CopyError) {
        self.stats.skipped_entries += 1;
        self.note_failure(path, error);
    }

    /// Record a problem with an entry that was still (partially) materialized
    pub fn note_failure(&mut self, path: &str, error: CopyError) {
        tracing::warn!("⚠️  {}: {}", path, error);
        self.failures.push(EntryFailure {
            path: path.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    pub fn directory_created(&mut self, path: &str) {
        self.stats.directories_created += 1;
        tracing::debug!("Created directory {}", path);
        self.emit_progress(path);
    }

    pub fn file_copied(&mut self, record: FileRecord) {
        self.stats.files_copied += 1;
        self.stats.bytes_copied += record.bytes_copied;
        if record.status == FileStatus::Partial {
            self.stats.partial_files += 1;
        }
        tracing::debug!(
            "Copied {} ({}/{} bytes, {:?})",
            record.path,
            record.bytes_copied,
            record.source_size,
            record.status
        );
        let path = record.path.clone();
        self.files.push(record);
        self.emit_progress(&path);
    }

    fn emit_progress(&mut self, path: &str) {
        if let Some(callback) = self.progress.as_mut() {
            callback(&CopyProgress {
                files_copied: self.stats.files_copied,
                directories_created: self.stats.directories_created,
                errors: self.stats.errors,
                bytes_copied: self.stats.bytes_copied,
                current_path: path.to_string(),
            });
        }
    }

    pub(crate) fn take_progress_callback(&mut self) -> Option<ProgressCallback> {
        self.progress.take()
    }

    pub(crate) fn into_parts(self) -> (CopyStatistics, Vec<FileRecord>, Vec<EntryFailure>) {
        (self.stats, self.files, self.failures)
    }
}
