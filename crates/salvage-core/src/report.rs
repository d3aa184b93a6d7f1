//! Statistics and reports for copy operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use uuid::Uuid;

use crate::error::FailureKind;

/// Aggregate counters for one copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyStatistics {
    pub files_copied: u64,
    pub directories_created: u64,
    /// Reads and writes that exhausted their retry budget
    pub errors: u64,
    /// Additional attempts made after a failed read or write
    pub retries: u64,
    /// Entries not materialized for any other reason
    pub skipped_entries: u64,
    /// Files materialized with less than their full content
    pub partial_files: u64,
    pub bytes_copied: u64,
}

impl fmt::Display for CopyStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} directories, {} errors, {} retries, {} skipped, {} partial, {} bytes",
            self.files_copied,
            self.directories_created,
            self.errors,
            self.retries,
            self.skipped_entries,
            self.partial_files,
            self.bytes_copied
        )
    }
}

/// Completeness of a copied file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Complete,
    /// Some regions could not be read or the output was abandoned part way
    Partial,
}

/// Outcome for one copied file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub source_size: u64,
    pub bytes_copied: u64,
    /// Chunks that were unreadable after retries
    pub unreadable_chunks: u32,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// An entry that could not be copied (or not completely)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFailure {
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Progress notification emitted after each materialized entry
#[derive(Debug, Clone)]
pub struct CopyProgress {
    pub files_copied: u64,
    pub directories_created: u64,
    pub errors: u64,
    pub bytes_copied: u64,
    pub current_path: String,
}

/// Final result of a copy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyReport {
    pub id: Uuid,
    pub source: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub statistics: CopyStatistics,
    pub files: Vec<FileRecord>,
    pub failures: Vec<EntryFailure>,
}

impl CopyReport {
    /// True when every entry was copied in full
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.statistics.errors == 0 && self.statistics.partial_files == 0
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.iter().find(|record| record.path == path)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Save the report as pretty-printed JSON
    pub fn write_json(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self).map_err(io::Error::from)
    }
}
