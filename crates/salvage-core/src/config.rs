/// Copy configuration
use serde::{Deserialize, Serialize};

use crate::error::CopyError;

/// Default capacity of the destination path buffer, terminator included
pub const MAX_PATH_LENGTH: usize = 1024;

/// Default size of a read chunk
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound on `RetryPolicy::max_retries`
pub const MAX_RETRIES: u32 = 1_000;

/// Bounded retry budget applied to every chunk read and write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first one fails
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// What to do when an entry already exists at the destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExistingEntries {
    /// Report the entry as a sink error and skip it
    #[default]
    Fail,
    /// Reuse existing directories and overwrite existing files
    Merge,
}

/// How unreadable regions of a file appear in the output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapPolicy {
    /// Leave the region out; later data moves up
    #[default]
    Skip,
    /// Write zeros so the output keeps the source layout
    ZeroFill,
}

/// Compression used for archive entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveCompression {
    Stored,
    #[default]
    Deflated,
}

/// Settings for one copy operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyConfig {
    pub retry: RetryPolicy,
    pub chunk_size: usize,
    pub max_path_length: usize,
    pub on_existing: ExistingEntries,
    pub gaps: GapPolicy,
    /// Record a SHA-256 of every copied file in the report
    pub compute_digests: bool,
    pub compression: ArchiveCompression,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_path_length: MAX_PATH_LENGTH,
            on_existing: ExistingEntries::default(),
            gaps: GapPolicy::default(),
            compute_digests: false,
            compression: ArchiveCompression::default(),
        }
    }
}

impl CopyConfig {
    pub fn validate(&self) -> Result<(), CopyError> {
        if self.chunk_size == 0 {
            return Err(CopyError::InvalidConfig("chunk size must be greater than zero"));
        }
        if self.retry.max_retries > MAX_RETRIES {
            return Err(CopyError::InvalidConfig("retry budget exceeds 1000 attempts"));
        }
        if self.max_path_length < 2 {
            return Err(CopyError::InvalidConfig("path capacity must be at least 2 bytes"));
        }
        Ok(())
    }
}
