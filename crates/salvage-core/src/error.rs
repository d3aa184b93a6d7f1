//! Error taxonomy of the copy engine
//!
//! Every variant except `FatalTarget` and `InvalidConfig` describes a problem
//! with a single entry. Those are logged, counted and recorded in the report
//! while the walk carries on with the rest of the tree.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::volume::VolumeError;

/// A path segment did not fit in the path accumulator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("path would exceed {capacity} bytes when appending `{segment}` to `{parent}`")]
pub struct PathTooLong {
    pub parent: String,
    pub segment: String,
    pub capacity: usize,
}

impl PathTooLong {
    /// The path that was refused
    pub fn path(&self) -> String {
        format!("{}{}", self.parent, self.segment)
    }
}

/// A chunk could not be read within the retry budget
#[derive(Debug, Error)]
#[error("read of {len} bytes at offset {offset} failed after {attempts} attempts")]
pub struct ReadFailed {
    pub offset: u64,
    pub len: usize,
    pub attempts: u32,
    #[source]
    pub source: VolumeError,
}

/// A destination could not materialize an entry
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("`{path}` already exists at the destination")]
    AlreadyExists { path: String },

    #[error("cannot create directory `{path}`")]
    CreateDirectory {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot create file `{path}`")]
    CreateFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("write to `{path}` failed after {attempts} attempts")]
    Write {
        path: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("cannot finish `{path}`")]
    Close {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("archive rejected entry `{path}`")]
    Archive {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
}

/// Errors surfaced by a copy
#[derive(Debug, Error)]
pub enum CopyError {
    #[error(transparent)]
    PathTooLong(#[from] PathTooLong),

    #[error("an entry name under `{parent}` cannot be represented")]
    NameUndecodable { parent: String },

    #[error("`{path}`: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: ReadFailed,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("cannot open `{path}` on the source volume")]
    HandleOpenFailed {
        path: String,
        #[source]
        source: VolumeError,
    },

    #[error("destination `{}` is unavailable", .target.display())]
    FatalTarget {
        target: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid copy configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Coarse classification recorded in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    PathTooLong,
    NameUndecodable,
    ReadFailed,
    Sink,
    HandleOpenFailed,
    FatalTarget,
    InvalidConfig,
}

impl CopyError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CopyError::PathTooLong(_) => FailureKind::PathTooLong,
            CopyError::NameUndecodable { .. } => FailureKind::NameUndecodable,
            CopyError::ReadFailed { .. } => FailureKind::ReadFailed,
            CopyError::Sink(_) => FailureKind::Sink,
            CopyError::HandleOpenFailed { .. } => FailureKind::HandleOpenFailed,
            CopyError::FatalTarget { .. } => FailureKind::FatalTarget,
            CopyError::InvalidConfig(_) => FailureKind::InvalidConfig,
        }
    }

    pub(crate) fn fatal_target(
        target: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        CopyError::FatalTarget {
            target: target.into(),
            source: source.into(),
        }
    }
}
