//! Destinations for a copy
//!
//! The walker is written once against `Sink`. `DirectSink` writes loose files
//! and directories as it goes; `ArchiveSink` adds directory entries right away
//! and pulls file contents through `ArchiveSourceAdapter`s when it finishes.

pub mod archive;
pub mod direct;

pub use archive::ArchiveSink;
pub use direct::{DirectSink, FileWriteHandle};

use crate::context::CopyContext;
use crate::error::{CopyError, SinkError};
use crate::volume::{NodeMetadata, Volume};

/// A file handed from the walker to a sink
pub struct FileEntry<'a, V: Volume> {
    /// Destination path (no trailing separator)
    pub path: &'a str,
    /// Handle opened by the walker, valid only for the duration of the call
    pub node: &'a V::Node,
    /// Re-openable reference for sinks that read later
    pub node_ref: &'a V::NodeRef,
    pub metadata: &'a NodeMetadata,
}

/// Materializes the directories and files produced by a walk
pub trait Sink<V: Volume> {
    /// Create the directory at `path` (which ends in a separator)
    fn make_directory(&mut self, path: &str, metadata: &NodeMetadata) -> Result<(), SinkError>;

    /// Materialize a file.
    ///
    /// Returns an error only when nothing was materialized. Unreadable regions
    /// and abandoned writes are recorded in `ctx` and the file is reported as
    /// partial.
    fn add_file(&mut self, file: FileEntry<'_, V>, ctx: &mut CopyContext) -> Result<(), CopyError>;

    /// Flush anything deferred and release the destination
    fn finish(self, ctx: &mut CopyContext) -> Result<(), CopyError>
    where
        Self: Sized;
}
