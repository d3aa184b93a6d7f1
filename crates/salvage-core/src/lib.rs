//! Recovery copy engine
//!
//! Copies a directory subtree off a possibly damaged volume, either as loose
//! files on the host filesystem or into a ZIP archive, retrying unreliable
//! reads and recording everything that could not be copied.

pub mod adapter;
pub mod config;
pub mod context;
pub mod digest;
pub mod engine;
pub mod error;
pub mod path;
pub mod reader;
pub mod report;
pub mod sink;
pub mod volume;
pub mod walker;

pub use adapter::{AdapterError, AdapterErrorCode, AdapterState, ArchiveSourceAdapter, EntryStat};
pub use config::{
    ArchiveCompression, CopyConfig, ExistingEntries, GapPolicy, RetryPolicy, DEFAULT_CHUNK_SIZE, MAX_PATH_LENGTH,
    MAX_RETRIES,
};
pub use context::{CopyContext, ProgressCallback};
pub use engine::{copy_tree, CopyEngine, CopyTarget};
pub use error::{CopyError, FailureKind, PathTooLong, ReadFailed, SinkError};
pub use path::PathAccumulator;
pub use reader::ResilientReader;
pub use report::{CopyProgress, CopyReport, CopyStatistics, EntryFailure, FileRecord, FileStatus};
pub use sink::{ArchiveSink, DirectSink, FileEntry, Sink};
pub use volume::{
    DataStream, DirEntry, EntryKind, Faults, HostVolume, MemNodeId, MemoryVolume, NameKind, NodeMetadata, RawName,
    ReadFault, Volume, VolumeError, VolumeInfo,
};
pub use walker::Walker;
