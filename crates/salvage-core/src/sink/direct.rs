/// Sink writing loose files and directories to the host filesystem
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

use super::{FileEntry, Sink};
use crate::config::{CopyConfig, ExistingEntries, GapPolicy, RetryPolicy};
use crate::context::CopyContext;
use crate::error::{CopyError, SinkError};
use crate::report::{CopyStatistics, FileRecord, FileStatus};
use crate::volume::{DataStream, NodeMetadata, Volume};

/// Destination file being written
pub struct FileWriteHandle<W: Write = File> {
    writer: W,
    path: String,
}

impl<W: Write> FileWriteHandle<W> {
    pub fn new(writer: W, path: impl Into<String>) -> Self {
        Self {
            writer,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Writes each entry to the destination as soon as the walker reaches it
pub struct DirectSink<'v, V: Volume> {
    volume: &'v V,
    retry: RetryPolicy,
    on_existing: ExistingEntries,
    gaps: GapPolicy,
}

impl<'v, V: Volume> DirectSink<'v, V> {
    pub fn new(volume: &'v V, config: &CopyConfig) -> Self {
        Self {
            volume,
            retry: config.retry,
            on_existing: config.on_existing,
            gaps: config.gaps,
        }
    }

    /// Create the destination file
    pub fn begin_file(&self, path: &str) -> Result<FileWriteHandle, SinkError> {
        let mut options = OpenOptions::new();
        options.write(true);
        match self.on_existing {
            ExistingEntries::Fail => options.create_new(true),
            ExistingEntries::Merge => options.create(true).truncate(true),
        };

        match options.open(path) {
            Ok(file) => Ok(FileWriteHandle::new(file, path)),
            Err(source) if source.kind() == io::ErrorKind::AlreadyExists => Err(SinkError::AlreadyExists {
                path: path.to_string(),
            }),
            Err(source) => Err(SinkError::CreateFile {
                path: path.to_string(),
                source,
            }),
        }
    }

    /// Append `bytes`, retrying failed or short writes within the retry budget
    pub fn write_chunk<W: Write>(
        &self,
        handle: &mut FileWriteHandle<W>,
        bytes: &[u8],
        stats: &mut CopyStatistics,
    ) -> Result<(), SinkError> {
        let mut written = 0;
        let mut failures = 0u32;

        while written < bytes.len() {
            let source = match handle.writer.write(&bytes[written..]) {
                Ok(0) => io::Error::new(io::ErrorKind::WriteZero, "destination accepted no bytes"),
                Ok(count) => {
                    written += count;
                    continue;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => err,
            };

            failures += 1;
            if failures > self.retry.max_retries {
                stats.errors += 1;
                return Err(SinkError::Write {
                    path: handle.path.clone(),
                    attempts: failures,
                    source,
                });
            }
            stats.retries += 1;
            tracing::debug!("Retrying write to {}: {}", handle.path, source);
        }

        Ok(())
    }

    /// Flush and close the destination file, carrying over the modification time
    pub fn end_file(&self, handle: FileWriteHandle, modified: Option<DateTime<Utc>>) -> Result<(), SinkError> {
        let FileWriteHandle { writer: mut file, path } = handle;
        file.flush().map_err(|source| SinkError::Close {
            path: path.clone(),
            source,
        })?;

        if let Some(modified) = modified {
            if let Err(err) = file.set_modified(SystemTime::from(modified)) {
                tracing::debug!("Cannot set modification time on {}: {}", path, err);
            }
        }
        Ok(())
    }

    /// Copy `stream` into `handle` chunk by chunk.
    ///
    /// Unreadable chunks are skipped or zero-filled. A write that exhausts its
    /// retries abandons the rest of the file. Either way the file is reported
    /// as partial.
    pub fn copy_contents<S: DataStream + ?Sized, W: Write>(
        &self,
        stream: &mut S,
        handle: &mut FileWriteHandle<W>,
        ctx: &mut CopyContext,
    ) -> FileRecord {
        let path = handle.path().to_string();
        let source_size = stream.len();
        let chunk_len = ctx.reader.chunk_len(stream);
        let mut buf = vec![0u8; chunk_len];
        let mut digest = ctx.digest();
        let mut record = FileRecord {
            path: path.clone(),
            source_size,
            bytes_copied: 0,
            unreadable_chunks: 0,
            status: FileStatus::Complete,
            sha256: None,
        };
        let mut abandoned = false;
        let mut offset = 0u64;

        while offset < source_size {
            let want = (source_size - offset).min(chunk_len as u64) as usize;
            let (len, from_source) = match ctx.reader.read_chunk(stream, offset, &mut buf[..want], &mut ctx.stats) {
                Ok(0) => break,
                Ok(count) => (count, true),
                Err(failed) => {
                    record.unreadable_chunks += 1;
                    ctx.note_failure(
                        &path,
                        CopyError::ReadFailed {
                            path: path.clone(),
                            source: failed,
                        },
                    );
                    if self.gaps == GapPolicy::Skip {
                        offset += want as u64;
                        continue;
                    }
                    buf[..want].fill(0);
                    (want, false)
                }
            };
            offset += len as u64;

            if let Err(err) = self.write_chunk(handle, &buf[..len], &mut ctx.stats) {
                ctx.note_failure(&path, err.into());
                abandoned = true;
                break;
            }
            digest.update(&buf[..len]);
            if from_source {
                record.bytes_copied += len as u64;
            }
        }

        if abandoned || record.unreadable_chunks > 0 || record.bytes_copied < source_size {
            record.status = FileStatus::Partial;
        }
        record.sha256 = digest.finish();
        record
    }
}

impl<'v, V: Volume> Sink<V> for DirectSink<'v, V> {
    fn make_directory(&mut self, path: &str, _metadata: &NodeMetadata) -> Result<(), SinkError> {
        match fs::create_dir(path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == io::ErrorKind::AlreadyExists => {
                if self.on_existing == ExistingEntries::Merge && Path::new(path).is_dir() {
                    Ok(())
                } else {
                    Err(SinkError::AlreadyExists {
                        path: path.to_string(),
                    })
                }
            }
            Err(source) => Err(SinkError::CreateDirectory {
                path: path.to_string(),
                source,
            }),
        }
    }

    fn add_file(&mut self, file: FileEntry<'_, V>, ctx: &mut CopyContext) -> Result<(), CopyError> {
        let mut stream = self
            .volume
            .open_stream(file.node)
            .map_err(|source| CopyError::HandleOpenFailed {
                path: file.path.to_string(),
                source,
            })?;
        let mut handle = self.begin_file(file.path)?;

        let mut record = self.copy_contents(&mut stream, &mut handle, ctx);
        if let Err(err) = self.end_file(handle, file.metadata.modified) {
            ctx.note_failure(file.path, err.into());
            record.status = FileStatus::Partial;
        }
        ctx.file_copied(record);
        Ok(())
    }

    fn finish(self, _ctx: &mut CopyContext) -> Result<(), CopyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::MemoryVolume;
    use tempfile::TempDir;

    fn sink(volume: &MemoryVolume, on_existing: ExistingEntries) -> DirectSink<'_, MemoryVolume> {
        let config = CopyConfig {
            on_existing,
            ..Default::default()
        };
        DirectSink::new(volume, &config)
    }

    #[test]
    fn test_existing_directory_policy() {
        let temp_dir = TempDir::new().unwrap();
        let volume = MemoryVolume::new("empty");
        let path = format!("{}/", temp_dir.path().join("out").display());
        let metadata = NodeMetadata::unknown(crate::volume::EntryKind::Directory);

        let mut strict = sink(&volume, ExistingEntries::Fail);
        strict.make_directory(&path, &metadata).unwrap();
        assert!(matches!(
            strict.make_directory(&path, &metadata),
            Err(SinkError::AlreadyExists { .. })
        ));

        let mut merging = sink(&volume, ExistingEntries::Merge);
        merging.make_directory(&path, &metadata).unwrap();
    }

    #[test]
    fn test_existing_file_policy() {
        let temp_dir = TempDir::new().unwrap();
        let volume = MemoryVolume::new("empty");
        let path = temp_dir.path().join("f.txt");
        fs::write(&path, b"previous contents").unwrap();
        let path = path.to_str().unwrap();

        assert!(matches!(
            sink(&volume, ExistingEntries::Fail).begin_file(path),
            Err(SinkError::AlreadyExists { .. })
        ));

        let merging = sink(&volume, ExistingEntries::Merge);
        let mut handle = merging.begin_file(path).unwrap();
        let mut stats = CopyStatistics::default();
        merging.write_chunk(&mut handle, b"new", &mut stats).unwrap();
        merging.end_file(handle, None).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"new");
        assert_eq!(stats.retries, 0);
    }

    #[test]
    fn test_end_file_applies_modification_time() {
        let temp_dir = TempDir::new().unwrap();
        let volume = MemoryVolume::new("empty");
        let path = temp_dir.path().join("dated.txt");
        let path = path.to_str().unwrap();
        let modified = DateTime::parse_from_rfc3339("2015-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let direct = sink(&volume, ExistingEntries::Fail);
        let handle = direct.begin_file(path).unwrap();
        direct.end_file(handle, Some(modified)).unwrap();

        let actual: DateTime<Utc> = fs::metadata(path).unwrap().modified().unwrap().into();
        assert_eq!(actual, modified);
    }

    /// Writer failing a fixed number of times before accepting data
    struct FlakyWriter {
        failures_left: u32,
        written: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "device not ready"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn flaky(failures: u32) -> FileWriteHandle<FlakyWriter> {
        FileWriteHandle::new(
            FlakyWriter {
                failures_left: failures,
                written: Vec::new(),
            },
            "dest/first.bin",
        )
    }

    fn retrying_config() -> CopyConfig {
        CopyConfig {
            retry: RetryPolicy { max_retries: 2 },
            chunk_size: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_write_recovers_within_budget() {
        let volume = MemoryVolume::new("empty");
        let direct = DirectSink::new(&volume, &retrying_config());
        let mut handle = flaky(2);
        let mut stats = CopyStatistics::default();

        direct.write_chunk(&mut handle, b"data", &mut stats).unwrap();

        assert_eq!(handle.writer.written, b"data");
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn test_exhausted_write_abandons_only_that_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut volume = MemoryVolume::new("writes");
        let root = volume.root_id();
        let first = volume.add_file(root, "first.bin", (0u8..12).collect::<Vec<u8>>());
        let second = volume.add_file(root, "second.txt", b"fine".to_vec());
        let config = retrying_config();
        let mut direct = DirectSink::new(&volume, &config);
        let mut ctx = CopyContext::new(&config);

        let node = volume.open_node(&first).unwrap();
        let mut stream = volume.open_stream(&node).unwrap();
        let mut handle = flaky(3);
        let record = direct.copy_contents(&mut stream, &mut handle, &mut ctx);

        assert_eq!(record.status, FileStatus::Partial);
        assert_eq!(record.bytes_copied, 0);
        assert!(handle.writer.written.is_empty());
        assert_eq!(ctx.stats().retries, 2);
        assert_eq!(ctx.stats().errors, 1);
        assert_eq!(ctx.failures()[0].kind, crate::error::FailureKind::Sink);

        let node = volume.open_node(&second).unwrap();
        let metadata = volume.metadata(&second).unwrap();
        let dest = temp_dir.path().join("second.txt");
        direct
            .add_file(
                FileEntry {
                    path: dest.to_str().unwrap(),
                    node: &node,
                    node_ref: &second,
                    metadata: &metadata,
                },
                &mut ctx,
            )
            .unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"fine");
        assert_eq!(ctx.stats().errors, 1);
    }

    #[test]
    fn test_missing_parent_is_a_create_error() {
        let temp_dir = TempDir::new().unwrap();
        let volume = MemoryVolume::new("empty");
        let path = temp_dir.path().join("absent/f.txt");
        assert!(matches!(
            sink(&volume, ExistingEntries::Fail).begin_file(path.to_str().unwrap()),
            Err(SinkError::CreateFile { .. })
        ));
    }
}
