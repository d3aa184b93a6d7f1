//! Depth-first traversal of a source subtree
//!
//! The walker enumerates entries in the order the provider returns them and
//! hands every directory and file to a `Sink`. Problems with a single entry
//! are recorded in the `CopyContext` and the walk moves on to the next
//! sibling. Only the destination root can fail the walk as a whole.

use crate::context::CopyContext;
use crate::error::CopyError;
use crate::path::PathAccumulator;
use crate::sink::{FileEntry, Sink};
use crate::volume::{DirEntry, EntryKind, NodeMetadata, Volume};

pub struct Walker<'v, V: Volume> {
    volume: &'v V,
    max_path_length: usize,
}

impl<'v, V: Volume> Walker<'v, V> {
    pub fn new(volume: &'v V, max_path_length: usize) -> Self {
        Self {
            volume,
            max_path_length,
        }
    }

    /// Copy the directory `root` to `dest_root` through `sink`.
    ///
    /// An empty `dest_root` places the entries at the top level of the sink
    /// without materializing a root directory.
    pub fn walk<S: Sink<V>>(
        &self,
        root: &V::NodeRef,
        dest_root: &str,
        sink: &mut S,
        ctx: &mut CopyContext,
    ) -> Result<(), CopyError> {
        let node = self.open_root(root, dest_root)?;
        self.walk_opened(root, &node, dest_root, sink, ctx)
    }

    /// Open the source root and make sure `dest_root` fits the path buffer.
    ///
    /// Nothing is written anywhere, so callers can run this before creating
    /// the destination.
    pub fn open_root(&self, root: &V::NodeRef, dest_root: &str) -> Result<V::Node, CopyError> {
        let node = self
            .volume
            .open_node(root)
            .map_err(|source| CopyError::HandleOpenFailed {
                path: format!("{:?}", root),
                source,
            })?;
        PathAccumulator::new(self.max_path_length).check(dest_root)?;
        Ok(node)
    }

    /// Walk a root already opened with `open_root`
    pub fn walk_opened<S: Sink<V>>(
        &self,
        root: &V::NodeRef,
        node: &V::Node,
        dest_root: &str,
        sink: &mut S,
        ctx: &mut CopyContext,
    ) -> Result<(), CopyError> {
        let mut path = PathAccumulator::new(self.max_path_length);

        if dest_root.is_empty() {
            self.visit_directory(node, &mut path, sink, ctx);
            return Ok(());
        }

        let metadata = self
            .volume
            .metadata(root)
            .unwrap_or_else(|_| NodeMetadata::unknown(EntryKind::Directory));
        let mut scope = path.enter(dest_root)?;
        sink.make_directory(scope.current(), &metadata)
            .map_err(|err| CopyError::fatal_target(scope.entry_path(), err))?;
        ctx.directory_created(scope.current());
        self.visit_directory(node, &mut scope, sink, ctx);
        Ok(())
    }

    fn visit_directory<S: Sink<V>>(
        &self,
        dir: &V::Node,
        path: &mut PathAccumulator,
        sink: &mut S,
        ctx: &mut CopyContext,
    ) {
        // the directory itself already exists at the destination
        let entries = match self.volume.entries(dir) {
            Ok(entries) => entries,
            Err(source) => {
                let failed = CopyError::HandleOpenFailed {
                    path: path.current().to_string(),
                    source,
                };
                ctx.note_failure(path.current(), failed);
                return;
            }
        };

        for entry in entries {
            match entry {
                Ok(entry) => self.visit_entry(&entry, path, sink, ctx),
                Err(source) => {
                    let failed = CopyError::HandleOpenFailed {
                        path: path.current().to_string(),
                        source,
                    };
                    ctx.skip_entry(path.current(), failed);
                }
            }
        }
    }

    fn visit_entry<S: Sink<V>>(
        &self,
        entry: &DirEntry<V::NodeRef>,
        path: &mut PathAccumulator,
        sink: &mut S,
        ctx: &mut CopyContext,
    ) {
        if entry.name_kind.is_short_alias() {
            tracing::trace!("Skipping short name {:?} in {}", entry.name, path.current());
            return;
        }

        let name = match entry.name.decode() {
            Some(name) if is_representable(&name) => name,
            _ => {
                let parent = path.current().to_string();
                tracing::debug!("Undecodable name {:?} in {}", entry.name, parent);
                ctx.skip_entry(&parent, CopyError::NameUndecodable { parent: parent.clone() });
                return;
            }
        };
        if name == "." || name == ".." {
            return;
        }

        match entry.kind {
            EntryKind::Directory => self.copy_directory(entry, &name, path, sink, ctx),
            EntryKind::File => self.copy_file(entry, &name, path, sink, ctx),
            EntryKind::Other => {
                ctx.stats_mut().skipped_entries += 1;
                tracing::debug!("Skipping special entry {}{}", path.current(), name);
            }
        }
    }

    fn copy_directory<S: Sink<V>>(
        &self,
        entry: &DirEntry<V::NodeRef>,
        name: &str,
        path: &mut PathAccumulator,
        sink: &mut S,
        ctx: &mut CopyContext,
    ) {
        let mut scope = match path.enter(name) {
            Ok(scope) => scope,
            Err(err) => {
                ctx.skip_entry(&err.path(), err.into());
                return;
            }
        };

        let node = match self.volume.open_node(&entry.node) {
            Ok(node) => node,
            Err(source) => {
                let failed_path = scope.entry_path().to_string();
                ctx.skip_entry(
                    &failed_path,
                    CopyError::HandleOpenFailed {
                        path: failed_path.clone(),
                        source,
                    },
                );
                return;
            }
        };
        let metadata = self
            .volume
            .metadata(&entry.node)
            .unwrap_or_else(|_| NodeMetadata::unknown(EntryKind::Directory));

        if let Err(err) = sink.make_directory(scope.current(), &metadata) {
            ctx.skip_entry(scope.current(), err.into());
            return;
        }
        ctx.directory_created(scope.current());
        self.visit_directory(&node, &mut scope, sink, ctx);
    }

    fn copy_file<S: Sink<V>>(
        &self,
        entry: &DirEntry<V::NodeRef>,
        name: &str,
        path: &mut PathAccumulator,
        sink: &mut S,
        ctx: &mut CopyContext,
    ) {
        let scope = match path.enter(name) {
            Ok(scope) => scope,
            Err(err) => {
                ctx.skip_entry(&err.path(), err.into());
                return;
            }
        };

        let node = match self.volume.open_node(&entry.node) {
            Ok(node) => node,
            Err(source) => {
                let failed_path = scope.entry_path().to_string();
                ctx.skip_entry(
                    &failed_path,
                    CopyError::HandleOpenFailed {
                        path: failed_path.clone(),
                        source,
                    },
                );
                return;
            }
        };
        let metadata = match self.volume.metadata(&entry.node) {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::debug!("No metadata for {}: {}", scope.entry_path(), err);
                NodeMetadata::unknown(EntryKind::File)
            }
        };

        let file = FileEntry {
            path: scope.entry_path(),
            node: &node,
            node_ref: &entry.node,
            metadata: &metadata,
        };
        if let Err(err) = sink.add_file(file, ctx) {
            ctx.skip_entry(scope.entry_path(), err);
        }
    }
}

/// A name that can be used as a single destination path segment
fn is_representable(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CopyConfig;
    use crate::error::SinkError;
    use crate::volume::{Faults, MemoryVolume, RawName};

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Directory(String),
        File(String),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<Event>,
        reject: Option<String>,
    }

    impl<V: Volume> Sink<V> for RecordingSink {
        fn make_directory(&mut self, path: &str, _metadata: &NodeMetadata) -> Result<(), SinkError> {
            if self.reject.as_deref() == Some(path) {
                return Err(SinkError::AlreadyExists { path: path.to_string() });
            }
            self.events.push(Event::Directory(path.to_string()));
            Ok(())
        }

        fn add_file(&mut self, file: FileEntry<'_, V>, _ctx: &mut CopyContext) -> Result<(), CopyError> {
            self.events.push(Event::File(file.path.to_string()));
            Ok(())
        }

        fn finish(self, _ctx: &mut CopyContext) -> Result<(), CopyError> {
            Ok(())
        }
    }

    fn walk(volume: &MemoryVolume, dest_root: &str, capacity: usize, sink: &mut RecordingSink) -> CopyContext {
        let mut ctx = CopyContext::new(&CopyConfig::default());
        Walker::new(volume, capacity)
            .walk(&volume.root_id(), dest_root, sink, &mut ctx)
            .unwrap();
        ctx
    }

    #[test]
    fn test_pre_order_in_provider_order() {
        let mut volume = MemoryVolume::new("walk");
        let root = volume.root_id();
        let b = volume.add_dir(root, "B");
        volume.add_file(root, "f.txt", b"abc".to_vec());
        volume.add_file(b, "inner", b"x".to_vec());
        volume.add_file(root, "a.txt", b"y".to_vec());

        let mut sink = RecordingSink::default();
        let ctx = walk(&volume, "A", 1024, &mut sink);

        assert_eq!(
            sink.events,
            vec![
                Event::Directory("A/".to_string()),
                Event::Directory("A/B/".to_string()),
                Event::File("A/B/inner".to_string()),
                Event::File("A/f.txt".to_string()),
                Event::File("A/a.txt".to_string()),
            ]
        );
        assert_eq!(ctx.stats().directories_created, 2);
        assert_eq!(ctx.stats().skipped_entries, 0);
        assert_eq!(volume.open_handles(), 0);
    }

    #[test]
    fn test_empty_root_is_not_materialized() {
        let mut volume = MemoryVolume::new("walk");
        volume.add_file(volume.root_id(), "top.txt", b"t".to_vec());

        let mut sink = RecordingSink::default();
        let ctx = walk(&volume, "", 1024, &mut sink);

        assert_eq!(sink.events, vec![Event::File("top.txt".to_string())]);
        assert_eq!(ctx.stats().directories_created, 0);
    }

    #[test]
    fn test_skips_aliases_pseudo_entries_and_bad_names() {
        let mut volume = MemoryVolume::new("walk");
        let root = volume.root_id();
        let long = volume.add_file(root, "LongFileName.txt", b"abc".to_vec());
        volume.add_short_name(root, long, "LONGFI~1.TXT");
        volume.add_raw_entry(root, RawName::from_utf16(&[0xD800]), EntryKind::File, b"bad".to_vec());
        volume.add_raw_entry(root, RawName::from_utf8("a/b"), EntryKind::File, b"bad".to_vec());
        volume.add_special(root, "fifo");

        let mut sink = RecordingSink::default();
        let ctx = walk(&volume, "out", 1024, &mut sink);

        assert_eq!(
            sink.events,
            vec![
                Event::Directory("out/".to_string()),
                Event::File("out/LongFileName.txt".to_string()),
            ]
        );
        // two bad names and the special entry
        assert_eq!(ctx.stats().skipped_entries, 3);
        assert_eq!(ctx.failures().len(), 2);
        assert!(ctx.failures().iter().all(|failure| failure.path == "out/"));
    }

    #[test]
    fn test_overflow_skips_only_the_deep_subtree() {
        let mut volume = MemoryVolume::new("walk");
        let root = volume.root_id();
        let deep = volume.add_dir(root, "a-rather-long-directory-name");
        volume.add_file(deep, "lost.txt", b"x".to_vec());
        volume.add_file(root, "kept.txt", b"y".to_vec());

        let mut sink = RecordingSink::default();
        let ctx = walk(&volume, "r", 16, &mut sink);

        assert_eq!(
            sink.events,
            vec![Event::Directory("r/".to_string()), Event::File("r/kept.txt".to_string())]
        );
        assert_eq!(ctx.stats().skipped_entries, 1);
        assert_eq!(ctx.failures()[0].kind, crate::error::FailureKind::PathTooLong);
        assert_eq!(volume.open_handles(), 0);
    }

    #[test]
    fn test_sink_failure_skips_subtree() {
        let mut volume = MemoryVolume::new("walk");
        let root = volume.root_id();
        let sub = volume.add_dir(root, "sub");
        volume.add_file(sub, "hidden.txt", b"x".to_vec());
        volume.add_file(root, "after.txt", b"y".to_vec());

        let mut sink = RecordingSink {
            reject: Some("d/sub/".to_string()),
            ..Default::default()
        };
        let ctx = walk(&volume, "d", 1024, &mut sink);

        assert_eq!(
            sink.events,
            vec![Event::Directory("d/".to_string()), Event::File("d/after.txt".to_string())]
        );
        assert_eq!(ctx.stats().skipped_entries, 1);
    }

    #[test]
    fn test_unopenable_entry_is_skipped() {
        let mut volume = MemoryVolume::new("walk");
        let root = volume.root_id();
        let broken = volume.add_file(root, "broken", b"x".to_vec());
        volume.set_faults(
            broken,
            Faults {
                open: true,
                ..Default::default()
            },
        );
        volume.add_file(root, "fine", b"y".to_vec());

        let mut sink = RecordingSink::default();
        let ctx = walk(&volume, "d", 1024, &mut sink);

        assert_eq!(sink.events.len(), 2);
        assert_eq!(ctx.failures()[0].path, "d/broken");
        assert_eq!(ctx.failures()[0].kind, crate::error::FailureKind::HandleOpenFailed);
    }

    #[test]
    fn test_overflow_is_detected_before_opening() {
        let mut volume = MemoryVolume::new("walk");
        let root = volume.root_id();
        let deep = volume.add_dir(root, "a-rather-long-directory-name");
        volume.set_faults(
            deep,
            Faults {
                open: true,
                ..Default::default()
            },
        );

        let mut sink = RecordingSink::default();
        let ctx = walk(&volume, "r", 16, &mut sink);

        assert_eq!(ctx.failures().len(), 1);
        assert_eq!(ctx.failures()[0].kind, crate::error::FailureKind::PathTooLong);
        assert_eq!(ctx.failures()[0].path, "r/a-rather-long-directory-name");
    }

    #[test]
    fn test_unlistable_directory_is_kept_but_reported() {
        let mut volume = MemoryVolume::new("walk");
        let root = volume.root_id();
        let locked = volume.add_dir(root, "locked");
        volume.add_file(locked, "unseen.txt", b"x".to_vec());
        volume.set_faults(
            locked,
            Faults {
                listing: true,
                ..Default::default()
            },
        );
        volume.add_file(root, "seen.txt", b"y".to_vec());

        let mut sink = RecordingSink::default();
        let ctx = walk(&volume, "d", 1024, &mut sink);

        assert_eq!(
            sink.events,
            vec![
                Event::Directory("d/".to_string()),
                Event::Directory("d/locked/".to_string()),
                Event::File("d/seen.txt".to_string()),
            ]
        );
        assert_eq!(ctx.stats().directories_created, 2);
        assert_eq!(ctx.stats().skipped_entries, 0);
        assert_eq!(ctx.failures()[0].path, "d/locked/");
        assert_eq!(ctx.failures()[0].kind, crate::error::FailureKind::HandleOpenFailed);
    }

    #[test]
    fn test_root_overflow_is_an_error() {
        let volume = MemoryVolume::new("walk");
        let mut sink = RecordingSink::default();
        let mut ctx = CopyContext::new(&CopyConfig::default());
        let result = Walker::new(&volume, 4).walk(&volume.root_id(), "toolong", &mut sink, &mut ctx);
        assert!(matches!(result, Err(CopyError::PathTooLong(_))));
        assert!(sink.events.is_empty());
    }
}
