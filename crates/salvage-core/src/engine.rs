//! Copy engine: caller-facing entry point tying walker, sinks and reporting
//! together

use chrono::Utc;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::CopyConfig;
use crate::context::{CopyContext, ProgressCallback};
use crate::error::CopyError;
use crate::report::{CopyProgress, CopyReport};
use crate::sink::{ArchiveSink, DirectSink, Sink};
use crate::volume::{EntryKind, Volume, VolumeError};
use crate::walker::Walker;

/// Where a copied subtree ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyTarget {
    /// Loose files under a new directory at this path
    Directory(PathBuf),
    /// A new ZIP archive at `path`, with entries under `root`
    /// (an empty `root` puts them at the top level)
    Archive { path: PathBuf, root: String },
}

impl fmt::Display for CopyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyTarget::Directory(path) => write!(f, "{}", path.display()),
            CopyTarget::Archive { path, root } if root.is_empty() => write!(f, "{}", path.display()),
            CopyTarget::Archive { path, root } => write!(f, "{}:{}", path.display(), root),
        }
    }
}

/// Copies directory subtrees off a volume
pub struct CopyEngine<'v, V: Volume> {
    volume: &'v V,
    config: CopyConfig,
    progress_callback: Option<ProgressCallback>,
}

impl<'v, V: Volume> CopyEngine<'v, V> {
    pub fn new(volume: &'v V, config: CopyConfig) -> Self {
        Self {
            volume,
            config,
            progress_callback: None,
        }
    }

    pub fn config(&self) -> &CopyConfig {
        &self.config
    }

    /// Set progress callback, invoked after each materialized entry
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&CopyProgress) + Send + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    /// Resolve `source_path` on the volume and copy it
    pub fn copy_path(&mut self, source_path: &str, target: &CopyTarget) -> Result<CopyReport, CopyError> {
        let source = self
            .volume
            .resolve(source_path)
            .map_err(|source| CopyError::HandleOpenFailed {
                path: source_path.to_string(),
                source,
            })?;
        self.run(&source, source_path.to_string(), target)
    }

    /// Copy the directory `source` to `target`.
    ///
    /// Per-entry problems are recorded in the returned report. An error is
    /// returned only when the source root cannot be opened, the destination
    /// is unavailable, or the configuration is invalid.
    pub fn copy_tree(&mut self, source: &V::NodeRef, target: &CopyTarget) -> Result<CopyReport, CopyError> {
        self.run(source, format!("{:?}", source), target)
    }

    fn run(&mut self, source: &V::NodeRef, label: String, target: &CopyTarget) -> Result<CopyReport, CopyError> {
        self.config.validate()?;

        let id = Uuid::new_v4();
        let span = tracing::info_span!("copy", %id);
        let _guard = span.enter();
        let started_at = Utc::now();

        let metadata = self
            .volume
            .metadata(source)
            .map_err(|err| CopyError::HandleOpenFailed {
                path: label.clone(),
                source: err,
            })?;
        if metadata.kind != EntryKind::Directory {
            return Err(CopyError::HandleOpenFailed {
                path: label.clone(),
                source: VolumeError::NotADirectory(label),
            });
        }

        tracing::info!("🔍 Copying {} from {} to {}", label, self.volume.info().name, target);

        let mut ctx = CopyContext::new(&self.config);
        ctx.set_progress_callback(self.progress_callback.take());
        let result = self.copy_into(source, target, &mut ctx);
        self.progress_callback = ctx.take_progress_callback();
        result?;

        let (statistics, files, failures) = ctx.into_parts();
        let report = CopyReport {
            id,
            source: label,
            target: target.to_string(),
            started_at,
            finished_at: Utc::now(),
            statistics,
            files,
            failures,
        };

        if report.is_complete() {
            tracing::info!("✅ Copy complete: {}", report.statistics);
        } else {
            tracing::warn!("⚠️  Copy finished with problems: {}", report.statistics);
        }
        Ok(report)
    }

    fn copy_into(&self, source: &V::NodeRef, target: &CopyTarget, ctx: &mut CopyContext) -> Result<(), CopyError> {
        let walker = Walker::new(self.volume, self.config.max_path_length);
        match target {
            CopyTarget::Directory(path) => {
                let root = path
                    .to_str()
                    .ok_or_else(|| CopyError::fatal_target(path, "destination path is not valid UTF-8"))?;
                let node = walker.open_root(source, root)?;
                let mut sink = DirectSink::new(self.volume, &self.config);
                walker.walk_opened(source, &node, root, &mut sink, ctx)?;
                sink.finish(ctx)
            }
            CopyTarget::Archive { path, root } => {
                let node = walker.open_root(source, root)?;
                let mut sink = ArchiveSink::create(self.volume, path, &self.config)?;
                let result = walker
                    .walk_opened(source, &node, root, &mut sink, ctx)
                    .and_then(|()| sink.finish(ctx));
                if result.is_err() {
                    discard_archive(path);
                }
                result
            }
        }
    }
}

/// Remove an archive left behind by a failed copy
fn discard_archive(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed incomplete archive {}", path.display()),
        Err(err) => tracing::warn!("Cannot remove incomplete archive {}: {}", path.display(), err),
    }
}

/// Copy the directory `source` on `volume` to `target` with `config`
pub fn copy_tree<V: Volume>(
    volume: &V,
    source: &V::NodeRef,
    target: &CopyTarget,
    config: CopyConfig,
) -> Result<CopyReport, CopyError> {
    CopyEngine::new(volume, config).copy_tree(source, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::MemoryVolume;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn sample_volume() -> MemoryVolume {
        let mut volume = MemoryVolume::new("sample");
        let root = volume.root_id();
        let docs = volume.add_dir(root, "docs");
        volume.add_file(docs, "readme.txt", b"hello".to_vec());
        volume
    }

    #[test]
    fn test_target_display() {
        let archive = CopyTarget::Archive {
            path: PathBuf::from("/tmp/out.zip"),
            root: "docs".to_string(),
        };
        assert_eq!(archive.to_string(), "/tmp/out.zip:docs");
        assert_eq!(CopyTarget::Directory(PathBuf::from("/tmp/out")).to_string(), "/tmp/out");
    }

    #[test]
    fn test_copy_path_reports_progress() {
        let temp_dir = TempDir::new().unwrap();
        let volume = sample_volume();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut engine = CopyEngine::new(&volume, CopyConfig::default());
        engine.set_progress_callback(move |progress| {
            sink.lock().unwrap().push(progress.current_path.clone());
        });
        let target = CopyTarget::Directory(temp_dir.path().join("docs"));
        let report = engine.copy_path("/docs", &target).unwrap();

        assert!(report.is_complete());
        assert_eq!(report.source, "/docs");
        assert_eq!(report.statistics.files_copied, 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].ends_with("docs/readme.txt"));
    }

    #[test]
    fn test_file_source_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let volume = sample_volume();
        let mut engine = CopyEngine::new(&volume, CopyConfig::default());
        let target = CopyTarget::Directory(temp_dir.path().join("out"));

        let result = engine.copy_path("/docs/readme.txt", &target);
        assert!(matches!(
            result,
            Err(CopyError::HandleOpenFailed {
                source: VolumeError::NotADirectory(_),
                ..
            })
        ));
        assert!(!temp_dir.path().join("out").exists());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let volume = sample_volume();
        let config = CopyConfig {
            chunk_size: 0,
            ..Default::default()
        };
        let result = copy_tree(
            &volume,
            &volume.root_id(),
            &CopyTarget::Directory(PathBuf::from("unused")),
            config,
        );
        assert!(matches!(result, Err(CopyError::InvalidConfig(_))));
    }
}
