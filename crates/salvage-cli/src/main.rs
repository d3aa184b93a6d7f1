use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use salvage_core::{
	ArchiveCompression, CopyConfig, CopyEngine, CopyTarget, EntryKind, ExistingEntries, GapPolicy, HostVolume,
	RetryPolicy, Volume, DEFAULT_CHUNK_SIZE, MAX_PATH_LENGTH,
};
use tracing_subscriber::EnvFilter;

mod format;
mod paths;
mod shell;

use format::{format_size, list_directory, write_summary};
use shell::Shell;

#[derive(Parser, Debug)]
#[command(name = "salvage", version, about = "Salvage - copy data off damaged volumes")]
struct Cli {
	/// Log per-entry details
	#[arg(short, long, global = true)]
	verbose: bool,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Show information about a volume
	Info {
		/// Mount point or directory of the source volume
		source: PathBuf,
	},
	/// List a directory on a volume
	Ls {
		source: PathBuf,
		#[arg(default_value = "/")]
		path: String,
	},
	/// Copy a directory subtree to a new directory
	Copy {
		source: PathBuf,
		/// Directory on the volume to copy
		path: String,
		/// Destination directory (created by the copy)
		dest: PathBuf,
		#[command(flatten)]
		options: CopyOptions,
	},
	/// Copy a directory subtree into a new zip archive
	Archive {
		source: PathBuf,
		path: String,
		/// Archive to create; must not exist
		dest: PathBuf,
		/// Top level directory inside the archive (defaults to the copied directory's name)
		#[arg(long)]
		root: Option<String>,
		/// Store entries without compression
		#[arg(long)]
		store: bool,
		#[command(flatten)]
		options: CopyOptions,
	},
	/// Browse a volume interactively
	Shell {
		source: PathBuf,
		#[command(flatten)]
		options: CopyOptions,
	},
}

#[derive(Args, Debug)]
struct CopyOptions {
	/// Additional attempts for each failed read or write
	#[arg(long, default_value_t = 3)]
	retries: u32,
	/// Read chunk size in bytes
	#[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
	chunk_size: usize,
	/// Reuse existing directories and overwrite existing files
	#[arg(long)]
	merge: bool,
	/// Write zeros in place of unreadable regions
	#[arg(long)]
	zero_fill: bool,
	/// Record a SHA-256 of every copied file
	#[arg(long)]
	digests: bool,
	/// Save the copy report as JSON
	#[arg(long)]
	report: Option<PathBuf>,
	/// Print the copy report as JSON instead of a summary
	#[arg(long)]
	json: bool,
}

impl CopyOptions {
	fn config(&self, compression: ArchiveCompression) -> CopyConfig {
		CopyConfig {
			retry: RetryPolicy {
				max_retries: self.retries,
			},
			chunk_size: self.chunk_size,
			max_path_length: MAX_PATH_LENGTH,
			on_existing: if self.merge { ExistingEntries::Merge } else { ExistingEntries::Fail },
			gaps: if self.zero_fill { GapPolicy::ZeroFill } else { GapPolicy::Skip },
			compute_digests: self.digests,
			compression,
		}
	}
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging(cli.verbose);

	match cli.command {
		Commands::Info { source } => {
			let volume = open_volume(&source)?;
			let info = volume.info();
			println!("📋 Volume Information:");
			println!("📁 Name: {}", info.name);
			println!("🔧 Provider: {}", info.provider);
			if let Some(total) = info.total_bytes {
				println!("💾 Size: {}", format_size(total));
			}
			println!("🔒 Read only: {}", if info.read_only { "yes" } else { "no" });
		}
		Commands::Ls { source, path } => {
			let volume = open_volume(&source)?;
			let node = volume
				.resolve(&path)
				.with_context(|| format!("can't find path {}", path))?;
			let metadata = volume.metadata(&node)?;
			if metadata.kind != EntryKind::Directory {
				anyhow::bail!("{} isn't a directory", path);
			}
			let stdout = io::stdout();
			let mut out = stdout.lock();
			list_directory(&volume, &node, &mut out)?;
			out.flush()?;
		}
		Commands::Copy { source, path, dest, options } => {
			let volume = open_volume(&source)?;
			let config = options.config(ArchiveCompression::default());
			run_copy(&volume, &path, CopyTarget::Directory(dest), config, &options)?;
		}
		Commands::Archive { source, path, dest, root, store, options } => {
			let volume = open_volume(&source)?;
			let compression = if store { ArchiveCompression::Stored } else { ArchiveCompression::Deflated };
			let config = options.config(compression);
			let root = root.unwrap_or_else(|| paths::base_name(&path).to_string());
			run_copy(&volume, &path, CopyTarget::Archive { path: dest, root }, config, &options)?;
		}
		Commands::Shell { source, options } => {
			let volume = open_volume(&source)?;
			let mut shell = Shell::new(&volume, options.config(ArchiveCompression::default()));
			let prompt = atty::is(atty::Stream::Stdin);
			let stdin = io::stdin();
			let stdout = io::stdout();
			let mut out = stdout.lock();
			shell.run(stdin.lock(), &mut out, prompt)?;
		}
	}
	Ok(())
}

fn init_logging(verbose: bool) {
	let default_level = if verbose { "debug" } else { "warn" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.init();
}

fn open_volume(source: &Path) -> Result<HostVolume> {
	let volume = HostVolume::open(source).with_context(|| format!("cannot open volume at {}", source.display()))?;
	tracing::debug!("Opened volume {}", source.display());
	Ok(volume)
}

fn run_copy<V: Volume>(
	volume: &V,
	path: &str,
	target: CopyTarget,
	config: CopyConfig,
	options: &CopyOptions,
) -> Result<()> {
	println!("🔍 Copying {} to {}", path, target);

	let mut engine = CopyEngine::new(volume, config);
	let spinner = progress_spinner();
	if let Some(bar) = spinner.clone() {
		engine.set_progress_callback(move |progress| {
			bar.set_message(format!(
				"{} files, {} directories, {} ({})",
				progress.files_copied,
				progress.directories_created,
				format_size(progress.bytes_copied),
				progress.current_path
			));
		});
	}

	let result = engine.copy_path(path, &target);
	if let Some(bar) = spinner {
		bar.finish_and_clear();
	}
	let report = result.with_context(|| format!("copy of {} failed", path))?;

	if options.json {
		println!("{}", report.to_json()?);
	} else {
		let stdout = io::stdout();
		write_summary(&mut stdout.lock(), &report)?;
	}
	if let Some(report_path) = &options.report {
		report
			.write_json(report_path)
			.with_context(|| format!("cannot write report to {}", report_path.display()))?;
		println!("📝 Report saved to {}", report_path.display());
	}
	Ok(())
}

/// Spinner on stderr, only when it is a terminal
fn progress_spinner() -> Option<ProgressBar> {
	if !atty::is(atty::Stream::Stderr) {
		return None;
	}
	let bar = ProgressBar::new_spinner();
	if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
		bar.set_style(style);
	}
	bar.enable_steady_tick(Duration::from_millis(120));
	Some(bar)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_copy_options_map_to_config() {
		let cli = Cli::parse_from([
			"salvage",
			"archive",
			"/mnt/damaged",
			"/docs",
			"out.zip",
			"--store",
			"--retries",
			"5",
			"--merge",
			"--zero-fill",
		]);
		let Commands::Archive { root, store, options, .. } = cli.command else {
			panic!("expected archive command");
		};
		assert!(store);
		assert_eq!(root, None);

		let config = options.config(ArchiveCompression::Stored);
		assert_eq!(config.retry.max_retries, 5);
		assert_eq!(config.on_existing, ExistingEntries::Merge);
		assert_eq!(config.gaps, GapPolicy::ZeroFill);
		assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_cli_definition() {
		use clap::CommandFactory;
		Cli::command().debug_assert();
	}
}
