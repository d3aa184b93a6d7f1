//! Interactive recovery shell
//!
//! Reads one command per line, split on the first space into a command name
//! and its arguments. Errors from a command are printed and the session goes
//! on; only end of input or `quit` ends it.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use salvage_core::{CopyConfig, CopyEngine, CopyTarget, EntryKind, Volume, MAX_PATH_LENGTH};

use crate::format::{format_size, list_directory, write_summary};
use crate::paths::{base_name, resolve};

const COMMANDS: &[(&str, &str)] = &[
	("ls", "Lists files and folders in a directory"),
	("cd", "Changes the current directory to <folder>"),
	("cp", "Copies files from cwd to <destination>"),
	("cpz", "Copies files from cwd to <dest> zip file"),
	("info", "Displays information about the volume"),
	("help", "Lists the available commands"),
	("quit", "Exits the application."),
];

pub struct Shell<'v, V: Volume> {
	volume: &'v V,
	config: CopyConfig,
	cwd: String,
	running: bool,
}

impl<'v, V: Volume> Shell<'v, V> {
	pub fn new(volume: &'v V, config: CopyConfig) -> Self {
		Self {
			volume,
			config,
			cwd: "/".to_string(),
			running: true,
		}
	}

	pub fn cwd(&self) -> &str {
		&self.cwd
	}

	/// Process commands until `quit` or end of input
	pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W, prompt: bool) -> Result<()> {
		let mut lines = input.lines();
		while self.running {
			if prompt {
				write!(out, "{}> ", self.cwd)?;
				out.flush()?;
			}
			let Some(line) = lines.next() else {
				break;
			};
			let line = line?;
			let line = line.trim();
			if line.is_empty() {
				continue;
			}
			let (command, arguments) = line.split_once(' ').unwrap_or((line, ""));
			self.dispatch(command, arguments.trim(), out)?;
		}
		Ok(())
	}

	/// Run one command. Only failures to write `out` are returned.
	pub fn dispatch<W: Write>(&mut self, command: &str, arguments: &str, out: &mut W) -> Result<()> {
		let result = match command {
			"ls" => self.ls(arguments, out),
			"cd" => self.cd(arguments, out),
			"cp" => self.copy(arguments, false, out),
			"cpz" => self.copy(arguments, true, out),
			"info" => self.info(out),
			"help" => self.help(out),
			"quit" => {
				self.running = false;
				Ok(())
			}
			_ => {
				writeln!(out, "Unrecognised command: {}", command)?;
				Ok(())
			}
		};
		if let Err(err) = result {
			writeln!(out, "Error: {:#}", err)?;
		}
		Ok(())
	}

	fn resolve_dir(&self, arguments: &str) -> Result<(String, V::NodeRef)> {
		let path = resolve(&self.cwd, arguments, MAX_PATH_LENGTH)
			.ok_or_else(|| anyhow!("path {} is longer than the maximum allowed", arguments))?;
		let node = self
			.volume
			.resolve(&path)
			.with_context(|| format!("can't find path {}", path))?;
		let metadata = self.volume.metadata(&node)?;
		if metadata.kind != EntryKind::Directory {
			bail!("{} isn't a directory", path);
		}
		Ok((path, node))
	}

	fn ls<W: Write>(&mut self, arguments: &str, out: &mut W) -> Result<()> {
		let (path, node) = self.resolve_dir(arguments)?;
		if !arguments.is_empty() {
			writeln!(out, "Listing {}", path)?;
		}
		list_directory(self.volume, &node, out)
	}

	fn cd<W: Write>(&mut self, arguments: &str, out: &mut W) -> Result<()> {
		if arguments.is_empty() {
			writeln!(out, "Usage: cd <directory>")?;
			return Ok(());
		}
		let (path, _) = self.resolve_dir(arguments)?;
		self.cwd = path;
		Ok(())
	}

	fn copy<W: Write>(&mut self, arguments: &str, archive: bool, out: &mut W) -> Result<()> {
		if arguments.is_empty() {
			let usage = if archive { "Usage: cpz <dest.zip>" } else { "Usage: cp <destination>" };
			writeln!(out, "{}", usage)?;
			return Ok(());
		}

		let dest = PathBuf::from(arguments);
		let target = if archive {
			CopyTarget::Archive {
				path: dest,
				root: base_name(&self.cwd).to_string(),
			}
		} else {
			CopyTarget::Directory(dest)
		};
		let report = CopyEngine::new(self.volume, self.config.clone()).copy_path(&self.cwd, &target)?;
		write_summary(out, &report)?;
		Ok(())
	}

	fn info<W: Write>(&mut self, out: &mut W) -> Result<()> {
		let info = self.volume.info();
		writeln!(out, "📋 Volume: {}", info.name)?;
		writeln!(out, "🔧 Provider: {}", info.provider)?;
		if let Some(total) = info.total_bytes {
			writeln!(out, "💾 Size: {}", format_size(total))?;
		}
		writeln!(out, "🔒 Read only: {}", if info.read_only { "yes" } else { "no" })?;
		Ok(())
	}

	fn help<W: Write>(&mut self, out: &mut W) -> Result<()> {
		for (name, help) in COMMANDS {
			writeln!(out, "{:<6}{}", name, help)?;
		}
		Ok(())
	}
}
