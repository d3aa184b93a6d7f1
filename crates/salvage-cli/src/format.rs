//! Text output shared by the subcommands and the shell

use std::io::{self, Write};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use salvage_core::{CopyReport, EntryKind, NodeMetadata, Volume};

const SIZE_PREFIXES: [&str; 7] = ["B", "K", "M", "G", "T", "P", "E"];

/// Human readable size with one decimal, e.g. `1.5K`
pub fn format_size(size: u64) -> String {
	let mut value = size as f64;
	let mut prefix = 0;
	while value >= 1024.0 && prefix < SIZE_PREFIXES.len() - 1 {
		value /= 1024.0;
		prefix += 1;
	}
	format!("{:.1}{}", value, SIZE_PREFIXES[prefix])
}

pub fn format_time(time: Option<DateTime<Utc>>) -> String {
	match time {
		Some(time) => time.with_timezone(&Local).format("%D %R").to_string(),
		None => "--".to_string(),
	}
}

/// One listing row: created, modified, size and name
pub fn format_row(metadata: &NodeMetadata, name: &str) -> String {
	let created = format_time(metadata.created);
	let modified = format_time(metadata.modified);
	if metadata.kind == EntryKind::Directory {
		format!("{}\t{}\t--\t{}/", created, modified, name)
	} else {
		format!("{}\t{}\t{}\t{}", created, modified, format_size(metadata.size), name)
	}
}

/// List a directory in provider order
pub fn list_directory<V: Volume, W: Write>(volume: &V, dir: &V::NodeRef, out: &mut W) -> Result<()> {
	let node = volume.open_node(dir)?;
	for entry in volume.entries(&node)? {
		let entry = match entry {
			Ok(entry) => entry,
			Err(err) => {
				writeln!(out, "Error: {}", err)?;
				continue;
			}
		};
		if entry.name_kind.is_short_alias() {
			continue;
		}
		let Some(name) = entry.name.decode() else {
			writeln!(out, "Error: the name {:?} can't be represented", entry.name)?;
			continue;
		};
		if name == "." || name == ".." {
			continue;
		}

		let metadata = volume
			.metadata(&entry.node)
			.unwrap_or_else(|_| NodeMetadata::unknown(entry.kind));
		writeln!(out, "{}", format_row(&metadata, &name))?;
	}
	Ok(())
}

pub fn write_summary<W: Write>(out: &mut W, report: &CopyReport) -> io::Result<()> {
	let stats = &report.statistics;
	if report.is_complete() {
		writeln!(out, "✅ Copy completed successfully!")?;
	} else {
		writeln!(out, "⚠️  Copy finished with problems")?;
	}
	writeln!(out, "📊 Report ID: {}", report.id)?;
	writeln!(out, "📁 Target: {}", report.target)?;
	writeln!(out, "📄 Files copied: {}", stats.files_copied)?;
	writeln!(out, "📂 Directories created: {}", stats.directories_created)?;
	writeln!(out, "💾 Bytes copied: {}", format_size(stats.bytes_copied))?;
	writeln!(out, "🔄 Retries: {}", stats.retries)?;
	writeln!(out, "❌ Errors: {}", stats.errors)?;
	writeln!(out, "⏭️  Skipped entries: {}", stats.skipped_entries)?;
	writeln!(out, "🧩 Partial files: {}", stats.partial_files)?;
	for failure in &report.failures {
		writeln!(out, "   ⚠️  {}: {}", failure.path, failure.message)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use salvage_core::MemoryVolume;

	#[test]
	fn test_format_size() {
		assert_eq!(format_size(0), "0.0B");
		assert_eq!(format_size(512), "512.0B");
		assert_eq!(format_size(1536), "1.5K");
		assert_eq!(format_size(5 * 1024 * 1024), "5.0M");
		assert_eq!(format_size(u64::MAX), "16.0E");
	}

	#[test]
	fn test_rows() {
		let mut file = NodeMetadata::unknown(EntryKind::File);
		file.size = 2048;
		assert_eq!(format_row(&file, "f.txt"), "--\t--\t2.0K\tf.txt");
		assert_eq!(
			format_row(&NodeMetadata::unknown(EntryKind::Directory), "docs"),
			"--\t--\t--\tdocs/"
		);
	}

	#[test]
	fn test_listing_skips_aliases_and_pseudo_entries() {
		let mut volume = MemoryVolume::new("ls");
		let root = volume.root_id();
		volume.add_dir(root, "Documents");
		let file = volume.add_file(root, "LongName.txt", b"abc".to_vec());
		volume.add_short_name(root, file, "LONGNA~1.TXT");

		let mut out = Vec::new();
		list_directory(&volume, &root, &mut out).unwrap();
		let text = String::from_utf8(out).unwrap();

		let lines: Vec<&str> = text.lines().collect();
		assert_eq!(lines.len(), 2);
		assert!(lines[0].ends_with("\tDocuments/"));
		assert!(lines[1].ends_with("\t3.0B\tLongName.txt"));
	}
}
