//! Filesystem operations over the script channel
//!
//! Each operation composes [`Device::run_script`] with a snippet from
//! the [`snippets`] catalog and parses the stdout as a line-oriented
//! record format. File bytes travel base64-encoded in both directions —
//! the REPL channel is not 8-bit clean and contains framing sentinels.
//!
//! A remote exception turns into a typed error here: recognized
//! `OSError` values become [`DeviceError::RemoteOs`] so callers can
//! pattern-match on the errno instead of grepping traceback text.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::device::Device;
use crate::error::{DeviceError, RemoteErrno};
use crate::logging::*;
use crate::repl::{RunOptions, ScriptResponse};

pub mod snippets;

/// One entry from a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
	/// Absolute remote path
	pub filename: String,
	pub is_dir: bool,
	pub size: u64,
}

/// Result of a remote stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatResult {
	pub exists: bool,
	pub is_dir: bool,
	pub size: u64,
	pub atime: u64,
	pub mtime: u64,
}

/// Identity and memory of the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardInfo {
	pub platform: String,
	pub release: String,
	pub version: String,
	pub machine: String,
	pub mem_free: u64,
}

impl Device {
	/// Run a snippet and promote a remote exception to a typed error.
	async fn run_snippet(&self, source: &str) -> Result<ScriptResponse, DeviceError> {
		let opts = RunOptions { disable_dedent: true, ..RunOptions::default() };
		let resp = self.run_script(source, opts).await?;
		if let Some(exception) = &resp.exception {
			if let Some(errno) = RemoteErrno::from_exception(exception) {
				return Err(DeviceError::RemoteOs { errno, traceback: resp.stderr });
			}
			return Err(DeviceError::Script {
				exception: exception.clone(),
				traceback: resp.stderr,
			});
		}
		Ok(resp)
	}

	/// List `dir`, sorted by path. With `recursive`, the whole subtree.
	pub async fn list_files(
		&self,
		dir: &str,
		recursive: bool,
	) -> Result<Vec<FileEntry>, DeviceError> {
		let resp = self.run_snippet(&snippets::list_files(dir, recursive)).await?;
		let mut entries = parse_list_output(&resp.stdout)?;
		entries.sort_by(|a, b| a.filename.cmp(&b.filename));
		Ok(entries)
	}

	/// Stat a remote path. A missing path is `exists: false`, not an error.
	pub async fn stat_path(&self, path: &str) -> Result<StatResult, DeviceError> {
		let resp = self.run_snippet(&snippets::stat_path(path)).await?;
		parse_stat_output(&resp.stdout)
	}

	/// Download a file's bytes.
	pub async fn get_file(&self, path: &str) -> Result<Vec<u8>, DeviceError> {
		let resp = self.run_snippet(&snippets::get_file(path)).await?;
		let mut data = Vec::new();
		for line in resp.stdout.lines() {
			let line = line.trim();
			if line.is_empty() {
				break;
			}
			let chunk = STANDARD.decode(line).map_err(|e| DeviceError::InvalidResponse {
				message: format!("bad base64 chunk in download: {}", e),
			})?;
			data.extend_from_slice(&chunk);
		}
		Ok(data)
	}

	/// Upload `data` to `path`, replacing any existing file.
	pub async fn put_file(&self, path: &str, data: &[u8]) -> Result<(), DeviceError> {
		debug!("[fs] put {} ({} bytes)", path, data.len());
		self.run_snippet(&snippets::put_file(path, data)).await?;
		Ok(())
	}

	/// SHA-256 of a remote file as lowercase hex.
	pub async fn get_file_hash(&self, path: &str) -> Result<String, DeviceError> {
		let resp = self.run_snippet(&snippets::file_hash(path)).await?;
		let hex = resp.stdout.trim();
		if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
		{
			return Err(DeviceError::InvalidResponse {
				message: format!("expected 64 hex chars from hash, got {:?}", hex),
			});
		}
		Ok(hex.to_string())
	}

	pub async fn mkdir(&self, path: &str) -> Result<(), DeviceError> {
		self.run_snippet(&snippets::mkdir(path)).await?;
		Ok(())
	}

	pub async fn rename(&self, old: &str, new: &str) -> Result<(), DeviceError> {
		self.run_snippet(&snippets::rename(old, new)).await?;
		Ok(())
	}

	/// Remove a file or directory. With `recursive`, walk the subtree
	/// depth-first and remove entries bottom-up.
	pub async fn remove(&self, path: &str, recursive: bool) -> Result<(), DeviceError> {
		let stat = self.stat_path(path).await?;
		if !stat.exists {
			// Let the board produce the genuine ENOENT traceback.
			self.run_snippet(&snippets::remove_file(path)).await?;
			return Ok(());
		}
		if !stat.is_dir {
			self.run_snippet(&snippets::remove_file(path)).await?;
			return Ok(());
		}
		if !recursive {
			// Fails with EEXIST-style OSError on the board if non-empty.
			self.run_snippet(&snippets::remove_dir(path)).await?;
			return Ok(());
		}

		let entries = self.list_files(path, true).await?;
		for entry in entries.iter().filter(|e| !e.is_dir) {
			self.run_snippet(&snippets::remove_file(&entry.filename)).await?;
		}
		let mut dirs: Vec<&FileEntry> = entries.iter().filter(|e| e.is_dir).collect();
		dirs.sort_by_key(|e| std::cmp::Reverse(e.filename.matches('/').count()));
		for dir in dirs {
			self.run_snippet(&snippets::remove_dir(&dir.filename)).await?;
		}
		self.run_snippet(&snippets::remove_dir(path)).await?;
		Ok(())
	}

	/// Recursive download: list the tree once, create directories
	/// client-side before their children, then fetch one file at a
	/// time. Returns the number of files written.
	pub async fn download_tree(&self, remote: &str, local: &Path) -> Result<usize, DeviceError> {
		let stat = self.stat_path(remote).await?;
		if !stat.is_dir {
			// Single file: fetch straight to the target.
			let data = self.get_file(remote).await?;
			let name = remote.rsplit('/').next().unwrap_or(remote);
			let target = if local.is_dir() { local.join(name) } else { local.to_path_buf() };
			tokio::fs::write(&target, &data).await?;
			return Ok(1);
		}

		let entries = self.list_files(remote, true).await?;
		tokio::fs::create_dir_all(local).await?;
		let mut files = 0usize;
		for entry in &entries {
			let rel = entry
				.filename
				.strip_prefix(remote)
				.unwrap_or(entry.filename.as_str())
				.trim_start_matches('/');
			let target = local.join(rel);
			if entry.is_dir {
				tokio::fs::create_dir_all(&target).await?;
			} else {
				if let Some(parent) = target.parent() {
					tokio::fs::create_dir_all(parent).await?;
				}
				let data = self.get_file(&entry.filename).await?;
				tokio::fs::write(&target, &data).await?;
				files += 1;
			}
		}
		Ok(files)
	}

	/// Platform, firmware and free-heap summary.
	pub async fn board_info(&self) -> Result<BoardInfo, DeviceError> {
		let resp = self.run_snippet(&snippets::board_info()).await?;
		parse_board_info(&resp.stdout)
	}
}

fn parse_list_output(stdout: &str) -> Result<Vec<FileEntry>, DeviceError> {
	let mut entries = Vec::new();
	for line in stdout.lines() {
		let line = line.trim_end();
		if line.is_empty() {
			continue;
		}
		// Split from the right: a path may itself contain " | ".
		let mut fields = line.rsplitn(3, " | ");
		let size = fields.next();
		let kind = fields.next();
		let path = fields.next();
		match (path, kind, size) {
			(Some(path), Some(kind @ ("d" | "f")), Some(size)) => {
				let size = size.parse().map_err(|_| bad_record(line))?;
				entries.push(FileEntry {
					filename: path.to_string(),
					is_dir: kind == "d",
					size,
				});
			}
			_ => return Err(bad_record(line)),
		}
	}
	Ok(entries)
}

fn parse_stat_output(stdout: &str) -> Result<StatResult, DeviceError> {
	let line = stdout.trim();
	let fields: Vec<&str> = line.split(',').collect();
	if fields.len() != 5 {
		return Err(bad_record(line));
	}
	let num = |s: &str| s.trim().parse::<u64>().map_err(|_| bad_record(line));
	Ok(StatResult {
		exists: num(fields[0])? != 0,
		is_dir: num(fields[1])? != 0,
		size: num(fields[2])?,
		atime: num(fields[3])?,
		mtime: num(fields[4])?,
	})
}

fn parse_board_info(stdout: &str) -> Result<BoardInfo, DeviceError> {
	let lines: Vec<&str> = stdout.lines().map(str::trim_end).collect();
	if lines.len() < 5 {
		return Err(DeviceError::InvalidResponse {
			message: format!("board info returned {} lines, expected 5", lines.len()),
		});
	}
	Ok(BoardInfo {
		platform: lines[0].to_string(),
		release: lines[1].to_string(),
		version: lines[2].to_string(),
		machine: lines[3].to_string(),
		mem_free: lines[4].trim().parse().map_err(|_| bad_record(lines[4]))?,
	})
}

fn bad_record(line: &str) -> DeviceError {
	DeviceError::InvalidResponse { message: format!("malformed record: {:?}", line) }
}


// vim: ts=4
