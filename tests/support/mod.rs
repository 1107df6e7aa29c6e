//! Shared test support: a wire-accurate fake MicroPython board.
//!
//! `FakeBoard` plays the device side of the REPL protocol over the
//! in-memory transport: friendly and raw modes, the raw-paste probe
//! with windowed flow control, the WebREPL password login, and the
//! four-landmark response framing. What a script "does" is decided by
//! a pluggable handler, so tests script behavior without a Python
//! interpreter while every byte still flows through the real engine.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use mplink::transport::mem::{self, MemoryPeer};
use mplink::transport::TransportLink;

/// What a submitted script does
pub enum ScriptOutcome {
	/// Print and exit: the framed response carries these bodies
	Output { stdout: Vec<u8>, stderr: Vec<u8> },
	/// Acknowledge receipt, then produce nothing until interrupted
	Hang,
	/// Drop the link mid-response, as a dying transport would
	Drop,
}

impl ScriptOutcome {
	pub fn ok(stdout: impl Into<Vec<u8>>) -> ScriptOutcome {
		ScriptOutcome::Output { stdout: stdout.into(), stderr: Vec::new() }
	}

	pub fn raising(traceback: impl Into<Vec<u8>>) -> ScriptOutcome {
		ScriptOutcome::Output { stdout: Vec::new(), stderr: traceback.into() }
	}
}

pub type ScriptHandler = Box<dyn FnMut(&str) -> ScriptOutcome + Send>;

/// Behavior knobs for the fake board
pub struct BoardConfig {
	/// Answer the raw-paste probe with `R\x01`
	pub raw_paste: bool,
	/// Flow-control window advertised (and granted per `\x01`)
	pub window: u16,
	/// Require a WebREPL login with this password
	pub password: Option<String>,
}

impl Default for BoardConfig {
	fn default() -> Self {
		BoardConfig { raw_paste: true, window: 32, password: None }
	}
}

/// Test-side handle to a running fake board
pub struct BoardHandle {
	aux: mpsc::UnboundedSender<Vec<u8>>,
	scripts: Arc<Mutex<Vec<String>>>,
}

impl BoardHandle {
	/// Push bytes to the host outside the request/response flow
	/// (terminal-mode traffic).
	pub fn send_to_host(&self, data: &[u8]) {
		let _ = self.aux.send(data.to_vec());
	}

	/// Every script source the board has executed, in order.
	pub fn scripts(&self) -> Vec<String> {
		self.scripts.lock().unwrap().clone()
	}
}

/// Spawn a fake board and return the host-side link plus a handle.
pub fn spawn_board(config: BoardConfig, handler: ScriptHandler) -> (TransportLink, BoardHandle) {
	let (link, peer) = mem::pair();
	let (aux_tx, aux_rx) = mpsc::unbounded_channel();
	let scripts = Arc::new(Mutex::new(Vec::new()));
	let handle = BoardHandle { aux: aux_tx, scripts: scripts.clone() };
	tokio::spawn(board_task(peer, config, handler, scripts, aux_rx));
	(link, handle)
}

enum Mode {
	Login { typed: Vec<u8> },
	Friendly,
	Raw { source: Vec<u8>, probe: u8 },
	PasteRecv { source: Vec<u8>, since_grant: usize },
	Hung,
}

async fn board_task(
	mut peer: MemoryPeer,
	config: BoardConfig,
	mut handler: ScriptHandler,
	scripts: Arc<Mutex<Vec<String>>>,
	mut aux: mpsc::UnboundedReceiver<Vec<u8>>,
) {
	let mut mode = if config.password.is_some() {
		peer.inject(b"Password: ").await;
		Mode::Login { typed: Vec::new() }
	} else {
		Mode::Friendly
	};

	let mut aux_open = true;
	loop {
		tokio::select! {
			chunk = peer.recv() => {
				let Some(chunk) = chunk else { break };
				for byte in chunk {
					mode = feed(&peer, &config, &mut handler, &scripts, mode, byte).await;
				}
			}
			extra = aux.recv(), if aux_open => match extra {
				Some(extra) => peer.inject(&extra).await,
				None => aux_open = false,
			}
		}
	}
}

async fn feed(
	peer: &MemoryPeer,
	config: &BoardConfig,
	handler: &mut ScriptHandler,
	scripts: &Arc<Mutex<Vec<String>>>,
	mode: Mode,
	byte: u8,
) -> Mode {
	match mode {
		Mode::Login { mut typed } => match byte {
			b'\r' | b'\n' => {
				let expected = config.password.as_deref().unwrap_or_default().as_bytes();
				if typed == expected {
					peer.inject(b"\r\nWebREPL connected\r\n>>> ").await;
					Mode::Friendly
				} else {
					peer.inject(b"\r\nAccess denied\r\n").await;
					peer.close(None).await;
					Mode::Login { typed: Vec::new() }
				}
			}
			b => {
				typed.push(b);
				Mode::Login { typed }
			}
		},

		Mode::Friendly => match byte {
			b'\r' | b'\n' => {
				peer.inject(b"\r\n>>> ").await;
				Mode::Friendly
			}
			0x03 => {
				peer.inject(b"\r\nKeyboardInterrupt\r\n>>> ").await;
				Mode::Friendly
			}
			0x01 => {
				peer.inject(b"raw REPL; CTRL-B to exit\r\n>").await;
				Mode::Raw { source: Vec::new(), probe: 0 }
			}
			_ => Mode::Friendly,
		},

		Mode::Raw { mut source, probe } => {
			// Raw-paste probe arrives as \x05 A \x01 at the prompt.
			match (probe, byte) {
				(0, 0x05) => return Mode::Raw { source, probe: 1 },
				(1, b'A') => return Mode::Raw { source, probe: 2 },
				(2, 0x01) => {
					return if config.raw_paste {
						peer.inject(b"R\x01").await;
						peer.inject(&config.window.to_le_bytes()).await;
						Mode::PasteRecv { source: Vec::new(), since_grant: 0 }
					} else {
						peer.inject(b"R\x00").await;
						Mode::Raw { source, probe: 0 }
					};
				}
				(1, _) => source.push(0x05),
				(2, _) => source.extend_from_slice(&[0x05, b'A']),
				_ => {}
			}
			match byte {
				0x01 => {
					// Ctrl-A at the raw prompt reprints the banner.
					peer.inject(b"raw REPL; CTRL-B to exit\r\n>").await;
					Mode::Raw { source: Vec::new(), probe: 0 }
				}
				0x02 => {
					peer.inject(b"\r\n>>> ").await;
					Mode::Friendly
				}
				0x04 => execute(peer, handler, scripts, source).await,
				0x03 => Mode::Raw { source: Vec::new(), probe: 0 },
				b => {
					source.push(b);
					Mode::Raw { source, probe: 0 }
				}
			}
		}

		Mode::PasteRecv { mut source, mut since_grant } => match byte {
			0x04 => {
				// End of input: acknowledge, then run.
				peer.inject(b"\x04").await;
				execute(peer, handler, scripts, source).await
			}
			b => {
				source.push(b);
				since_grant += 1;
				if since_grant >= config.window as usize {
					peer.inject(b"\x01").await;
					since_grant = 0;
				}
				Mode::PasteRecv { source, since_grant }
			}
		},

		Mode::Hung => match byte {
			0x03 => {
				peer.inject(b"\x04Traceback (most recent call last):\r\n  File \"<stdin>\", line 1, in <module>\r\nKeyboardInterrupt: \r\n\x04>")
					.await;
				Mode::Raw { source: Vec::new(), probe: 0 }
			}
			_ => Mode::Hung,
		},
	}
}

async fn execute(
	peer: &MemoryPeer,
	handler: &mut ScriptHandler,
	scripts: &Arc<Mutex<Vec<String>>>,
	source: Vec<u8>,
) -> Mode {
	let text = String::from_utf8_lossy(&source).into_owned();
	scripts.lock().unwrap().push(text.clone());
	match handler(&text) {
		ScriptOutcome::Output { stdout, stderr } => {
			peer.inject(b"OK").await;
			peer.inject(&stdout).await;
			peer.inject(b"\x04").await;
			peer.inject(&stderr).await;
			peer.inject(b"\x04>").await;
			Mode::Raw { source: Vec::new(), probe: 0 }
		}
		ScriptOutcome::Hang => {
			peer.inject(b"OK").await;
			Mode::Hung
		}
		ScriptOutcome::Drop => {
			peer.inject(b"OK").await;
			peer.close(Some("device went away".to_string())).await;
			Mode::Raw { source: Vec::new(), probe: 0 }
		}
	}
}

// ─── Fake remote filesystem ───

/// In-memory filesystem the snippet handler operates on.
pub struct FakeFs {
	pub files: HashMap<String, Vec<u8>>,
	pub dirs: BTreeSet<String>,
}

impl FakeFs {
	pub fn new() -> Arc<Mutex<FakeFs>> {
		let mut dirs = BTreeSet::new();
		dirs.insert("/".to_string());
		Arc::new(Mutex::new(FakeFs { files: HashMap::new(), dirs }))
	}
}

/// A handler that recognizes the snippet catalog and applies it to a
/// [`FakeFs`], producing the same record formats a real board would.
pub fn fs_handler(fs: Arc<Mutex<FakeFs>>) -> ScriptHandler {
	Box::new(move |source| {
		let mut fs = fs.lock().unwrap();
		if source.contains("os.ilistdir") {
			handle_list(&fs, source)
		} else if source.contains("uhashlib") {
			handle_hash(&fs, source)
		} else if source.contains("b2a_base64") {
			handle_get(&fs, source)
		} else if source.contains("a2b_base64") || source.contains("'wb'") {
			handle_put(&mut fs, source)
		} else if source.contains("os.stat(") {
			handle_stat(&fs, source)
		} else if source.contains("os.mkdir(") {
			handle_mkdir(&mut fs, source)
		} else if source.contains("os.remove(") {
			handle_remove(&mut fs, source)
		} else if source.contains("os.rmdir(") {
			handle_rmdir(&mut fs, source)
		} else if source.contains("os.rename(") {
			handle_rename(&mut fs, source)
		} else if source.contains("os.uname") {
			ScriptOutcome::ok("esp32\n1.22.0\nv1.22.0 on 2024-01-05\nESP32 module\n104800\n")
		} else {
			ScriptOutcome::raising(
				"Traceback (most recent call last):\n  File \"<stdin>\", line 1, in <module>\nNameError: name isn't defined\n",
			)
		}
	})
}

fn os_error(errno: u16, name: &str) -> ScriptOutcome {
	ScriptOutcome::raising(format!(
		"Traceback (most recent call last):\n  File \"<stdin>\", line 2, in <module>\nOSError: [Errno {}] {}\n",
		errno, name
	))
}

/// Decode a single-quoted Python literal starting right after its
/// opening quote. Returns the decoded text and the byte length
/// consumed, closing quote included.
fn parse_py_literal(rest: &str) -> Option<(String, usize)> {
	let mut out = String::new();
	let mut chars = rest.char_indices();
	while let Some((i, c)) = chars.next() {
		match c {
			'\'' => return Some((out, i + 1)),
			'\\' => match chars.next()?.1 {
				'\\' => out.push('\\'),
				'\'' => out.push('\''),
				'n' => out.push('\n'),
				'r' => out.push('\r'),
				't' => out.push('\t'),
				'x' => {
					let hi = chars.next()?.1;
					let lo = chars.next()?.1;
					let v = u8::from_str_radix(&format!("{}{}", hi, lo), 16).ok()?;
					out.push(v as char);
				}
				other => {
					out.push('\\');
					out.push(other);
				}
			},
			c => out.push(c),
		}
	}
	None
}

/// First `'…'` argument after `func` in the source.
fn quoted_arg(source: &str, func: &str) -> Option<String> {
	let rest = &source[source.find(func)? + func.len()..];
	let start = rest.find('\'')? + 1;
	parse_py_literal(&rest[start..]).map(|(s, _)| s)
}

fn two_quoted(source: &str, func: &str) -> Option<(String, String)> {
	let rest = &source[source.find(func)? + func.len()..];
	let s1 = rest.find('\'')? + 1;
	let (first, consumed) = parse_py_literal(&rest[s1..])?;
	let rest2 = &rest[s1 + consumed..];
	let s2 = rest2.find('\'')? + 1;
	let (second, _) = parse_py_literal(&rest2[s2..])?;
	Some((first, second))
}

fn parent_of(path: &str) -> String {
	match path.trim_end_matches('/').rfind('/') {
		Some(0) | None => "/".to_string(),
		Some(idx) => path[..idx].to_string(),
	}
}

fn handle_list(fs: &FakeFs, source: &str) -> ScriptOutcome {
	let Some(dir) = quoted_arg(source, "_ls(") else {
		return os_error(22, "EINVAL");
	};
	let recursive = source.contains(", True)");
	if !fs.dirs.contains(&dir) {
		return os_error(2, "ENOENT");
	}
	let mut out = String::new();
	list_into(fs, &dir, recursive, &mut out);
	ScriptOutcome::ok(out)
}

fn list_into(fs: &FakeFs, dir: &str, recursive: bool, out: &mut String) {
	let is_child = |path: &str| parent_of(path) == dir && path != dir;
	let mut names: Vec<(String, bool, u64)> = Vec::new();
	for d in fs.dirs.iter().filter(|d| is_child(d)) {
		names.push((d.clone(), true, 0));
	}
	for (f, data) in fs.files.iter().filter(|(f, _)| is_child(f)) {
		names.push((f.clone(), false, data.len() as u64));
	}
	names.sort();
	for (path, is_dir, size) in names {
		out.push_str(&format!("{} | {} | {}\n", path, if is_dir { "d" } else { "f" }, size));
		if is_dir && recursive {
			list_into(fs, &path, recursive, out);
		}
	}
}

fn handle_hash(fs: &FakeFs, source: &str) -> ScriptOutcome {
	let Some(path) = quoted_arg(source, "open(") else {
		return os_error(22, "EINVAL");
	};
	match fs.files.get(&path) {
		Some(data) => {
			let mut hasher = Sha256::new();
			hasher.update(data);
			ScriptOutcome::ok(format!("{:x}\n", hasher.finalize()))
		}
		None => os_error(2, "ENOENT"),
	}
}

fn handle_get(fs: &FakeFs, source: &str) -> ScriptOutcome {
	let Some(path) = quoted_arg(source, "open(") else {
		return os_error(22, "EINVAL");
	};
	match fs.files.get(&path) {
		Some(data) => {
			let mut out = String::new();
			for chunk in data.chunks(1024) {
				out.push_str(&STANDARD.encode(chunk));
				out.push('\n');
			}
			out.push('\n');
			ScriptOutcome::ok(out)
		}
		None => os_error(2, "ENOENT"),
	}
}

fn handle_put(fs: &mut FakeFs, source: &str) -> ScriptOutcome {
	let Some(path) = quoted_arg(source, "open(") else {
		return os_error(22, "EINVAL");
	};
	if !fs.dirs.contains(&parent_of(&path)) {
		return os_error(2, "ENOENT");
	}
	let mut data = Vec::new();
	let mut rest = source;
	while let Some(idx) = rest.find("a2b_base64('") {
		rest = &rest[idx + "a2b_base64('".len()..];
		let Some(end) = rest.find('\'') else { break };
		match STANDARD.decode(&rest[..end]) {
			Ok(chunk) => data.extend_from_slice(&chunk),
			Err(_) => return os_error(22, "EINVAL"),
		}
		rest = &rest[end..];
	}
	fs.files.insert(path, data);
	ScriptOutcome::ok("")
}

fn handle_stat(fs: &FakeFs, source: &str) -> ScriptOutcome {
	let Some(path) = quoted_arg(source, "os.stat(") else {
		return os_error(22, "EINVAL");
	};
	if fs.dirs.contains(&path) {
		ScriptOutcome::ok("1,1,0,100,200\n")
	} else if let Some(data) = fs.files.get(&path) {
		ScriptOutcome::ok(format!("1,0,{},100,200\n", data.len()))
	} else {
		ScriptOutcome::ok("0,0,0,0,0\n")
	}
}

fn handle_mkdir(fs: &mut FakeFs, source: &str) -> ScriptOutcome {
	let Some(path) = quoted_arg(source, "os.mkdir(") else {
		return os_error(22, "EINVAL");
	};
	if fs.dirs.contains(&path) || fs.files.contains_key(&path) {
		return os_error(17, "EEXIST");
	}
	if !fs.dirs.contains(&parent_of(&path)) {
		return os_error(2, "ENOENT");
	}
	fs.dirs.insert(path);
	ScriptOutcome::ok("")
}

fn handle_remove(fs: &mut FakeFs, source: &str) -> ScriptOutcome {
	let Some(path) = quoted_arg(source, "os.remove(") else {
		return os_error(22, "EINVAL");
	};
	if fs.files.remove(&path).is_some() {
		ScriptOutcome::ok("")
	} else if fs.dirs.contains(&path) {
		os_error(21, "EISDIR")
	} else {
		os_error(2, "ENOENT")
	}
}

fn handle_rmdir(fs: &mut FakeFs, source: &str) -> ScriptOutcome {
	let Some(path) = quoted_arg(source, "os.rmdir(") else {
		return os_error(22, "EINVAL");
	};
	if !fs.dirs.contains(&path) {
		return os_error(2, "ENOENT");
	}
	let has_children = fs.dirs.iter().any(|d| parent_of(d) == path && d != &path)
		|| fs.files.keys().any(|f| parent_of(f) == path);
	if has_children {
		return os_error(39, "ENOTEMPTY");
	}
	fs.dirs.remove(&path);
	ScriptOutcome::ok("")
}

fn handle_rename(fs: &mut FakeFs, source: &str) -> ScriptOutcome {
	let Some((old, new)) = two_quoted(source, "os.rename(") else {
		return os_error(22, "EINVAL");
	};
	if let Some(data) = fs.files.remove(&old) {
		fs.files.insert(new, data);
		ScriptOutcome::ok("")
	} else if fs.dirs.remove(&old) {
		fs.dirs.insert(new);
		ScriptOutcome::ok("")
	} else {
		os_error(2, "ENOENT")
	}
}
