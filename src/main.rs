//! mplink command-line tool
//!
//! Thin front-end over the [`mplink`] client library: resolves the
//! target (serial flag/config wins over network), opens one [`Device`],
//! dispatches the subcommand, and disconnects. No global device state.

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use mplink::repl::OutputChunk;
use mplink::{Config, Device, DeviceError, RunOptions};

#[derive(Parser)]
#[command(name = "mplink", version, about = "MicroPython remote control over serial and WebREPL")]
struct Cli {
	/// Serial device path (e.g. /dev/ttyUSB0)
	#[arg(short = 'd', long, global = true)]
	device: Option<String>,

	/// Serial baud rate
	#[arg(short = 'b', long, global = true)]
	baud: Option<u32>,

	/// WebREPL host (host or host:port)
	#[arg(long, global = true)]
	host: Option<String>,

	/// WebREPL password
	#[arg(long, global = true)]
	password: Option<String>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// List serial ports on this host
	Devices,
	/// List files on the board
	Ls {
		#[arg(default_value = "/")]
		path: String,
		/// Recurse into subdirectories
		#[arg(short, long)]
		recursive: bool,
	},
	/// Print a remote file
	Cat { path: String },
	/// Download a file or directory tree
	Get {
		remote: String,
		/// Local target (defaults to the remote basename)
		local: Option<PathBuf>,
		/// Download a directory tree
		#[arg(short, long)]
		recursive: bool,
	},
	/// Upload a local file
	Put {
		local: PathBuf,
		/// Remote target (defaults to /<basename>)
		remote: Option<String>,
	},
	/// Delete a file or directory
	Rm {
		path: String,
		/// Delete a directory tree
		#[arg(short, long)]
		recursive: bool,
	},
	/// Create a directory
	Mkdir { path: String },
	/// Rename or move a file
	Mv { old: String, new: String },
	/// Stat a remote path
	Stat { path: String },
	/// SHA-256 of a remote file
	Sha256 { path: String },
	/// Run a local Python file on the board
	Run { file: PathBuf },
	/// Run a Python expression or statement on the board
	Exec { code: String },
	/// Interactive terminal (quit with Ctrl-K)
	Repl,
	/// Reset the board
	Reset {
		/// Pulse the serial control lines instead of a soft reset
		#[arg(long)]
		hard: bool,
	},
	/// Show board platform, firmware and free memory
	Info,
}

#[tokio::main]
async fn main() {
	mplink::logging::init_tracing();
	let cli = Cli::parse();
	if let Err(e) = run(cli).await {
		eprintln!("mplink: {}", e);
		std::process::exit(1);
	}
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
	let config = Config::load();

	if let Command::Devices = cli.command {
		for port in mplink::transport::serial::available_ports()? {
			println!("{}", port);
		}
		return Ok(());
	}

	let device = Device::with_handshake_timeout(Duration::from_millis(config.handshake_timeout_ms));
	connect(&device, &cli, &config).await?;

	let result = dispatch(&device, &cli, &config).await;

	// Reset and a dead link already dropped the connection.
	if device.is_connected() {
		let _ = device.disconnect().await;
	}
	result
}

/// Target precedence: `--device`, then `--host`, then the configured
/// default device, then the configured default host.
async fn connect(device: &Device, cli: &Cli, config: &Config) -> Result<(), Box<dyn Error>> {
	let baud = cli.baud.unwrap_or(config.default_baud);

	let serial = cli
		.device
		.clone()
		.or_else(|| if cli.host.is_none() { config.default_device.clone() } else { None });
	if let Some(path) = serial {
		device.connect_serial(&path, baud).await?;
		return Ok(());
	}

	let host = cli
		.host
		.clone()
		.or_else(|| config.default_host.clone())
		.ok_or("no target: pass --device or --host, or set one in the config")?;
	let password = cli
		.password
		.clone()
		.or_else(|| config.password.clone())
		.ok_or("WebREPL needs a password (--password or config)")?;
	device.connect_network(&host, &password).await?;
	Ok(())
}

async fn dispatch(device: &Device, cli: &Cli, config: &Config) -> Result<(), Box<dyn Error>> {
	match &cli.command {
		Command::Devices => unreachable!("handled before connecting"),
		Command::Ls { path, recursive } => {
			for entry in device.list_files(path, *recursive).await? {
				let marker = if entry.is_dir { "/" } else { "" };
				println!("{:>9}  {}{}", entry.size, entry.filename, marker);
			}
		}
		Command::Cat { path } => {
			let data = device.get_file(path).await?;
			std::io::stdout().write_all(&data)?;
		}
		Command::Get { remote, local, recursive } => {
			if *recursive {
				let target = local.clone().unwrap_or_else(|| PathBuf::from("."));
				let count = device.download_tree(remote, &target).await?;
				println!("{} file(s) written to {}", count, target.display());
			} else {
				let data = device.get_file(remote).await?;
				let name = remote.rsplit('/').next().unwrap_or(remote);
				let target = local.clone().unwrap_or_else(|| PathBuf::from(name));
				tokio::fs::write(&target, &data).await?;
				println!("{} ({} bytes)", target.display(), data.len());
			}
		}
		Command::Put { local, remote } => {
			let data = tokio::fs::read(local).await?;
			let remote = match remote {
				Some(r) => r.clone(),
				None => {
					let name = local
						.file_name()
						.ok_or("local path has no file name")?
						.to_string_lossy();
					format!("/{}", name)
				}
			};
			device.put_file(&remote, &data).await?;
			println!("{} ({} bytes)", remote, data.len());
		}
		Command::Rm { path, recursive } => device.remove(path, *recursive).await?,
		Command::Mkdir { path } => device.mkdir(path).await?,
		Command::Mv { old, new } => device.rename(old, new).await?,
		Command::Stat { path } => {
			let st = device.stat_path(path).await?;
			if !st.exists {
				return Err(format!("{}: not found", path).into());
			}
			println!("path:  {}", path);
			println!("type:  {}", if st.is_dir { "directory" } else { "file" });
			println!("size:  {}", st.size);
			println!("atime: {}", st.atime);
			println!("mtime: {}", st.mtime);
		}
		Command::Sha256 { path } => {
			println!("{}  {}", device.get_file_hash(path).await?, path);
		}
		Command::Run { file } => {
			let source = tokio::fs::read_to_string(file).await?;
			run_streaming(device, &source, config).await?;
		}
		Command::Exec { code } => {
			run_streaming(device, code, config).await?;
		}
		Command::Repl => terminal_session(device).await?,
		Command::Reset { hard } => device.reset(!*hard).await?,
		Command::Info => {
			let info = device.board_info().await?;
			println!("platform: {}", info.platform);
			println!("release:  {}", info.release);
			println!("version:  {}", info.version);
			println!("machine:  {}", info.machine);
			println!("mem free: {}", info.mem_free);
		}
	}
	Ok(())
}

/// Run a script, streaming output as it arrives. A remote exception
/// surfaces as a nonzero exit after the traceback has been streamed.
async fn run_streaming(device: &Device, source: &str, config: &Config) -> Result<(), Box<dyn Error>> {
	let opts = RunOptions {
		timeout: config.script_timeout_ms.map(Duration::from_millis),
		on_chunk: Some(Box::new(|chunk: OutputChunk<'_>| match chunk {
			OutputChunk::Stdout(bytes) => {
				let mut out = std::io::stdout();
				let _ = out.write_all(bytes);
				let _ = out.flush();
			}
			OutputChunk::Stderr(bytes) => {
				let mut err = std::io::stderr();
				let _ = err.write_all(bytes);
				let _ = err.flush();
			}
		})),
		..RunOptions::default()
	};
	let resp = device.run_script(source, opts).await?;
	if let Some(exception) = resp.exception {
		return Err(Box::new(DeviceError::Script { exception, traceback: resp.stderr }));
	}
	Ok(())
}

/// Pass-through terminal: raw keystrokes to the board, board output to
/// stdout. Ctrl-K is intercepted locally as the quit key; everything
/// else (Ctrl-A/B/C/D included) goes to the board verbatim.
async fn terminal_session(device: &Device) -> Result<(), Box<dyn Error>> {
	const QUIT_KEY: u8 = 0x0b;

	println!("Connected; press Ctrl-K to quit.");
	device.on_terminal_data(|bytes| {
		let mut out = std::io::stdout();
		let _ = out.write_all(bytes);
		let _ = out.flush();
	});
	device.on_close(|reason| {
		let text = reason.unwrap_or_else(|| "connection closed".to_string());
		eprintln!("\r\nmplink: {}\r", text);
	});

	// Hand the human a friendly prompt, then start forwarding.
	device.send_data(b"\x02\r").await?;
	device.enter_terminal().await?;

	let (key_tx, mut key_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
	std::thread::spawn(move || {
		use std::io::Read;
		let mut stdin = std::io::stdin();
		let mut buf = [0u8; 256];
		loop {
			match stdin.read(&mut buf) {
				Ok(0) | Err(_) => break,
				Ok(n) => {
					if key_tx.send(buf[..n].to_vec()).is_err() {
						break;
					}
				}
			}
		}
	});

	crossterm::terminal::enable_raw_mode()?;
	let outcome = async {
		while let Some(keys) = key_rx.recv().await {
			match keys.iter().position(|&b| b == QUIT_KEY) {
				Some(pos) => {
					if pos > 0 {
						device.send_data(&keys[..pos]).await?;
					}
					return Ok(());
				}
				None => device.send_data(&keys).await?,
			}
		}
		Ok::<(), DeviceError>(())
	}
	.await;
	crossterm::terminal::disable_raw_mode()?;

	device.leave_terminal().await?;
	println!();
	outcome.map_err(Into::into)
}

// vim: ts=4
