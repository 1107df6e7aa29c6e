//! Serial port transport
//!
//! Opens the device path at the requested baud (8N1, no flow control)
//! with DTR asserted, then runs two OS threads: a reader that polls the
//! port with a short timeout and forwards chunks into the event channel,
//! and a writer that drains a command queue so sends never interleave
//! or reorder. Timeouts from the poll read are idle, not errors.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::logging::*;
use crate::transport::{Transport, TransportEvent, TransportKind, TransportLink, EVENT_CHANNEL_CAPACITY};

/// Poll interval for the reader thread
const READ_POLL: Duration = Duration::from_millis(20);

/// How long the reset pulse holds the control lines
const RESET_PULSE: Duration = Duration::from_millis(100);

enum WriterCmd {
	Write(Vec<u8>),
	HardReset,
	Close,
}

pub struct SerialTransport {
	cmd: std_mpsc::Sender<WriterCmd>,
	closing: Arc<AtomicBool>,
	path: String,
	baud: u32,
}

/// Open `path` at `baud` and spawn the reader/writer threads.
///
/// This performs blocking I/O; call it from a blocking context
/// (the connection orchestrator wraps it in `spawn_blocking`).
pub fn open(path: &str, baud: u32) -> Result<TransportLink, TransportError> {
	let mut port = serialport::new(path, baud)
		.data_bits(DataBits::Eight)
		.parity(Parity::None)
		.stop_bits(StopBits::One)
		.flow_control(FlowControl::None)
		.timeout(READ_POLL)
		.open()
		.map_err(|e| map_open_error(path, e))?;

	port.write_data_terminal_ready(true).map_err(|e| map_open_error(path, e))?;
	let _ = port.clear(ClearBuffer::All);

	let writer_port = port.try_clone().map_err(|e| map_open_error(path, e))?;

	let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
	let (cmd_tx, cmd_rx) = std_mpsc::channel::<WriterCmd>();
	let closing = Arc::new(AtomicBool::new(false));

	// Reader thread: poll until error or close request.
	{
		let closing = closing.clone();
		let path = path.to_string();
		std::thread::Builder::new()
			.name("mplink-serial-read".to_string())
			.spawn(move || {
				let mut port = port;
				let mut buf = [0u8; 1024];
				loop {
					if closing.load(Ordering::SeqCst) {
						let _ = event_tx.blocking_send(TransportEvent::Closed(None));
						break;
					}
					match port.read(&mut buf) {
						Ok(0) => continue,
						Ok(n) => {
							if event_tx
								.blocking_send(TransportEvent::Data(buf[..n].to_vec()))
								.is_err()
							{
								break;
							}
						}
						Err(e)
							if e.kind() == std::io::ErrorKind::TimedOut
								|| e.kind() == std::io::ErrorKind::Interrupted =>
						{
							continue;
						}
						Err(e) => {
							warn!("[serial] read error on {}: {}", path, e);
							let _ = event_tx
								.blocking_send(TransportEvent::Closed(Some(e.to_string())));
							break;
						}
					}
				}
			})
			.expect("spawn serial reader thread");
	}

	// Writer thread: owns the cloned handle, drains commands in order.
	{
		let closing = closing.clone();
		std::thread::Builder::new()
			.name("mplink-serial-write".to_string())
			.spawn(move || {
				let mut port = writer_port;
				for cmd in cmd_rx {
					match cmd {
						WriterCmd::Write(data) => {
							if let Err(e) =
								std::io::Write::write_all(&mut port, &data).and_then(|_| {
									std::io::Write::flush(&mut port)
								}) {
								warn!("[serial] write error: {}", e);
								closing.store(true, Ordering::SeqCst);
								break;
							}
						}
						WriterCmd::HardReset => {
							let _ = port.write_data_terminal_ready(false);
							let _ = port.write_request_to_send(true);
							std::thread::sleep(RESET_PULSE);
							let _ = port.write_request_to_send(false);
							let _ = port.write_data_terminal_ready(true);
						}
						WriterCmd::Close => break,
					}
				}
			})
			.expect("spawn serial writer thread");
	}

	debug!("[serial] opened {} at {} baud", path, baud);

	let transport = SerialTransport { cmd: cmd_tx, closing, path: path.to_string(), baud };
	Ok(TransportLink { transport: Arc::new(transport), events: event_rx })
}

/// Enumerate serial ports available on this host.
pub fn available_ports() -> Result<Vec<String>, TransportError> {
	let ports = serialport::available_ports().map_err(|e| TransportError::Unavailable {
		target: "serial ports".to_string(),
		message: e.to_string(),
	})?;
	Ok(ports.into_iter().map(|p| p.port_name).collect())
}

fn map_open_error(path: &str, e: serialport::Error) -> TransportError {
	match e.kind() {
		serialport::ErrorKind::NoDevice => TransportError::Unavailable {
			target: path.to_string(),
			message: e.to_string(),
		},
		serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
			TransportError::PermissionDenied { target: path.to_string() }
		}
		_ => TransportError::Unavailable { target: path.to_string(), message: e.to_string() },
	}
}

#[async_trait]
impl Transport for SerialTransport {
	async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
		if self.closing.load(Ordering::SeqCst) {
			return Err(TransportError::PeerClosed);
		}
		self.cmd
			.send(WriterCmd::Write(data.to_vec()))
			.map_err(|_| TransportError::PeerClosed)
	}

	async fn close(&self) -> Result<(), TransportError> {
		if !self.closing.swap(true, Ordering::SeqCst) {
			let _ = self.cmd.send(WriterCmd::Close);
		}
		Ok(())
	}

	async fn hard_reset(&self) -> Result<(), TransportError> {
		if self.closing.load(Ordering::SeqCst) {
			return Err(TransportError::PeerClosed);
		}
		self.cmd.send(WriterCmd::HardReset).map_err(|_| TransportError::PeerClosed)
	}

	fn kind(&self) -> TransportKind {
		TransportKind::Serial { path: self.path.clone(), baud: self.baud }
	}
}

// vim: ts=4
