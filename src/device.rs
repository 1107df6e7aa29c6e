//! Connection orchestrator and public client API
//!
//! One [`Device`] value is one connection to one board. It owns the
//! transport and the protocol engine, serializes script requests FIFO
//! behind a single lock, and exposes the terminal pass-through and the
//! close callback. There is no process-wide device state: CLI handlers
//! and embedders thread a `Device` through explicitly.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::error::DeviceError;
use crate::logging::*;
use crate::repl::engine::{spawn_pump, LinkShared, ReplEngine};
use crate::repl::state::LinkState;
use crate::repl::{RunOptions, ScriptResponse};
use crate::transport::{self, Transport, TransportLink};

/// Default bounded wait for banners and login
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for [`Device::attach`]
#[derive(Default)]
pub struct AttachOptions {
	/// WebREPL password; presence selects the login handshake
	pub password: Option<String>,
	/// Override the device's handshake timeout for this connect
	pub handshake_timeout: Option<Duration>,
}

/// One connection to one MicroPython board
pub struct Device {
	engine: Mutex<Option<ReplEngine>>,
	shared: Arc<LinkShared>,
	transport: StdMutex<Option<Arc<dyn Transport>>>,
	cancel: Arc<Notify>,
	handshake_timeout: Duration,
}

impl Default for Device {
	fn default() -> Self {
		Device::new()
	}
}

impl Device {
	pub fn new() -> Device {
		Device {
			engine: Mutex::new(None),
			shared: LinkShared::new(),
			transport: StdMutex::new(None),
			cancel: Arc::new(Notify::new()),
			handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
		}
	}

	pub fn with_handshake_timeout(timeout: Duration) -> Device {
		Device { handshake_timeout: timeout, ..Device::new() }
	}

	// ─── Connecting ───

	/// Open a serial link and run the state machine up through raw REPL.
	pub async fn connect_serial(&self, path: &str, baud: u32) -> Result<(), DeviceError> {
		if self.is_connected() {
			return Err(DeviceError::AlreadyConnected);
		}
		let path_owned = path.to_string();
		let link = tokio::task::spawn_blocking(move || transport::serial::open(&path_owned, baud))
			.await
			.map_err(|e| DeviceError::Io(std::io::Error::other(e)))??;
		self.attach(link, AttachOptions::default()).await
	}

	/// Open a WebREPL link, log in, and run the state machine up
	/// through raw REPL.
	pub async fn connect_network(&self, host: &str, password: &str) -> Result<(), DeviceError> {
		if self.is_connected() {
			return Err(DeviceError::AlreadyConnected);
		}
		let link = transport::ws::open(host).await?;
		let opts = AttachOptions { password: Some(password.to_string()), ..Default::default() };
		self.attach(link, opts).await
	}

	/// Attach a pre-opened transport and perform the handshake.
	///
	/// This is the seam the other connect methods go through; embedders
	/// and tests can hand in any transport (e.g. the in-memory pair).
	pub async fn attach(&self, link: TransportLink, opts: AttachOptions) -> Result<(), DeviceError> {
		let mut guard = self.engine.lock().await;
		if guard.is_some() && self.shared.state().is_connected() {
			return Err(DeviceError::AlreadyConnected);
		}
		*guard = None;

		let generation = self.shared.begin_connection();
		spawn_pump(self.shared.clone(), link.events, generation);
		*self.transport.lock().unwrap() = Some(link.transport.clone());

		let mut engine = ReplEngine::new(link.transport, self.shared.clone());
		let timeout = opts.handshake_timeout.unwrap_or(self.handshake_timeout);
		let deadline = Some(Instant::now() + timeout);

		let handshake = async {
			match &opts.password {
				Some(password) => engine.login_webrepl(password, deadline).await?,
				None => engine.set_state(LinkState::FriendlyRepl),
			}
			engine.enter_raw(deadline).await
		}
		.await;

		match handshake {
			Ok(()) => {
				info!("[device] connected: {}", engine.transport().kind());
				*guard = Some(engine);
				Ok(())
			}
			Err(e) => {
				let _ = engine.transport().close().await;
				engine.set_state(LinkState::Closed);
				*self.transport.lock().unwrap() = None;
				Err(e)
			}
		}
	}

	/// Return to the friendly prompt and close the transport.
	pub async fn disconnect(&self) -> Result<(), DeviceError> {
		let mut guard = self.engine.lock().await;
		let engine = guard.take().ok_or(DeviceError::NotConnected)?;
		let _ = engine.exit_raw().await;
		engine.set_state(LinkState::Closing);
		let _ = engine.transport().close().await;
		engine.set_state(LinkState::Closed);
		*self.transport.lock().unwrap() = None;
		Ok(())
	}

	/// Reset the board. Soft sends Ctrl-D from the friendly prompt;
	/// hard pulses the serial control lines. Either way the link is
	/// closed immediately without awaiting a response, since the board
	/// drops it.
	pub async fn reset(&self, soft: bool) -> Result<(), DeviceError> {
		let mut guard = self.engine.lock().await;
		{
			let engine = guard.as_mut().ok_or(DeviceError::NotConnected)?;
			if soft {
				let _ = engine.exit_raw().await;
				let _ = engine.send(b"\x04").await;
			} else {
				engine.transport().hard_reset().await?;
			}
		}
		let engine = guard.take().expect("engine checked above");
		engine.set_state(LinkState::Closing);
		let _ = engine.transport().close().await;
		engine.set_state(LinkState::Closed);
		*self.transport.lock().unwrap() = None;
		Ok(())
	}

	// ─── Observation ───

	pub fn state(&self) -> LinkState {
		self.shared.state()
	}

	pub fn is_connected(&self) -> bool {
		self.shared.state().is_connected()
	}

	pub fn is_terminal_mode(&self) -> bool {
		self.shared.state() == LinkState::TerminalMode
	}

	// ─── Script channel ───

	/// Run Python source on the board.
	///
	/// Calls serialize FIFO: at most one request is outstanding, and
	/// the next one starts only after the previous response's trailing
	/// prompt byte has been consumed. A deadline or an explicit
	/// [`cancel`](Device::cancel) interrupts the board and drains the
	/// response tail so the following request finds a clean prompt.
	pub async fn run_script(
		&self,
		source: &str,
		mut opts: RunOptions,
	) -> Result<ScriptResponse, DeviceError> {
		let mut guard = self.engine.lock().await;
		let engine = guard.as_mut().ok_or(DeviceError::NotConnected)?;
		if !engine.state().is_connected() {
			return Err(DeviceError::NotConnected);
		}

		self.shared.request_active.store(true, Ordering::SeqCst);
		let outcome = tokio::select! {
			r = engine.run_script(source, &mut opts) => r,
			_ = self.cancel.notified() => Err(DeviceError::Canceled),
		};
		let outcome = match outcome {
			Err(e @ DeviceError::Timeout) | Err(e @ DeviceError::Canceled) => {
				debug!("[device] request ended early ({}), interrupting board", e);
				engine.interrupt_and_drain().await;
				Err(e)
			}
			other => other,
		};
		self.shared.request_active.store(false, Ordering::SeqCst);
		outcome
	}

	/// Cancel the outstanding `run_script`, if any. The transport is
	/// left up; the request fails with `Canceled`.
	pub fn cancel(&self) {
		self.cancel.notify_waiters();
	}

	// ─── Terminal pass-through ───

	/// Forward every inbound byte to the terminal consumer until
	/// [`leave_terminal`](Device::leave_terminal). Bytes already
	/// buffered (e.g. a prompt echo) are flushed to the consumer first.
	pub async fn enter_terminal(&self) -> Result<(), DeviceError> {
		let mut guard = self.engine.lock().await;
		let engine = guard.as_mut().ok_or(DeviceError::NotConnected)?;
		if !engine.state().is_connected() {
			return Err(DeviceError::NotConnected);
		}
		engine.set_state(LinkState::TerminalMode);
		let mut slot = self.shared.on_terminal_data.lock().unwrap();
		if let Some(cb) = slot.as_mut() {
			let residue = engine.shared().take_buffered();
			if !residue.is_empty() {
				cb(&residue);
			}
		}
		Ok(())
	}

	/// Stop forwarding inbound bytes to the terminal consumer.
	pub async fn leave_terminal(&self) -> Result<(), DeviceError> {
		let mut guard = self.engine.lock().await;
		let engine = guard.as_mut().ok_or(DeviceError::NotConnected)?;
		if engine.state() == LinkState::TerminalMode {
			engine.set_state(LinkState::FriendlyRepl);
		}
		Ok(())
	}

	/// Write raw bytes to the board, unframed and unechoed. Control
	/// bytes pass through verbatim; a host-side quit key must be
	/// intercepted before calling this.
	pub async fn send_data(&self, data: &[u8]) -> Result<(), DeviceError> {
		let transport = self
			.transport
			.lock()
			.unwrap()
			.clone()
			.ok_or(DeviceError::NotConnected)?;
		transport.send(data).await.map_err(|_| DeviceError::ConnectionLost)
	}

	/// Register the terminal consumer.
	pub fn on_terminal_data(&self, cb: impl FnMut(&[u8]) + Send + 'static) {
		*self.shared.on_terminal_data.lock().unwrap() = Some(Box::new(cb));
	}

	/// Register the close callback; fired exactly once per connection,
	/// with the error text if the close was not orderly.
	pub fn on_close(&self, cb: impl FnMut(Option<String>) + Send + 'static) {
		*self.shared.on_close.lock().unwrap() = Some(Box::new(cb));
	}
}

// vim: ts=4
