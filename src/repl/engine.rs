//! REPL protocol engine
//!
//! Owns the receive pipeline and the mode state machine. Inbound bytes
//! flow from the transport event channel into the shared
//! [`ReceiveBuffer`] (or, in terminal mode, straight to the terminal
//! consumer); protocol code suspends on a wait-for-bytes primitive that
//! re-checks the buffer each time the pump appends to it. This makes
//! ordering and cancellation explicit instead of relying on implicit
//! scheduling.
//!
//! Every inbound byte ends up in exactly one place: the buffer feeding
//! the active request or handshake, the terminal consumer, or an
//! explicit drop inside a quiesce drain.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{timeout_at, Instant};

use crate::error::DeviceError;
use crate::logging::*;
use crate::repl::buffer::ReceiveBuffer;
use crate::repl::state::LinkState;
use crate::transport::{Transport, TransportEvent};

/// Sink for terminal pass-through data
pub type TerminalSink = Box<dyn FnMut(&[u8]) + Send>;

/// Callback fired once per connection when the transport closes;
/// carries the error text if the close was not orderly
pub type CloseSink = Box<dyn FnMut(Option<String>) + Send>;

/// Banner that confirms raw-REPL entry, trailing prompt included
pub const RAW_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";

/// Output gap that counts as "the prompt has quiesced"
const QUIESCE_IDLE: Duration = Duration::from_millis(150);

/// Bounded wait for the response tail after an interrupt
const RECOVERY_WAIT: Duration = Duration::from_millis(750);

/// State shared between the pump task, the engine, and the device
/// handle. Lives as long as the [`Device`](crate::device::Device); the
/// per-connection pieces are reset on each attach.
pub(crate) struct LinkShared {
	buf: Mutex<ReceiveBuffer>,
	/// Bumped by the pump on every append and on close
	rx_version: watch::Sender<u64>,
	state: watch::Sender<LinkState>,
	/// True while a script request owns the inbound stream
	pub(crate) request_active: AtomicBool,
	/// Close reason; `Some` once the connection is gone
	closed: Mutex<Option<Option<String>>>,
	/// Incremented per attach so a stale pump cannot poison a new link
	generation: AtomicU64,
	close_fired: AtomicBool,
	pub(crate) on_terminal_data: Mutex<Option<TerminalSink>>,
	pub(crate) on_close: Mutex<Option<CloseSink>>,
}

impl LinkShared {
	pub(crate) fn new() -> Arc<LinkShared> {
		Arc::new(LinkShared {
			buf: Mutex::new(ReceiveBuffer::new()),
			rx_version: watch::Sender::new(0),
			state: watch::Sender::new(LinkState::Closed),
			request_active: AtomicBool::new(false),
			closed: Mutex::new(Some(None)),
			generation: AtomicU64::new(0),
			close_fired: AtomicBool::new(true),
			on_terminal_data: Mutex::new(None),
			on_close: Mutex::new(None),
		})
	}

	/// Prepare for a fresh connection. Returns the new generation tag.
	///
	/// The generation moves first: a stale pump still draining the old
	/// transport then fails its tag check and cannot poison this link.
	pub(crate) fn begin_connection(&self) -> u64 {
		let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
		*self.buf.lock().unwrap() = ReceiveBuffer::new();
		*self.closed.lock().unwrap() = None;
		self.request_active.store(false, Ordering::SeqCst);
		self.close_fired.store(false, Ordering::SeqCst);
		self.state.send_replace(LinkState::Opening);
		generation
	}

	pub(crate) fn state(&self) -> LinkState {
		*self.state.borrow()
	}

	/// Pull everything currently buffered; used to hand prompt residue
	/// to the terminal consumer on terminal entry.
	pub(crate) fn take_buffered(&self) -> Vec<u8> {
		self.buf.lock().unwrap().take_all()
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.closed.lock().unwrap().is_some()
	}

	fn bump(&self) {
		self.rx_version.send_modify(|v| *v = v.wrapping_add(1));
	}

	/// Record a close, wake all waiters, fire `on_close` exactly once.
	pub(crate) fn mark_closed(&self, generation: u64, reason: Option<String>) {
		if self.generation.load(Ordering::SeqCst) != generation {
			return;
		}
		{
			let mut closed = self.closed.lock().unwrap();
			if closed.is_some() {
				return;
			}
			*closed = Some(reason.clone());
		}
		self.state.send_replace(LinkState::Closed);
		self.bump();
		if !self.close_fired.swap(true, Ordering::SeqCst) {
			if let Some(cb) = self.on_close.lock().unwrap().as_mut() {
				cb(reason);
			}
		}
	}
}

/// Spawn the inbound pump for one connection.
///
/// Routes every [`TransportEvent`]: data goes to the terminal consumer
/// when (and only when) the link is in terminal mode with no request
/// outstanding, otherwise into the receive buffer; a close event ends
/// the pump after marking the link closed.
pub(crate) fn spawn_pump(
	shared: Arc<LinkShared>,
	mut events: mpsc::Receiver<TransportEvent>,
	generation: u64,
) {
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Some(TransportEvent::Data(data)) => {
					let to_terminal = !shared.request_active.load(Ordering::SeqCst)
						&& shared.state() == LinkState::TerminalMode;
					if to_terminal {
						let mut slot = shared.on_terminal_data.lock().unwrap();
						if let Some(cb) = slot.as_mut() {
							cb(&data);
							continue;
						}
					}
					shared.buf.lock().unwrap().extend(&data);
					shared.bump();
				}
				Some(TransportEvent::Closed(reason)) => {
					trace!("[engine] transport closed: {:?}", reason);
					shared.mark_closed(generation, reason);
					break;
				}
				None => {
					shared.mark_closed(generation, None);
					break;
				}
			}
		}
	});
}

/// Protocol engine for one connection
pub struct ReplEngine {
	transport: Arc<dyn Transport>,
	shared: Arc<LinkShared>,
	/// Raw-paste capability learned from the first probe of this
	/// connection; never carried across reconnects
	pub(crate) raw_paste: Option<bool>,
	/// A first-prompt request left its response tail unconsumed
	pub(crate) needs_drain: bool,
}

impl ReplEngine {
	pub(crate) fn new(transport: Arc<dyn Transport>, shared: Arc<LinkShared>) -> ReplEngine {
		ReplEngine { transport, shared, raw_paste: None, needs_drain: false }
	}

	pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	pub(crate) fn shared(&self) -> &Arc<LinkShared> {
		&self.shared
	}

	pub(crate) fn state(&self) -> LinkState {
		self.shared.state()
	}

	/// Move to `next`, logging the step. Irregular moves are loud but
	/// not fatal: the transport can die under any state.
	pub(crate) fn set_state(&self, next: LinkState) {
		let current = self.shared.state();
		if current == next {
			return;
		}
		if !current.can_transition_to(next) {
			warn!("[engine] irregular state transition {} -> {}", current, next);
		} else {
			debug!("[engine] state {} -> {}", current, next);
		}
		self.shared.state.send_replace(next);
	}

	pub(crate) async fn send(&self, data: &[u8]) -> Result<(), DeviceError> {
		self.transport.send(data).await.map_err(|_| DeviceError::ConnectionLost)
	}

	/// Wait-for-bytes primitive: re-run `check` against the buffer each
	/// time the pump appends, until it yields a value, the deadline
	/// passes, or the link closes.
	pub(crate) async fn wait_for<T>(
		&self,
		deadline: Option<Instant>,
		mut check: impl FnMut(&mut ReceiveBuffer) -> Option<T>,
	) -> Result<T, DeviceError> {
		let mut version = self.shared.rx_version.subscribe();
		loop {
			{
				let mut buf = self.shared.buf.lock().unwrap();
				if let Some(v) = check(&mut buf) {
					return Ok(v);
				}
			}
			if self.shared.is_closed() {
				return Err(DeviceError::ConnectionLost);
			}
			match deadline {
				Some(d) => {
					timeout_at(d, version.changed())
						.await
						.map_err(|_| DeviceError::Timeout)?
						.map_err(|_| DeviceError::ConnectionLost)?;
				}
				None => {
					version.changed().await.map_err(|_| DeviceError::ConnectionLost)?;
				}
			}
		}
	}

	/// Consume bytes up to and including `marker`; the returned body
	/// excludes the marker. Bytes stream into `sink` as they arrive, so
	/// unbounded output never pools unseen.
	pub(crate) async fn read_until(
		&self,
		marker: &[u8],
		deadline: Option<Instant>,
		mut sink: Option<&mut (dyn FnMut(&[u8]) + Send)>,
	) -> Result<Vec<u8>, DeviceError> {
		debug_assert!(!marker.is_empty());
		let mut out = Vec::new();
		let mut version = self.shared.rx_version.subscribe();
		loop {
			enum Step {
				Done(Vec<u8>),
				Partial(Vec<u8>),
				Wait,
			}
			let step = {
				let mut buf = self.shared.buf.lock().unwrap();
				if let Some(pos) = buf.find(marker) {
					let mut body = buf.take(pos + marker.len());
					body.truncate(pos);
					Step::Done(body)
				} else {
					// Keep a marker-sized tail so a split marker is
					// still found on the next append.
					let keep = marker.len() - 1;
					if buf.len() > keep {
						let n = buf.len() - keep;
						Step::Partial(buf.take(n))
					} else {
						Step::Wait
					}
				}
			};
			match step {
				Step::Done(body) => {
					if !body.is_empty() {
						if let Some(cb) = sink.as_mut() {
							cb(&body);
						}
					}
					out.extend_from_slice(&body);
					return Ok(out);
				}
				Step::Partial(chunk) => {
					if let Some(cb) = sink.as_mut() {
						cb(&chunk);
					}
					out.extend_from_slice(&chunk);
				}
				Step::Wait => {
					if self.shared.is_closed() {
						return Err(DeviceError::ConnectionLost);
					}
					match deadline {
						Some(d) => {
							timeout_at(d, version.changed())
								.await
								.map_err(|_| DeviceError::Timeout)?
								.map_err(|_| DeviceError::ConnectionLost)?;
						}
						None => {
							version
								.changed()
								.await
								.map_err(|_| DeviceError::ConnectionLost)?;
						}
					}
				}
			}
		}
	}

	/// Consume exactly `n` bytes.
	pub(crate) async fn read_exact(
		&self,
		n: usize,
		deadline: Option<Instant>,
	) -> Result<Vec<u8>, DeviceError> {
		self.wait_for(deadline, |buf| if buf.len() >= n { Some(buf.take(n)) } else { None })
			.await
	}

	/// Consume `literal` or fail with `InvalidResponse`.
	pub(crate) async fn expect(
		&self,
		literal: &[u8],
		deadline: Option<Instant>,
	) -> Result<(), DeviceError> {
		let got = self.read_exact(literal.len(), deadline).await?;
		if got == literal {
			Ok(())
		} else {
			Err(DeviceError::InvalidResponse {
				message: format!(
					"expected {:?}, got {:?}",
					String::from_utf8_lossy(literal),
					String::from_utf8_lossy(&got)
				),
			})
		}
	}

	/// Consume one newline-terminated line, lossily decoded.
	pub(crate) async fn read_line(&self, deadline: Option<Instant>) -> Result<String, DeviceError> {
		let line = self.wait_for(deadline, |buf| buf.take_line()).await?;
		Ok(String::from_utf8_lossy(&line).into_owned())
	}

	/// Drop inbound bytes until the device stays silent for
	/// [`QUIESCE_IDLE`], or `deadline` passes.
	pub(crate) async fn drain_quiesce(&self, deadline: Option<Instant>) -> Result<(), DeviceError> {
		let mut version = self.shared.rx_version.subscribe();
		loop {
			self.shared.buf.lock().unwrap().take_all();
			if self.shared.is_closed() {
				return Err(DeviceError::ConnectionLost);
			}
			let idle_until = Instant::now() + QUIESCE_IDLE;
			let wait_until = match deadline {
				Some(d) if d < idle_until => d,
				_ => idle_until,
			};
			match timeout_at(wait_until, version.changed()).await {
				Ok(Ok(())) => continue,
				Ok(Err(_)) => return Err(DeviceError::ConnectionLost),
				Err(_elapsed) => {
					if wait_until == idle_until {
						return Ok(());
					}
					return Err(DeviceError::Timeout);
				}
			}
		}
	}

	// ─── Mode transitions ───

	/// WebREPL login: wait for the password prompt, answer it, then
	/// accept either the connected banner or a denial.
	pub(crate) async fn login_webrepl(
		&self,
		password: &str,
		deadline: Option<Instant>,
	) -> Result<(), DeviceError> {
		self.set_state(LinkState::WebReplUnauthenticated);
		self.read_until(b"Password:", deadline, None)
			.await
			.map_err(handshake_err("the WebREPL password prompt"))?;
		self.send(format!("{}\r", password).as_bytes()).await?;
		loop {
			let line = self
				.read_line(deadline)
				.await
				.map_err(handshake_err("the WebREPL login response"))?;
			if line.contains("WebREPL connected") {
				info!("[engine] WebREPL login accepted");
				self.set_state(LinkState::FriendlyRepl);
				return Ok(());
			}
			if line.contains("Access denied") {
				return Err(DeviceError::AuthFailed);
			}
			trace!("[engine] skipping login chatter: {}", line);
		}
	}

	/// Interrupt whatever runs, wait for the prompt to quiesce, then
	/// switch to raw mode and await its banner.
	pub(crate) async fn enter_raw(&mut self, deadline: Option<Instant>) -> Result<(), DeviceError> {
		let state = self.state();
		if state.is_raw() {
			return Ok(());
		}
		if !state.is_connected() {
			return Err(DeviceError::NotConnected);
		}
		if state == LinkState::TerminalMode {
			self.set_state(LinkState::FriendlyRepl);
		}
		self.send(b"\r\x03\x03").await?;
		self.drain_quiesce(deadline).await?;
		self.send(b"\x01").await?;
		self.read_until(RAW_BANNER, deadline, None)
			.await
			.map_err(handshake_err("the raw REPL banner"))?;
		self.set_state(LinkState::RawRepl);
		Ok(())
	}

	/// Back to the friendly prompt. Fire-and-forget: the friendly
	/// banner varies by port, so it is not awaited.
	pub(crate) async fn exit_raw(&self) -> Result<(), DeviceError> {
		if self.state().is_raw() {
			self.send(b"\x02").await?;
			self.set_state(LinkState::FriendlyRepl);
		}
		Ok(())
	}

	/// Consume the tail of a response whose body was abandoned
	/// (first-prompt resolve): stdout, stderr, and the prompt byte.
	pub(crate) async fn drain_response_tail(
		&mut self,
		deadline: Option<Instant>,
	) -> Result<(), DeviceError> {
		self.read_until(b"\x04", deadline, None).await?;
		self.read_until(b"\x04", deadline, None).await?;
		self.read_until(b">", deadline, None).await?;
		self.needs_drain = false;
		self.set_state(LinkState::RawRepl);
		Ok(())
	}

	/// Cancel discipline: send Ctrl-C, then consume the interrupted
	/// response's tail up to the prompt so the next request starts
	/// clean. If the device stays mute past the recovery window, the
	/// link is torn down instead.
	pub(crate) async fn interrupt_and_drain(&mut self) {
		if self.send(b"\x03").await.is_err() {
			return;
		}
		let deadline = Some(Instant::now() + RECOVERY_WAIT);
		let drained = async {
			self.read_until(b"\x04", deadline, None).await?;
			self.read_until(b"\x04", deadline, None).await?;
			self.read_until(b">", deadline, None).await?;
			Ok::<(), DeviceError>(())
		}
		.await;
		match drained {
			Ok(()) => {
				self.needs_drain = false;
				self.set_state(LinkState::RawRepl);
			}
			Err(e) => {
				warn!("[engine] device unresponsive after interrupt ({}), closing link", e);
				self.set_state(LinkState::Closed);
				let _ = self.transport.close().await;
			}
		}
	}
}

/// Map a bounded-wait timeout to the handshake failure it means.
pub(crate) fn handshake_err(expected: &str) -> impl FnOnce(DeviceError) -> DeviceError + '_ {
	move |e| match e {
		DeviceError::Timeout => DeviceError::HandshakeFailed { expected: expected.to_string() },
		other => other,
	}
}

// vim: ts=4
