//! Transport abstraction layer
//!
//! A transport is a bidirectional, strictly ordered byte stream to the
//! device. Outbound bytes go through the [`Transport`] trait; inbound
//! bytes and the close notification arrive as [`TransportEvent`]s on the
//! channel half of a [`TransportLink`], in arrival order.
//!
//! Three backends exist:
//! - [`serial`] — a local USB serial port (115200 8N1, DTR asserted)
//! - [`ws`] — the WebREPL WebSocket protocol on port 8266
//! - [`mem`] — an in-memory pair for tests and offline demos

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub mod mem;
pub mod serial;
pub mod ws;

/// Bound on buffered inbound chunks before the reader applies backpressure
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Which kind of link a transport is, fixed at connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
	/// Local serial port
	Serial { path: String, baud: u32 },
	/// WebREPL WebSocket client
	Network { host: String },
	/// In-memory test pair
	Memory,
}

impl std::fmt::Display for TransportKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			TransportKind::Serial { path, baud } => write!(f, "serial {} @ {}", path, baud),
			TransportKind::Network { host } => write!(f, "webrepl {}", host),
			TransportKind::Memory => write!(f, "memory"),
		}
	}
}

/// Inbound notification from a transport backend
#[derive(Debug)]
pub enum TransportEvent {
	/// A chunk of bytes, arbitrary size, in arrival order
	Data(Vec<u8>),

	/// The link closed; carries the reason if it was an error.
	/// Emitted exactly once, after which no further events follow.
	Closed(Option<String>),
}

/// Outbound half of a transport
///
/// Implementations must be `Send + Sync` so one handle can be shared by
/// the request path and the terminal pass-through.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Write bytes to the device. Must not reorder.
	async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

	/// Close the link. Idempotent; the event channel sees one
	/// [`TransportEvent::Closed`] afterwards.
	async fn close(&self) -> Result<(), TransportError>;

	/// Pulse the control lines to hard-reset the board.
	/// Only the serial backend supports this.
	async fn hard_reset(&self) -> Result<(), TransportError> {
		Err(TransportError::Unsupported { what: "hard reset" })
	}

	/// Which kind of link this is.
	fn kind(&self) -> TransportKind;
}

/// A freshly opened transport: the outbound handle plus the inbound
/// event stream. The engine takes ownership of the receiver.
pub struct TransportLink {
	pub transport: Arc<dyn Transport>,
	pub events: mpsc::Receiver<TransportEvent>,
}

// vim: ts=4
