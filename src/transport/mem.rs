//! In-memory transport pair
//!
//! A fully in-memory link useful for tests and offline demos: the host
//! side looks exactly like a real transport, and the returned
//! [`MemoryPeer`] plays the device — it receives whatever the host
//! sends and can inject bytes or a close event back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent, TransportKind, TransportLink, EVENT_CHANNEL_CAPACITY};

pub struct MemoryTransport {
	to_peer: mpsc::UnboundedSender<Vec<u8>>,
	events: mpsc::Sender<TransportEvent>,
	closing: Arc<AtomicBool>,
}

/// Device-side handle of a memory link
pub struct MemoryPeer {
	from_host: mpsc::UnboundedReceiver<Vec<u8>>,
	events: mpsc::Sender<TransportEvent>,
}

impl MemoryPeer {
	/// Next chunk the host wrote, or `None` once the host side closed.
	pub async fn recv(&mut self) -> Option<Vec<u8>> {
		self.from_host.recv().await
	}

	/// Deliver bytes to the host as if the device produced them.
	pub async fn inject(&self, data: &[u8]) {
		let _ = self.events.send(TransportEvent::Data(data.to_vec())).await;
	}

	/// Close the link from the device side.
	pub async fn close(&self, reason: Option<String>) {
		let _ = self.events.send(TransportEvent::Closed(reason)).await;
	}
}

/// Create a connected (host transport, device peer) pair.
pub fn pair() -> (TransportLink, MemoryPeer) {
	let (to_peer, from_host) = mpsc::unbounded_channel();
	let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

	let transport = MemoryTransport {
		to_peer,
		events: event_tx.clone(),
		closing: Arc::new(AtomicBool::new(false)),
	};
	let peer = MemoryPeer { from_host, events: event_tx };

	(
		TransportLink { transport: Arc::new(transport), events: event_rx },
		peer,
	)
}

#[async_trait]
impl Transport for MemoryTransport {
	async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
		if self.closing.load(Ordering::SeqCst) {
			return Err(TransportError::PeerClosed);
		}
		self.to_peer.send(data.to_vec()).map_err(|_| TransportError::PeerClosed)
	}

	async fn close(&self) -> Result<(), TransportError> {
		if !self.closing.swap(true, Ordering::SeqCst) {
			let _ = self.events.send(TransportEvent::Closed(None)).await;
		}
		Ok(())
	}

	fn kind(&self) -> TransportKind {
		TransportKind::Memory
	}
}


// vim: ts=4
