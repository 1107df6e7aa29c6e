//! WebREPL WebSocket transport
//!
//! Connects to `ws://<host>:8266/` and exchanges the REPL byte stream
//! over WebSocket frames. The board sends text frames for REPL output;
//! both text and binary frames are forwarded inbound. Outbound bytes go
//! as binary frames through a writer task so sends never reorder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::logging::*;
use crate::transport::{Transport, TransportEvent, TransportKind, TransportLink, EVENT_CHANNEL_CAPACITY};

/// Default WebREPL port
pub const WEBREPL_PORT: u16 = 8266;

enum WriterCmd {
	Send(Vec<u8>),
	Close,
}

pub struct WsTransport {
	out: mpsc::UnboundedSender<WriterCmd>,
	closing: Arc<AtomicBool>,
	host: String,
}

/// Resolve `host` to a WebREPL URL, keeping an explicit port if given.
fn webrepl_url(host: &str) -> String {
	if host.contains(':') {
		format!("ws://{}/", host)
	} else {
		format!("ws://{}:{}/", host, WEBREPL_PORT)
	}
}

/// Open a WebSocket to the board and spawn the reader/writer tasks.
pub async fn open(host: &str) -> Result<TransportLink, TransportError> {
	let url = webrepl_url(host);
	let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
		.await
		.map_err(|e| match e {
			tokio_tungstenite::tungstenite::Error::Io(io) => TransportError::Unavailable {
				target: url.clone(),
				message: io.to_string(),
			},
			other => TransportError::HandshakeFailed { message: other.to_string() },
		})?;
	debug!("[webrepl] connected to {}", url);

	let (mut sink, mut source) = stream.split();
	let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
	let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WriterCmd>();

	// Writer task: drains the command queue in order.
	tokio::spawn(async move {
		while let Some(cmd) = out_rx.recv().await {
			match cmd {
				WriterCmd::Send(data) => {
					if let Err(e) = sink.send(Message::Binary(data)).await {
						warn!("[webrepl] send failed: {}", e);
						break;
					}
				}
				WriterCmd::Close => {
					let _ = sink.send(Message::Close(None)).await;
					let _ = sink.close().await;
					break;
				}
			}
		}
	});

	// Reader task: forwards frames until the peer goes away.
	tokio::spawn(async move {
		loop {
			match source.next().await {
				Some(Ok(Message::Binary(data))) => {
					if event_tx.send(TransportEvent::Data(data)).await.is_err() {
						break;
					}
				}
				Some(Ok(Message::Text(text))) => {
					if event_tx.send(TransportEvent::Data(text.into_bytes())).await.is_err() {
						break;
					}
				}
				Some(Ok(Message::Ping(_)))
				| Some(Ok(Message::Pong(_)))
				| Some(Ok(Message::Frame(_))) => continue,
				Some(Ok(Message::Close(_))) | None => {
					let _ = event_tx.send(TransportEvent::Closed(None)).await;
					break;
				}
				Some(Err(e)) => {
					let _ = event_tx.send(TransportEvent::Closed(Some(e.to_string()))).await;
					break;
				}
			}
		}
	});

	let transport = WsTransport {
		out: out_tx,
		closing: Arc::new(AtomicBool::new(false)),
		host: host.to_string(),
	};
	Ok(TransportLink { transport: Arc::new(transport), events: event_rx })
}

#[async_trait]
impl Transport for WsTransport {
	async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
		if self.closing.load(Ordering::SeqCst) {
			return Err(TransportError::PeerClosed);
		}
		self.out
			.send(WriterCmd::Send(data.to_vec()))
			.map_err(|_| TransportError::PeerClosed)
	}

	async fn close(&self) -> Result<(), TransportError> {
		if !self.closing.swap(true, Ordering::SeqCst) {
			let _ = self.out.send(WriterCmd::Close);
		}
		Ok(())
	}

	fn kind(&self) -> TransportKind {
		TransportKind::Network { host: self.host.clone() }
	}
}


// vim: ts=4
