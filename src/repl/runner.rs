//! Script runner
//!
//! The request/response core: submit Python source, get back
//! `{ stdout, stderr, exception }`. One request runs at a time; the
//! device orders responses by submission because the runner never
//! starts a request before the previous response's trailing prompt
//! byte has been consumed.
//!
//! Source travels by the raw-paste path when the device supports it
//! (windowed flow control, learned from the `\x05A\x01` probe), else by
//! a plain chunked write. Either way the response is framed by the same
//! four landmarks: `OK`, stdout, `\x04`, stderr, `\x04`, `>`.

use tokio::time::Instant;

use crate::error::DeviceError;
use crate::logging::*;
use crate::repl::engine::ReplEngine;
use crate::repl::state::LinkState;
use crate::util;

/// Write size for the plain raw path, which has no flow control
const RAW_WRITE_CHUNK: usize = 256;

/// When to complete a `run_script` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolve {
	/// As soon as the device acknowledges receipt; output is abandoned
	/// and drained before the next request
	FirstPrompt,
	/// After the full response
	#[default]
	OnCompletion,
}

/// One inbound chunk handed to a streaming callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChunk<'a> {
	Stdout(&'a [u8]),
	Stderr(&'a [u8]),
}

/// Streaming sink invoked with each chunk as it arrives
pub type ChunkSink = Box<dyn FnMut(OutputChunk<'_>) + Send>;

/// Options for one `run_script` call
#[derive(Default)]
pub struct RunOptions {
	pub resolve: Resolve,
	/// Deadline; wait forever if absent
	pub timeout: Option<std::time::Duration>,
	/// Skip the common-indent strip
	pub disable_dedent: bool,
	/// Optional streaming sink
	pub on_chunk: Option<ChunkSink>,
}

impl RunOptions {
	pub fn with_timeout(timeout: std::time::Duration) -> RunOptions {
		RunOptions { timeout: Some(timeout), ..RunOptions::default() }
	}
}

/// Result of one script execution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptResponse {
	/// Device stdout, lossily decoded
	pub stdout: String,
	/// Device stderr (full traceback on error), lossily decoded
	pub stderr: String,
	/// Exception class and message: the last non-empty stderr line
	pub exception: Option<String>,
}

impl ScriptResponse {
	fn from_parts(stdout: Vec<u8>, stderr: Vec<u8>) -> ScriptResponse {
		let stdout = String::from_utf8_lossy(&stdout).into_owned();
		let stderr = String::from_utf8_lossy(&stderr).into_owned();
		let exception = util::exception_line(&stderr);
		ScriptResponse { stdout, stderr, exception }
	}
}

impl ReplEngine {
	/// Execute `source` on the device and parse the framed response.
	///
	/// The caller (the device handle) holds the request lock and has
	/// marked the request active; cancellation and the timeout-to-
	/// interrupt translation also live there. An `Err(Timeout)` from
	/// here means the deadline elapsed with the response incomplete —
	/// the caller then runs the interrupt discipline.
	pub(crate) async fn run_script(
		&mut self,
		source: &str,
		opts: &mut RunOptions,
	) -> Result<ScriptResponse, DeviceError> {
		let deadline = opts.timeout.map(|t| Instant::now() + t);

		if self.needs_drain {
			self.drain_response_tail(deadline).await?;
		}
		self.enter_raw(deadline).await?;

		let body = if opts.disable_dedent {
			source.to_string()
		} else {
			util::dedent(source)
		};
		trace!("[runner] submitting {} bytes", body.len());

		self.submit(body.as_bytes(), deadline).await?;

		if opts.resolve == Resolve::FirstPrompt {
			self.needs_drain = true;
			return Ok(ScriptResponse::default());
		}

		let mut sink = opts.on_chunk.take();

		let mut feed_out = |chunk: &[u8]| {
			if let Some(cb) = sink.as_mut() {
				cb(OutputChunk::Stdout(chunk));
			}
		};
		let stdout = self.read_until(b"\x04", deadline, Some(&mut feed_out)).await?;

		let mut feed_err = |chunk: &[u8]| {
			if let Some(cb) = sink.as_mut() {
				cb(OutputChunk::Stderr(chunk));
			}
		};
		let stderr = self.read_until(b"\x04", deadline, Some(&mut feed_err)).await?;

		self.expect(b">", deadline).await?;
		self.set_state(LinkState::RawRepl);

		opts.on_chunk = sink;
		Ok(ScriptResponse::from_parts(stdout, stderr))
	}

	/// Send the source bytes and consume everything up to and including
	/// the `OK` acknowledgment.
	async fn submit(&mut self, body: &[u8], deadline: Option<Instant>) -> Result<(), DeviceError> {
		let use_paste = match self.raw_paste {
			Some(supported) => supported,
			None => self.probe_raw_paste(deadline).await?,
		};

		if use_paste {
			// The probe response left the device in raw-paste receive
			// mode only on the very first request; later requests must
			// re-enter it.
			if self.state() != LinkState::RawPasteRepl {
				self.send(b"\x05A\x01").await?;
				let reply = self.read_exact(2, deadline).await?;
				if reply != b"R\x01" {
					return Err(DeviceError::InvalidResponse {
						message: format!("raw-paste re-entry answered {:?}", reply),
					});
				}
				self.set_state(LinkState::RawPasteRepl);
			}
			let window = {
				let raw = self.read_exact(2, deadline).await?;
				u16::from_le_bytes([raw[0], raw[1]])
			};
			self.paste_write(body, window, deadline).await?;
		} else {
			for chunk in body.chunks(RAW_WRITE_CHUNK) {
				self.send(chunk).await?;
			}
			self.send(b"\x04").await?;
		}

		self.expect(b"OK", deadline).await
	}

	/// First-request capability probe. On `R\x01` the device is already
	/// in raw-paste receive mode; on `R\x00` it stays at the raw prompt.
	/// The answer is remembered for this connection only.
	async fn probe_raw_paste(&mut self, deadline: Option<Instant>) -> Result<bool, DeviceError> {
		self.send(b"\x05A\x01").await?;
		let reply = self.read_exact(2, deadline).await?;
		let supported = match reply.as_slice() {
			b"R\x01" => {
				self.set_state(LinkState::RawPasteRepl);
				true
			}
			b"R\x00" => false,
			other => {
				return Err(DeviceError::InvalidResponse {
					message: format!("raw-paste probe answered {:?}", other),
				});
			}
		};
		debug!("[runner] raw-paste support: {}", supported);
		self.raw_paste = Some(supported);
		Ok(supported)
	}

	/// Flow-controlled source write: never more than the advertised
	/// window unacknowledged; each `\x01` grants one more window; a
	/// `\x04` from the device aborts the remainder. Ends by signalling
	/// end-of-input with `\x04` and waiting for the matching ack.
	async fn paste_write(
		&mut self,
		body: &[u8],
		window: u16,
		deadline: Option<Instant>,
	) -> Result<(), DeviceError> {
		let window = window as usize;
		if window == 0 {
			return Err(DeviceError::InvalidResponse {
				message: "device advertised a zero flow-control window".to_string(),
			});
		}
		let mut remain = window;
		let mut sent = 0usize;
		let mut aborted = false;

		while sent < body.len() {
			if remain == 0 {
				let byte = self.read_exact(1, deadline).await?;
				match byte[0] {
					0x01 => remain += window,
					0x04 => {
						debug!("[runner] device aborted raw-paste after {} bytes", sent);
						aborted = true;
						break;
					}
					other => {
						return Err(DeviceError::InvalidResponse {
							message: format!("unexpected flow-control byte 0x{:02x}", other),
						});
					}
				}
				continue;
			}
			let n = remain.min(body.len() - sent);
			self.send(&body[sent..sent + n]).await?;
			sent += n;
			remain -= n;
		}

		// End of input; the device acknowledges with one \x04.
		self.send(b"\x04").await?;
		if !aborted {
			self.read_until(b"\x04", deadline, None).await?;
		}
		self.set_state(LinkState::RawRepl);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_response_exception_extraction() {
		let stderr = b"Traceback (most recent call last):\r\n  File \"<stdin>\", line 1, in <module>\r\nValueError: x\r\n";
		let resp = ScriptResponse::from_parts(b"".to_vec(), stderr.to_vec());
		assert_eq!(resp.exception.as_deref(), Some("ValueError: x"));
		assert!(resp.stderr.contains("Traceback"));
	}

	#[test]
	fn test_response_clean_run_has_no_exception() {
		let resp = ScriptResponse::from_parts(b"5\n".to_vec(), Vec::new());
		assert_eq!(resp.stdout, "5\n");
		assert_eq!(resp.exception, None);
	}

	#[test]
	fn test_response_lossy_decode() {
		let resp = ScriptResponse::from_parts(vec![0xff, b'a'], Vec::new());
		assert!(resp.stdout.ends_with('a'));
	}
}

// vim: ts=4
