//! Receive buffer and line splitter
//!
//! Inbound bytes accumulate here until the state machine consumes them.
//! The buffer is a contiguous array with a consumed watermark: readers
//! either consume a prefix up to a known marker or peek for one of
//! several markers, and the login recognizer pulls newline-terminated
//! lines off the front.

/// Append-only byte buffer with a consumed watermark
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
	data: Vec<u8>,
	start: usize,
}

/// Compact once the consumed prefix outgrows this
const COMPACT_THRESHOLD: usize = 64 * 1024;

impl ReceiveBuffer {
	pub fn new() -> ReceiveBuffer {
		ReceiveBuffer::default()
	}

	/// Unconsumed byte count
	pub fn len(&self) -> usize {
		self.data.len() - self.start
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Unconsumed bytes
	pub fn as_slice(&self) -> &[u8] {
		&self.data[self.start..]
	}

	pub fn extend(&mut self, bytes: &[u8]) {
		self.data.extend_from_slice(bytes);
	}

	/// Offset of `marker` within the unconsumed bytes, if present
	pub fn find(&self, marker: &[u8]) -> Option<usize> {
		if marker.is_empty() || self.len() < marker.len() {
			return None;
		}
		self.as_slice().windows(marker.len()).position(|w| w == marker)
	}

	/// Consume and return the first `n` unconsumed bytes.
	///
	/// Panics if fewer than `n` bytes are buffered; callers check `len`
	/// or `find` first.
	pub fn take(&mut self, n: usize) -> Vec<u8> {
		assert!(n <= self.len(), "take past buffer end");
		let out = self.data[self.start..self.start + n].to_vec();
		self.start += n;
		self.compact();
		out
	}

	/// Consume everything buffered so far.
	pub fn take_all(&mut self) -> Vec<u8> {
		self.take(self.len())
	}

	/// Consume one newline-terminated line, without the trailing
	/// `\r\n`/`\n`. Returns `None` until a full line is buffered.
	pub fn take_line(&mut self) -> Option<Vec<u8>> {
		let nl = self.find(b"\n")?;
		let mut line = self.take(nl + 1);
		line.pop();
		if line.last() == Some(&b'\r') {
			line.pop();
		}
		Some(line)
	}

	fn compact(&mut self) {
		if self.start >= COMPACT_THRESHOLD || self.start >= self.data.len() {
			self.data.drain(..self.start);
			self.start = 0;
		}
	}
}


// vim: ts=4
