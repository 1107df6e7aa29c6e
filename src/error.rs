//! Error types for mplink operations

use std::error::Error;
use std::fmt;
use std::io;

/// Main error type for device operations
#[derive(Debug)]
pub enum DeviceError {
	/// Operation requires an active link
	NotConnected,

	/// Second connect on a live device
	AlreadyConnected,

	/// WebREPL password rejected
	AuthFailed,

	/// Expected banner or landmark not seen within a bounded wait
	HandshakeFailed { expected: String },

	/// Transport closed mid-operation
	ConnectionLost,

	/// User-supplied deadline elapsed
	Timeout,

	/// Explicit cancel
	Canceled,

	/// Remote exception; carries the full traceback text
	Script { exception: String, traceback: String },

	/// Remote OSError with a recognized errno
	RemoteOs { errno: RemoteErrno, traceback: String },

	/// Framing violation (e.g. missing sentinel)
	InvalidResponse { message: String },

	/// Transport-level error (nested)
	Transport(TransportError),

	/// Host-side I/O error
	Io(io::Error),

	/// Invalid configuration
	InvalidConfig { message: String },
}

impl fmt::Display for DeviceError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DeviceError::NotConnected => write!(f, "Not connected to a device"),
			DeviceError::AlreadyConnected => write!(f, "Device is already connected"),
			DeviceError::AuthFailed => write!(f, "WebREPL password rejected"),
			DeviceError::HandshakeFailed { expected } => {
				write!(f, "Handshake failed: did not see {}", expected)
			}
			DeviceError::ConnectionLost => write!(f, "Connection lost"),
			DeviceError::Timeout => write!(f, "Operation timed out"),
			DeviceError::Canceled => write!(f, "Operation canceled"),
			DeviceError::Script { exception, .. } => {
				write!(f, "Remote script raised: {}", exception)
			}
			DeviceError::RemoteOs { errno, .. } => write!(f, "Remote OSError: {}", errno),
			DeviceError::InvalidResponse { message } => {
				write!(f, "Invalid response: {}", message)
			}
			DeviceError::Transport(e) => write!(f, "Transport error: {}", e),
			DeviceError::Io(e) => write!(f, "I/O error: {}", e),
			DeviceError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
		}
	}
}

impl Error for DeviceError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			DeviceError::Transport(e) => Some(e),
			DeviceError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for DeviceError {
	fn from(e: io::Error) -> Self {
		DeviceError::Io(e)
	}
}

impl From<TransportError> for DeviceError {
	fn from(e: TransportError) -> Self {
		DeviceError::Transport(e)
	}
}

/// Transport-specific errors
#[derive(Debug)]
pub enum TransportError {
	/// Device path or host could not be opened
	Unavailable { target: String, message: String },

	/// Opening the device was denied by the OS
	PermissionDenied { target: String },

	/// Link-level handshake (e.g. WebSocket upgrade) failed
	HandshakeFailed { message: String },

	/// Peer closed the link
	PeerClosed,

	/// Operation not supported by this transport kind
	Unsupported { what: &'static str },

	/// I/O error
	Io(io::Error),
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportError::Unavailable { target, message } => {
				write!(f, "Cannot open {}: {}", target, message)
			}
			TransportError::PermissionDenied { target } => {
				write!(f, "Permission denied: {}", target)
			}
			TransportError::HandshakeFailed { message } => {
				write!(f, "Transport handshake failed: {}", message)
			}
			TransportError::PeerClosed => write!(f, "Peer closed the connection"),
			TransportError::Unsupported { what } => {
				write!(f, "Not supported by this transport: {}", what)
			}
			TransportError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
	fn from(e: io::Error) -> Self {
		TransportError::Io(e)
	}
}

/// Errno values recognized in remote OSError tracebacks
///
/// Filesystem operations translate these so callers can pattern-match
/// instead of grepping traceback text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrno {
	/// No such file or directory
	Enoent,
	/// File or directory exists
	Eexist,
	/// Is a directory
	Eisdir,
	/// Permission denied
	Eacces,
}

impl RemoteErrno {
	/// Recognize an errno from the exception line of a traceback.
	///
	/// MicroPython prints either the symbolic name (`OSError: [Errno 2] ENOENT`)
	/// or just the number (`OSError: 2`), depending on port and build.
	pub fn from_exception(line: &str) -> Option<RemoteErrno> {
		if !line.starts_with("OSError") {
			return None;
		}
		if line.contains("ENOENT") || line.contains("[Errno 2]") || line.ends_with(" 2") {
			Some(RemoteErrno::Enoent)
		} else if line.contains("EEXIST") || line.contains("[Errno 17]") || line.ends_with(" 17") {
			Some(RemoteErrno::Eexist)
		} else if line.contains("EISDIR") || line.contains("[Errno 21]") || line.ends_with(" 21") {
			Some(RemoteErrno::Eisdir)
		} else if line.contains("EACCES") || line.contains("[Errno 13]") || line.ends_with(" 13") {
			Some(RemoteErrno::Eacces)
		} else {
			None
		}
	}

	/// Numeric errno value
	pub fn errno(&self) -> u16 {
		match self {
			RemoteErrno::Enoent => 2,
			RemoteErrno::Eacces => 13,
			RemoteErrno::Eexist => 17,
			RemoteErrno::Eisdir => 21,
		}
	}
}

impl fmt::Display for RemoteErrno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RemoteErrno::Enoent => write!(f, "ENOENT (no such file or directory)"),
			RemoteErrno::Eexist => write!(f, "EEXIST (file exists)"),
			RemoteErrno::Eisdir => write!(f, "EISDIR (is a directory)"),
			RemoteErrno::Eacces => write!(f, "EACCES (permission denied)"),
		}
	}
}


// vim: ts=4
