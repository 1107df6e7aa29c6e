//! Link state machine states
//!
//! Tracks which interaction mode the device is in. Transitions are
//! driven by [`ReplEngine`](super::engine::ReplEngine); this module
//! defines the states and which moves are legal so the engine can log
//! every step and never skip one silently.

use std::fmt;

/// Interaction mode of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
	/// No transport
	Closed,

	/// Transport open in progress
	Opening,

	/// WebSocket is up, password not yet accepted
	WebReplUnauthenticated,

	/// Human-facing `>>>` prompt
	FriendlyRepl,

	/// Machine mode: input runs verbatim, output framed by sentinels
	RawRepl,

	/// Flow-controlled raw mode for streaming large sources
	RawPasteRepl,

	/// Every inbound byte goes to the terminal consumer
	TerminalMode,

	/// Orderly shutdown in progress
	Closing,
}

impl LinkState {
	/// Whether the link is usable for requests or terminal traffic
	pub fn is_connected(&self) -> bool {
		!matches!(self, LinkState::Closed | LinkState::Opening | LinkState::Closing)
	}

	/// Whether the device is in one of the raw modes
	pub fn is_raw(&self) -> bool {
		matches!(self, LinkState::RawRepl | LinkState::RawPasteRepl)
	}

	/// Legal transition table. `Closed` is reachable from anywhere
	/// (transport loss), `TerminalMode` from any connected state.
	pub fn can_transition_to(&self, next: LinkState) -> bool {
		use LinkState::*;
		if next == Closed || next == Closing {
			return true;
		}
		if next == TerminalMode {
			return self.is_connected();
		}
		matches!(
			(self, next),
			(Closed, Opening)
				| (Opening, WebReplUnauthenticated)
				| (Opening, FriendlyRepl)
				| (WebReplUnauthenticated, FriendlyRepl)
				| (FriendlyRepl, RawRepl)
				| (RawRepl, RawPasteRepl)
				| (RawPasteRepl, RawRepl)
				| (RawRepl, FriendlyRepl)
				| (RawPasteRepl, FriendlyRepl)
				| (TerminalMode, FriendlyRepl)
		)
	}
}

impl fmt::Display for LinkState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			LinkState::Closed => "closed",
			LinkState::Opening => "opening",
			LinkState::WebReplUnauthenticated => "webrepl-unauthenticated",
			LinkState::FriendlyRepl => "friendly-repl",
			LinkState::RawRepl => "raw-repl",
			LinkState::RawPasteRepl => "raw-paste-repl",
			LinkState::TerminalMode => "terminal",
			LinkState::Closing => "closing",
		};
		write!(f, "{}", name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use LinkState::*;

	#[test]
	fn test_happy_path_serial() {
		assert!(Closed.can_transition_to(Opening));
		assert!(Opening.can_transition_to(FriendlyRepl));
		assert!(FriendlyRepl.can_transition_to(RawRepl));
		assert!(RawRepl.can_transition_to(RawPasteRepl));
	}

	#[test]
	fn test_happy_path_webrepl() {
		assert!(Opening.can_transition_to(WebReplUnauthenticated));
		assert!(WebReplUnauthenticated.can_transition_to(FriendlyRepl));
	}

	#[test]
	fn test_no_skipping_friendly() {
		assert!(!Opening.can_transition_to(RawRepl));
		assert!(!WebReplUnauthenticated.can_transition_to(RawRepl));
	}

	#[test]
	fn test_closed_reachable_from_anywhere() {
		for s in [Closed, Opening, WebReplUnauthenticated, FriendlyRepl, RawRepl, RawPasteRepl, TerminalMode, Closing] {
			assert!(s.can_transition_to(Closed));
		}
	}

	#[test]
	fn test_terminal_requires_connection() {
		assert!(FriendlyRepl.can_transition_to(TerminalMode));
		assert!(RawRepl.can_transition_to(TerminalMode));
		assert!(!Closed.can_transition_to(TerminalMode));
		assert!(!Opening.can_transition_to(TerminalMode));
	}

	#[test]
	fn test_is_connected() {
		assert!(FriendlyRepl.is_connected());
		assert!(RawPasteRepl.is_connected());
		assert!(!Closed.is_connected());
		assert!(!Closing.is_connected());
	}
}

// vim: ts=4
