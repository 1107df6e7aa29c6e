//! REPL protocol engine
//!
//! Everything between the transport and the public API: the receive
//! buffer, the mode state machine, the wait-for-bytes primitive, and
//! the script runner that turns the device's sentinel-framed byte
//! stream into structured responses.

pub mod buffer;
pub mod engine;
pub mod runner;
pub mod state;

pub use runner::{ChunkSink, OutputChunk, Resolve, RunOptions, ScriptResponse};
pub use state::LinkState;

// vim: ts=4
