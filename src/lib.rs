//! # mplink - MicroPython remote control
//!
//! mplink drives a MicroPython board's interactive REPL as a
//! machine-usable protocol, over a local USB serial link or the
//! WebREPL WebSocket protocol. On top of the script channel it layers
//! a small filesystem abstraction (list, read, write, move, delete,
//! mkdir, stat, hash, recursive copy), a device reset, and a
//! pass-through terminal.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mplink::{Device, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = Device::new();
//!     device.connect_serial("/dev/ttyUSB0", 115_200).await?;
//!     let resp = device.run_script("print(2 + 3)", RunOptions::default()).await?;
//!     assert_eq!(resp.stdout, "5\n");
//!     device.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Over the network
//!
//! ```rust,ignore
//! let device = Device::new();
//! device.connect_network("192.168.4.1", "secret").await?;
//! let listing = device.list_files("/", true).await?;
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod fs;
pub mod logging;
pub mod repl;
pub mod transport;
pub mod util;

// Re-export commonly used types and functions
pub use config::Config;
pub use device::{AttachOptions, Device};
pub use error::{DeviceError, RemoteErrno, TransportError};
pub use fs::{BoardInfo, FileEntry, StatResult};
pub use repl::{LinkState, OutputChunk, Resolve, RunOptions, ScriptResponse};

// vim: ts=4
