//! Logging prelude module for convenient access to tracing macros.
//!
//! Re-exports the common tracing macros so protocol modules can pull
//! them in with one `use` and stay consistent across the codebase.

pub use tracing::{debug, error, info, trace, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// By default, logs at WARN level and above are displayed (protocol
/// traffic is chatty, so the CLI stays quiet unless asked). Control the
/// log level with the `RUST_LOG` environment variable:
///
/// ```bash
/// RUST_LOG=debug mplink ls
/// RUST_LOG=mplink::repl=trace mplink run main.py
/// ```
pub fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
		)
		.with_writer(std::io::stderr)
		.init();
}

// vim: ts=4
