//! Unified configuration for mplink
//!
//! One `Config` struct is the single source of truth for connection
//! defaults. Values follow a priority chain:
//! 1. Built-in defaults (`Config::default()`)
//! 2. Config file (`~/.config/mplink/config.toml`)
//! 3. Environment variables (`MPLINK_*` prefix)
//! 4. CLI flags (highest priority, applied by the caller)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::logging::*;

/// Connection defaults and protocol timing knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Serial device path used when the CLI gets no `--device` flag
	pub default_device: Option<String>,

	/// Serial baud rate
	pub default_baud: u32,

	/// WebREPL host (host or host:port) used when no `--host` flag is given
	pub default_host: Option<String>,

	/// WebREPL password
	pub password: Option<String>,

	/// Bounded wait for mode-transition banners and login, in milliseconds
	pub handshake_timeout_ms: u64,

	/// Default script deadline in milliseconds; absent means wait forever
	pub script_timeout_ms: Option<u64>,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			default_device: None,
			default_baud: 115_200,
			default_host: None,
			password: None,
			handshake_timeout_ms: 5_000,
			script_timeout_ms: None,
		}
	}
}

impl Config {
	/// Load configuration through the defaults → file → env chain.
	pub fn load() -> Config {
		let mut config = match Self::config_path() {
			Some(path) if path.is_file() => match std::fs::read_to_string(&path) {
				Ok(text) => match Self::from_toml_str(&text) {
					Ok(c) => c,
					Err(e) => {
						warn!("Ignoring malformed config {}: {}", path.display(), e);
						Config::default()
					}
				},
				Err(e) => {
					warn!("Cannot read config {}: {}", path.display(), e);
					Config::default()
				}
			},
			_ => Config::default(),
		};
		config.apply_env();
		config
	}

	/// Parse a TOML document into a `Config`.
	pub fn from_toml_str(text: &str) -> Result<Config, toml::de::Error> {
		toml::from_str(text)
	}

	/// `$MPLINK_CONFIG`, or `~/.config/mplink/config.toml`.
	fn config_path() -> Option<PathBuf> {
		if let Some(p) = std::env::var_os("MPLINK_CONFIG") {
			return Some(PathBuf::from(p));
		}
		std::env::var_os("HOME")
			.map(|home| PathBuf::from(home).join(".config").join("mplink").join("config.toml"))
	}

	/// Overlay `MPLINK_*` environment variables.
	fn apply_env(&mut self) {
		if let Ok(v) = std::env::var("MPLINK_DEVICE") {
			self.default_device = Some(v);
		}
		if let Ok(v) = std::env::var("MPLINK_BAUD") {
			match v.parse() {
				Ok(b) => self.default_baud = b,
				Err(_) => warn!("Ignoring non-numeric MPLINK_BAUD: {}", v),
			}
		}
		if let Ok(v) = std::env::var("MPLINK_HOST") {
			self.default_host = Some(v);
		}
		if let Ok(v) = std::env::var("MPLINK_PASSWORD") {
			self.password = Some(v);
		}
	}
}


// vim: ts=4
