//! Runtime configuration.
//!
//! Loaded from a JSON file, from `SNAKEBRIDGE_*` environment variables, or both
//! (environment wins). Every field has a default, so `{}` is a valid file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use snakebridge_protocol::{AtomPolicy, DEFAULT_ATOM_ALLOWLIST};
use snakebridge_runtime::MonitorConfig;
use tracing::debug;

use crate::error::{Error, Result};

pub const ENV_ATOM_ALLOWLIST: &str = "SNAKEBRIDGE_ATOM_ALLOWLIST";
pub const ENV_TIMEOUT_MS: &str = "SNAKEBRIDGE_TIMEOUT_MS";
pub const ENV_STREAM_TIMEOUT_MS: &str = "SNAKEBRIDGE_STREAM_TIMEOUT_MS";
pub const ENV_SESSION_TTL_MS: &str = "SNAKEBRIDGE_SESSION_TTL_MS";
pub const ENV_SWEEP_INTERVAL_MS: &str = "SNAKEBRIDGE_SWEEP_INTERVAL_MS";
pub const ENV_POOL: &str = "SNAKEBRIDGE_POOL";

/// Which wire atoms are revived as atoms.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawAllowlist")]
pub enum AtomAllowlist {
	All,
	Names(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAllowlist {
	Keyword(String),
	Names(Vec<String>),
}

impl TryFrom<RawAllowlist> for AtomAllowlist {
	type Error = String;

	fn try_from(raw: RawAllowlist) -> std::result::Result<Self, Self::Error> {
		match raw {
			RawAllowlist::Keyword(keyword) if keyword == "all" => Ok(AtomAllowlist::All),
			RawAllowlist::Keyword(other) => Err(format!("atom_allowlist must be \"all\" or a list of names, got {other:?}")),
			RawAllowlist::Names(names) => Ok(AtomAllowlist::Names(names)),
		}
	}
}

impl Default for AtomAllowlist {
	fn default() -> Self {
		AtomAllowlist::Names(DEFAULT_ATOM_ALLOWLIST.iter().map(|name| name.to_string()).collect())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	pub atom_allowlist: AtomAllowlist,
	pub default_timeout_ms: u64,
	/// Streaming calls run without a deadline unless this is set.
	pub stream_timeout_ms: Option<u64>,
	/// Idle expiry for sessions and handles. Unset disables it.
	pub session_ttl_ms: Option<u64>,
	pub sweep_interval_ms: u64,
	pub release_timeout_ms: u64,
	pub pool: Option<String>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			atom_allowlist: AtomAllowlist::default(),
			default_timeout_ms: 30_000,
			stream_timeout_ms: None,
			session_ttl_ms: None,
			sweep_interval_ms: 60_000,
			release_timeout_ms: 5_000,
			pool: None,
		}
	}
}

impl Config {
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path)?;
		let config: Config = serde_json::from_str(&text)?;
		debug!(target = "snakebridge.config", path = %path.display(), "loaded configuration");
		config.validated()
	}

	/// Defaults overridden by the process environment.
	pub fn from_env() -> Result<Self> {
		Self::default().apply_env()
	}

	pub fn apply_env(self) -> Result<Self> {
		self.apply_env_with(|key| std::env::var(key).ok())
	}

	/// Applies overrides read through `lookup` instead of the process environment.
	pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		if let Some(raw) = lookup(ENV_ATOM_ALLOWLIST) {
			self.atom_allowlist = parse_allowlist(&raw);
			debug!(target = "snakebridge.config", key = ENV_ATOM_ALLOWLIST, value = %raw, "override");
		}
		if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
			self.default_timeout_ms = parse_ms(ENV_TIMEOUT_MS, &raw)?;
		}
		if let Some(raw) = lookup(ENV_STREAM_TIMEOUT_MS) {
			self.stream_timeout_ms = parse_optional_ms(ENV_STREAM_TIMEOUT_MS, &raw)?;
		}
		if let Some(raw) = lookup(ENV_SESSION_TTL_MS) {
			self.session_ttl_ms = parse_optional_ms(ENV_SESSION_TTL_MS, &raw)?;
		}
		if let Some(raw) = lookup(ENV_SWEEP_INTERVAL_MS) {
			self.sweep_interval_ms = parse_ms(ENV_SWEEP_INTERVAL_MS, &raw)?;
		}
		if let Some(raw) = lookup(ENV_POOL) {
			let raw = raw.trim();
			self.pool = (!raw.is_empty()).then(|| raw.to_string());
		}
		self.validated()
	}

	fn validated(self) -> Result<Self> {
		let positive = [
			("default_timeout_ms", Some(self.default_timeout_ms)),
			("stream_timeout_ms", self.stream_timeout_ms),
			("session_ttl_ms", self.session_ttl_ms),
			("sweep_interval_ms", Some(self.sweep_interval_ms)),
			("release_timeout_ms", Some(self.release_timeout_ms)),
		];
		for (field, value) in positive {
			if value == Some(0) {
				return Err(Error::Config(format!("{field} must be greater than zero")));
			}
		}
		Ok(self)
	}

	pub fn atom_policy(&self) -> AtomPolicy {
		match &self.atom_allowlist {
			AtomAllowlist::All => AtomPolicy::All,
			AtomAllowlist::Names(names) => AtomPolicy::allow(names.iter().cloned()),
		}
	}

	pub fn default_timeout(&self) -> Duration {
		Duration::from_millis(self.default_timeout_ms)
	}

	pub fn stream_timeout(&self) -> Option<Duration> {
		self.stream_timeout_ms.map(Duration::from_millis)
	}

	pub fn monitor_config(&self) -> MonitorConfig {
		MonitorConfig {
			session_ttl: self.session_ttl_ms.map(Duration::from_millis),
			sweep_interval: Duration::from_millis(self.sweep_interval_ms),
			release_timeout: Duration::from_millis(self.release_timeout_ms),
		}
	}
}

fn parse_allowlist(raw: &str) -> AtomAllowlist {
	let raw = raw.trim();
	if raw.eq_ignore_ascii_case("all") {
		return AtomAllowlist::All;
	}
	AtomAllowlist::Names(raw.split(',').map(str::trim).filter(|name| !name.is_empty()).map(str::to_string).collect())
}

fn parse_ms(key: &str, raw: &str) -> Result<u64> {
	raw.trim().parse().map_err(|_| Error::Config(format!("{key} must be a whole number of milliseconds, got {raw:?}")))
}

fn parse_optional_ms(key: &str, raw: &str) -> Result<Option<u64>> {
	match raw.trim() {
		"" | "none" | "off" => Ok(None),
		other => parse_ms(key, other).map(Some),
	}
}
