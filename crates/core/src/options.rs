//! Call targets and per-call options.

use std::collections::BTreeMap;
use std::time::Duration;

use snakebridge_protocol::Value;

/// Python module a call is addressed to.
///
/// `library` names the installed distribution the module belongs to; it defaults to the
/// first segment of the module path (`numpy.linalg` belongs to `numpy`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
	pub python_module: String,
	pub library: String,
}

impl Target {
	pub fn new(python_module: impl Into<String>) -> Self {
		let python_module = python_module.into();
		let library = python_module.split('.').next().unwrap_or_default().to_string();
		Self { python_module, library }
	}

	pub fn with_library(mut self, library: impl Into<String>) -> Self {
		self.library = library.into();
		self
	}
}

impl From<&str> for Target {
	fn from(python_module: &str) -> Self {
		Target::new(python_module)
	}
}

impl From<String> for Target {
	fn from(python_module: String) -> Self {
		Target::new(python_module)
	}
}

/// Options for a single dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
	pub kwargs: BTreeMap<String, Value>,
	/// Explicit session; wins over the handle's session and the context.
	pub session_id: Option<String>,
	pub timeout: Option<Duration>,
	pub pool: Option<String>,
}

impl CallOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.kwargs.insert(name.into(), value.into());
		self
	}

	pub fn session(mut self, session_id: impl Into<String>) -> Self {
		self.session_id = Some(session_id.into());
		self
	}

	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn pool(mut self, pool: impl Into<String>) -> Self {
		self.pool = Some(pool.into());
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn library_defaults_to_top_level_package() {
		let target = Target::from("numpy.linalg");
		assert_eq!(target.python_module, "numpy.linalg");
		assert_eq!(target.library, "numpy");
		assert_eq!(Target::from("math").library, "math");
		assert_eq!(Target::from("cv2").with_library("opencv").library, "opencv");
	}

	#[test]
	fn builder_collects_kwargs() {
		let opts = CallOptions::new().kwarg("axis", 0).kwarg("keepdims", true).session("s1");
		assert_eq!(opts.kwargs.len(), 2);
		assert_eq!(opts.kwargs["axis"], Value::Int(0));
		assert_eq!(opts.session_id.as_deref(), Some("s1"));
	}
}
