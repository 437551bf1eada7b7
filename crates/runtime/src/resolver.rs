//! Session resolution.
//!
//! Priority, highest first: explicit override, the session embedded in a target
//! handle, the innermost context frame, the owner's auto-session. Empty strings count
//! as absent. Resolution is pure; creating or registering the auto-session is left to
//! the caller through the `auto` closure.

use std::fmt;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionSource {
	Override,
	Handle,
	Context,
	Auto,
}

impl fmt::Display for SessionSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			SessionSource::Override => "override",
			SessionSource::Handle => "handle",
			SessionSource::Context => "context",
			SessionSource::Auto => "auto",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
	pub session_id: String,
	pub source: SessionSource,
}

/// Inputs to a single resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionInputs<'a> {
	pub override_id: Option<&'a str>,
	pub handle_session: Option<&'a str>,
	pub context: Option<&'a str>,
}

fn present(id: Option<&str>) -> Option<&str> {
	id.filter(|id| !id.is_empty())
}

/// Resolves the session for one call. `auto` runs only when nothing else applies.
pub fn resolve(inputs: SessionInputs<'_>, auto: impl FnOnce() -> String) -> Resolved {
	let handle_session = present(inputs.handle_session);

	if let Some(id) = present(inputs.override_id) {
		if let Some(handle_session) = handle_session {
			if handle_session != id {
				debug!(target = "snakebridge.session", override_id = id, handle_session, "session override diverges from handle session");
			}
		}
		return Resolved {
			session_id: id.to_string(),
			source: SessionSource::Override,
		};
	}

	if let Some(id) = handle_session {
		return Resolved {
			session_id: id.to_string(),
			source: SessionSource::Handle,
		};
	}

	if let Some(id) = present(inputs.context) {
		return Resolved {
			session_id: id.to_string(),
			source: SessionSource::Context,
		};
	}

	Resolved {
		session_id: auto(),
		source: SessionSource::Auto,
	}
}
