//! Classification of worker failures.
//!
//! Rules run in order, most specific first, against the failure message. The first
//! match wins; a failure no rule recognizes comes back unchanged as
//! [`Error::Remote`].

use std::sync::LazyLock;

use regex::{Captures, Regex};
use snakebridge_protocol::RemoteError;
use snakebridge_runtime::TransportError;
use tracing::debug;

use crate::error::{Error, ForeignError, ForeignErrorKind};

struct Rule {
	name: &'static str,
	pattern: Regex,
	build: fn(&Captures<'_>, &RemoteError) -> Error,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
	vec![
		Rule {
			name: "session_mismatch",
			pattern: Regex::new(r"(?i)session[ _]mismatch(?:.*?expected\s+'?(?P<expected>[\w.-]+)'?)?(?:.*?got\s+'?(?P<actual>[\w.-]+)'?)?")
				.expect("session mismatch rule should compile"),
			build: |caps, remote| Error::SessionMismatch {
				expected: caps.name("expected").map(|m| m.as_str().to_string()),
				actual: caps.name("actual").map(|m| m.as_str().to_string()),
				message: remote.message.clone(),
			},
		},
		Rule {
			name: "invalid_handle",
			pattern: Regex::new(
				r"(?i)invalid (?:ref|reference|handle|stream_ref)(?: payload)?\b|missing (?:ref|reference|handle) id|(?:ref|reference) (?:is )?missing (?:id|session_id|__type__)|missing __type__",
			)
			.expect("invalid handle rule should compile"),
			build: |_, remote| Error::InvalidHandle {
				reason: remote.message.clone(),
			},
		},
		Rule {
			name: "handle_not_found",
			pattern: Regex::new(
				r"(?i)(?:unknown|unregistered|expired) (?:reference|ref|handle|stream_ref)[:\s]+'?(?P<id>[\w.-]+)|(?:reference|ref|handle) '?(?P<id2>[\w.-]+)'? (?:not found|has expired|was released)",
			)
			.expect("handle not found rule should compile"),
			build: |caps, remote| Error::HandleNotFound {
				id: caps.name("id").or_else(|| caps.name("id2")).map(|m| m.as_str().to_string()).unwrap_or_default(),
				message: remote.message.clone(),
			},
		},
	]
});

static EXCEPTION_PREFIX: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^'?(?P<type>(?:[A-Za-z_][\w]*\.)*[A-Z]\w*(?:Error|Exception|Exit|Interrupt))\s*:\s*").expect("EXCEPTION_PREFIX should compile"));

/// Maps a transport failure onto the bridge's error taxonomy.
pub fn translate(err: TransportError) -> Error {
	match err {
		TransportError::Timeout(after) => Error::Timeout(after),
		TransportError::Unavailable(reason) => Error::Unavailable(reason),
		TransportError::Remote(remote) => translate_remote(remote),
	}
}

/// Classifies a failure reported by a worker.
pub fn translate_remote(remote: RemoteError) -> Error {
	for rule in RULES.iter() {
		if let Some(caps) = rule.pattern.captures(&remote.message) {
			debug!(target = "snakebridge.dispatch", rule = rule.name, "classified worker failure");
			return (rule.build)(&caps, &remote);
		}
	}

	if let Some(foreign) = foreign_error(&remote) {
		return Error::Foreign(foreign);
	}

	Error::Remote(remote)
}

fn foreign_error(remote: &RemoteError) -> Option<ForeignError> {
	let error_type = match &remote.error_type {
		Some(error_type) if !error_type.is_empty() => error_type.clone(),
		_ => EXCEPTION_PREFIX.captures(&remote.message)?.name("type")?.as_str().to_string(),
	};

	Some(ForeignError {
		kind: ForeignErrorKind::from_type_name(&error_type),
		error_type,
		message: remote.message.clone(),
		traceback: remote.traceback.clone(),
	})
}
