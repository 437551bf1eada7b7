//! Codec errors.

use thiserror::Error;

/// A host value that cannot be put on the wire.
///
/// Raised before anything is sent; carries the offending value's type tag and its
/// location inside the encoded argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot serialize value of type {type_tag}{}", location(.path))]
pub struct SerializationError {
	pub type_tag: String,
	path: Vec<String>,
}

impl SerializationError {
	pub fn new(type_tag: impl Into<String>) -> Self {
		Self {
			type_tag: type_tag.into(),
			path: Vec::new(),
		}
	}

	/// Prefixes the location with an enclosing segment while unwinding.
	pub fn within(mut self, segment: impl Into<String>) -> Self {
		self.path.push(segment.into());
		self
	}

	/// Location of the offending value, outermost segment first (`""` at the root).
	pub fn path(&self) -> String {
		self.path.iter().rev().map(String::as_str).collect()
	}
}

fn location(path: &[String]) -> String {
	if path.is_empty() {
		return String::new();
	}
	let path: String = path.iter().rev().map(String::as_str).collect();
	format!(" at {path}")
}

/// A wire value the decoder cannot turn into a host value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
	#[error("malformed `{tag}` value: {reason}")]
	Malformed { tag: String, reason: String },

	#[error("invalid `{tag}` payload: {reason}")]
	InvalidHandle { tag: String, reason: String },

	#[error("integer {0} does not fit in 64 bits")]
	IntegerRange(String),
}

impl DecodeError {
	pub(crate) fn malformed(tag: &str, reason: impl Into<String>) -> Self {
		DecodeError::Malformed {
			tag: tag.to_string(),
			reason: reason.into(),
		}
	}
}
