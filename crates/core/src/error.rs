use std::fmt;
use std::time::Duration;

use snakebridge_protocol::{DecodeError, RemoteError, SerializationError};
use snakebridge_runtime::MonitorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// A host value with no wire form; nothing was sent.
	#[error(transparent)]
	Serialization(#[from] SerializationError),

	#[error("malformed worker result: {0}")]
	Decode(#[from] DecodeError),

	#[error("handle not found: {id}")]
	HandleNotFound { id: String, message: String },

	#[error("session mismatch: {message}")]
	SessionMismatch {
		expected: Option<String>,
		actual: Option<String>,
		message: String,
	},

	#[error("invalid handle: {reason}")]
	InvalidHandle { reason: String },

	#[error("call timed out after {0:?}")]
	Timeout(Duration),

	#[error(transparent)]
	Foreign(ForeignError),

	#[error(transparent)]
	Remote(RemoteError),

	#[error("transport unavailable: {0}")]
	Unavailable(String),

	#[error("stream interrupted after {delivered} items: {source}")]
	StreamInterrupted {
		delivered: usize,
		#[source]
		source: Box<Error>,
	},

	#[error("lifecycle monitor is closed")]
	MonitorClosed,

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	pub fn is_timeout(&self) -> bool {
		match self {
			Error::Timeout(_) => true,
			Error::StreamInterrupted { source, .. } => source.is_timeout(),
			_ => false,
		}
	}

	pub fn is_handle_not_found(&self) -> bool {
		matches!(self, Error::HandleNotFound { .. })
	}
}

impl From<MonitorError> for Error {
	fn from(err: MonitorError) -> Self {
		match err {
			MonitorError::Closed => Error::MonitorClosed,
		}
	}
}

/// Broad class of a Python exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForeignErrorKind {
	Value,
	Type,
	Key,
	Index,
	Attribute,
	Import,
	ZeroDivision,
	NotImplemented,
	Runtime,
	Other,
}

impl ForeignErrorKind {
	pub fn from_type_name(name: &str) -> Self {
		match name.rsplit('.').next().unwrap_or(name) {
			"ValueError" => ForeignErrorKind::Value,
			"TypeError" => ForeignErrorKind::Type,
			"KeyError" => ForeignErrorKind::Key,
			"IndexError" => ForeignErrorKind::Index,
			"AttributeError" => ForeignErrorKind::Attribute,
			"ImportError" | "ModuleNotFoundError" => ForeignErrorKind::Import,
			"ZeroDivisionError" => ForeignErrorKind::ZeroDivision,
			"NotImplementedError" => ForeignErrorKind::NotImplemented,
			"RuntimeError" => ForeignErrorKind::Runtime,
			_ => ForeignErrorKind::Other,
		}
	}
}

/// An exception raised by foreign application code.
///
/// The raw message and traceback are kept verbatim whatever the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignError {
	pub kind: ForeignErrorKind,
	pub error_type: String,
	pub message: String,
	pub traceback: Option<String>,
}

impl fmt::Display for ForeignError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.error_type, self.message)
	}
}

impl std::error::Error for ForeignError {}
