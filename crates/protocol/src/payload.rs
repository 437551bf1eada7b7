//! Dispatcher payloads and the worker result envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as WireValue};

/// Version stamped on every dispatcher payload.
pub const PROTOCOL_VERSION: u32 = 1;

/// Transport routes the dispatcher addresses.
pub mod routes {
	pub const CALL: &str = "snakebridge.call";
	pub const STREAM: &str = "snakebridge.stream";
	pub const RELEASE_REF: &str = "snakebridge.release_ref";
	pub const RELEASE_SESSION: &str = "snakebridge.release_session";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
	Function,
	Class,
	Method,
	GetAttr,
	SetAttr,
	ModuleAttr,
	StreamNext,
	Helper,
	ReleaseRef,
	ReleaseSession,
}

impl CallType {
	pub fn as_str(self) -> &'static str {
		match self {
			CallType::Function => "function",
			CallType::Class => "class",
			CallType::Method => "method",
			CallType::GetAttr => "get_attr",
			CallType::SetAttr => "set_attr",
			CallType::ModuleAttr => "module_attr",
			CallType::StreamNext => "stream_next",
			CallType::Helper => "helper",
			CallType::ReleaseRef => "release_ref",
			CallType::ReleaseSession => "release_session",
		}
	}
}

impl fmt::Display for CallType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One request to the worker, already in wire form.
///
/// `session_id` is always present and non-empty by the time a payload is built; the
/// dispatcher writes the same value into the transport options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
	pub protocol_version: u32,
	pub call_type: CallType,
	pub session_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub library: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub python_module: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub function: Option<String>,
	#[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
	pub reference: Option<WireValue>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub attr: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<WireValue>,
	#[serde(default)]
	pub args: Vec<WireValue>,
	#[serde(default)]
	pub kwargs: Map<String, WireValue>,
}

impl CallPayload {
	pub fn new(call_type: CallType, session_id: impl Into<String>) -> Self {
		Self {
			protocol_version: PROTOCOL_VERSION,
			call_type,
			session_id: session_id.into(),
			library: None,
			python_module: None,
			function: None,
			reference: None,
			attr: None,
			value: None,
			args: Vec::new(),
			kwargs: Map::new(),
		}
	}

	pub fn target(mut self, library: impl Into<String>, python_module: impl Into<String>) -> Self {
		self.library = Some(library.into());
		self.python_module = Some(python_module.into());
		self
	}

	pub fn function(mut self, name: impl Into<String>) -> Self {
		self.function = Some(name.into());
		self
	}

	pub fn reference(mut self, wire: WireValue) -> Self {
		self.reference = Some(wire);
		self
	}

	pub fn attr(mut self, name: impl Into<String>) -> Self {
		self.attr = Some(name.into());
		self
	}

	pub fn value(mut self, wire: WireValue) -> Self {
		self.value = Some(wire);
		self
	}

	pub fn args(mut self, args: Vec<WireValue>, kwargs: Map<String, WireValue>) -> Self {
		self.args = args;
		self.kwargs = kwargs;
		self
	}

	pub fn to_wire(&self) -> serde_json::Result<WireValue> {
		serde_json::to_value(self)
	}
}

/// Failure reported by a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
	#[serde(alias = "error", default)]
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_type: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub traceback: Option<String>,
}

impl RemoteError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			..Default::default()
		}
	}

	pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
		self.error_type = Some(error_type.into());
		self
	}

	pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
		self.traceback = Some(traceback.into());
		self
	}
}

impl fmt::Display for RemoteError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.error_type {
			Some(kind) if !self.message.starts_with(kind.as_str()) => write!(f, "{kind}: {}", self.message),
			_ => f.write_str(&self.message),
		}
	}
}

impl std::error::Error for RemoteError {}

/// Splits a worker response envelope into its result or its error.
///
/// Responses without a boolean `success` field are not enveloped and come back as-is.
pub fn unwrap_envelope(response: WireValue) -> Result<WireValue, RemoteError> {
	let WireValue::Object(mut fields) = response else {
		return Ok(response);
	};

	match fields.get("success").and_then(WireValue::as_bool) {
		Some(true) => Ok(fields.remove("result").unwrap_or(WireValue::Null)),
		Some(false) => Err(remote_error(&fields)),
		None => Ok(WireValue::Object(fields)),
	}
}

fn remote_error(fields: &Map<String, WireValue>) -> RemoteError {
	let text = |key: &str| fields.get(key).and_then(WireValue::as_str).map(str::to_string);

	// Some adapters nest the error as {"message", "type"}.
	let (message, nested_type) = match fields.get("error") {
		Some(WireValue::String(message)) => (message.clone(), None),
		Some(WireValue::Object(nested)) => (
			nested.get("message").and_then(WireValue::as_str).unwrap_or_default().to_string(),
			nested.get("type").and_then(WireValue::as_str).map(str::to_string),
		),
		Some(other) => (other.to_string(), None),
		None => (text("message").unwrap_or_else(|| "worker reported failure without a message".into()), None),
	};

	RemoteError {
		message,
		error_type: text("error_type").or(nested_type),
		traceback: text("traceback"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn payload_serializes_required_fields_only() {
		let payload = CallPayload::new(CallType::Function, "s1")
			.target("math", "math")
			.function("sqrt")
			.args(vec![json!(16)], Map::new());
		let wire = payload.to_wire().unwrap();
		assert_eq!(
			wire,
			json!({
				"protocol_version": 1,
				"call_type": "function",
				"session_id": "s1",
				"library": "math",
				"python_module": "math",
				"function": "sqrt",
				"args": [16],
				"kwargs": {}
			})
		);
	}

	#[test]
	fn reference_uses_ref_key() {
		let wire = CallPayload::new(CallType::GetAttr, "s1")
			.reference(json!({"__type__": "ref", "id": "a"}))
			.attr("name")
			.to_wire()
			.unwrap();
		assert_eq!(wire["call_type"], "get_attr");
		assert_eq!(wire["ref"]["id"], "a");
		assert!(wire.get("function").is_none());
	}

	#[test]
	fn payload_parses_back() {
		let payload = CallPayload::new(CallType::StreamNext, "s9").reference(json!({"id": "g"}));
		let parsed: CallPayload = serde_json::from_value(payload.to_wire().unwrap()).unwrap();
		assert_eq!(parsed, payload);
	}

	#[test]
	fn success_envelope_yields_result() {
		assert_eq!(unwrap_envelope(json!({"success": true, "result": 4.0})).unwrap(), json!(4.0));
		assert_eq!(unwrap_envelope(json!({"success": true})).unwrap(), WireValue::Null);
	}

	#[test]
	fn failure_envelope_yields_remote_error() {
		let err = unwrap_envelope(json!({
			"success": false,
			"error": "math domain error",
			"error_type": "ValueError",
			"traceback": "Traceback ..."
		}))
		.unwrap_err();
		assert_eq!(err.message, "math domain error");
		assert_eq!(err.error_type.as_deref(), Some("ValueError"));
		assert_eq!(err.traceback.as_deref(), Some("Traceback ..."));
		assert_eq!(err.to_string(), "ValueError: math domain error");
	}

	#[test]
	fn nested_error_object_is_flattened() {
		let err = unwrap_envelope(json!({"success": false, "error": {"message": "boom", "type": "RuntimeError"}})).unwrap_err();
		assert_eq!(err.message, "boom");
		assert_eq!(err.error_type.as_deref(), Some("RuntimeError"));
	}

	#[test]
	fn plain_responses_pass_through() {
		assert_eq!(unwrap_envelope(json!({"a": 1})).unwrap(), json!({"a": 1}));
		assert_eq!(unwrap_envelope(json!([1, 2])).unwrap(), json!([1, 2]));
	}

	#[test]
	fn remote_error_accepts_error_alias() {
		let err: RemoteError = serde_json::from_value(json!({"error": "nope"})).unwrap();
		assert_eq!(err.message, "nope");
	}
}
