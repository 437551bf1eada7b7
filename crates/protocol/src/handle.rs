//! Opaque references to objects that live in a worker's registry.
//!
//! A [`Handle`] (wire tag `ref`) or [`StreamRef`] (wire tag `stream_ref`) is only an
//! address: `(session_id, id)`. The referent is owned by the worker-side registry and
//! every operation on it is a remote call. Handles are never inspected locally, and
//! they are only meaningful inside the session that produced them.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value as WireValue};

use crate::codec::{SCHEMA_KEY, SCHEMA_VERSION, TYPE_KEY};
use crate::error::DecodeError;

pub const REF_TAG: &str = "ref";
pub const STREAM_REF_TAG: &str = "stream_ref";

/// Where a referenced object came from, as reported by the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefOrigin {
	pub type_name: Option<String>,
	pub python_module: Option<String>,
	pub library: Option<String>,
}

/// Common accessors for [`Handle`] and [`StreamRef`].
pub trait Reference {
	fn id(&self) -> &str;
	fn session_id(&self) -> &str;
	fn origin(&self) -> &RefOrigin;
	/// Wire payload addressing this reference.
	fn to_wire(&self) -> WireValue;
}

/// Proxy for a foreign object.
#[derive(Debug, Clone)]
pub struct Handle {
	id: String,
	session_id: String,
	origin: RefOrigin,
}

impl Handle {
	pub fn new(id: impl Into<String>, session_id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			session_id: session_id.into(),
			origin: RefOrigin::default(),
		}
	}

	pub fn with_origin(mut self, origin: RefOrigin) -> Self {
		self.origin = origin;
		self
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn type_name(&self) -> Option<&str> {
		self.origin.type_name.as_deref()
	}

	pub(crate) fn from_wire(fields: &Map<String, WireValue>) -> Result<Self, DecodeError> {
		let (id, session_id, origin) = parse_address(REF_TAG, fields)?;
		Ok(Self { id, session_id, origin })
	}
}

impl Reference for Handle {
	fn id(&self) -> &str {
		&self.id
	}

	fn session_id(&self) -> &str {
		&self.session_id
	}

	fn origin(&self) -> &RefOrigin {
		&self.origin
	}

	fn to_wire(&self) -> WireValue {
		WireValue::Object(address_fields(REF_TAG, &self.id, &self.session_id, &self.origin))
	}
}

/// Proxy for a foreign iterator or generator.
///
/// A stream reference supports only pull-based iteration; it cannot be the target of
/// method calls or attribute access.
#[derive(Debug, Clone)]
pub struct StreamRef {
	id: String,
	session_id: String,
	stream_type: Option<String>,
	origin: RefOrigin,
}

impl StreamRef {
	pub fn new(id: impl Into<String>, session_id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			session_id: session_id.into(),
			stream_type: None,
			origin: RefOrigin::default(),
		}
	}

	pub fn with_stream_type(mut self, stream_type: impl Into<String>) -> Self {
		self.stream_type = Some(stream_type.into());
		self
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	/// `generator` or `iterator`, when the worker reports it.
	pub fn stream_type(&self) -> Option<&str> {
		self.stream_type.as_deref()
	}

	pub(crate) fn from_wire(fields: &Map<String, WireValue>) -> Result<Self, DecodeError> {
		let (id, session_id, origin) = parse_address(STREAM_REF_TAG, fields)?;
		let stream_type = fields.get("stream_type").and_then(WireValue::as_str).map(str::to_string);
		Ok(Self {
			id,
			session_id,
			stream_type,
			origin,
		})
	}
}

impl Reference for StreamRef {
	fn id(&self) -> &str {
		&self.id
	}

	fn session_id(&self) -> &str {
		&self.session_id
	}

	fn origin(&self) -> &RefOrigin {
		&self.origin
	}

	fn to_wire(&self) -> WireValue {
		let mut fields = address_fields(STREAM_REF_TAG, &self.id, &self.session_id, &self.origin);
		if let Some(stream_type) = &self.stream_type {
			fields.insert("stream_type".into(), WireValue::String(stream_type.clone()));
		}
		WireValue::Object(fields)
	}
}

macro_rules! identity_traits {
	($($ty:ty),*) => {
		$(
			impl PartialEq for $ty {
				fn eq(&self, other: &Self) -> bool {
					self.session_id == other.session_id && self.id == other.id
				}
			}

			impl Eq for $ty {}

			impl PartialOrd for $ty {
				fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
					Some(self.cmp(other))
				}
			}

			impl Ord for $ty {
				fn cmp(&self, other: &Self) -> Ordering {
					self.session_id.cmp(&other.session_id).then_with(|| self.id.cmp(&other.id))
				}
			}

			impl Hash for $ty {
				fn hash<H: Hasher>(&self, state: &mut H) {
					self.session_id.hash(state);
					self.id.hash(state);
				}
			}
		)*
	};
}

identity_traits!(Handle, StreamRef);

fn address_fields(tag: &str, id: &str, session_id: &str, origin: &RefOrigin) -> Map<String, WireValue> {
	let mut fields = Map::new();
	fields.insert(TYPE_KEY.into(), WireValue::String(tag.to_string()));
	fields.insert(SCHEMA_KEY.into(), WireValue::from(SCHEMA_VERSION));
	fields.insert("id".into(), WireValue::String(id.to_string()));
	fields.insert("session_id".into(), WireValue::String(session_id.to_string()));
	let optional = [("type_name", &origin.type_name), ("python_module", &origin.python_module), ("library", &origin.library)];
	for (key, value) in optional {
		if let Some(value) = value {
			fields.insert(key.into(), WireValue::String(value.clone()));
		}
	}
	fields
}

fn parse_address(tag: &str, fields: &Map<String, WireValue>) -> Result<(String, String, RefOrigin), DecodeError> {
	let text = |keys: &[&str]| {
		keys.iter()
			.find_map(|key| fields.get(*key).and_then(WireValue::as_str))
			.filter(|s| !s.is_empty())
			.map(str::to_string)
	};

	let id = text(&["id", "ref_id"]).ok_or_else(|| DecodeError::InvalidHandle {
		tag: tag.to_string(),
		reason: "missing id".into(),
	})?;
	let session_id = text(&["session_id"]).ok_or_else(|| DecodeError::InvalidHandle {
		tag: tag.to_string(),
		reason: format!("missing session_id for {id}"),
	})?;

	let origin = RefOrigin {
		type_name: text(&["type_name", "__type_name__"]),
		python_module: text(&["python_module", "__module__"]),
		library: text(&["library"]),
	};

	Ok((id, session_id, origin))
}
