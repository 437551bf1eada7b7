//! Tagged wire codec.
//!
//! Values JSON can carry directly pass through untouched. Everything else becomes a
//! JSON object tagged with `"__type__"` and `"__schema__"`:
//!
//! ```json
//! {"__type__": "tuple", "__schema__": 1, "elements": [1, 2, 3]}
//! {"__type__": "bytes", "__schema__": 1, "data": "aGVsbG8="}
//! {"__type__": "dict", "__schema__": 1, "pairs": [[1, "one"], [2, "two"]]}
//! ```
//!
//! Encoding is total except for [`Opaque`](crate::Opaque) values, which fail with a
//! [`SerializationError`] instead of degrading to a printed form. Decoding accepts the
//! pre-schema shapes older workers emit (a `value` key in place of
//! `elements`/`data`/`pairs`, bare `infinity`/`nan` tags).

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use serde_json::{Map, Number, Value as WireValue};

use crate::atom::{Atom, AtomPolicy};
use crate::error::{DecodeError, SerializationError};
use crate::handle::{Handle, REF_TAG, Reference, STREAM_REF_TAG, StreamRef};
use crate::value::{Bytes, Complex, Value};

/// Current tagged-value schema.
pub const SCHEMA_VERSION: u64 = 1;
/// Reserved key naming a tagged value's type.
pub const TYPE_KEY: &str = "__type__";
/// Reserved key carrying a tagged value's schema version.
pub const SCHEMA_KEY: &str = "__schema__";

pub const ATOM_TAG: &str = "atom";
pub const SPECIAL_FLOAT_TAG: &str = "special_float";
pub const TUPLE_TAG: &str = "tuple";
pub const SET_TAG: &str = "set";
pub const BYTES_TAG: &str = "bytes";
pub const DATETIME_TAG: &str = "datetime";
pub const DATE_TAG: &str = "date";
pub const TIME_TAG: &str = "time";
pub const COMPLEX_TAG: &str = "complex";
pub const DICT_TAG: &str = "dict";
/// Chunk marking the end of a foreign iterator.
pub const STOP_ITERATION_TAG: &str = "stop_iteration";

const NAIVE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Encodes a host value into its wire form.
pub fn encode(value: &Value) -> Result<WireValue, SerializationError> {
	let wire = match value {
		Value::Null => WireValue::Null,
		Value::Bool(b) => WireValue::Bool(*b),
		Value::Int(i) => WireValue::from(*i),
		Value::Float(f) => encode_float(*f),
		Value::Str(s) => WireValue::String(s.clone()),
		Value::Binary(data) => match std::str::from_utf8(data) {
			Ok(text) => WireValue::String(text.to_string()),
			Err(_) => encode_bytes(data),
		},
		Value::Bytes(bytes) => encode_bytes(bytes.as_slice()),
		Value::List(items) => WireValue::Array(encode_items(items.iter())?),
		Value::Tuple(items) => tagged(TUPLE_TAG, [("elements", WireValue::Array(encode_items(items.iter())?))]),
		Value::Set(items) => tagged(SET_TAG, [("elements", WireValue::Array(encode_items(items.iter())?))]),
		Value::Map(map) => encode_map(map)?,
		Value::Atom(atom) => tagged(ATOM_TAG, [("value", WireValue::String(atom.as_str().to_string()))]),
		Value::Date(date) => tagged(DATE_TAG, [("value", WireValue::String(date.format("%Y-%m-%d").to_string()))]),
		Value::Time(time) => tagged(TIME_TAG, [("value", WireValue::String(time.format(TIME_FORMAT).to_string()))]),
		Value::NaiveDateTime(dt) => tagged(DATETIME_TAG, [("value", WireValue::String(dt.format(NAIVE_DATETIME_FORMAT).to_string()))]),
		Value::DateTime(dt) => tagged(DATETIME_TAG, [("value", WireValue::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)))]),
		Value::Complex(c) => tagged(COMPLEX_TAG, [("real", encode_float(c.re)), ("imag", encode_float(c.im))]),
		Value::Ref(handle) => handle.to_wire(),
		Value::Stream(stream) => stream.to_wire(),
		Value::Opaque(opaque) => return Err(SerializationError::new(opaque.type_tag())),
	};
	Ok(wire)
}

/// Returns `true` for the chunk a worker sends when a foreign iterator is exhausted.
pub fn is_stop_iteration(wire: &WireValue) -> bool {
	wire.get(TYPE_KEY).and_then(WireValue::as_str) == Some(STOP_ITERATION_TAG)
}

/// Stop-iteration marker, as a worker would send it.
pub fn stop_iteration() -> WireValue {
	tagged(STOP_ITERATION_TAG, [])
}

fn tagged<const N: usize>(tag: &str, fields: [(&str, WireValue); N]) -> WireValue {
	let mut map = Map::new();
	map.insert(TYPE_KEY.into(), WireValue::String(tag.to_string()));
	map.insert(SCHEMA_KEY.into(), WireValue::from(SCHEMA_VERSION));
	for (key, value) in fields {
		map.insert(key.to_string(), value);
	}
	WireValue::Object(map)
}

fn encode_float(f: f64) -> WireValue {
	if f.is_finite() {
		return WireValue::from(f);
	}
	let name = if f.is_nan() {
		"nan"
	} else if f > 0.0 {
		"infinity"
	} else {
		"neg_infinity"
	};
	tagged(SPECIAL_FLOAT_TAG, [("value", WireValue::String(name.into()))])
}

fn encode_bytes(data: &[u8]) -> WireValue {
	tagged(BYTES_TAG, [("data", WireValue::String(STANDARD.encode(data)))])
}

fn encode_items<'a>(items: impl Iterator<Item = &'a Value>) -> Result<Vec<WireValue>, SerializationError> {
	items.enumerate().map(|(i, item)| encode(item).map_err(|e| e.within(format!("[{i}]")))).collect()
}

fn encode_map(map: &BTreeMap<Value, Value>) -> Result<WireValue, SerializationError> {
	let mut pairs = Vec::with_capacity(map.len());
	for (key, value) in map {
		let wire_key = encode(key).map_err(|e| e.within(format!("<{key}>")))?;
		let wire_value = encode(value).map_err(|e| e.within(format!("[{key}]")))?;
		pairs.push((wire_key, wire_value));
	}

	// Only text keys go plain: binary keys can collide with them on the wire, and a
	// key named like the tag marker would be read back as a tagged value.
	let plain = map.keys().all(|key| matches!(key, Value::Str(s) if s != TYPE_KEY));
	if plain {
		let object = pairs
			.into_iter()
			.filter_map(|(key, value)| match key {
				WireValue::String(key) => Some((key, value)),
				_ => None,
			})
			.collect();
		return Ok(WireValue::Object(object));
	}

	let pairs = pairs.into_iter().map(|(key, value)| WireValue::Array(vec![key, value])).collect();
	Ok(tagged(DICT_TAG, [("pairs", WireValue::Array(pairs))]))
}

/// Stateful half of the codec: decoding depends on the atom policy.
#[derive(Debug, Clone, Default)]
pub struct Codec {
	atoms: AtomPolicy,
}

impl Codec {
	pub fn new(atoms: AtomPolicy) -> Self {
		Self { atoms }
	}

	pub fn atoms(&self) -> &AtomPolicy {
		&self.atoms
	}

	pub fn encode(&self, value: &Value) -> Result<WireValue, SerializationError> {
		encode(value)
	}

	/// Decodes a wire value into a host value.
	pub fn decode(&self, wire: &WireValue) -> Result<Value, DecodeError> {
		match wire {
			WireValue::Null => Ok(Value::Null),
			WireValue::Bool(b) => Ok(Value::Bool(*b)),
			WireValue::Number(n) => decode_number(n),
			WireValue::String(s) => Ok(Value::Str(s.clone())),
			WireValue::Array(items) => Ok(Value::List(self.decode_items(items)?)),
			WireValue::Object(fields) => match fields.get(TYPE_KEY).and_then(WireValue::as_str) {
				Some(tag) => self.decode_tagged(tag, fields),
				None => self.decode_plain_map(fields),
			},
		}
	}

	fn decode_items(&self, items: &[WireValue]) -> Result<Vec<Value>, DecodeError> {
		items.iter().map(|item| self.decode(item)).collect()
	}

	fn decode_plain_map(&self, fields: &Map<String, WireValue>) -> Result<Value, DecodeError> {
		if fields.get("__needs_ref__").and_then(WireValue::as_bool) == Some(true) || fields.get("__needs_stream_ref__").and_then(WireValue::as_bool) == Some(true) {
			return Err(DecodeError::InvalidHandle {
				tag: REF_TAG.into(),
				reason: "worker returned an object marker without registering a reference".into(),
			});
		}

		let mut map = BTreeMap::new();
		for (key, value) in fields {
			map.insert(Value::Str(key.clone()), self.decode(value)?);
		}
		Ok(Value::Map(map))
	}

	fn decode_tagged(&self, tag: &str, fields: &Map<String, WireValue>) -> Result<Value, DecodeError> {
		let schema = fields.get(SCHEMA_KEY).and_then(WireValue::as_u64).unwrap_or(0);
		let legacy = schema < SCHEMA_VERSION;
		let field = |name: &str| fields.get(name).or_else(|| if legacy { fields.get("value") } else { None });

		match tag {
			ATOM_TAG => {
				let name = required_str(tag, fields.get("value"))?;
				if self.atoms.allows(name) {
					Ok(Value::Atom(Atom::new(name)))
				} else {
					Ok(Value::Str(name.to_string()))
				}
			}
			SPECIAL_FLOAT_TAG => {
				let name = required_str(tag, fields.get("value"))?;
				special_float(name).map(Value::Float).ok_or_else(|| DecodeError::malformed(tag, format!("unknown special float {name:?}")))
			}
			"infinity" => Ok(Value::Float(f64::INFINITY)),
			"neg_infinity" => Ok(Value::Float(f64::NEG_INFINITY)),
			"nan" => Ok(Value::Float(f64::NAN)),
			TUPLE_TAG => Ok(Value::Tuple(self.decode_elements(tag, field("elements"), legacy)?)),
			SET_TAG | "frozenset" => Ok(Value::Set(self.decode_elements(tag, field("elements"), legacy)?.into_iter().collect())),
			BYTES_TAG => {
				let data = required_str(tag, field("data"))?;
				let bytes = STANDARD.decode(data).map_err(|e| DecodeError::malformed(tag, e.to_string()))?;
				Ok(Value::Bytes(Bytes(bytes)))
			}
			DATE_TAG => {
				let text = required_str(tag, fields.get("value"))?;
				text.parse::<NaiveDate>().map(Value::Date).map_err(|e| DecodeError::malformed(tag, format!("{text:?}: {e}")))
			}
			TIME_TAG => {
				let text = required_str(tag, fields.get("value"))?;
				text.parse::<NaiveTime>().map(Value::Time).map_err(|e| DecodeError::malformed(tag, format!("{text:?}: {e}")))
			}
			DATETIME_TAG => {
				let text = required_str(tag, fields.get("value"))?;
				decode_datetime(text).ok_or_else(|| DecodeError::malformed(tag, format!("{text:?} is not an ISO-8601 datetime")))
			}
			COMPLEX_TAG => self.decode_complex(fields, legacy),
			DICT_TAG => self.decode_pairs(field("pairs"), legacy),
			REF_TAG => Handle::from_wire(fields).map(Value::Ref),
			STREAM_REF_TAG => StreamRef::from_wire(fields).map(Value::Stream),
			_ => self.decode_plain_map(fields),
		}
	}

	fn decode_elements(&self, tag: &str, elements: Option<&WireValue>, legacy: bool) -> Result<Vec<Value>, DecodeError> {
		match elements {
			Some(WireValue::Array(items)) => self.decode_items(items),
			None | Some(WireValue::Null) if legacy => Ok(Vec::new()),
			Some(other) => Err(DecodeError::malformed(tag, format!("elements must be a list, got {other}"))),
			None => Err(DecodeError::malformed(tag, "missing elements")),
		}
	}

	fn decode_pairs(&self, pairs: Option<&WireValue>, legacy: bool) -> Result<Value, DecodeError> {
		let items = match pairs {
			Some(WireValue::Array(items)) => items,
			None if legacy => return Ok(Value::Map(BTreeMap::new())),
			_ => return Err(DecodeError::malformed(DICT_TAG, "pairs must be a list")),
		};

		let mut map = BTreeMap::new();
		for pair in items {
			match pair.as_array().map(Vec::as_slice) {
				Some([key, value]) => {
					map.insert(self.decode(key)?, self.decode(value)?);
				}
				_ => return Err(DecodeError::malformed(DICT_TAG, format!("expected [key, value], got {pair}"))),
			}
		}
		Ok(Value::Map(map))
	}

	fn decode_complex(&self, fields: &Map<String, WireValue>, legacy: bool) -> Result<Value, DecodeError> {
		if let (Some(re), Some(im)) = (fields.get("real"), fields.get("imag")) {
			return Ok(Value::Complex(Complex::new(float_component(re)?, float_component(im)?)));
		}
		if legacy {
			if let Some([re, im]) = fields.get("value").and_then(WireValue::as_array).map(Vec::as_slice) {
				return Ok(Value::Complex(Complex::new(float_component(re)?, float_component(im)?)));
			}
		}
		Err(DecodeError::malformed(COMPLEX_TAG, "missing real/imag"))
	}
}

fn decode_number(n: &Number) -> Result<Value, DecodeError> {
	if let Some(i) = n.as_i64() {
		return Ok(Value::Int(i));
	}
	if n.is_u64() {
		return Err(DecodeError::IntegerRange(n.to_string()));
	}
	n.as_f64().map(Value::Float).ok_or_else(|| DecodeError::IntegerRange(n.to_string()))
}

fn decode_datetime(text: &str) -> Option<Value> {
	if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
		return Some(Value::DateTime(dt));
	}
	text.parse::<NaiveDateTime>().ok().map(Value::NaiveDateTime)
}

fn required_str<'a>(tag: &str, wire: Option<&'a WireValue>) -> Result<&'a str, DecodeError> {
	wire.and_then(WireValue::as_str).ok_or_else(|| DecodeError::malformed(tag, "missing string value"))
}

fn special_float(name: &str) -> Option<f64> {
	match name {
		"infinity" => Some(f64::INFINITY),
		"neg_infinity" => Some(f64::NEG_INFINITY),
		"nan" => Some(f64::NAN),
		_ => None,
	}
}

fn float_component(wire: &WireValue) -> Result<f64, DecodeError> {
	if let Some(f) = wire.as_f64() {
		return Ok(f);
	}
	wire.get(TYPE_KEY)
		.and_then(WireValue::as_str)
		.filter(|tag| *tag == SPECIAL_FLOAT_TAG)
		.and_then(|_| wire.get("value").and_then(WireValue::as_str))
		.and_then(special_float)
		.ok_or_else(|| DecodeError::malformed(COMPLEX_TAG, format!("component {wire} is not a number")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::Opaque;
	use chrono::{FixedOffset, TimeZone};
	use serde_json::json;

	fn round_trip(value: Value) -> Value {
		let codec = Codec::new(AtomPolicy::All);
		let wire = codec.encode(&value).expect("encode");
		codec.decode(&wire).expect("decode")
	}

	fn assert_round_trip(value: Value) {
		assert_eq!(round_trip(value.clone()), value);
	}

	#[test]
	fn primitives_round_trip() {
		assert_round_trip(Value::Null);
		assert_round_trip(Value::Bool(true));
		assert_round_trip(Value::Int(-42));
		assert_round_trip(Value::Int(i64::MAX));
		assert_round_trip(Value::Float(3.25));
		assert_round_trip(Value::Float(-0.0));
		assert_round_trip(Value::from("héllo"));
	}

	#[test]
	fn primitives_pass_through_untagged() {
		assert_eq!(encode(&Value::Int(4)).unwrap(), json!(4));
		assert_eq!(encode(&Value::Float(4.0)).unwrap(), json!(4.0));
		assert_eq!(encode(&Value::from("x")).unwrap(), json!("x"));
		assert_eq!(encode(&Value::list([1, 2])).unwrap(), json!([1, 2]));
	}

	#[test]
	fn special_floats_are_tagged() {
		for (value, name) in [(f64::INFINITY, "infinity"), (f64::NEG_INFINITY, "neg_infinity"), (f64::NAN, "nan")] {
			let wire = encode(&Value::Float(value)).unwrap();
			assert_eq!(wire["__type__"], "special_float");
			assert_eq!(wire["value"], name);
			assert_round_trip(Value::Float(value));
		}
	}

	#[test]
	fn containers_round_trip() {
		assert_round_trip(Value::tuple([Value::Int(1), Value::from("a"), Value::Null]));
		assert_round_trip(Value::tuple(Vec::<Value>::new()));
		assert_round_trip(Value::set([1, 2, 3]));
		assert_round_trip(Value::list([Value::tuple([1, 2]), Value::set(["x"])]));
	}

	#[test]
	fn set_encoding_has_no_duplicates() {
		let wire = encode(&Value::set([3, 1, 3, 2, 1])).unwrap();
		assert_eq!(wire["__type__"], "set");
		assert_eq!(wire["elements"].as_array().unwrap().len(), 3);
	}

	#[test]
	fn bytes_and_binary() {
		let wire = encode(&Value::bytes(b"hello".to_vec())).unwrap();
		assert_eq!(wire["__type__"], "bytes");
		assert_eq!(wire["data"], "aGVsbG8=");
		assert_round_trip(Value::bytes(vec![0u8, 159, 146, 150]));

		// Unmarked binary that happens to be text goes over as text.
		assert_eq!(encode(&Value::Binary(b"plain".to_vec())).unwrap(), json!("plain"));
		let fallback = encode(&Value::Binary(vec![0xff, 0xfe])).unwrap();
		assert_eq!(fallback["__type__"], "bytes");
		assert_eq!(Codec::default().decode(&fallback).unwrap(), Value::bytes(vec![0xff, 0xfe]));
	}

	#[test]
	fn dates_and_times_round_trip() {
		let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
		let time = NaiveTime::from_hms_micro_opt(13, 45, 7, 250_000).unwrap();
		let naive = date.and_time(time);
		let aware = FixedOffset::east_opt(5 * 3600).unwrap().with_ymd_and_hms(2024, 2, 29, 13, 45, 7).unwrap();

		assert_eq!(encode(&Value::Date(date)).unwrap()["value"], "2024-02-29");
		assert_eq!(encode(&Value::Time(time)).unwrap()["value"], "13:45:07.250");
		assert_eq!(encode(&Value::DateTime(aware)).unwrap()["value"], "2024-02-29T13:45:07+05:00");

		assert_round_trip(Value::Date(date));
		assert_round_trip(Value::Time(time));
		assert_round_trip(Value::NaiveDateTime(naive));
		assert_round_trip(Value::DateTime(aware));
	}

	#[test]
	fn python_isoformat_strings_decode() {
		let codec = Codec::default();
		let naive = codec.decode(&json!({"__type__": "datetime", "__schema__": 1, "value": "2025-01-02T03:04:05.123456"})).unwrap();
		assert!(matches!(naive, Value::NaiveDateTime(_)));
		let aware = codec.decode(&json!({"__type__": "datetime", "__schema__": 1, "value": "2025-01-02T03:04:05+00:00"})).unwrap();
		assert!(matches!(aware, Value::DateTime(_)));
	}

	#[test]
	fn complex_round_trips_including_special_parts() {
		let wire = encode(&Value::complex(1.0, -2.5)).unwrap();
		assert_eq!(wire, json!({"__type__": "complex", "__schema__": 1, "real": 1.0, "imag": -2.5}));
		assert_round_trip(Value::complex(1.0, -2.5));
		assert_round_trip(Value::complex(f64::INFINITY, f64::NAN));
	}

	#[test]
	fn string_keyed_map_is_plain() {
		let wire = encode(&Value::map([("a", 1)])).unwrap();
		assert_eq!(wire, json!({"a": 1}));
		assert_round_trip(Value::map([("a", Value::Int(1)), ("b", Value::tuple([1, 2]))]));
	}

	#[test]
	fn non_string_keys_use_dict_tag() {
		let wire = encode(&Value::map([(1, "one"), (2, "two")])).unwrap();
		assert_eq!(wire["__type__"], "dict");
		let pairs = wire["pairs"].as_array().unwrap();
		assert_eq!(pairs.len(), 2);
		assert!(pairs.contains(&json!([1, "one"])));
		assert!(pairs.contains(&json!([2, "two"])));
	}

	#[test]
	fn mixed_keys_round_trip() {
		assert_round_trip(Value::map([
			(Value::Int(1), Value::from("int")),
			(Value::Float(1.5), Value::from("float")),
			(Value::tuple([1, 2]), Value::from("tuple")),
			(Value::Bool(true), Value::from("bool")),
			(Value::Null, Value::from("null")),
			(Value::atom("ok"), Value::from("atom")),
			(Value::from("s"), Value::from("str")),
		]));
	}

	#[test]
	fn binary_key_colliding_with_text_key_keeps_both_entries() {
		let value = Value::map([(Value::from("a"), Value::Int(1)), (Value::Binary(b"a".to_vec()), Value::Int(2))]);
		let wire = encode(&value).unwrap();
		assert_eq!(wire["__type__"], "dict");
		let pairs = wire["pairs"].as_array().unwrap();
		assert_eq!(pairs.len(), 2);
		assert!(pairs.contains(&json!(["a", 1])));
		assert!(pairs.contains(&json!(["a", 2])));
	}

	#[test]
	fn binary_keys_use_dict_tag() {
		let wire = encode(&Value::map([(Value::Binary(b"k".to_vec()), Value::Int(1))])).unwrap();
		assert_eq!(wire["__type__"], "dict");
	}

	#[test]
	fn empty_map_is_plain() {
		assert_eq!(encode(&Value::Map(BTreeMap::new())).unwrap(), json!({}));
		assert_round_trip(Value::Map(BTreeMap::new()));
	}

	#[test]
	fn reserved_key_forces_dict_tag() {
		let value = Value::map([("__type__", "tuple")]);
		let wire = encode(&value).unwrap();
		assert_eq!(wire["__type__"], "dict");
		assert_round_trip(value);
	}

	#[test]
	fn atoms_are_allowlist_gated() {
		let codec = Codec::new(AtomPolicy::allow(["ok"]));
		let wire = codec.encode(&Value::atom("ok")).unwrap();
		assert_eq!(wire, json!({"__type__": "atom", "__schema__": 1, "value": "ok"}));
		assert_eq!(codec.decode(&wire).unwrap(), Value::atom("ok"));

		let foreign = json!({"__type__": "atom", "__schema__": 1, "value": "not_allowed"});
		assert_eq!(codec.decode(&foreign).unwrap(), Value::from("not_allowed"));
	}

	#[test]
	fn opaque_values_fail_fast_at_any_depth() {
		let pid = Value::current_pid();
		let cases = [
			(pid.clone(), ""),
			(Value::list([Value::Int(1), pid.clone()]), "[1]"),
			(Value::map([("key", pid.clone())]), "[\"key\"]"),
			(Value::tuple([Value::Null, Value::Null, pid.clone()]), "[2]"),
			(Value::list([Value::map([("inner", Value::tuple([pid.clone()]))])]), "[0][\"inner\"][0]"),
		];
		for (value, path) in cases {
			let err = encode(&value).unwrap_err();
			assert_eq!(err.type_tag, "pid");
			assert_eq!(err.path(), path);
		}
	}

	#[test]
	fn opaque_map_keys_are_rejected() {
		let value = Value::map([(Value::Opaque(Opaque::OsHandle(3)), Value::Int(1))]);
		assert_eq!(encode(&value).unwrap_err().type_tag, "os_handle");
	}

	#[test]
	fn refs_decode_to_handles() {
		let codec = Codec::default();
		let wire = json!({"__type__": "ref", "__schema__": 1, "id": "abc", "session_id": "s1", "type_name": "PosixPath"});
		let value = codec.decode(&wire).unwrap();
		let handle = value.as_handle().expect("handle");
		assert_eq!(handle.id(), "abc");
		assert_eq!(handle.session_id(), "s1");
		assert_round_trip(Value::Ref(Handle::new("abc", "s1")));
		assert_round_trip(Value::Stream(StreamRef::new("g", "s1").with_stream_type("generator")));
	}

	#[test]
	fn malformed_ref_is_invalid_handle() {
		let err = Codec::default().decode(&json!({"__type__": "ref", "session_id": "s1"})).unwrap_err();
		assert!(matches!(err, DecodeError::InvalidHandle { .. }));
	}

	#[test]
	fn unwrapped_object_marker_is_rejected() {
		let err = Codec::default()
			.decode(&json!({"__needs_ref__": true, "__type_name__": "Foo"}))
			.unwrap_err();
		assert!(matches!(err, DecodeError::InvalidHandle { .. }));
	}

	#[test]
	fn legacy_shapes_decode() {
		let codec = Codec::default();
		assert_eq!(codec.decode(&json!({"__type__": "tuple", "value": [1, 2]})).unwrap(), Value::tuple([1, 2]));
		assert_eq!(codec.decode(&json!({"__type__": "frozenset", "value": [1, 1]})).unwrap(), Value::set([1]));
		assert_eq!(codec.decode(&json!({"__type__": "bytes", "value": "aGk="})).unwrap(), Value::bytes(b"hi".to_vec()));
		assert_eq!(codec.decode(&json!({"__type__": "infinity"})).unwrap(), Value::Float(f64::INFINITY));
		assert_eq!(codec.decode(&json!({"__type__": "complex", "value": [1.0, 2.0]})).unwrap(), Value::complex(1.0, 2.0));
	}

	#[test]
	fn current_schema_requires_canonical_fields() {
		let err = Codec::default().decode(&json!({"__type__": "tuple", "__schema__": 1, "value": [1]})).unwrap_err();
		assert!(matches!(err, DecodeError::Malformed { .. }));
	}

	#[test]
	fn nested_tags_decode_before_insertion() {
		let wire = json!({
			"outer": [{"__type__": "tuple", "__schema__": 1, "elements": [{"__type__": "special_float", "__schema__": 1, "value": "nan"}]}]
		});
		let value = Codec::default().decode(&wire).unwrap();
		assert_eq!(value, Value::map([("outer", Value::list([Value::tuple([f64::NAN])]))]));
	}

	#[test]
	fn unknown_tags_stay_maps() {
		let value = Codec::default().decode(&json!({"__type__": "mystery", "x": 1})).unwrap();
		assert_eq!(value.get("x"), Some(&Value::Int(1)));
		assert_eq!(value.get("__type__"), Some(&Value::from("mystery")));
	}

	#[test]
	fn oversized_integers_are_rejected() {
		let err = Codec::default().decode(&json!(u64::MAX)).unwrap_err();
		assert!(matches!(err, DecodeError::IntegerRange(_)));
	}

	#[test]
	fn stop_iteration_marker() {
		assert!(is_stop_iteration(&stop_iteration()));
		assert!(!is_stop_iteration(&json!({"__type__": "tuple"})));
		assert!(!is_stop_iteration(&json!(1)));
	}
}
