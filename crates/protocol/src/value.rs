//! Host-side value model.
//!
//! [`Value`] is the native shape every argument and result takes on the Rust side
//! of the bridge. It is richer than JSON: tuples, sets, arbitrary-key maps, explicit
//! byte strings, date/time values, complex numbers and symbolic atoms all survive a
//! trip through the tagged wire format unchanged.
//!
//! `Value` carries a total order so sets and maps can be plain `BTreeSet`/`BTreeMap`.
//! Floats are ordered with [`f64::total_cmp`], which also makes `NaN == NaN` hold for
//! round-trip comparisons.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

use crate::atom::Atom;
use crate::handle::{Handle, StreamRef};

/// Explicit byte-string marker.
///
/// Raw binary without the marker ([`Value::Binary`]) is sent as text when it happens to
/// be valid UTF-8; wrapping it in `Bytes` forces the `bytes` wire tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
	pub fn new(data: impl Into<Vec<u8>>) -> Self {
		Self(data.into())
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	pub fn into_inner(self) -> Vec<u8> {
		self.0
	}
}

impl From<Vec<u8>> for Bytes {
	fn from(data: Vec<u8>) -> Self {
		Self(data)
	}
}

impl From<&[u8]> for Bytes {
	fn from(data: &[u8]) -> Self {
		Self(data.to_vec())
	}
}

/// Complex number with `f64` components.
#[derive(Debug, Clone, Copy, Default)]
pub struct Complex {
	pub re: f64,
	pub im: f64,
}

impl Complex {
	pub fn new(re: f64, im: f64) -> Self {
		Self { re, im }
	}
}

impl PartialEq for Complex {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Complex {}

impl PartialOrd for Complex {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Complex {
	fn cmp(&self, other: &Self) -> Ordering {
		self.re.total_cmp(&other.re).then_with(|| self.im.total_cmp(&other.im))
	}
}

/// Host values that have no wire representation.
///
/// They exist so host data containing them can be rejected by the encoder with a
/// typed error instead of being printed into a string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Opaque {
	/// Operating-system process identifier.
	Process(u32),
	/// Thread identifier, kept in its debug form.
	Thread(String),
	/// Raw OS handle or file descriptor.
	OsHandle(i64),
	/// Any record type the codec does not recognize.
	Record { type_name: String },
}

impl Opaque {
	/// Runtime type tag reported in serialization errors.
	pub fn type_tag(&self) -> &str {
		match self {
			Opaque::Process(_) => "pid",
			Opaque::Thread(_) => "thread_id",
			Opaque::OsHandle(_) => "os_handle",
			Opaque::Record { type_name } => type_name,
		}
	}
}

/// A native host value.
#[derive(Debug, Clone, Default)]
pub enum Value {
	#[default]
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	/// Unmarked binary; encoded as text when valid UTF-8, as `bytes` otherwise.
	Binary(Vec<u8>),
	Bytes(Bytes),
	List(Vec<Value>),
	Tuple(Vec<Value>),
	Set(BTreeSet<Value>),
	Map(BTreeMap<Value, Value>),
	Atom(Atom),
	Date(NaiveDate),
	Time(NaiveTime),
	/// Offset-aware timestamp.
	DateTime(DateTime<FixedOffset>),
	/// Timestamp without an offset.
	NaiveDateTime(NaiveDateTime),
	Complex(Complex),
	Ref(Handle),
	Stream(StreamRef),
	Opaque(Opaque),
}

impl Value {
	pub fn atom(name: impl Into<String>) -> Self {
		Value::Atom(Atom::new(name))
	}

	pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
		Value::Bytes(Bytes::new(data))
	}

	pub fn tuple<I>(items: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<Value>,
	{
		Value::Tuple(items.into_iter().map(Into::into).collect())
	}

	pub fn list<I>(items: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<Value>,
	{
		Value::List(items.into_iter().map(Into::into).collect())
	}

	/// Builds a set; duplicate elements collapse.
	pub fn set<I>(items: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<Value>,
	{
		Value::Set(items.into_iter().map(Into::into).collect())
	}

	/// Builds a map from key/value pairs; later duplicates win.
	pub fn map<I, K, V>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<Value>,
		V: Into<Value>,
	{
		Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}

	pub fn complex(re: f64, im: f64) -> Self {
		Value::Complex(Complex::new(re, im))
	}

	/// The current OS process id, a value the wire format refuses to carry.
	pub fn current_pid() -> Self {
		Value::Opaque(Opaque::Process(std::process::id()))
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Value::Int(i) => Some(*i),
			_ => None,
		}
	}

	/// Numeric view; integers widen to `f64`.
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Value::Float(f) => Some(*f),
			Value::Int(i) => Some(*i as f64),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_handle(&self) -> Option<&Handle> {
		match self {
			Value::Ref(handle) => Some(handle),
			_ => None,
		}
	}

	pub fn into_handle(self) -> Option<Handle> {
		match self {
			Value::Ref(handle) => Some(handle),
			_ => None,
		}
	}

	pub fn as_stream(&self) -> Option<&StreamRef> {
		match self {
			Value::Stream(stream) => Some(stream),
			_ => None,
		}
	}

	pub fn into_stream(self) -> Option<StreamRef> {
		match self {
			Value::Stream(stream) => Some(stream),
			_ => None,
		}
	}

	/// Looks up a string key in a map value.
	pub fn get(&self, key: &str) -> Option<&Value> {
		match self {
			Value::Map(map) => map.get(&Value::Str(key.to_string())),
			_ => None,
		}
	}

	/// Short name of the variant, used in logs and error messages.
	pub fn kind(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "bool",
			Value::Int(_) => "int",
			Value::Float(_) => "float",
			Value::Str(_) => "str",
			Value::Binary(_) => "binary",
			Value::Bytes(_) => "bytes",
			Value::List(_) => "list",
			Value::Tuple(_) => "tuple",
			Value::Set(_) => "set",
			Value::Map(_) => "map",
			Value::Atom(_) => "atom",
			Value::Date(_) => "date",
			Value::Time(_) => "time",
			Value::DateTime(_) | Value::NaiveDateTime(_) => "datetime",
			Value::Complex(_) => "complex",
			Value::Ref(_) => "ref",
			Value::Stream(_) => "stream_ref",
			Value::Opaque(_) => "opaque",
		}
	}

	/// Visits every handle and stream reference nested in this value.
	pub fn for_each_ref<F>(&self, f: &mut F)
	where
		F: FnMut(&str, &str),
	{
		match self {
			Value::Ref(handle) => f(handle.session_id(), handle.id()),
			Value::Stream(stream) => f(stream.session_id(), stream.id()),
			Value::List(items) | Value::Tuple(items) => items.iter().for_each(|item| item.for_each_ref(f)),
			Value::Set(items) => items.iter().for_each(|item| item.for_each_ref(f)),
			Value::Map(map) => map.iter().for_each(|(k, v)| {
				k.for_each_ref(f);
				v.for_each_ref(f);
			}),
			_ => {}
		}
	}

	fn rank(&self) -> u8 {
		match self {
			Value::Null => 0,
			Value::Bool(_) => 1,
			Value::Int(_) => 2,
			Value::Float(_) => 3,
			Value::Complex(_) => 4,
			Value::Str(_) => 5,
			Value::Binary(_) => 6,
			Value::Bytes(_) => 7,
			Value::Atom(_) => 8,
			Value::Date(_) => 9,
			Value::Time(_) => 10,
			Value::NaiveDateTime(_) => 11,
			Value::DateTime(_) => 12,
			Value::Tuple(_) => 13,
			Value::List(_) => 14,
			Value::Set(_) => 15,
			Value::Map(_) => 16,
			Value::Ref(_) => 17,
			Value::Stream(_) => 18,
			Value::Opaque(_) => 19,
		}
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Value {}

impl PartialOrd for Value {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Value {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Value::Null, Value::Null) => Ordering::Equal,
			(Value::Bool(a), Value::Bool(b)) => a.cmp(b),
			(Value::Int(a), Value::Int(b)) => a.cmp(b),
			(Value::Float(a), Value::Float(b)) => a.total_cmp(b),
			(Value::Complex(a), Value::Complex(b)) => a.cmp(b),
			(Value::Str(a), Value::Str(b)) => a.cmp(b),
			(Value::Binary(a), Value::Binary(b)) => a.cmp(b),
			(Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
			(Value::Atom(a), Value::Atom(b)) => a.cmp(b),
			(Value::Date(a), Value::Date(b)) => a.cmp(b),
			(Value::Time(a), Value::Time(b)) => a.cmp(b),
			(Value::NaiveDateTime(a), Value::NaiveDateTime(b)) => a.cmp(b),
			(Value::DateTime(a), Value::DateTime(b)) => a.cmp(b).then_with(|| a.offset().local_minus_utc().cmp(&b.offset().local_minus_utc())),
			(Value::Tuple(a), Value::Tuple(b)) | (Value::List(a), Value::List(b)) => a.cmp(b),
			(Value::Set(a), Value::Set(b)) => a.cmp(b),
			(Value::Map(a), Value::Map(b)) => a.cmp(b),
			(Value::Ref(a), Value::Ref(b)) => a.cmp(b),
			(Value::Stream(a), Value::Stream(b)) => a.cmp(b),
			(Value::Opaque(a), Value::Opaque(b)) => a.cmp(b),
			_ => self.rank().cmp(&other.rank()),
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Null => f.write_str("None"),
			Value::Bool(true) => f.write_str("True"),
			Value::Bool(false) => f.write_str("False"),
			Value::Int(i) => write!(f, "{i}"),
			Value::Float(x) => write!(f, "{x:?}"),
			Value::Str(s) => write!(f, "{s:?}"),
			Value::Atom(atom) => write!(f, ":{}", atom.as_str()),
			Value::Ref(handle) => write!(f, "<ref {}@{}>", handle.id(), handle.session_id()),
			Value::Stream(stream) => write!(f, "<stream_ref {}@{}>", stream.id(), stream.session_id()),
			other => write!(f, "{other:?}"),
		}
	}
}

macro_rules! impl_from {
	($($ty:ty => $variant:ident),* $(,)?) => {
		$(
			impl From<$ty> for Value {
				fn from(value: $ty) -> Self {
					Value::$variant(value.into())
				}
			}
		)*
	};
}

impl_from! {
	bool => Bool,
	i64 => Int,
	i32 => Int,
	u32 => Int,
	f64 => Float,
	String => Str,
	&str => Str,
	Bytes => Bytes,
	Atom => Atom,
	NaiveDate => Date,
	NaiveTime => Time,
	NaiveDateTime => NaiveDateTime,
	DateTime<FixedOffset> => DateTime,
	Complex => Complex,
	Handle => Ref,
	StreamRef => Stream,
	Opaque => Opaque,
}

impl<T: Into<Value>> From<Vec<T>> for Value {
	fn from(items: Vec<T>) -> Self {
		Value::List(items.into_iter().map(Into::into).collect())
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(value: Option<T>) -> Self {
		value.map_or(Value::Null, Into::into)
	}
}

impl From<()> for Value {
	fn from(_: ()) -> Self {
		Value::Null
	}
}
