//! Symbolic constants and the policy that gates their revival from the wire.

use std::collections::BTreeSet;
use std::fmt;

/// A symbolic constant (`:ok`, `:error`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom(String);

impl Atom {
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Atom {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for Atom {
	fn from(name: &str) -> Self {
		Self::new(name)
	}
}

/// Atom names revived by [`AtomPolicy::default`].
pub const DEFAULT_ATOM_ALLOWLIST: &[&str] = &["ok", "error"];

/// Decides which wire atoms become [`Atom`]s and which stay plain strings.
///
/// Foreign code controls the names it sends back, so reviving every atom would let a
/// worker grow the host's symbol space without bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomPolicy {
	/// Revive every wire atom.
	All,
	/// Revive only the listed names.
	Allow(BTreeSet<String>),
}

impl AtomPolicy {
	pub fn allow<I, S>(names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		AtomPolicy::Allow(names.into_iter().map(Into::into).collect())
	}

	/// Policy that keeps every atom as a string.
	pub fn none() -> Self {
		AtomPolicy::Allow(BTreeSet::new())
	}

	pub fn allows(&self, name: &str) -> bool {
		match self {
			AtomPolicy::All => true,
			AtomPolicy::Allow(names) => names.contains(name),
		}
	}
}

impl Default for AtomPolicy {
	fn default() -> Self {
		AtomPolicy::allow(DEFAULT_ATOM_ALLOWLIST.iter().copied())
	}
}
