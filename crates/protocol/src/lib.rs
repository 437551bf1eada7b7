//! Wire types for the SnakeBridge protocol.
//!
//! This crate holds everything that crosses the boundary between the host and a
//! Python worker, and nothing that talks to one:
//!
//! * [`Value`]: the host-side value model
//! * [`codec`]: the tagged JSON encoding of those values
//! * [`Handle`] and [`StreamRef`]: addresses of objects living in a worker
//! * [`CallPayload`] and the result envelope
//!
//! Higher-level session handling and dispatch live in `snakebridge-runtime` and
//! `snakebridge`.

pub mod atom;
pub mod codec;
pub mod error;
pub mod handle;
pub mod payload;
pub mod value;

pub use atom::{Atom, AtomPolicy, DEFAULT_ATOM_ALLOWLIST};
pub use codec::{Codec, SCHEMA_VERSION, encode, is_stop_iteration};
pub use error::{DecodeError, SerializationError};
pub use handle::{Handle, RefOrigin, Reference, StreamRef};
pub use payload::{CallPayload, CallType, PROTOCOL_VERSION, RemoteError, routes, unwrap_envelope};
pub use value::{Bytes, Complex, Opaque, Value};

/// Wire form of a value: plain JSON.
pub type WireValue = serde_json::Value;
