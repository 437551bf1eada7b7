//! Call Python libraries from Rust through pooled workers.
//!
//! ```ignore
//! let runtime = Runtime::new(transport);
//! let root = runtime.call("math", "sqrt", &[Value::from(16)], CallOptions::new()).await?;
//! assert_eq!(root, Value::Float(4.0));
//!
//! let path = runtime.construct("pathlib", "Path", &[Value::from(".")], CallOptions::new()).await?;
//! let handle = path.into_handle().expect("Path instances come back as handles");
//! let exists = runtime.call_method(&handle, "exists", &[], CallOptions::new()).await?;
//! runtime.release(&handle, CallOptions::new()).await?;
//! ```
//!
//! Values cross the boundary through the tagged codec in [`snakebridge_protocol`].
//! Objects that cannot be marshalled stay in the worker and come back as [`Handle`]s,
//! valid only within the session that created them. Sessions are picked per call by
//! [`snakebridge_runtime::resolve`] and cleaned up when their owning task ends.

pub mod config;
pub mod error;
pub mod options;
pub mod runtime;
pub mod translate;

pub use config::{AtomAllowlist, Config};
pub use error::{Error, ForeignError, ForeignErrorKind, Result};
pub use options::{CallOptions, Target};
pub use runtime::Runtime;
pub use snakebridge_protocol::{Atom, AtomPolicy, Bytes, Complex, Handle, Opaque, RefOrigin, Reference, StreamRef, Value, WireValue};
pub use snakebridge_runtime::{Owner, context, owner};
