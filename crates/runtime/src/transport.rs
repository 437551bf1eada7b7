//! Transport contract.
//!
//! The pooled worker transport is an external collaborator. Everything the bridge
//! needs from it is two operations keyed by a route name: a request/response call and
//! a chunked stream. Implementations are expected to strip the worker's result
//! envelope (see [`snakebridge_protocol::unwrap_envelope`]) before returning.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use snakebridge_protocol::{RemoteError, WireValue};
use thiserror::Error;

/// What a stream consumer wants after receiving a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFlow {
	Continue,
	Stop,
}

/// Per-call transport options.
///
/// The only constructor takes the resolved session id, so every request that reaches
/// a transport carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOptions {
	session_id: String,
	pub timeout: Option<Duration>,
	pub pool: Option<String>,
	pub correlation_id: Option<String>,
}

impl ExecuteOptions {
	pub fn new(session_id: impl Into<String>) -> Self {
		Self {
			session_id: session_id.into(),
			timeout: None,
			pool: None,
			correlation_id: None,
		}
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_pool(mut self, pool: Option<String>) -> Self {
		self.pool = pool;
		self
	}

	pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
		self.correlation_id = Some(correlation_id.into());
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
	#[error("remote error: {0}")]
	Remote(#[from] RemoteError),

	#[error("transport timed out after {0:?}")]
	Timeout(Duration),

	#[error("transport unavailable: {0}")]
	Unavailable(String),
}

/// Remote-call transport to a pool of Python workers.
pub trait Transport: Send + Sync {
	fn execute<'a>(&'a self, route: &'a str, payload: WireValue, opts: &'a ExecuteOptions) -> BoxFuture<'a, Result<WireValue, TransportError>>;

	/// Runs a streaming call, handing each chunk to `on_chunk` until the stream ends or
	/// the consumer returns [`ChunkFlow::Stop`].
	fn execute_stream<'a>(
		&'a self,
		route: &'a str,
		payload: WireValue,
		on_chunk: &'a mut (dyn FnMut(WireValue) -> ChunkFlow + Send),
		opts: &'a ExecuteOptions,
	) -> BoxFuture<'a, Result<(), TransportError>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
	fn execute<'a>(&'a self, route: &'a str, payload: WireValue, opts: &'a ExecuteOptions) -> BoxFuture<'a, Result<WireValue, TransportError>> {
		(**self).execute(route, payload, opts)
	}

	fn execute_stream<'a>(
		&'a self,
		route: &'a str,
		payload: WireValue,
		on_chunk: &'a mut (dyn FnMut(WireValue) -> ChunkFlow + Send),
		opts: &'a ExecuteOptions,
	) -> BoxFuture<'a, Result<(), TransportError>> {
		(**self).execute_stream(route, payload, on_chunk, opts)
	}
}
