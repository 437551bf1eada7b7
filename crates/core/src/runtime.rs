//! Dynamic dispatcher.
//!
//! [`Runtime`] turns a call (module function, class constructor, method on a handle,
//! attribute access, stream pull) into one transport request. Every operation follows
//! the same path: resolve the session once, encode arguments, send, then decode the
//! result or translate the failure. The resolved session id goes into both the payload
//! and the transport options, so the two can never disagree.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Map;
use snakebridge_protocol::{CallPayload, CallType, Codec, Handle, Reference, StreamRef, Value, WireValue, is_stop_iteration, routes};
use snakebridge_runtime::resolver::{self, Resolved, SessionInputs, SessionSource};
use snakebridge_runtime::{ChunkFlow, ExecuteOptions, LifecycleMonitor, Owner, Registration, Transport, context};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::options::{CallOptions, Target};
use crate::translate::translate;

/// Entry point for calling into Python workers.
///
/// Cheap to clone; clones share the transport, codec and lifecycle monitor. Must be
/// created inside a tokio runtime.
#[derive(Clone)]
pub struct Runtime {
	inner: Arc<Inner>,
}

struct Inner {
	transport: Arc<dyn Transport>,
	codec: Codec,
	monitor: LifecycleMonitor,
	config: Config,
	next_correlation: AtomicU64,
}

impl Runtime {
	pub fn new(transport: Arc<dyn Transport>) -> Self {
		Self::with_config(transport, Config::default())
	}

	pub fn with_config(transport: Arc<dyn Transport>, config: Config) -> Self {
		let monitor = LifecycleMonitor::start(Arc::clone(&transport), config.monitor_config());
		Self {
			inner: Arc::new(Inner {
				transport,
				codec: Codec::new(config.atom_policy()),
				monitor,
				config,
				next_correlation: AtomicU64::new(1),
			}),
		}
	}

	pub fn config(&self) -> &Config {
		&self.inner.config
	}

	pub fn codec(&self) -> &Codec {
		&self.inner.codec
	}

	pub fn monitor(&self) -> &LifecycleMonitor {
		&self.inner.monitor
	}

	/// Calls `target.function(*args, **opts.kwargs)`.
	pub async fn call(&self, target: impl Into<Target>, function: &str, args: &[Value], opts: CallOptions) -> Result<Value> {
		let target = target.into();
		let resolved = self.resolve(opts.session_id.as_deref(), None).await?;
		let (args, kwargs) = self.encode_args(args, &opts.kwargs)?;
		let payload = CallPayload::new(CallType::Function, resolved.session_id.as_str())
			.target(target.library, target.python_module)
			.function(function)
			.args(args, kwargs);
		self.dispatch(payload, &resolved, &opts).await
	}

	/// Instantiates `target.class(*args, **opts.kwargs)`; the result is usually a handle.
	pub async fn construct(&self, target: impl Into<Target>, class: &str, args: &[Value], opts: CallOptions) -> Result<Value> {
		let target = target.into();
		let resolved = self.resolve(opts.session_id.as_deref(), None).await?;
		let (args, kwargs) = self.encode_args(args, &opts.kwargs)?;
		let payload = CallPayload::new(CallType::Class, resolved.session_id.as_str())
			.target(target.library, target.python_module)
			.function(class)
			.args(args, kwargs);
		self.dispatch(payload, &resolved, &opts).await
	}

	/// Reads a module-level attribute such as `math.pi`.
	pub async fn module_attr(&self, target: impl Into<Target>, attr: &str, opts: CallOptions) -> Result<Value> {
		let target = target.into();
		let resolved = self.resolve(opts.session_id.as_deref(), None).await?;
		let payload = CallPayload::new(CallType::ModuleAttr, resolved.session_id.as_str())
			.target(target.library, target.python_module)
			.attr(attr);
		self.dispatch(payload, &resolved, &opts).await
	}

	pub async fn get_attr(&self, handle: &Handle, name: &str, opts: CallOptions) -> Result<Value> {
		let resolved = self.resolve(opts.session_id.as_deref(), Some(handle.session_id())).await?;
		let payload = CallPayload::new(CallType::GetAttr, resolved.session_id.as_str()).reference(handle.to_wire()).attr(name);
		self.track_target(&resolved, handle)?;
		self.dispatch(payload, &resolved, &opts).await
	}

	pub async fn set_attr(&self, handle: &Handle, name: &str, value: impl Into<Value>, opts: CallOptions) -> Result<()> {
		let resolved = self.resolve(opts.session_id.as_deref(), Some(handle.session_id())).await?;
		let value = self.inner.codec.encode(&value.into()).map_err(|e| e.within("value"))?;
		let payload = CallPayload::new(CallType::SetAttr, resolved.session_id.as_str())
			.reference(handle.to_wire())
			.attr(name)
			.value(value);
		self.track_target(&resolved, handle)?;
		self.dispatch(payload, &resolved, &opts).await.map(drop)
	}

	/// Calls `handle.name(*args, **opts.kwargs)` on the worker.
	pub async fn call_method(&self, handle: &Handle, name: &str, args: &[Value], opts: CallOptions) -> Result<Value> {
		let resolved = self.resolve(opts.session_id.as_deref(), Some(handle.session_id())).await?;
		let (args, kwargs) = self.encode_args(args, &opts.kwargs)?;
		let payload = CallPayload::new(CallType::Method, resolved.session_id.as_str())
			.reference(handle.to_wire())
			.function(name)
			.args(args, kwargs);
		self.track_target(&resolved, handle)?;
		self.dispatch(payload, &resolved, &opts).await
	}

	/// Calls a worker-side helper function registered outside any module.
	pub async fn call_helper(&self, name: &str, args: &[Value], opts: CallOptions) -> Result<Value> {
		let resolved = self.resolve(opts.session_id.as_deref(), None).await?;
		let (args, kwargs) = self.encode_args(args, &opts.kwargs)?;
		let payload = CallPayload::new(CallType::Helper, resolved.session_id.as_str()).function(name).args(args, kwargs);
		self.dispatch(payload, &resolved, &opts).await
	}

	/// Calls a generator function and feeds every yielded item to `on_item`.
	///
	/// Returns the number of items delivered. A failure after at least one item has been
	/// delivered is reported as [`Error::StreamInterrupted`].
	pub async fn stream<F>(&self, target: impl Into<Target>, function: &str, args: &[Value], opts: CallOptions, mut on_item: F) -> Result<usize>
	where
		F: FnMut(Value) + Send,
	{
		let target = target.into();
		let resolved = self.resolve(opts.session_id.as_deref(), None).await?;
		let (args, kwargs) = self.encode_args(args, &opts.kwargs)?;
		let payload = CallPayload::new(CallType::Function, resolved.session_id.as_str())
			.target(target.library, target.python_module)
			.function(function)
			.args(args, kwargs);
		let wire = payload.to_wire()?;

		let timeout = opts.timeout.or_else(|| self.inner.config.stream_timeout());
		let exec = self.execute_options(&resolved, timeout, &opts);
		self.log_dispatch(&payload, &resolved, &exec);
		self.inner.monitor.touch(&resolved.session_id)?;

		let mut delivered = 0usize;
		let mut failure = None;
		let mut on_chunk = |chunk: WireValue| {
			if is_stop_iteration(&chunk) {
				return ChunkFlow::Stop;
			}
			match self.decode(chunk) {
				Ok(item) => {
					on_item(item);
					delivered += 1;
					ChunkFlow::Continue
				}
				Err(err) => {
					failure = Some(err);
					ChunkFlow::Stop
				}
			}
		};

		let run = self.inner.transport.execute_stream(routes::STREAM, wire, &mut on_chunk, &exec);
		let outcome = match timeout {
			Some(limit) => match tokio::time::timeout(limit, run).await {
				Ok(outcome) => outcome.map_err(translate),
				Err(_) => Err(Error::Timeout(limit)),
			},
			None => run.await.map_err(translate),
		};

		match failure.or(outcome.err()) {
			None => Ok(delivered),
			Some(source) if delivered > 0 => Err(Error::StreamInterrupted {
				delivered,
				source: Box::new(source),
			}),
			Some(source) => Err(source),
		}
	}

	/// Pulls the next item from a foreign iterator. `None` once it is exhausted.
	pub async fn next(&self, stream: &StreamRef, opts: CallOptions) -> Result<Option<Value>> {
		let resolved = self.resolve(opts.session_id.as_deref(), Some(stream.session_id())).await?;
		let payload = CallPayload::new(CallType::StreamNext, resolved.session_id.as_str()).reference(stream.to_wire());
		self.inner.monitor.track_handles(stream.session_id(), vec![stream.id().to_string()])?;
		let wire = self.execute(routes::CALL, payload, &resolved, &opts).await?;
		if is_stop_iteration(&wire) {
			return Ok(None);
		}
		self.decode(wire).map(Some)
	}

	/// Drives [`Runtime::next`] until the iterator is exhausted. Returns the item count.
	pub async fn for_each<F>(&self, stream: &StreamRef, opts: CallOptions, mut on_item: F) -> Result<usize>
	where
		F: FnMut(Value),
	{
		let mut delivered = 0;
		loop {
			match self.next(stream, opts.clone()).await {
				Ok(Some(item)) => {
					on_item(item);
					delivered += 1;
				}
				Ok(None) => return Ok(delivered),
				Err(source) if delivered > 0 => {
					return Err(Error::StreamInterrupted {
						delivered,
						source: Box::new(source),
					});
				}
				Err(source) => return Err(source),
			}
		}
	}

	/// Releases a handle or stream reference on the worker.
	///
	/// Idempotent: releasing something already released or expired succeeds.
	pub async fn release<R: Reference + ?Sized>(&self, reference: &R, opts: CallOptions) -> Result<()> {
		let resolved = self.resolve(opts.session_id.as_deref(), Some(reference.session_id())).await?;
		let payload = CallPayload::new(CallType::ReleaseRef, resolved.session_id.as_str()).reference(reference.to_wire());
		self.inner.monitor.forget_handle(reference.session_id(), reference.id())?;

		match self.execute(routes::RELEASE_REF, payload, &resolved, &opts).await {
			Ok(_) => Ok(()),
			Err(Error::HandleNotFound { id, .. }) => {
				debug!(target = "snakebridge.dispatch", id = %id, "reference already released");
				Ok(())
			}
			Err(err) => Err(err),
		}
	}

	/// Drops every object the worker holds for `session_id` and forgets the session.
	pub async fn release_session(&self, session_id: &str) -> Result<()> {
		if session_id.is_empty() {
			return Err(Error::InvalidHandle {
				reason: "cannot release an empty session id".into(),
			});
		}
		self.inner.monitor.unregister(session_id).await?;

		let resolved = Resolved {
			session_id: session_id.to_string(),
			source: SessionSource::Override,
		};
		let payload = CallPayload::new(CallType::ReleaseSession, session_id);
		let opts = CallOptions {
			timeout: Some(self.inner.config.monitor_config().release_timeout),
			..CallOptions::default()
		};
		self.execute(routes::RELEASE_SESSION, payload, &resolved, &opts).await.map(drop)
	}

	/// Runs `fut` with `session_id` as the context session, tied to the calling owner.
	pub async fn with_session<F: Future>(&self, session_id: impl Into<String>, fut: F) -> Result<F::Output> {
		let session_id = session_id.into();
		if !session_id.is_empty() {
			let registration = self.inner.monitor.register(session_id.clone(), Owner::current().watch()).await?;
			if let Registration::OwnedByOther(owner) = registration {
				debug!(target = "snakebridge.session", session_id = %session_id, owner = %owner, "session already owned elsewhere");
			}
		}
		Ok(context::with_session(session_id, fut).await)
	}

	/// Session the next call would use from context, if any.
	pub fn current_session(&self) -> Option<String> {
		context::current_session()
	}

	async fn resolve(&self, override_id: Option<&str>, handle_session: Option<&str>) -> Result<Resolved> {
		let context = context::current_session();
		let owner = Owner::current();
		let resolved = resolver::resolve(
			SessionInputs {
				override_id,
				handle_session,
				context: context.as_deref(),
			},
			|| owner.auto_session().session_id().to_string(),
		);

		if resolved.source == SessionSource::Auto && !self.inner.monitor.is_registered(&resolved.session_id) {
			self.inner.monitor.register(resolved.session_id.clone(), owner.watch()).await?;
		}
		Ok(resolved)
	}

	fn encode_args(&self, args: &[Value], kwargs: &BTreeMap<String, Value>) -> Result<(Vec<WireValue>, Map<String, WireValue>)> {
		let codec = &self.inner.codec;
		let args = args
			.iter()
			.enumerate()
			.map(|(i, arg)| codec.encode(arg).map_err(|e| e.within(format!("args[{i}]"))))
			.collect::<std::result::Result<Vec<_>, _>>()?;
		let kwargs = kwargs
			.iter()
			.map(|(name, value)| Ok((name.clone(), codec.encode(value).map_err(|e| e.within(format!("kwargs.{name}")))?)))
			.collect::<Result<Map<_, _>>>()?;
		Ok((args, kwargs))
	}

	fn execute_options(&self, resolved: &Resolved, timeout: Option<Duration>, opts: &CallOptions) -> ExecuteOptions {
		let correlation = self.inner.next_correlation.fetch_add(1, Ordering::Relaxed);
		ExecuteOptions::new(resolved.session_id.as_str())
			.with_timeout(timeout)
			.with_pool(opts.pool.clone().or_else(|| self.inner.config.pool.clone()))
			.with_correlation_id(format!("sb-{correlation}"))
	}

	fn log_dispatch(&self, payload: &CallPayload, resolved: &Resolved, exec: &ExecuteOptions) {
		debug!(
			target = "snakebridge.dispatch",
			call_type = %payload.call_type,
			module = payload.python_module.as_deref().unwrap_or("-"),
			function = payload.function.as_deref().or(payload.attr.as_deref()).unwrap_or("-"),
			session_id = %resolved.session_id,
			source = %resolved.source,
			correlation_id = exec.correlation_id.as_deref().unwrap_or("-"),
			"dispatch"
		);
	}

	/// Sends one request and returns the raw reply.
	async fn execute(&self, route: &'static str, payload: CallPayload, resolved: &Resolved, opts: &CallOptions) -> Result<WireValue> {
		let timeout = opts.timeout.unwrap_or_else(|| self.inner.config.default_timeout());
		let exec = self.execute_options(resolved, Some(timeout), opts);
		let wire = payload.to_wire()?;
		self.log_dispatch(&payload, resolved, &exec);
		self.inner.monitor.touch(&resolved.session_id)?;

		match tokio::time::timeout(timeout, self.inner.transport.execute(route, wire, &exec)).await {
			Ok(Ok(reply)) => Ok(reply),
			Ok(Err(err)) => Err(translate(err)),
			Err(_) => {
				debug!(target = "snakebridge.dispatch", session_id = %resolved.session_id, ?timeout, "call timed out");
				Err(Error::Timeout(timeout))
			}
		}
	}

	async fn dispatch(&self, payload: CallPayload, resolved: &Resolved, opts: &CallOptions) -> Result<Value> {
		let reply = self.execute(routes::CALL, payload, resolved, opts).await?;
		self.decode(reply)
	}

	/// Decodes a reply and starts tracking the handles it carries.
	fn decode(&self, wire: WireValue) -> Result<Value> {
		let value = self.inner.codec.decode(&wire)?;

		let mut by_session: HashMap<String, Vec<String>> = HashMap::new();
		value.for_each_ref(&mut |session_id, id| by_session.entry(session_id.to_string()).or_default().push(id.to_string()));
		for (session_id, ids) in by_session {
			self.inner.monitor.track_handles(&session_id, ids)?;
		}
		Ok(value)
	}

	fn track_target(&self, resolved: &Resolved, handle: &Handle) -> Result<()> {
		if resolved.session_id == handle.session_id() {
			self.inner.monitor.track_handles(handle.session_id(), vec![handle.id().to_string()])?;
		}
		Ok(())
	}
}
