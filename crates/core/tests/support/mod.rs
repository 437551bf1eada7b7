//! Scripted in-memory worker used by the end-to-end tests.
//!
//! Behaves like a Python worker behind a transport: objects it cannot send back by
//! value live in a registry keyed by `(session_id, id)` and leave as `ref` payloads.
//! Failures go through the same result envelope a real worker produces.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Value as WireValue, json};
use snakebridge::Runtime;
use snakebridge_protocol::codec::stop_iteration;
use snakebridge_protocol::{CallPayload, CallType, routes, unwrap_envelope};
use snakebridge_runtime::{ChunkFlow, ExecuteOptions, Transport, TransportError};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct Request {
	pub route: String,
	pub payload: WireValue,
	pub session_id: String,
	pub timeout: Option<Duration>,
}

#[derive(Debug)]
enum Object {
	Path(String),
	Counter(i64),
	Generator(VecDeque<WireValue>),
}

#[derive(Default)]
struct State {
	objects: HashMap<String, (String, Object)>,
	next_id: u64,
	requests: Vec<Request>,
}

#[derive(Clone, Default)]
pub struct Worker {
	state: Arc<Mutex<State>>,
}

type Reply = Result<WireValue, (String, &'static str)>;

/// Routes library logs to the test harness; `RUST_LOG=snakebridge=debug` shows dispatch.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();
}

impl Worker {
	pub fn new() -> Self {
		init_tracing();
		Self::default()
	}

	/// Runtime wired to this worker with default configuration.
	pub fn runtime(&self) -> Runtime {
		Runtime::new(Arc::new(self.clone()))
	}

	pub fn requests(&self) -> Vec<Request> {
		self.state.lock().requests.clone()
	}

	pub fn requests_on(&self, route: &str) -> Vec<Request> {
		self.requests().into_iter().filter(|r| r.route == route).collect()
	}

	pub fn clear_requests(&self) {
		self.state.lock().requests.clear();
	}

	pub fn live_objects(&self, session_id: &str) -> usize {
		self.state.lock().objects.values().filter(|(session, _)| session == session_id).count()
	}

	/// Forgets an object behind the host's back, as a passive expiry would.
	pub fn evict(&self, id: &str) {
		self.state.lock().objects.remove(id);
	}

	fn record(&self, route: &str, payload: &WireValue, opts: &ExecuteOptions) {
		self.state.lock().requests.push(Request {
			route: route.to_string(),
			payload: payload.clone(),
			session_id: opts.session_id().to_string(),
			timeout: opts.timeout,
		});
	}

	fn register(&self, session_id: &str, object: Object) -> WireValue {
		let mut state = self.state.lock();
		state.next_id += 1;
		let id = format!("ref_{:04}", state.next_id);
		let (tag, extra) = match &object {
			Object::Path(_) => ("ref", json!({"type_name": "PosixPath", "python_module": "pathlib", "library": "pathlib"})),
			Object::Counter(_) => ("ref", json!({"type_name": "Counter", "python_module": "counters", "library": "counters"})),
			Object::Generator(_) => ("stream_ref", json!({"type_name": "generator", "stream_type": "generator"})),
		};
		state.objects.insert(id.clone(), (session_id.to_string(), object));

		let mut wire = json!({"__type__": tag, "__schema__": 1, "id": id, "session_id": session_id});
		if let (Some(wire), Some(extra)) = (wire.as_object_mut(), extra.as_object()) {
			wire.extend(extra.clone());
		}
		wire
	}

	/// Looks up the object a request addresses and hands it to `f`.
	fn with_object<T>(&self, payload: &CallPayload, f: impl FnOnce(&mut Object) -> Result<T, (String, &'static str)>) -> Result<T, (String, &'static str)> {
		let Some(id) = payload.reference.as_ref().and_then(|r| r.get("id")).and_then(WireValue::as_str) else {
			return Err(("Invalid reference payload: missing id".into(), "ValueError"));
		};
		let mut state = self.state.lock();
		let Some((session_id, object)) = state.objects.get_mut(id) else {
			return Err((format!("Unknown reference: {id}"), "KeyError"));
		};
		if *session_id != payload.session_id {
			return Err((format!("Session mismatch: expected '{session_id}' got '{}'", payload.session_id), "RuntimeError"));
		}
		f(object)
	}

	fn handle_call(&self, payload: &CallPayload) -> Reply {
		let module = payload.python_module.as_deref().unwrap_or_default();
		let function = payload.function.as_deref().unwrap_or_default();
		let arg = |i: usize| payload.args.get(i).cloned().unwrap_or(WireValue::Null);

		match payload.call_type {
			CallType::Function => match (module, function) {
				("math", "sqrt") => {
					let x = arg(0).as_f64().ok_or(("must be real number".to_string(), "TypeError"))?;
					if x < 0.0 {
						return Err(("math domain error".into(), "ValueError"));
					}
					Ok(json!(x.sqrt()))
				}
				("echo", "identity") => Ok(arg(0)),
				("echo", "kwargs") => Ok(WireValue::Object(payload.kwargs.clone())),
				("gen", "countdown") => {
					let n = arg(0).as_i64().unwrap_or(0);
					let items = (1..=n).rev().map(|i| json!(i)).collect();
					Ok(self.register(&payload.session_id, Object::Generator(items)))
				}
				("os", "getpid") => Ok(json!({"__needs_ref__": true, "__type_name__": "Process"})),
				_ => Err((format!("module '{module}' has no attribute '{function}'"), "AttributeError")),
			},
			CallType::Class => match (module, function) {
				("pathlib", "Path") => {
					let path = arg(0).as_str().unwrap_or(".").to_string();
					Ok(self.register(&payload.session_id, Object::Path(path)))
				}
				("counters", "Counter") => {
					let start = payload.kwargs.get("start").and_then(WireValue::as_i64).unwrap_or(0);
					Ok(self.register(&payload.session_id, Object::Counter(start)))
				}
				_ => Err((format!("No module named '{module}'"), "ModuleNotFoundError")),
			},
			CallType::ModuleAttr => match (module, payload.attr.as_deref()) {
				("math", Some("pi")) => Ok(json!(std::f64::consts::PI)),
				("math", Some("inf")) => Ok(json!({"__type__": "special_float", "__schema__": 1, "value": "infinity"})),
				_ => Err((format!("module '{module}' has no attribute"), "AttributeError")),
			},
			CallType::Method => {
				let joined = self.with_object(payload, |object| match (object, function) {
					(Object::Path(path), "exists") => Ok(Ok(json!(path == "." || path.starts_with('/')))),
					(Object::Path(path), "joinpath") => Ok(Err(format!("{path}/{}", arg(0).as_str().unwrap_or_default()))),
					(Object::Counter(value), "increment") => {
						*value += 1;
						Ok(Ok(json!(*value)))
					}
					_ => Err((format!("object has no attribute '{function}'"), "AttributeError")),
				})?;
				// New objects are registered after the registry lock is released.
				match joined {
					Ok(result) => Ok(result),
					Err(path) => Ok(self.register(&payload.session_id, Object::Path(path))),
				}
			}
			CallType::GetAttr => {
				let attr = payload.attr.clone().unwrap_or_default();
				self.with_object(payload, |object| match (object, attr.as_str()) {
					(Object::Path(path), "name") => Ok(json!(path.rsplit('/').next().unwrap_or_default())),
					(Object::Counter(value), "value") => Ok(json!(*value)),
					_ => Err((format!("object has no attribute '{attr}'"), "AttributeError")),
				})
			}
			CallType::SetAttr => {
				let attr = payload.attr.clone().unwrap_or_default();
				let value = payload.value.clone().unwrap_or(WireValue::Null);
				self.with_object(payload, |object| match (object, attr.as_str()) {
					(Object::Counter(current), "value") => {
						*current = value.as_i64().ok_or(("value must be an int".to_string(), "TypeError"))?;
						Ok(WireValue::Null)
					}
					_ => Err((format!("can't set attribute '{attr}'"), "AttributeError")),
				})
			}
			CallType::StreamNext => self.with_object(payload, |object| match object {
				Object::Generator(items) => Ok(items.pop_front().unwrap_or_else(stop_iteration)),
				_ => Err(("object is not an iterator".into(), "TypeError")),
			}),
			CallType::Helper => match function {
				"snakebridge.ping" => Ok(json!("pong")),
				_ => Err((format!("unknown helper '{function}'"), "KeyError")),
			},
			CallType::ReleaseRef => {
				let id = payload.reference.as_ref().and_then(|r| r.get("id")).and_then(WireValue::as_str).unwrap_or_default();
				match self.state.lock().objects.remove(id) {
					Some(_) => Ok(json!(true)),
					None => Err((format!("Unknown reference: {id}"), "KeyError")),
				}
			}
			CallType::ReleaseSession => {
				let mut state = self.state.lock();
				let before = state.objects.len();
				state.objects.retain(|_, (session, _)| *session != payload.session_id);
				Ok(json!(before - state.objects.len()))
			}
		}
	}

	fn envelope(reply: Reply) -> Result<WireValue, TransportError> {
		let envelope = match reply {
			Ok(result) => json!({"success": true, "result": result}),
			Err((message, error_type)) => json!({
				"success": false,
				"error": message,
				"error_type": error_type,
				"traceback": "Traceback (most recent call last):\n  ..."
			}),
		};
		unwrap_envelope(envelope).map_err(TransportError::Remote)
	}
}

fn parse(payload: WireValue) -> Result<CallPayload, TransportError> {
	serde_json::from_value(payload).map_err(|e| TransportError::Unavailable(format!("worker rejected payload: {e}")))
}

impl Transport for Worker {
	fn execute<'a>(&'a self, route: &'a str, payload: WireValue, opts: &'a ExecuteOptions) -> BoxFuture<'a, Result<WireValue, TransportError>> {
		Box::pin(async move {
			self.record(route, &payload, opts);
			let payload = parse(payload)?;

			if payload.python_module.as_deref() == Some("time") && payload.function.as_deref() == Some("sleep") {
				let secs = payload.args.first().and_then(WireValue::as_f64).unwrap_or(0.0);
				tokio::time::sleep(Duration::from_secs_f64(secs)).await;
				return Ok(WireValue::Null);
			}

			let reply = match route {
				routes::CALL | routes::RELEASE_REF | routes::RELEASE_SESSION => self.handle_call(&payload),
				other => Err((format!("unknown route {other}"), "RuntimeError")),
			};
			Self::envelope(reply)
		})
	}

	fn execute_stream<'a>(
		&'a self,
		route: &'a str,
		payload: WireValue,
		on_chunk: &'a mut (dyn FnMut(WireValue) -> ChunkFlow + Send),
		opts: &'a ExecuteOptions,
	) -> BoxFuture<'a, Result<(), TransportError>> {
		Box::pin(async move {
			self.record(route, &payload, opts);
			let payload = parse(payload)?;
			let n = payload.args.first().and_then(WireValue::as_i64).unwrap_or(0);

			let (items, failure): (Vec<WireValue>, Option<&str>) = match payload.function.as_deref() {
				Some("count") => ((0..n).map(|i| json!(i)).collect(), None),
				Some("pairs") => ((0..n).map(|i| json!({"__type__": "tuple", "__schema__": 1, "elements": [i, i * i]})).collect(), None),
				Some("count_then_fail") => ((0..n).map(|i| json!(i)).collect(), Some("generator exploded")),
				Some("paths") => ((0..n).map(|i| self.register(&payload.session_id, Object::Path(format!("/tmp/{i}")))).collect(), None),
				_ => (Vec::new(), Some("not a generator function")),
			};

			for item in items {
				if on_chunk(item) == ChunkFlow::Stop {
					return Ok(());
				}
			}
			if let Some(message) = failure {
				return Self::envelope(Err((message.to_string(), "RuntimeError"))).map(drop);
			}
			on_chunk(stop_iteration());
			Ok(())
		})
	}
}
