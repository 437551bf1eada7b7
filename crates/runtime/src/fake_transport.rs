//! Fake transport for unit testing dispatch and lifecycle without a worker pool.
//!
//! Every request is recorded; replies come from per-route scripts consumed in FIFO
//! order. A route with nothing scripted answers `null` (or an empty stream).
//!
//! # Example
//!
//! ```ignore
//! let (transport, controller) = FakeTransportBuilder::new().build();
//! controller.reply(routes::CALL, json!(4.0)).await;
//!
//! let opts = ExecuteOptions::new("s1");
//! let result = transport.execute(routes::CALL, json!({}), &opts).await?;
//! assert_eq!(controller.take_sent().await[0].route, routes::CALL);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use snakebridge_protocol::WireValue;
use tokio::sync::{Mutex, Notify};

use crate::transport::{ChunkFlow, ExecuteOptions, Transport, TransportError};

/// A request the fake transport received.
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
	pub route: String,
	pub payload: WireValue,
	pub opts: ExecuteOptions,
	pub streaming: bool,
}

enum Scripted {
	Reply(Result<WireValue, TransportError>),
	Stream { chunks: Vec<WireValue>, then: Option<TransportError> },
	Stall(Duration, Box<Scripted>),
}

#[derive(Default)]
struct Shared {
	sent: Mutex<Vec<SentRequest>>,
	scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
	notify: Notify,
}

/// Builder for creating fake transport instances.
#[derive(Debug, Default)]
pub struct FakeTransportBuilder {}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self {}
	}

	/// Build the transport and the controller that scripts and inspects it.
	pub fn build(self) -> (Arc<FakeTransport>, FakeTransportController) {
		let shared = Arc::new(Shared::default());
		let transport = Arc::new(FakeTransport { shared: Arc::clone(&shared) });
		(transport, FakeTransportController { shared })
	}
}

pub struct FakeTransport {
	shared: Arc<Shared>,
}

impl FakeTransport {
	async fn record(&self, route: &str, payload: WireValue, opts: &ExecuteOptions, streaming: bool) {
		self.shared.sent.lock().await.push(SentRequest {
			route: route.to_string(),
			payload,
			opts: opts.clone(),
			streaming,
		});
		self.shared.notify.notify_waiters();
	}

	/// Next script for `route`, after sitting out any stall in front of it.
	async fn next_script(&self, route: &str) -> Option<Scripted> {
		let mut script = self.shared.scripts.lock().await.get_mut(route).and_then(VecDeque::pop_front)?;
		while let Scripted::Stall(delay, inner) = script {
			tokio::time::sleep(delay).await;
			script = *inner;
		}
		Some(script)
	}
}

impl Transport for FakeTransport {
	fn execute<'a>(&'a self, route: &'a str, payload: WireValue, opts: &'a ExecuteOptions) -> BoxFuture<'a, Result<WireValue, TransportError>> {
		Box::pin(async move {
			self.record(route, payload, opts, false).await;
			match self.next_script(route).await {
				None => Ok(WireValue::Null),
				Some(Scripted::Reply(reply)) => reply,
				Some(Scripted::Stream { .. }) => Err(TransportError::Unavailable(format!("{route} is scripted as a stream"))),
				Some(Scripted::Stall(..)) => Err(TransportError::Unavailable("nested stall".into())),
			}
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
			self.record(route, payload, opts, true).await;
			match self.next_script(route).await {
				None => Ok(()),
				Some(Scripted::Reply(Ok(chunk))) => {
					on_chunk(chunk);
					Ok(())
				}
				Some(Scripted::Reply(Err(err))) => Err(err),
				Some(Scripted::Stream { chunks, then }) => {
					for chunk in chunks {
						if on_chunk(chunk) == ChunkFlow::Stop {
							return Ok(());
						}
					}
					then.map_or(Ok(()), Err)
				}
				Some(Scripted::Stall(..)) => Err(TransportError::Unavailable("nested stall".into())),
			}
		})
	}
}

/// Controller for scripting replies and inspecting sent requests.
#[derive(Clone)]
pub struct FakeTransportController {
	shared: Arc<Shared>,
}

impl FakeTransportController {
	async fn push(&self, route: &str, script: Scripted) {
		self.shared.scripts.lock().await.entry(route.to_string()).or_default().push_back(script);
	}

	/// Queue a successful reply on `route`.
	pub async fn reply(&self, route: &str, result: WireValue) {
		self.push(route, Scripted::Reply(Ok(result))).await;
	}

	/// Queue a failure on `route`.
	pub async fn fail(&self, route: &str, err: TransportError) {
		self.push(route, Scripted::Reply(Err(err))).await;
	}

	/// Queue a reply that arrives after `delay`.
	pub async fn stall(&self, route: &str, delay: Duration, result: WireValue) {
		self.push(route, Scripted::Stall(delay, Box::new(Scripted::Reply(Ok(result))))).await;
	}

	/// Queue a stream of chunks on `route`.
	pub async fn stream(&self, route: &str, chunks: Vec<WireValue>) {
		self.push(route, Scripted::Stream { chunks, then: None }).await;
	}

	/// Queue a stream that fails after delivering `chunks`.
	pub async fn stream_then_fail(&self, route: &str, chunks: Vec<WireValue>, err: TransportError) {
		self.push(route, Scripted::Stream { chunks, then: Some(err) }).await;
	}

	/// Take all sent requests, clearing the buffer.
	pub async fn take_sent(&self) -> Vec<SentRequest> {
		std::mem::take(&mut *self.shared.sent.lock().await)
	}

	/// Copy of the sent requests for `route`.
	pub async fn sent_on(&self, route: &str) -> Vec<SentRequest> {
		self.shared.sent.lock().await.iter().filter(|r| r.route == route).cloned().collect()
	}

	/// Wait until at least `count` requests have been sent on `route`.
	pub async fn wait_for_sent(&self, route: &str, count: usize) -> Vec<SentRequest> {
		loop {
			let notified = self.shared.notify.notified();
			let sent = self.sent_on(route).await;
			if sent.len() >= count {
				return sent;
			}
			notified.await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[tokio::test]
	async fn records_requests_and_replays_scripts() {
		let (transport, controller) = FakeTransportBuilder::new().build();
		controller.reply("r", json!(1)).await;
		controller.reply("r", json!(2)).await;

		let opts = ExecuteOptions::new("s1");
		assert_eq!(transport.execute("r", json!({"a": 1}), &opts).await.unwrap(), json!(1));
		assert_eq!(transport.execute("r", json!({"a": 2}), &opts).await.unwrap(), json!(2));
		assert_eq!(transport.execute("r", json!({}), &opts).await.unwrap(), WireValue::Null);

		let sent = controller.take_sent().await;
		assert_eq!(sent.len(), 3);
		assert_eq!(sent[0].payload["a"], 1);
		assert_eq!(sent[0].opts.session_id(), "s1");
		assert!(controller.take_sent().await.is_empty());
	}

	#[tokio::test]
	async fn scripts_are_per_route() {
		let (transport, controller) = FakeTransportBuilder::new().build();
		controller.fail("a", TransportError::Unavailable("down".into())).await;
		let opts = ExecuteOptions::new("s1");
		assert_eq!(transport.execute("b", json!(null), &opts).await.unwrap(), WireValue::Null);
		assert!(transport.execute("a", json!(null), &opts).await.is_err());
	}

	#[tokio::test]
	async fn stream_stops_when_consumer_asks() {
		let (transport, controller) = FakeTransportBuilder::new().build();
		controller.stream("s", vec![json!(1), json!(2), json!(3)]).await;

		let mut seen = Vec::new();
		let mut on_chunk = |chunk: WireValue| {
			seen.push(chunk);
			if seen.len() == 2 { ChunkFlow::Stop } else { ChunkFlow::Continue }
		};
		transport.execute_stream("s", json!({}), &mut on_chunk, &ExecuteOptions::new("s1")).await.unwrap();
		assert_eq!(seen, vec![json!(1), json!(2)]);
	}

	#[tokio::test(start_paused = true)]
	async fn stalled_reply_waits() {
		let (transport, controller) = FakeTransportBuilder::new().build();
		controller.stall("r", Duration::from_secs(10), json!("late")).await;
		let opts = ExecuteOptions::new("s1");
		let quick = tokio::time::timeout(Duration::from_secs(1), transport.execute("r", json!(null), &opts)).await;
		assert!(quick.is_err());
	}
}
