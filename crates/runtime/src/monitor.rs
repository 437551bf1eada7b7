//! Session lifecycle monitor.
//!
//! A single coordinator task owns the table of live sessions. Callers talk to it
//! through a mailbox ([`LifecycleMonitor`] is a cheap cloneable handle) and read the set
//! of live session ids from a shared view that only the coordinator writes.
//!
//! Each registered session has a watcher task waiting on its owner's
//! [`OwnerWatch`]. When the owner terminates the watcher posts an `OwnerDown`
//! command; the coordinator removes the entry and fires a best-effort
//! `release_session` at the worker. Only the removal that finds the entry releases,
//! so a session is released at most once per registration.
//!
//! With a TTL configured, a sweep on a fixed interval also expires sessions and
//! tracked handles that have not been touched within the TTL.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use snakebridge_protocol::{CallPayload, CallType, Handle, Reference, routes};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::owner::{OwnerId, OwnerWatch};
use crate::transport::{ExecuteOptions, Transport};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
	/// Idle time after which sessions and handles expire. `None` disables expiry.
	pub session_ttl: Option<Duration>,
	pub sweep_interval: Duration,
	pub release_timeout: Duration,
}

impl Default for MonitorConfig {
	fn default() -> Self {
		Self {
			session_ttl: None,
			sweep_interval: DEFAULT_SWEEP_INTERVAL,
			release_timeout: DEFAULT_RELEASE_TIMEOUT,
		}
	}
}

/// Lifecycle transitions, published for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
	Registered { session_id: String, owner: OwnerId },
	OwnerDown { session_id: String, owner: OwnerId },
	Unregistered { session_id: String },
	SessionExpired { session_id: String },
	HandleExpired { session_id: String, id: String },
	/// A remote release completed. `handle` is `None` for a whole-session release.
	Released { session_id: String, handle: Option<String> },
	ReleaseFailed { session_id: String, handle: Option<String>, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
	Registered,
	/// Same owner registered this session before.
	AlreadyRegistered,
	/// Another owner holds the session; the first registration stands.
	OwnedByOther(OwnerId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
	pub session_id: String,
	pub owner: OwnerId,
	pub registered_at: Instant,
	pub last_touched: Instant,
	pub tracked_handles: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
	pub expired_sessions: Vec<String>,
	/// `(session_id, handle id)` pairs.
	pub expired_handles: Vec<(String, String)>,
}

enum Command {
	Register { session_id: String, watch: OwnerWatch, reply: oneshot::Sender<Registration> },
	Unregister { session_id: String, reply: oneshot::Sender<bool> },
	OwnerDown { session_id: String, owner: OwnerId },
	Touch { session_id: String },
	TrackHandles { session_id: String, ids: Vec<String> },
	ForgetHandle { session_id: String, id: String },
	Lookup { session_id: String, reply: oneshot::Sender<Option<SessionInfo>> },
	Snapshot { reply: oneshot::Sender<Vec<SessionInfo>> },
	Sweep { reply: oneshot::Sender<SweepReport> },
}

/// Handle to the lifecycle coordinator.
///
/// The coordinator stops once every clone of this handle is dropped.
#[derive(Clone)]
pub struct LifecycleMonitor {
	tx: mpsc::UnboundedSender<Command>,
	live: Arc<RwLock<HashSet<String>>>,
	events: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleMonitor {
	/// Spawns the coordinator on the current tokio runtime.
	pub fn start(transport: Arc<dyn Transport>, config: MonitorConfig) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let live = Arc::new(RwLock::new(HashSet::new()));
		let (events, _) = broadcast::channel(EVENT_CAPACITY);

		let coordinator = Coordinator {
			rx,
			mailbox: tx.downgrade(),
			entries: HashMap::new(),
			live: Arc::clone(&live),
			events: events.clone(),
			transport,
			config,
		};
		tokio::spawn(coordinator.run());

		Self { tx, live, events }
	}

	fn send(&self, command: Command) -> Result<()> {
		self.tx.send(command).map_err(|_| MonitorError::Closed)
	}

	async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
		let (reply, rx) = oneshot::channel();
		self.send(command(reply))?;
		rx.await.map_err(|_| MonitorError::Closed)
	}

	/// Ties `session_id` to the owner behind `watch`.
	pub async fn register(&self, session_id: impl Into<String>, watch: OwnerWatch) -> Result<Registration> {
		let session_id = session_id.into();
		self.request(|reply| Command::Register { session_id, watch, reply }).await
	}

	/// Drops the entry without a remote release. Returns whether it existed.
	pub async fn unregister(&self, session_id: &str) -> Result<bool> {
		let session_id = session_id.to_string();
		self.request(|reply| Command::Unregister { session_id, reply }).await
	}

	pub fn touch(&self, session_id: &str) -> Result<()> {
		self.send(Command::Touch {
			session_id: session_id.to_string(),
		})
	}

	/// Records (or refreshes) handles for TTL expiry. A no-op when no TTL is set.
	pub fn track_handles(&self, session_id: &str, ids: Vec<String>) -> Result<()> {
		if ids.is_empty() {
			return Ok(());
		}
		self.send(Command::TrackHandles {
			session_id: session_id.to_string(),
			ids,
		})
	}

	pub fn forget_handle(&self, session_id: &str, id: &str) -> Result<()> {
		self.send(Command::ForgetHandle {
			session_id: session_id.to_string(),
			id: id.to_string(),
		})
	}

	pub async fn lookup(&self, session_id: &str) -> Result<Option<SessionInfo>> {
		let session_id = session_id.to_string();
		self.request(|reply| Command::Lookup { session_id, reply }).await
	}

	pub async fn snapshot(&self) -> Result<Vec<SessionInfo>> {
		self.request(|reply| Command::Snapshot { reply }).await
	}

	/// Runs an expiry pass now instead of waiting for the next interval.
	pub async fn sweep(&self) -> Result<SweepReport> {
		self.request(|reply| Command::Sweep { reply }).await
	}

	/// Reads the published view; no round trip to the coordinator.
	pub fn is_registered(&self, session_id: &str) -> bool {
		self.live.read().contains(session_id)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
		self.events.subscribe()
	}
}

impl fmt::Debug for LifecycleMonitor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LifecycleMonitor").field("live", &self.live.read().len()).field("closed", &self.tx.is_closed()).finish()
	}
}

struct Entry {
	owner: OwnerId,
	watcher: AbortHandle,
	registered_at: Instant,
	last_touched: Instant,
	handles: HashMap<String, Instant>,
}

struct Coordinator {
	rx: mpsc::UnboundedReceiver<Command>,
	mailbox: mpsc::WeakUnboundedSender<Command>,
	entries: HashMap<String, Entry>,
	live: Arc<RwLock<HashSet<String>>>,
	events: broadcast::Sender<LifecycleEvent>,
	transport: Arc<dyn Transport>,
	config: MonitorConfig,
}

impl Coordinator {
	async fn run(mut self) {
		let mut sweeper = self.config.session_ttl.map(|_| {
			let period = self.config.sweep_interval;
			let mut interval = tokio::time::interval_at(Instant::now() + period, period);
			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
			interval
		});

		loop {
			tokio::select! {
				command = self.rx.recv() => match command {
					Some(command) => self.handle(command),
					None => break,
				},
				_ = next_sweep(&mut sweeper) => {
					self.sweep();
				}
			}
		}

		for entry in self.entries.values() {
			entry.watcher.abort();
		}
		debug!(target = "snakebridge.lifecycle", sessions = self.entries.len(), "lifecycle monitor stopped");
	}

	fn handle(&mut self, command: Command) {
		match command {
			Command::Register { session_id, watch, reply } => {
				let outcome = match self.entries.get(&session_id) {
					Some(entry) if entry.owner == watch.owner() => Registration::AlreadyRegistered,
					Some(entry) => Registration::OwnedByOther(entry.owner),
					None => {
						self.insert(session_id, watch);
						Registration::Registered
					}
				};
				let _ = reply.send(outcome);
			}
			Command::Unregister { session_id, reply } => {
				let found = self.remove(&session_id).is_some();
				if found {
					debug!(target = "snakebridge.lifecycle", session_id = %session_id, "session unregistered");
					self.emit(LifecycleEvent::Unregistered { session_id });
				}
				let _ = reply.send(found);
			}
			Command::OwnerDown { session_id, owner } => self.owner_down(session_id, owner),
			Command::Touch { session_id } => {
				if let Some(entry) = self.entries.get_mut(&session_id) {
					entry.last_touched = Instant::now();
				}
			}
			Command::TrackHandles { session_id, ids } => {
				let track = self.config.session_ttl.is_some();
				if let Some(entry) = self.entries.get_mut(&session_id) {
					let now = Instant::now();
					entry.last_touched = now;
					if track {
						entry.handles.extend(ids.into_iter().map(|id| (id, now)));
					}
				}
			}
			Command::ForgetHandle { session_id, id } => {
				if let Some(entry) = self.entries.get_mut(&session_id) {
					entry.handles.remove(&id);
				}
			}
			Command::Lookup { session_id, reply } => {
				let info = self.entries.get(&session_id).map(|entry| session_info(&session_id, entry));
				let _ = reply.send(info);
			}
			Command::Snapshot { reply } => {
				let mut sessions: Vec<_> = self.entries.iter().map(|(id, entry)| session_info(id, entry)).collect();
				sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
				let _ = reply.send(sessions);
			}
			Command::Sweep { reply } => {
				let report = self.sweep();
				let _ = reply.send(report);
			}
		}
	}

	fn insert(&mut self, session_id: String, watch: OwnerWatch) {
		let owner = watch.owner();
		let mailbox = self.mailbox.clone();
		let watched = session_id.clone();
		let watcher = tokio::spawn(async move {
			watch.terminated().await;
			if let Some(tx) = mailbox.upgrade() {
				let _ = tx.send(Command::OwnerDown { session_id: watched, owner });
			}
		})
		.abort_handle();

		let now = Instant::now();
		self.entries.insert(
			session_id.clone(),
			Entry {
				owner,
				watcher,
				registered_at: now,
				last_touched: now,
				handles: HashMap::new(),
			},
		);
		self.live.write().insert(session_id.clone());

		debug!(target = "snakebridge.lifecycle", session_id = %session_id, owner = %owner, "session registered");
		self.emit(LifecycleEvent::Registered { session_id, owner });
	}

	fn remove(&mut self, session_id: &str) -> Option<Entry> {
		let entry = self.entries.remove(session_id)?;
		entry.watcher.abort();
		self.live.write().remove(session_id);
		Some(entry)
	}

	fn owner_down(&mut self, session_id: String, owner: OwnerId) {
		// A stale notice from an earlier registration of the same id is ignored.
		if self.entries.get(&session_id).map(|entry| entry.owner) != Some(owner) {
			return;
		}
		let _ = self.remove(&session_id);

		info!(target = "snakebridge.lifecycle", session_id = %session_id, owner = %owner, "owner terminated, releasing session");
		self.emit(LifecycleEvent::OwnerDown {
			session_id: session_id.clone(),
			owner,
		});
		self.release_session(session_id);
	}

	fn sweep(&mut self) -> SweepReport {
		let Some(ttl) = self.config.session_ttl else {
			return SweepReport::default();
		};
		let now = Instant::now();

		let mut expired_sessions: Vec<String> = self
			.entries
			.iter()
			.filter(|(_, entry)| now.duration_since(entry.last_touched) > ttl)
			.map(|(id, _)| id.clone())
			.collect();
		expired_sessions.sort();

		for session_id in &expired_sessions {
			let _ = self.remove(session_id);
			info!(target = "snakebridge.lifecycle", session_id = %session_id, ?ttl, "session expired");
			self.emit(LifecycleEvent::SessionExpired {
				session_id: session_id.clone(),
			});
			self.release_session(session_id.clone());
		}

		let mut expired_handles = Vec::new();
		for (session_id, entry) in &mut self.entries {
			entry.handles.retain(|id, touched| {
				let stale = now.duration_since(*touched) > ttl;
				if stale {
					expired_handles.push((session_id.clone(), id.clone()));
				}
				!stale
			});
		}
		expired_handles.sort();

		for (session_id, id) in &expired_handles {
			debug!(target = "snakebridge.lifecycle", session_id = %session_id, handle = %id, "handle expired");
			self.emit(LifecycleEvent::HandleExpired {
				session_id: session_id.clone(),
				id: id.clone(),
			});
			self.release_handle(session_id.clone(), id.clone());
		}

		SweepReport { expired_sessions, expired_handles }
	}

	fn release_session(&self, session_id: String) {
		let payload = CallPayload::new(CallType::ReleaseSession, session_id.clone());
		self.spawn_release(routes::RELEASE_SESSION, payload, session_id, None);
	}

	fn release_handle(&self, session_id: String, id: String) {
		let address = Handle::new(id.clone(), session_id.clone()).to_wire();
		let payload = CallPayload::new(CallType::ReleaseRef, session_id.clone()).reference(address);
		self.spawn_release(routes::RELEASE_REF, payload, session_id, Some(id));
	}

	fn spawn_release(&self, route: &'static str, payload: CallPayload, session_id: String, handle: Option<String>) {
		let transport = Arc::clone(&self.transport);
		let events = self.events.clone();
		let timeout = self.config.release_timeout;

		tokio::spawn(async move {
			let opts = ExecuteOptions::new(session_id.clone()).with_timeout(Some(timeout));
			let outcome = match payload.to_wire() {
				Ok(wire) => match tokio::time::timeout(timeout, transport.execute(route, wire, &opts)).await {
					Ok(Ok(_)) => Ok(()),
					Ok(Err(err)) => Err(err.to_string()),
					Err(_) => Err(format!("timed out after {timeout:?}")),
				},
				Err(err) => Err(err.to_string()),
			};

			match outcome {
				Ok(()) => {
					debug!(target = "snakebridge.lifecycle", session_id = %session_id, route, "released");
					let _ = events.send(LifecycleEvent::Released { session_id, handle });
				}
				Err(error) => {
					warn!(target = "snakebridge.lifecycle", session_id = %session_id, route, error = %error, "best-effort release failed");
					let _ = events.send(LifecycleEvent::ReleaseFailed { session_id, handle, error });
				}
			}
		});
	}

	fn emit(&self, event: LifecycleEvent) {
		let _ = self.events.send(event);
	}
}

async fn next_sweep(sweeper: &mut Option<Interval>) {
	match sweeper {
		Some(interval) => {
			interval.tick().await;
		}
		None => std::future::pending().await,
	}
}

fn session_info(session_id: &str, entry: &Entry) -> SessionInfo {
	SessionInfo {
		session_id: session_id.to_string(),
		owner: entry.owner,
		registered_at: entry.registered_at,
		last_touched: entry.last_touched,
		tracked_handles: entry.handles.len(),
	}
}
