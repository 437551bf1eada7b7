//! Ownership of sessions.
//!
//! An [`Owner`] is the host-side unit that sessions belong to. Work started with
//! [`spawn`] (or wrapped in [`Owner::scope`]) runs under its own owner. A plain tokio
//! task gets an owner keyed by its task id, kept until [`detach`] is called from that
//! task. Code outside any task falls back to a per-thread owner. An owner terminates
//! when its last `Arc` is dropped, which is what [`OwnerWatch::terminated`] observes.
//!
//! Each owner lazily creates one [`AutoSession`], the session used when a call names
//! none and no context is active.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// Owners of tokio tasks that run without an owner scope. Task ids are never reused.
static TASK_OWNERS: LazyLock<Mutex<HashMap<task::Id, Arc<Owner>>>> = LazyLock::new(Default::default);

tokio::task_local! {
	static CURRENT_OWNER: Arc<Owner>;
}

thread_local! {
	static THREAD_OWNER: Arc<Owner> = Owner::new();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for OwnerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "owner-{}", self.0)
	}
}

#[derive(Debug)]
pub struct Owner {
	id: OwnerId,
	alive: watch::Sender<()>,
	auto: OnceLock<AutoSession>,
}

impl Owner {
	pub fn new() -> Arc<Self> {
		let (alive, _) = watch::channel(());
		Arc::new(Self {
			id: OwnerId(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed)),
			alive,
			auto: OnceLock::new(),
		})
	}

	/// Owner of the calling code: the enclosing owner scope, else the current tokio
	/// task, else the current thread.
	pub fn current() -> Arc<Self> {
		if let Ok(owner) = CURRENT_OWNER.try_with(Arc::clone) {
			return owner;
		}
		match task::try_id() {
			Some(id) => Arc::clone(TASK_OWNERS.lock().entry(id).or_insert_with(Owner::new)),
			None => THREAD_OWNER.with(Arc::clone),
		}
	}

	pub fn id(&self) -> OwnerId {
		self.id
	}

	pub fn watch(&self) -> OwnerWatch {
		OwnerWatch {
			owner: self.id,
			rx: self.alive.subscribe(),
		}
	}

	/// This owner's auto-session, created on first use.
	pub fn auto_session(&self) -> &AutoSession {
		self.auto.get_or_init(|| AutoSession::new(self.id))
	}

	/// Runs `fut` with this owner as [`Owner::current`].
	pub async fn scope<F: Future>(self: Arc<Self>, fut: F) -> F::Output {
		CURRENT_OWNER.scope(self, fut).await
	}
}

/// Spawns `fut` on the tokio runtime under a fresh owner.
///
/// The owner terminates when the task finishes, is aborted, or panics.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tokio::spawn(Owner::new().scope(fut))
}

/// Drops the owner bound to the calling unscoped task.
///
/// The owner terminates once nothing else holds it, which releases its auto-session.
/// Returns `false` when the caller runs under an owner scope or outside any task.
pub fn detach() -> bool {
	if CURRENT_OWNER.try_with(|_| ()).is_ok() {
		return false;
	}
	let Some(id) = task::try_id() else {
		return false;
	};
	TASK_OWNERS.lock().remove(&id).is_some()
}

/// Observes an owner's termination without keeping it alive.
#[derive(Debug, Clone)]
pub struct OwnerWatch {
	owner: OwnerId,
	rx: watch::Receiver<()>,
}

impl OwnerWatch {
	pub fn owner(&self) -> OwnerId {
		self.owner
	}

	pub fn is_terminated(&self) -> bool {
		self.rx.has_changed().is_err()
	}

	/// Resolves once the owner has been dropped.
	pub async fn terminated(mut self) {
		while self.rx.changed().await.is_ok() {}
	}
}

/// Session created implicitly for an owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSession {
	session_id: String,
	owner: OwnerId,
	created_at: SystemTime,
}

impl AutoSession {
	fn new(owner: OwnerId) -> Self {
		let created_at = SystemTime::now();
		let nanos = created_at.duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
		Self {
			session_id: format!("auto_{}_{}_{}", std::process::id(), owner.get(), nanos),
			owner,
			created_at,
		}
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn owner(&self) -> OwnerId {
		self.owner
	}

	pub fn created_at(&self) -> SystemTime {
		self.created_at
	}
}
