//! Scoped session context.
//!
//! A task-local stack of session ids. [`with_session`] pushes a frame for the duration
//! of a future and pops it on every exit path, including errors, panics and
//! cancellation, since the frame lives in the future itself. The innermost frame
//! wins.
//!
//! Context does not cross `tokio::spawn`; wrap the spawned future in [`inherit`] to
//! carry the current frames along.

use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
	static SESSION_STACK: Arc<Vec<String>>;
}

fn frames() -> Arc<Vec<String>> {
	SESSION_STACK.try_with(Arc::clone).unwrap_or_default()
}

fn pushed(session_id: String) -> Arc<Vec<String>> {
	let mut stack = Vec::clone(&frames());
	stack.push(session_id);
	Arc::new(stack)
}

/// Runs `fut` with `session_id` as the innermost context frame.
pub async fn with_session<F: Future>(session_id: impl Into<String>, fut: F) -> F::Output {
	SESSION_STACK.scope(pushed(session_id.into()), fut).await
}

/// Synchronous counterpart of [`with_session`].
pub fn sync_with_session<R>(session_id: impl Into<String>, f: impl FnOnce() -> R) -> R {
	SESSION_STACK.sync_scope(pushed(session_id.into()), f)
}

/// Innermost non-empty session id, if any frame is active.
pub fn current_session() -> Option<String> {
	frames().iter().rev().find(|id| !id.is_empty()).cloned()
}

/// Number of active frames.
pub fn depth() -> usize {
	frames().len()
}

/// Carries the caller's context frames into `fut`, typically before spawning it.
pub fn inherit<F: Future>(fut: F) -> impl Future<Output = F::Output> {
	SESSION_STACK.scope(frames(), fut)
}
