//! Session plumbing for SnakeBridge.
//!
//! Sits between the wire types in `snakebridge-protocol` and the dispatcher in
//! `snakebridge`:
//!
//! * [`transport`]: the contract a worker-pool transport implements
//! * [`owner`]: owners and their auto-sessions
//! * [`context`]: scoped session context
//! * [`resolver`]: picking the session for a call
//! * [`monitor`]: session lifecycle, cleanup on owner termination and TTL expiry
//! * [`fake_transport`]: in-memory transport for tests

pub mod context;
pub mod error;
pub mod fake_transport;
pub mod monitor;
pub mod owner;
pub mod resolver;
pub mod transport;

pub use error::{MonitorError, Result};
pub use monitor::{LifecycleEvent, LifecycleMonitor, MonitorConfig, Registration, SessionInfo, SweepReport};
pub use owner::{AutoSession, Owner, OwnerId, OwnerWatch};
pub use resolver::{Resolved, SessionInputs, SessionSource, resolve};
pub use transport::{ChunkFlow, ExecuteOptions, Transport, TransportError};
