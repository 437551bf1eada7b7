use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
	#[error("lifecycle monitor is closed")]
	Closed,
}

pub type Result<T> = std::result::Result<T, MonitorError>;
