use thiserror::Error;

use crate::models::JobStatus;

/// Errors surfaced to callers of the dispatcher.
#[derive(Debug, Error)]
pub enum TransferError {
	#[error("validation failed: {0}")]
	Validation(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("unsupported provider: {0}")]
	UnsupportedProvider(String),

	#[error(transparent)]
	Provider(#[from] ProviderError),

	#[error("persistence error: {0}")]
	Persistence(#[from] PersistenceError),
}

/// A failure inside a storage backend. The message is kept verbatim so it can
/// be recorded on the failed job as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
	#[error("{0}")]
	NotFound(String),

	#[error("{0}")]
	Auth(String),

	#[error("{0}")]
	Io(String),

	#[error("{0}")]
	Other(String),
}

impl ProviderError {
	pub fn other(msg: impl Into<String>) -> Self {
		ProviderError::Other(msg.into())
	}
}

impl From<std::io::Error> for ProviderError {
	fn from(err: std::io::Error) -> Self {
		match err.kind() {
			std::io::ErrorKind::NotFound => ProviderError::NotFound(err.to_string()),
			std::io::ErrorKind::PermissionDenied => ProviderError::Auth(err.to_string()),
			_ => ProviderError::Io(err.to_string()),
		}
	}
}

/// Errors from the durable job store. The engine logs and swallows these.
#[derive(Debug, Error)]
pub enum PersistenceError {
	#[error("database error: {0}")]
	Database(String),

	#[error("failed to decode record: {0}")]
	Decode(String),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
	pub from: JobStatus,
	pub to: JobStatus,
}
