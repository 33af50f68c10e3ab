//! Queue error types

use thiserror::Error;

/// Sync queue errors
#[derive(Error, Debug)]
pub enum QueueError {
	/// Job request failed validation before enqueue
	#[error("invalid sync request: {0}")]
	InvalidRequest(String),

	/// Database error
	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),

	/// Job payload could not be serialized for the durable store
	#[error("payload serialization error: {0}")]
	Serialization(#[from] rmp_serde::encode::Error),

	/// Persisted payload could not be decoded
	#[error("payload decode error: {0}")]
	Decode(#[from] rmp_serde::decode::Error),

	/// Queue dispatcher is no longer accepting jobs
	#[error("queue is shut down")]
	ShutDown,
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
