//! Core types for the sync job queue

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use uuid::Uuid;

/// Unique identifier for a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Current status of a sync job
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Serialize,
	Deserialize,
	strum::Display,
	strum::EnumString,
)]
pub enum JobStatus {
	/// Waiting for a worker slot
	Queued,
	/// A worker is executing the job
	Running,
	/// Every wallet in the job reconciled
	Completed,
	/// Terminal failure; the next audit cycle re-detects any divergence
	Failed,
}

impl JobStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}
}

/// One unit of queued replication work: reconcile these wallets against the
/// named peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobRequest {
	pub wallet_public_keys: Vec<String>,
	pub creator_node_endpoint: String,
	/// Wipe local state for each wallet before pulling, instead of applying
	/// the delta on top.
	#[serde(default)]
	pub force_resync: bool,
}

/// Handle returned from enqueue; the caller can observe status transitions
/// without blocking the enqueue path.
#[derive(Debug, Clone)]
pub struct JobHandle {
	pub id: JobId,
	pub status_rx: watch::Receiver<JobStatus>,
}

impl JobHandle {
	/// Current status snapshot.
	pub fn status(&self) -> JobStatus {
		*self.status_rx.borrow()
	}

	/// Wait until the job reaches a terminal status.
	pub async fn wait(mut self) -> JobStatus {
		loop {
			let status = *self.status_rx.borrow();
			if status.is_terminal() {
				return status;
			}
			if self.status_rx.changed().await.is_err() {
				// Sender dropped; last observed value is all we have
				return *self.status_rx.borrow();
			}
		}
	}
}
