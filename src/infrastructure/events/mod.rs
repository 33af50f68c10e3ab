//! Event bus for decoupled communication

use tokio::sync::broadcast;
use uuid::Uuid;

/// Sync-engine events
#[derive(Debug, Clone)]
pub enum Event {
	/// Core has started
	CoreStarted,

	/// Core is shutting down
	CoreShutdown,

	/// A sync job was persisted and handed to the dispatcher
	SyncJobEnqueued {
		job_id: Uuid,
		target_endpoint: String,
		wallet_count: usize,
	},

	/// A sync job finished with every wallet reconciled
	SyncJobCompleted {
		job_id: Uuid,
		target_endpoint: String,
	},

	/// A sync job hit a terminal failure
	SyncJobFailed {
		job_id: Uuid,
		target_endpoint: String,
		error: String,
	},

	/// One audit cycle of the state machine finished
	AuditCycleCompleted {
		users_examined: usize,
		syncs_enqueued: usize,
	},
}

/// Event bus for broadcasting events
pub struct EventBus {
	sender: broadcast::Sender<Event>,
}

impl EventBus {
	/// Create a new event bus with specified capacity
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Emit an event
	pub fn emit(&self, event: Event) {
		// Ignore send errors (no receivers)
		let _ = self.sender.send(event);
	}

	/// Subscribe to events
	pub fn subscribe(&self) -> broadcast::Receiver<Event> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}
