//! Sync execution: export building/application and the job processor

use crate::domain::SourceTable;
use crate::infrastructure::clock::ClockError;
use crate::networking::PeerError;
use thiserror::Error;

pub mod export;
pub mod worker;

pub use export::{apply_export, build_export, ApplyOutcome};
pub use worker::{SyncWorker, SyncWorkerOptions, WalletSyncOutcome};

/// Sync execution errors
#[derive(Error, Debug)]
pub enum SyncError {
	/// Peer communication failed
	#[error(transparent)]
	Peer(#[from] PeerError),

	/// Clock store failure
	#[error(transparent)]
	Clock(#[from] ClockError),

	/// Database error
	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),

	/// Peer reports an older clock than we already hold; nothing to pull
	#[error("cannot apply export at local clock {local}: export reports older clock {fetched}")]
	InconsistentClock { local: i32, fetched: i32 },

	/// Imported delta does not start right after our local history
	#[error("imported delta is not contiguous: local clock {local}, first new record at clock {first}")]
	NotContiguous { local: i32, first: i32 },

	/// Export payload disagrees with itself
	#[error("imported delta is not consistent: export reports clock {reported}, max record clock {max_record}")]
	InconsistentExport { reported: i32, max_record: i32 },

	/// A received record collides with different local history at the same
	/// clock value. Applying it would corrupt the monotonic change log, so
	/// this is surfaced loudly and never retried blindly.
	#[error("clock ordering violation for wallet {wallet}: record at clock {clock} conflicts with local history")]
	OrderingViolation { wallet: String, clock: i32 },

	/// Export names a clock record but carries no matching content row
	#[error("export missing content row for clock {clock} ({source_table})")]
	MissingContent { clock: i32, source_table: SourceTable },

	/// A stored clock record carries an unknown source table
	#[error("clock record at {clock} for wallet {wallet} has an unrecognized source table")]
	CorruptRecord { wallet: String, clock: i32 },

	/// Peer accepted the sync request but never caught up in the window
	#[error("peer {endpoint} did not reach clock {target} within the monitoring window")]
	MonitorTimeout { endpoint: String, target: i32 },

	/// Repeated pulls stopped advancing the local clock
	#[error("pull from {endpoint} stalled at clock {clock}")]
	StalledPull { endpoint: String, clock: i32 },
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
