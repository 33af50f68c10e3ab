//! Content-node replication and sync-state-machine core
//!
//! A clock-based, replica-set-aware reconciliation engine: every content
//! mutation advances a per-user monotonic clock, a periodic coordinator
//! audits peers for divergence, and a durable bounded queue executes the
//! resulting sync work off the request path.

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod networking;
pub mod services;

use crate::config::NodeConfig;
use crate::infrastructure::clock::{ClockResult, ClockStore};
use crate::infrastructure::database::Database;
use crate::infrastructure::events::{Event, EventBus};
use crate::infrastructure::queue::{
	JobHandle, QueueError, QueueResult, SyncJobQueue, SyncJobRequest,
};
use crate::networking::{PeerClient, UserExport};
use crate::services::coordinator::{ReplicaSetProvider, StateMachineCoordinator};
use crate::services::sync::{build_export, SyncResult, SyncWorker};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Core startup errors
#[derive(Error, Debug)]
pub enum CoreError {
	#[error("configuration error: {0}")]
	Config(#[from] anyhow::Error),

	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),

	#[error("queue error: {0}")]
	Queue(#[from] QueueError),
}

/// The assembled sync engine. Every collaborator is constructed here and
/// passed in explicitly; the peer client and replica-set provider are
/// injected so request handlers and tests can share the same wiring.
pub struct SyncCore {
	pub config: NodeConfig,
	pub database: Arc<Database>,
	pub clock_store: Arc<ClockStore>,
	pub events: Arc<EventBus>,
	pub queue: Arc<SyncJobQueue>,
	pub coordinator: Arc<StateMachineCoordinator>,
}

impl SyncCore {
	pub async fn new(
		config: NodeConfig,
		peer: Arc<dyn PeerClient>,
		provider: Arc<dyn ReplicaSetProvider>,
	) -> Result<Self, CoreError> {
		config.ensure_directories()?;

		let db_path = config.db_path();
		let database = if db_path.exists() {
			Database::open(&db_path).await?
		} else {
			Database::create(&db_path).await?
		};
		database.migrate().await?;
		let database = Arc::new(database);

		let clock_store = Arc::new(ClockStore::new(database.clone()));
		let events = Arc::new(EventBus::default());

		let worker = Arc::new(SyncWorker::new(
			database.clone(),
			clock_store.clone(),
			peer.clone(),
			config.worker_options(),
		));
		let queue = Arc::new(SyncJobQueue::new(
			database.clone(),
			worker,
			events.clone(),
			config.queue_options(),
		));
		let coordinator = Arc::new(StateMachineCoordinator::new(
			clock_store.clone(),
			queue.clone(),
			peer,
			provider,
			events.clone(),
			config.coordinator_options(),
		));

		Ok(Self {
			config,
			database,
			clock_store,
			events,
			queue,
			coordinator,
		})
	}

	/// Start background processing: the queue dispatcher (which also
	/// re-dispatches jobs interrupted by a restart) and the audit loop.
	pub async fn start(&self) -> Result<(), CoreError> {
		self.queue.start().await?;
		self.coordinator.clone().start().await;
		self.events.emit(Event::CoreStarted);
		info!(endpoint = %self.config.endpoint, "sync core started");
		Ok(())
	}

	/// Stop the audit loop and the queue dispatcher. In-flight jobs run to
	/// completion.
	pub async fn shutdown(&self) {
		self.coordinator.stop().await;
		self.queue.shutdown();
		self.events.emit(Event::CoreShutdown);
		info!("sync core shut down");
	}

	/// Schedule reconciliation of `wallets` against a peer without blocking
	/// the caller. This is the entry point request handlers use when a peer
	/// posts a sync request to this node.
	pub async fn enqueue_sync(
		&self,
		wallet_public_keys: Vec<String>,
		creator_node_endpoint: String,
	) -> QueueResult<JobHandle> {
		self.queue
			.enqueue_sync(SyncJobRequest {
				wallet_public_keys,
				creator_node_endpoint,
				force_resync: false,
			})
			.await
	}

	/// Current clock value for a wallet, for status/health surfaces.
	pub async fn clock_status(&self, wallet: &str) -> ClockResult<i32> {
		self.clock_store.get_clock(wallet).await
	}

	/// Serve a range-limited export for a wallet, as peers request when
	/// pulling from this node.
	pub async fn export(
		&self,
		wallet: &str,
		clock_range_min: i32,
	) -> SyncResult<Option<UserExport>> {
		build_export(
			&self.database,
			&self.clock_store,
			wallet,
			clock_range_min,
			self.config.max_export_clock_range,
		)
		.await
	}
}

/// Install the global tracing subscriber honoring `RUST_LOG`, falling back
/// to the configured level.
pub fn init_tracing(log_level: &str) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
	let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
