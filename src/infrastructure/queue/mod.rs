//! SyncJobQueue: durable, concurrency-bounded queue for sync work
//!
//! Jobs are persisted to the `sync_jobs` table before dispatch, so an
//! enqueued job survives a process restart; rows left queued or running at
//! startup are re-dispatched (at-least-once delivery — the processor is
//! idempotent). A semaphore bounds how many jobs run at once. By default
//! rows are removed on both success and terminal failure: the queue bounds
//! its own size instead of keeping history, and retries happen implicitly
//! when the next audit cycle re-detects the divergence.

use crate::infrastructure::database::{entities, Database};
use crate::infrastructure::events::{Event, EventBus};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
	ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub mod error;
pub mod types;

pub use error::{QueueError, QueueResult};
pub use types::{JobHandle, JobId, JobStatus, SyncJobRequest};

/// Queue tuning knobs, split out of [`crate::config::NodeConfig`]
#[derive(Debug, Clone)]
pub struct QueueOptions {
	/// Maximum jobs executing at any instant
	pub concurrency: usize,
	/// Drop the durable row once a job completes
	pub remove_on_complete: bool,
	/// Drop the durable row once a job fails terminally
	pub remove_on_fail: bool,
}

impl Default for QueueOptions {
	fn default() -> Self {
		Self {
			concurrency: 10,
			remove_on_complete: true,
			remove_on_fail: true,
		}
	}
}

/// Statically registered job processor. The queue never resolves a processor
/// at runtime; the implementation is injected at construction.
#[async_trait]
pub trait SyncProcessor: Send + Sync {
	async fn process(&self, job_id: JobId, request: &SyncJobRequest) -> anyhow::Result<()>;
}

/// Durable sync-job queue with a bounded worker pool.
pub struct SyncJobQueue {
	db: Arc<Database>,
	processor: Arc<dyn SyncProcessor>,
	events: Arc<EventBus>,
	options: QueueOptions,
	job_tx: mpsc::UnboundedSender<JobId>,
	job_rx: Mutex<Option<mpsc::UnboundedReceiver<JobId>>>,
	semaphore: Arc<Semaphore>,
	statuses: Arc<RwLock<HashMap<JobId, watch::Sender<JobStatus>>>>,
	shutdown_tx: watch::Sender<bool>,
}

impl SyncJobQueue {
	pub fn new(
		db: Arc<Database>,
		processor: Arc<dyn SyncProcessor>,
		events: Arc<EventBus>,
		options: QueueOptions,
	) -> Self {
		let (job_tx, job_rx) = mpsc::unbounded_channel();
		let (shutdown_tx, _) = watch::channel(false);
		let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));

		Self {
			db,
			processor,
			events,
			options,
			job_tx,
			job_rx: Mutex::new(Some(job_rx)),
			semaphore,
			statuses: Arc::new(RwLock::new(HashMap::new())),
			shutdown_tx,
		}
	}

	/// Persist a sync request and hand it to the dispatcher. Returns
	/// immediately; execution happens on the worker pool.
	pub async fn enqueue_sync(&self, request: SyncJobRequest) -> QueueResult<JobHandle> {
		if request.wallet_public_keys.is_empty() {
			return Err(QueueError::InvalidRequest("no wallets in request".into()));
		}
		if request.creator_node_endpoint.is_empty() {
			return Err(QueueError::InvalidRequest("empty target endpoint".into()));
		}

		let job_id = JobId::new();
		let payload = rmp_serde::to_vec(&request)?;

		entities::sync_job::ActiveModel {
			id: Set(job_id.to_string()),
			target_endpoint: Set(request.creator_node_endpoint.clone()),
			payload: Set(payload),
			status: Set(JobStatus::Queued.to_string()),
			created_at: Set(Utc::now()),
			started_at: Set(None),
			completed_at: Set(None),
			error_message: Set(None),
		}
		.insert(self.db.conn())
		.await?;

		let handle = self.register_status(job_id).await;

		self.job_tx.send(job_id).map_err(|_| QueueError::ShutDown)?;

		debug!(%job_id, endpoint = %request.creator_node_endpoint, wallets = request.wallet_public_keys.len(), "enqueued sync job");
		self.events.emit(Event::SyncJobEnqueued {
			job_id: job_id.0,
			target_endpoint: request.creator_node_endpoint.clone(),
			wallet_count: request.wallet_public_keys.len(),
		});

		Ok(handle)
	}

	/// Start the dispatcher: re-dispatch interrupted jobs, then pull new job
	/// ids and run them on the bounded pool.
	pub async fn start(&self) -> QueueResult<()> {
		let Some(mut job_rx) = self.job_rx.lock().await.take() else {
			warn!("sync job queue already started");
			return Ok(());
		};

		self.resume_interrupted().await?;

		let db = self.db.clone();
		let processor = self.processor.clone();
		let events = self.events.clone();
		let options = self.options.clone();
		let semaphore = self.semaphore.clone();
		let statuses = self.statuses.clone();
		let mut shutdown_rx = self.shutdown_tx.subscribe();

		tokio::spawn(async move {
			info!(concurrency = options.concurrency, "sync job dispatcher started");
			loop {
				tokio::select! {
					_ = shutdown_rx.changed() => {
						if *shutdown_rx.borrow() {
							break;
						}
					}
					next = job_rx.recv() => {
						let Some(job_id) = next else { break };
						let Ok(permit) = semaphore.clone().acquire_owned().await else {
							break;
						};

						let db = db.clone();
						let processor = processor.clone();
						let events = events.clone();
						let options = options.clone();
						let statuses = statuses.clone();
						tokio::spawn(async move {
							run_job(db, processor, events, options, statuses, job_id).await;
							drop(permit);
						});
					}
				}
			}
			info!("sync job dispatcher stopped");
		});

		Ok(())
	}

	/// Stop pulling new jobs. Jobs already holding a permit run to
	/// completion or failure.
	pub fn shutdown(&self) {
		let _ = self.shutdown_tx.send(true);
	}

	/// Status of a job: live watch value if the job is in flight, durable
	/// row otherwise. `None` when the row was already removed.
	pub async fn job_status(&self, job_id: JobId) -> QueueResult<Option<JobStatus>> {
		if let Some(tx) = self.statuses.read().await.get(&job_id) {
			return Ok(Some(*tx.borrow()));
		}

		let row = entities::SyncJob::find_by_id(job_id.to_string())
			.one(self.db.conn())
			.await?;

		Ok(row.and_then(|job| JobStatus::from_str(&job.status).ok()))
	}

	async fn register_status(&self, job_id: JobId) -> JobHandle {
		let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
		self.statuses.write().await.insert(job_id, status_tx);
		JobHandle { id: job_id, status_rx }
	}

	/// Re-dispatch rows left queued or running by a previous process. A job
	/// interrupted mid-run is delivered again, which is safe because the
	/// processor treats already-applied clock records as no-ops.
	async fn resume_interrupted(&self) -> QueueResult<()> {
		let interrupted = entities::SyncJob::find()
			.filter(entities::sync_job::Column::Status.is_in([
				JobStatus::Queued.to_string(),
				JobStatus::Running.to_string(),
			]))
			.order_by_asc(entities::sync_job::Column::CreatedAt)
			.all(self.db.conn())
			.await?;

		for row in interrupted {
			let Ok(uuid) = Uuid::parse_str(&row.id) else {
				warn!(id = %row.id, "dropping sync job with malformed id");
				continue;
			};
			let job_id = JobId(uuid);
			info!(%job_id, endpoint = %row.target_endpoint, "re-dispatching interrupted sync job");
			self.register_status(job_id).await;
			self.job_tx.send(job_id).map_err(|_| QueueError::ShutDown)?;
		}

		Ok(())
	}
}

async fn run_job(
	db: Arc<Database>,
	processor: Arc<dyn SyncProcessor>,
	events: Arc<EventBus>,
	options: QueueOptions,
	statuses: Arc<RwLock<HashMap<JobId, watch::Sender<JobStatus>>>>,
	job_id: JobId,
) {
	let set_status = |status: JobStatus| {
		let statuses = statuses.clone();
		async move {
			if let Some(tx) = statuses.read().await.get(&job_id) {
				let _ = tx.send(status);
			}
		}
	};

	let row = match entities::SyncJob::find_by_id(job_id.to_string())
		.one(db.conn())
		.await
	{
		Ok(Some(row)) => row,
		Ok(None) => {
			warn!(%job_id, "sync job row disappeared before execution");
			statuses.write().await.remove(&job_id);
			return;
		}
		Err(e) => {
			error!(%job_id, "failed to load sync job: {e}");
			statuses.write().await.remove(&job_id);
			return;
		}
	};

	let request: SyncJobRequest = match rmp_serde::from_slice(&row.payload) {
		Ok(request) => request,
		Err(e) => {
			error!(%job_id, "undecodable sync job payload, removing: {e}");
			let _ = entities::SyncJob::delete_by_id(job_id.to_string())
				.exec(db.conn())
				.await;
			statuses.write().await.remove(&job_id);
			return;
		}
	};

	if let Err(e) = mark_running(&db, &row).await {
		error!(%job_id, "failed to mark sync job running: {e}");
	}
	set_status(JobStatus::Running).await;

	let target_endpoint = request.creator_node_endpoint.clone();
	match processor.process(job_id, &request).await {
		Ok(()) => {
			debug!(%job_id, endpoint = %target_endpoint, "sync job completed");
			if let Err(e) = finish_job(&db, job_id, JobStatus::Completed, None, options.remove_on_complete).await {
				error!(%job_id, "failed to finalize completed job: {e}");
			}
			set_status(JobStatus::Completed).await;
			events.emit(Event::SyncJobCompleted {
				job_id: job_id.0,
				target_endpoint,
			});
		}
		Err(e) => {
			error!(%job_id, endpoint = %target_endpoint, "sync job failed: {e:#}");
			if let Err(e2) = finish_job(&db, job_id, JobStatus::Failed, Some(format!("{e:#}")), options.remove_on_fail).await {
				error!(%job_id, "failed to finalize failed job: {e2}");
			}
			set_status(JobStatus::Failed).await;
			events.emit(Event::SyncJobFailed {
				job_id: job_id.0,
				target_endpoint,
				error: format!("{e:#}"),
			});
		}
	}

	statuses.write().await.remove(&job_id);
}

async fn mark_running(
	db: &Database,
	row: &entities::sync_job::Model,
) -> Result<(), sea_orm::DbErr> {
	let mut active: entities::sync_job::ActiveModel = row.clone().into();
	active.status = Set(JobStatus::Running.to_string());
	active.started_at = Set(Some(Utc::now()));
	active.update(db.conn()).await?;
	Ok(())
}

async fn finish_job(
	db: &Database,
	job_id: JobId,
	status: JobStatus,
	error_message: Option<String>,
	remove: bool,
) -> Result<(), sea_orm::DbErr> {
	if remove {
		entities::SyncJob::delete_by_id(job_id.to_string())
			.exec(db.conn())
			.await?;
		return Ok(());
	}

	if let Some(row) = entities::SyncJob::find_by_id(job_id.to_string())
		.one(db.conn())
		.await?
	{
		let mut active: entities::sync_job::ActiveModel = row.into();
		active.status = Set(status.to_string());
		active.completed_at = Set(Some(Utc::now()));
		active.error_message = Set(error_message);
		active.update(db.conn()).await?;
	}
	Ok(())
}
