//! StateMachineCoordinator: periodic audit of replica-set sync state
//!
//! Each cycle walks Resolving → Comparing → Enqueuing: resolve the users
//! hosted here and their replica sets, compare secondary clock values
//! against local primary state, and enqueue a sync job per lagging peer.
//! The coordinator only decides; execution belongs to the queue and worker.
//!
//! A cycle that fails is logged and abandoned; the next scheduled tick
//! retries. Ticks never overlap: a tick that lands while a cycle is still
//! running is skipped outright.

use crate::domain::{compute_peer_set, NodeUserInfo};
use crate::infrastructure::clock::{ClockError, ClockStore};
use crate::infrastructure::events::{Event, EventBus};
use crate::infrastructure::queue::{QueueError, SyncJobQueue, SyncJobRequest};
use crate::networking::PeerClient;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// Coordinator errors
#[derive(Error, Debug)]
pub enum CoordinatorError {
	/// Hosted-user resolution failed; nothing to audit this cycle
	#[error("replica set resolution failed: {0}")]
	Resolve(#[source] anyhow::Error),

	/// Clock store failure
	#[error(transparent)]
	Clock(#[from] ClockError),

	/// Enqueue failure
	#[error(transparent)]
	Queue(#[from] QueueError),
}

/// Supplies the users this node currently hosts content for, with their
/// replica-set assignments. The discovery side lives outside this core.
#[async_trait]
pub trait ReplicaSetProvider: Send + Sync {
	async fn hosted_users(&self) -> anyhow::Result<Vec<NodeUserInfo>>;
}

/// Coordinator tuning knobs
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
	/// This node's own endpoint
	pub self_endpoint: String,
	/// Spacing between audit ticks
	pub audit_interval: Duration,
	/// Users are spread across this many cycle slices by `user_id` modulo
	pub modulo_base: i64,
}

/// Outcome of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
	/// Previous cycle still running; this tick did nothing
	Skipped,
	Completed(CycleSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
	pub slice: i64,
	pub users_examined: usize,
	pub peers: usize,
	pub syncs_enqueued: usize,
}

/// Periodic audit loop deciding which sync jobs are needed.
pub struct StateMachineCoordinator {
	clock_store: Arc<ClockStore>,
	queue: Arc<SyncJobQueue>,
	peer: Arc<dyn PeerClient>,
	provider: Arc<dyn ReplicaSetProvider>,
	events: Arc<EventBus>,
	options: CoordinatorOptions,
	current_slice: Mutex<i64>,
	cycle_guard: Mutex<()>,
	running: Arc<RwLock<bool>>,
}

impl StateMachineCoordinator {
	pub fn new(
		clock_store: Arc<ClockStore>,
		queue: Arc<SyncJobQueue>,
		peer: Arc<dyn PeerClient>,
		provider: Arc<dyn ReplicaSetProvider>,
		events: Arc<EventBus>,
		options: CoordinatorOptions,
	) -> Self {
		let modulo_base = options.modulo_base.max(1);
		let starting_slice = rand::thread_rng().gen_range(0..modulo_base);
		info!(starting_slice, modulo_base, "coordinator starting slice chosen");

		Self {
			clock_store,
			queue,
			peer,
			provider,
			events,
			options,
			current_slice: Mutex::new(starting_slice),
			cycle_guard: Mutex::new(()),
			running: Arc::new(RwLock::new(false)),
		}
	}

	/// Launch the periodic audit task.
	pub async fn start(self: Arc<Self>) {
		if *self.running.read().await {
			warn!("coordinator already started");
			return;
		}
		*self.running.write().await = true;

		let coordinator = self;
		tokio::spawn(async move {
			info!(
				interval_secs = coordinator.options.audit_interval.as_secs(),
				"audit loop started"
			);
			let mut interval = tokio::time::interval(coordinator.options.audit_interval);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

			while *coordinator.running.read().await {
				interval.tick().await;
				if !*coordinator.running.read().await {
					break;
				}

				match coordinator.run_cycle().await {
					Ok(CycleOutcome::Skipped) => {
						warn!("previous audit cycle still running, tick skipped");
					}
					Ok(CycleOutcome::Completed(summary)) => {
						debug!(?summary, "audit cycle finished");
					}
					Err(e) => {
						// Not fatal: the next tick retries from scratch
						error!("audit cycle failed: {e}");
					}
				}
			}

			info!("audit loop stopped");
		});
	}

	pub async fn stop(&self) {
		*self.running.write().await = false;
	}

	/// One full audit cycle. Returns `Skipped` without doing anything when
	/// another cycle currently holds the guard.
	#[instrument(skip(self))]
	pub async fn run_cycle(&self) -> Result<CycleOutcome, CoordinatorError> {
		let Ok(_guard) = self.cycle_guard.try_lock() else {
			return Ok(CycleOutcome::Skipped);
		};

		let slice = {
			let mut current = self.current_slice.lock().await;
			let slice = *current;
			*current = (*current + 1) % self.options.modulo_base.max(1);
			slice
		};

		// Resolving
		let users = self
			.provider
			.hosted_users()
			.await
			.map_err(CoordinatorError::Resolve)?;
		let peer_set = compute_peer_set(&users, &self.options.self_endpoint);
		debug!(
			users = users.len(),
			peers = peer_set.len(),
			slice,
			"resolved replica-set state"
		);

		let selected: Vec<&NodeUserInfo> = users
			.iter()
			.filter(|user| user.replica_set.is_primary(&self.options.self_endpoint))
			.filter(|user| user.user_id.rem_euclid(self.options.modulo_base.max(1)) == slice)
			.collect();

		// Build per-secondary wallet lists for batched clock queries
		let mut wallets_by_peer: HashMap<String, Vec<String>> = HashMap::new();
		let mut wallets: Vec<String> = Vec::new();
		for user in &selected {
			wallets.push(user.wallet_public_key.clone());
			for secondary in user.replica_set.secondaries() {
				wallets_by_peer
					.entry(secondary.to_string())
					.or_default()
					.push(user.wallet_public_key.clone());
			}
		}

		// Comparing
		let local_clocks = self.clock_store.batch_clock_values(&wallets).await?;

		let mut syncs_enqueued = 0;
		for (peer_endpoint, peer_wallets) in wallets_by_peer {
			let behind =
				match self.peer.batch_clock_status(&peer_endpoint, &peer_wallets).await {
					Ok(statuses) => {
						let peer_clocks: HashMap<String, i32> = statuses
							.into_iter()
							.map(|status| (status.wallet_public_key, status.clock))
							.collect();
						peer_wallets
							.into_iter()
							.filter(|wallet| {
								let local = local_clocks.get(wallet).copied().unwrap_or(0);
								match peer_clocks.get(wallet) {
									Some(peer_clock) => local > *peer_clock,
									// Peer has never seen the wallet
									None => local > 0,
								}
							})
							.collect::<Vec<_>>()
					}
					Err(e) => {
						// An unreachable secondary is itself divergence:
						// enqueue syncs for everything it should hold and
						// let the worker deal with availability
						warn!(peer = %peer_endpoint, "clock status query failed: {e}");
						peer_wallets
							.into_iter()
							.filter(|wallet| local_clocks.get(wallet).copied().unwrap_or(0) > 0)
							.collect::<Vec<_>>()
					}
				};

			if behind.is_empty() {
				continue;
			}

			// Enqueuing
			debug!(peer = %peer_endpoint, wallets = behind.len(), "enqueueing sync job");
			syncs_enqueued += behind.len();
			self.queue
				.enqueue_sync(SyncJobRequest {
					wallet_public_keys: behind,
					creator_node_endpoint: peer_endpoint,
					force_resync: false,
				})
				.await?;
		}

		let summary = CycleSummary {
			slice,
			users_examined: selected.len(),
			peers: peer_set.len(),
			syncs_enqueued,
		};
		info!(
			slice = summary.slice,
			users = summary.users_examined,
			syncs = summary.syncs_enqueued,
			"audit cycle complete"
		);
		self.events.emit(Event::AuditCycleCompleted {
			users_examined: summary.users_examined,
			syncs_enqueued: summary.syncs_enqueued,
		});

		Ok(CycleOutcome::Completed(summary))
	}
}
