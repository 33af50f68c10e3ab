//! SyncWorker: executes one queued sync job against a named peer

use crate::infrastructure::clock::ClockStore;
use crate::infrastructure::database::Database;
use crate::infrastructure::queue::{JobId, SyncJobRequest, SyncProcessor};
use crate::networking::PeerClient;
use crate::services::sync::{apply_export, ApplyOutcome, SyncError, SyncResult};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Worker tuning knobs
#[derive(Debug, Clone)]
pub struct SyncWorkerOptions {
	/// This node's own endpoint, named as the source when asking a peer to
	/// pull from us
	pub self_endpoint: String,
	/// How long to wait for a peer to catch up after a sync request
	pub monitor_timeout: Duration,
	/// Poll spacing while monitoring a peer's clock
	pub monitor_poll: Duration,
}

/// How one wallet's reconciliation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletSyncOutcome {
	/// Clocks already matched
	UpToDate,
	/// We were behind and pulled the delta from the peer
	Pulled { from_clock: i32, to_clock: i32 },
	/// Peer was behind; it pulled from us and caught up to `clock`
	PeerCaughtUp { clock: i32 },
}

/// Executes sync jobs: for each wallet in the batch, compares clock state
/// with the peer and moves the delta in whichever direction is needed. Each
/// wallet is reconciled independently; one wallet failing never aborts its
/// siblings.
pub struct SyncWorker {
	db: Arc<Database>,
	clock_store: Arc<ClockStore>,
	peer: Arc<dyn PeerClient>,
	options: SyncWorkerOptions,
}

impl SyncWorker {
	pub fn new(
		db: Arc<Database>,
		clock_store: Arc<ClockStore>,
		peer: Arc<dyn PeerClient>,
		options: SyncWorkerOptions,
	) -> Self {
		Self {
			db,
			clock_store,
			peer,
			options,
		}
	}

	/// Reconcile one wallet against the peer.
	#[instrument(skip(self, peer_clocks))]
	async fn sync_wallet(
		&self,
		wallet: &str,
		endpoint: &str,
		peer_clocks: &HashMap<String, i32>,
		force_resync: bool,
	) -> SyncResult<WalletSyncOutcome> {
		if force_resync {
			warn!(wallet, "force resync requested, wiping local state first");
			self.clock_store.wipe_user_data(wallet).await?;
		}

		let local = self.clock_store.get_clock(wallet).await?;
		// A peer that doesn't know the wallet is simply at clock 0
		let peer_clock = peer_clocks.get(wallet).copied().unwrap_or(0);

		if local == peer_clock {
			debug!(wallet, clock = local, "clocks already match");
			return Ok(WalletSyncOutcome::UpToDate);
		}

		if local < peer_clock {
			let to_clock = self.pull_from_peer(wallet, endpoint, peer_clock).await?;
			Ok(WalletSyncOutcome::Pulled {
				from_clock: local,
				to_clock,
			})
		} else {
			self.push_to_peer(wallet, endpoint, local).await?;
			Ok(WalletSyncOutcome::PeerCaughtUp { clock: local })
		}
	}

	/// Pull the delta from a peer that is ahead of us. Exports may be
	/// range-limited, so this loops until we reach the target or stop
	/// making progress.
	async fn pull_from_peer(
		&self,
		wallet: &str,
		endpoint: &str,
		target: i32,
	) -> SyncResult<i32> {
		let mut local = self.clock_store.get_clock(wallet).await?;

		while local < target {
			let export = self.peer.fetch_export(endpoint, wallet, local + 1).await?;
			match apply_export(&self.db, &self.clock_store, &export).await? {
				ApplyOutcome::Applied { to_clock, .. } => {
					if to_clock <= local {
						return Err(SyncError::StalledPull {
							endpoint: endpoint.to_string(),
							clock: local,
						});
					}
					local = to_clock;
				}
				// Peer no longer ahead; the target we captured went stale
				ApplyOutcome::UpToDate => break,
			}
		}

		info!(wallet, clock = local, "pulled up to peer state");
		Ok(local)
	}

	/// The peer is behind: ask it to sync from us, then poll its clock
	/// until it reaches our value or the monitoring window closes.
	async fn push_to_peer(&self, wallet: &str, endpoint: &str, target: i32) -> SyncResult<()> {
		let wallets = [wallet.to_string()];
		self.peer
			.request_sync(endpoint, &wallets, &self.options.self_endpoint)
			.await?;

		let deadline = Instant::now() + self.options.monitor_timeout;
		loop {
			match self.peer.sync_status(endpoint, wallet).await {
				// Peer can exceed `target` if new local writes landed after
				// we read it; either way it caught up
				Ok(clock) if clock >= target => {
					info!(wallet, endpoint, clock, "peer caught up");
					return Ok(());
				}
				Ok(clock) => {
					debug!(wallet, endpoint, clock, target, "peer still behind");
				}
				Err(e) => {
					warn!(wallet, endpoint, "error polling peer sync status: {e}");
				}
			}

			if Instant::now() >= deadline {
				return Err(SyncError::MonitorTimeout {
					endpoint: endpoint.to_string(),
					target,
				});
			}
			tokio::time::sleep(self.options.monitor_poll).await;
		}
	}
}

#[async_trait]
impl SyncProcessor for SyncWorker {
	async fn process(&self, job_id: JobId, request: &SyncJobRequest) -> anyhow::Result<()> {
		let endpoint = request.creator_node_endpoint.as_str();

		// One clock-status round trip covers the whole batch. If the peer is
		// unreachable here the job fails as a unit; the next audit cycle
		// re-detects whatever divergence remains.
		let statuses = self
			.peer
			.batch_clock_status(endpoint, &request.wallet_public_keys)
			.await?;
		let peer_clocks: HashMap<String, i32> = statuses
			.into_iter()
			.map(|status| (status.wallet_public_key, status.clock))
			.collect();

		let mut failures = Vec::new();
		for wallet in &request.wallet_public_keys {
			match self
				.sync_wallet(wallet, endpoint, &peer_clocks, request.force_resync)
				.await
			{
				Ok(outcome) => {
					debug!(%job_id, wallet, ?outcome, "wallet reconciled");
				}
				Err(e) => {
					warn!(%job_id, wallet, "wallet sync failed: {e}");
					failures.push((wallet.clone(), e));
				}
			}
		}

		if failures.is_empty() {
			Ok(())
		} else {
			let detail = failures
				.iter()
				.map(|(wallet, e)| format!("{wallet}: {e}"))
				.collect::<Vec<_>>()
				.join("; ");
			Err(anyhow!(
				"{}/{} wallets failed to sync against {endpoint}: {detail}",
				failures.len(),
				request.wallet_public_keys.len()
			))
		}
	}
}
