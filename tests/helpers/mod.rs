//! Shared fixtures: temp-database nodes, an in-memory peer network, and
//! counting test doubles.

#![allow(dead_code)]

use async_trait::async_trait;
use cn_sync_core::domain::NodeUserInfo;
use cn_sync_core::infrastructure::clock::{ClockStore, ContentWrite};
use cn_sync_core::infrastructure::database::Database;
use cn_sync_core::infrastructure::queue::{JobId, SyncJobRequest, SyncProcessor};
use cn_sync_core::networking::{PeerClient, PeerError, UserExport, WalletClockStatus};
use cn_sync_core::services::coordinator::ReplicaSetProvider;
use cn_sync_core::services::sync::{apply_export, build_export};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::RwLock;

/// A standalone content node backed by its own temp database.
pub struct FakeNode {
	_tmp: TempDir,
	pub db: Arc<Database>,
	pub clock_store: Arc<ClockStore>,
}

impl FakeNode {
	pub async fn new() -> Self {
		let tmp = TempDir::new().unwrap();
		let db = Database::create(&tmp.path().join("node.db")).await.unwrap();
		db.migrate().await.unwrap();
		let db = Arc::new(db);
		let clock_store = Arc::new(ClockStore::new(db.clone()));
		Self {
			_tmp: tmp,
			db,
			clock_store,
		}
	}
}

/// Write `count` content rows for a wallet, cycling through the three
/// content kinds, so the node ends at clock `count`.
pub async fn seed_content(store: &ClockStore, wallet: &str, count: usize) {
	for i in 0..count {
		let write = match i % 3 {
			0 => ContentWrite::AudiusUser {
				blockchain_id: Some(i as i64 + 1),
				metadata: serde_json::json!({ "handle": format!("user-{i}") }),
			},
			1 => ContentWrite::Track {
				blockchain_id: Some(i as i64 + 1),
				metadata: serde_json::json!({ "title": format!("track-{i}") }),
			},
			_ => ContentWrite::File {
				multihash: format!("Qm{i:044}"),
				storage_path: format!("/file_storage/Qm{i:044}"),
				file_type: "track".to_string(),
			},
		};
		store.write_content(wallet, write).await.unwrap();
	}
}

/// In-memory peer network standing in for HTTP between nodes. Endpoints not
/// registered here behave as unreachable hosts.
pub struct FakePeerNetwork {
	nodes: RwLock<HashMap<String, Arc<FakeNode>>>,
	fail_export_wallets: RwLock<HashSet<String>>,
	export_range: u64,
}

impl FakePeerNetwork {
	pub fn new() -> Arc<Self> {
		Self::with_export_range(10_000)
	}

	pub fn with_export_range(export_range: u64) -> Arc<Self> {
		Arc::new(Self {
			nodes: RwLock::new(HashMap::new()),
			fail_export_wallets: RwLock::new(HashSet::new()),
			export_range,
		})
	}

	pub async fn register(&self, endpoint: &str, node: Arc<FakeNode>) {
		self.nodes.write().await.insert(endpoint.to_string(), node);
	}

	/// Make export fetches for one wallet fail, everywhere.
	pub async fn fail_exports_for(&self, wallet: &str) {
		self.fail_export_wallets.write().await.insert(wallet.to_string());
	}

	async fn node(&self, endpoint: &str) -> Result<Arc<FakeNode>, PeerError> {
		self.nodes
			.read()
			.await
			.get(endpoint)
			.cloned()
			.ok_or_else(|| PeerError::Unreachable {
				endpoint: endpoint.to_string(),
				reason: "no such host".to_string(),
			})
	}
}

#[async_trait]
impl PeerClient for FakePeerNetwork {
	async fn batch_clock_status(
		&self,
		endpoint: &str,
		wallets: &[String],
	) -> Result<Vec<WalletClockStatus>, PeerError> {
		let node = self.node(endpoint).await?;
		let mut statuses = Vec::new();
		for wallet in wallets {
			let clock = node
				.clock_store
				.get_clock(wallet)
				.await
				.map_err(|e| PeerError::BadResponse {
					endpoint: endpoint.to_string(),
					reason: e.to_string(),
				})?;
			statuses.push(WalletClockStatus {
				wallet_public_key: wallet.clone(),
				clock,
			});
		}
		Ok(statuses)
	}

	async fn fetch_export(
		&self,
		endpoint: &str,
		wallet: &str,
		clock_range_min: i32,
	) -> Result<UserExport, PeerError> {
		if self.fail_export_wallets.read().await.contains(wallet) {
			return Err(PeerError::Timeout {
				endpoint: endpoint.to_string(),
			});
		}

		let node = self.node(endpoint).await?;
		build_export(
			&node.db,
			&node.clock_store,
			wallet,
			clock_range_min,
			self.export_range,
		)
		.await
		.map_err(|e| PeerError::BadResponse {
			endpoint: endpoint.to_string(),
			reason: e.to_string(),
		})?
		.ok_or_else(|| PeerError::BadResponse {
			endpoint: endpoint.to_string(),
			reason: format!("unknown wallet {wallet}"),
		})
	}

	async fn request_sync(
		&self,
		endpoint: &str,
		wallets: &[String],
		source_endpoint: &str,
	) -> Result<(), PeerError> {
		let dest = self.node(endpoint).await?;
		let source = self.node(source_endpoint).await?;

		for wallet in wallets {
			loop {
				let local = dest
					.clock_store
					.get_clock(wallet)
					.await
					.map_err(|e| PeerError::BadResponse {
						endpoint: endpoint.to_string(),
						reason: e.to_string(),
					})?;
				let export = match build_export(
					&source.db,
					&source.clock_store,
					wallet,
					local + 1,
					self.export_range,
				)
				.await
				{
					Ok(Some(export)) => export,
					Ok(None) => break,
					Err(e) => {
						return Err(PeerError::BadResponse {
							endpoint: source_endpoint.to_string(),
							reason: e.to_string(),
						})
					}
				};
				if export.clock <= local {
					break;
				}
				apply_export(&dest.db, &dest.clock_store, &export)
					.await
					.map_err(|e| PeerError::BadResponse {
						endpoint: endpoint.to_string(),
						reason: e.to_string(),
					})?;
			}
		}
		Ok(())
	}

	async fn sync_status(&self, endpoint: &str, wallet: &str) -> Result<i32, PeerError> {
		let node = self.node(endpoint).await?;
		node.clock_store
			.get_clock(wallet)
			.await
			.map_err(|e| PeerError::BadResponse {
				endpoint: endpoint.to_string(),
				reason: e.to_string(),
			})
	}
}

/// Replica-set provider returning a fixed user list.
pub struct FixedReplicaProvider {
	pub users: Vec<NodeUserInfo>,
}

#[async_trait]
impl ReplicaSetProvider for FixedReplicaProvider {
	async fn hosted_users(&self) -> anyhow::Result<Vec<NodeUserInfo>> {
		Ok(self.users.clone())
	}
}

/// Provider that stalls inside resolution, for re-entrancy tests.
pub struct SlowReplicaProvider {
	pub delay: Duration,
}

#[async_trait]
impl ReplicaSetProvider for SlowReplicaProvider {
	async fn hosted_users(&self) -> anyhow::Result<Vec<NodeUserInfo>> {
		tokio::time::sleep(self.delay).await;
		Ok(Vec::new())
	}
}

/// Processor double that counts concurrent executions.
pub struct CountingProcessor {
	current: AtomicUsize,
	max_seen: AtomicUsize,
	processed: AtomicUsize,
	delay: Duration,
	fail: bool,
}

impl CountingProcessor {
	pub fn new(delay: Duration) -> Arc<Self> {
		Arc::new(Self {
			current: AtomicUsize::new(0),
			max_seen: AtomicUsize::new(0),
			processed: AtomicUsize::new(0),
			delay,
			fail: false,
		})
	}

	pub fn failing() -> Arc<Self> {
		Arc::new(Self {
			current: AtomicUsize::new(0),
			max_seen: AtomicUsize::new(0),
			processed: AtomicUsize::new(0),
			delay: Duration::from_millis(0),
			fail: true,
		})
	}

	pub fn max_concurrency(&self) -> usize {
		self.max_seen.load(Ordering::SeqCst)
	}

	pub fn processed(&self) -> usize {
		self.processed.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl SyncProcessor for CountingProcessor {
	async fn process(&self, _job_id: JobId, _request: &SyncJobRequest) -> anyhow::Result<()> {
		let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_seen.fetch_max(current, Ordering::SeqCst);

		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}

		self.current.fetch_sub(1, Ordering::SeqCst);
		self.processed.fetch_add(1, Ordering::SeqCst);

		if self.fail {
			anyhow::bail!("injected processor failure");
		}
		Ok(())
	}
}
