//! SyncWorker behavior: pull, push-and-monitor, per-wallet isolation

mod helpers;

use cn_sync_core::infrastructure::queue::{JobId, SyncJobRequest, SyncProcessor};
use cn_sync_core::services::sync::{SyncWorker, SyncWorkerOptions};
use helpers::{seed_content, FakeNode, FakePeerNetwork};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const SELF_ENDPOINT: &str = "https://cn-self.test";
const PEER_ENDPOINT: &str = "https://cn-peer.test";

fn worker_options() -> SyncWorkerOptions {
	SyncWorkerOptions {
		self_endpoint: SELF_ENDPOINT.to_string(),
		monitor_timeout: Duration::from_secs(2),
		monitor_poll: Duration::from_millis(20),
	}
}

async fn setup() -> (Arc<FakeNode>, Arc<FakeNode>, Arc<FakePeerNetwork>, SyncWorker) {
	let local = Arc::new(FakeNode::new().await);
	let remote = Arc::new(FakeNode::new().await);
	let network = FakePeerNetwork::new();
	network.register(SELF_ENDPOINT, local.clone()).await;
	network.register(PEER_ENDPOINT, remote.clone()).await;

	let worker = SyncWorker::new(
		local.db.clone(),
		local.clock_store.clone(),
		network.clone(),
		worker_options(),
	);
	(local, remote, network, worker)
}

fn request(wallets: &[&str]) -> SyncJobRequest {
	SyncJobRequest {
		wallet_public_keys: wallets.iter().map(|wallet| wallet.to_string()).collect(),
		creator_node_endpoint: PEER_ENDPOINT.to_string(),
		force_resync: false,
	}
}

#[tokio::test]
async fn pulls_delta_when_peer_is_ahead() {
	let (local, remote, _network, worker) = setup().await;
	seed_content(&remote.clock_store, "0xw1", 10).await;

	worker.process(JobId::new(), &request(&["0xw1"])).await.unwrap();

	assert_eq!(local.clock_store.get_clock("0xw1").await.unwrap(), 10);
}

#[tokio::test]
async fn pull_walks_range_limited_exports() {
	let local = Arc::new(FakeNode::new().await);
	let remote = Arc::new(FakeNode::new().await);
	// Exports carry at most 3 records per round trip
	let network = FakePeerNetwork::with_export_range(3);
	network.register(SELF_ENDPOINT, local.clone()).await;
	network.register(PEER_ENDPOINT, remote.clone()).await;
	seed_content(&remote.clock_store, "0xw1", 10).await;

	let worker = SyncWorker::new(
		local.db.clone(),
		local.clock_store.clone(),
		network,
		worker_options(),
	);
	worker.process(JobId::new(), &request(&["0xw1"])).await.unwrap();

	assert_eq!(local.clock_store.get_clock("0xw1").await.unwrap(), 10);
	assert_eq!(
		local
			.clock_store
			.get_clock_records_since("0xw1", 0, None)
			.await
			.unwrap()
			.len(),
		10
	);
}

#[tokio::test]
async fn asks_lagging_peer_to_pull_and_waits_for_it() {
	let (local, remote, _network, worker) = setup().await;
	seed_content(&local.clock_store, "0xw1", 6).await;

	worker.process(JobId::new(), &request(&["0xw1"])).await.unwrap();

	assert_eq!(remote.clock_store.get_clock("0xw1").await.unwrap(), 6);
}

#[tokio::test]
async fn matching_clocks_are_left_alone() {
	let (local, remote, _network, worker) = setup().await;
	seed_content(&remote.clock_store, "0xw1", 4).await;

	worker.process(JobId::new(), &request(&["0xw1"])).await.unwrap();
	assert_eq!(local.clock_store.get_clock("0xw1").await.unwrap(), 4);

	// Second run: both sides at 4, nothing to move
	worker.process(JobId::new(), &request(&["0xw1"])).await.unwrap();
	assert_eq!(local.clock_store.get_clock("0xw1").await.unwrap(), 4);
	assert_eq!(remote.clock_store.get_clock("0xw1").await.unwrap(), 4);
}

#[tokio::test]
async fn one_failing_wallet_does_not_abort_its_siblings() {
	let (local, remote, network, worker) = setup().await;
	seed_content(&remote.clock_store, "0xw1", 5).await;
	seed_content(&remote.clock_store, "0xw2", 7).await;
	network.fail_exports_for("0xw1").await;

	let err = worker
		.process(JobId::new(), &request(&["0xw1", "0xw2"]))
		.await
		.unwrap_err();

	// The healthy wallet converged anyway
	assert_eq!(local.clock_store.get_clock("0xw2").await.unwrap(), 7);
	assert_eq!(local.clock_store.get_clock("0xw1").await.unwrap(), 0);
	let message = format!("{err:#}");
	assert!(message.contains("1/2"), "unexpected error: {message}");
	assert!(message.contains("0xw1"), "unexpected error: {message}");
}

#[tokio::test]
async fn unreachable_peer_fails_the_whole_job() {
	let local = Arc::new(FakeNode::new().await);
	let network = FakePeerNetwork::new();
	// Nothing registered at the peer endpoint

	let worker = SyncWorker::new(
		local.db.clone(),
		local.clock_store.clone(),
		network,
		worker_options(),
	);
	let err = worker
		.process(JobId::new(), &request(&["0xw1"]))
		.await
		.unwrap_err();
	assert!(format!("{err}").contains("unreachable"));
}

#[tokio::test]
async fn force_resync_wipes_then_pulls_fresh_state() {
	let (local, remote, _network, worker) = setup().await;
	seed_content(&remote.clock_store, "0xw1", 5).await;

	// Local holds divergent history that a plain pull would reject
	for _ in 0..2 {
		local
			.clock_store
			.write_content(
				"0xw1",
				cn_sync_core::infrastructure::clock::ContentWrite::File {
					multihash: "QmStray".to_string(),
					storage_path: "/file_storage/QmStray".to_string(),
					file_type: "copy320".to_string(),
				},
			)
			.await
			.unwrap();
	}

	let mut req = request(&["0xw1"]);
	req.force_resync = true;
	worker.process(JobId::new(), &req).await.unwrap();

	assert_eq!(local.clock_store.get_clock("0xw1").await.unwrap(), 5);
	let records = local
		.clock_store
		.get_clock_records_since("0xw1", 0, None)
		.await
		.unwrap();
	assert_eq!(records.len(), 5);
}
