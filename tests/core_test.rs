//! SyncCore wiring: enqueue surface, status accessors, export serving

mod helpers;

use cn_sync_core::config::NodeConfig;
use cn_sync_core::infrastructure::queue::JobStatus;
use cn_sync_core::services::coordinator::ReplicaSetProvider;
use cn_sync_core::SyncCore;
use helpers::{seed_content, FakeNode, FakePeerNetwork, FixedReplicaProvider};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

const SELF_ENDPOINT: &str = "https://cn-self.test";
const PEER_ENDPOINT: &str = "https://cn-peer.test";
const WALLET: &str = "0xw1";

#[tokio::test]
async fn core_reconciles_an_enqueued_sync_end_to_end() {
	let tmp = TempDir::new().unwrap();
	let config = NodeConfig::default_with_dir(tmp.path().to_path_buf(), SELF_ENDPOINT);

	let remote = Arc::new(FakeNode::new().await);
	let network = FakePeerNetwork::new();
	network.register(PEER_ENDPOINT, remote.clone()).await;
	seed_content(&remote.clock_store, WALLET, 5).await;

	let provider: Arc<dyn ReplicaSetProvider> =
		Arc::new(FixedReplicaProvider { users: Vec::new() });
	let core = SyncCore::new(config, network, provider).await.unwrap();
	core.start().await.unwrap();

	// Request-path entry point: fire and forget, then observe the handle
	let handle = core
		.enqueue_sync(vec![WALLET.to_string()], PEER_ENDPOINT.to_string())
		.await
		.unwrap();
	assert_eq!(handle.wait().await, JobStatus::Completed);

	// Status and export read accessors reflect the pulled state
	assert_eq!(core.clock_status(WALLET).await.unwrap(), 5);
	let export = core.export(WALLET, 1).await.unwrap().unwrap();
	assert_eq!(export.clock, 5);
	assert_eq!(export.clock_records.len(), 5);

	assert_eq!(core.clock_status("0xnobody").await.unwrap(), 0);
	assert!(core.export("0xnobody", 1).await.unwrap().is_none());

	core.shutdown().await;
}

#[tokio::test]
async fn core_reopens_its_database_across_restarts() {
	let tmp = TempDir::new().unwrap();
	let network = FakePeerNetwork::new();
	let provider: Arc<dyn ReplicaSetProvider> =
		Arc::new(FixedReplicaProvider { users: Vec::new() });

	{
		let config = NodeConfig::default_with_dir(tmp.path().to_path_buf(), SELF_ENDPOINT);
		let core = SyncCore::new(config, network.clone(), provider.clone())
			.await
			.unwrap();
		seed_content(&core.clock_store, WALLET, 3).await;
	}

	let config = NodeConfig::default_with_dir(tmp.path().to_path_buf(), SELF_ENDPOINT);
	let core = SyncCore::new(config, network, provider).await.unwrap();
	assert_eq!(core.clock_status(WALLET).await.unwrap(), 3);
}
