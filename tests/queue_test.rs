//! SyncJobQueue behavior: bounded concurrency, retention, durability

mod helpers;

use cn_sync_core::infrastructure::database::entities;
use cn_sync_core::infrastructure::events::{Event, EventBus};
use cn_sync_core::infrastructure::queue::{
	JobId, JobStatus, QueueError, QueueOptions, SyncJobQueue, SyncJobRequest,
};
use helpers::{CountingProcessor, FakeNode};
use pretty_assertions::assert_eq;
use sea_orm::EntityTrait;
use std::sync::Arc;
use std::time::Duration;

const PEER: &str = "https://cn-peer.test";

fn request(wallet: &str) -> SyncJobRequest {
	SyncJobRequest {
		wallet_public_keys: vec![wallet.to_string()],
		creator_node_endpoint: PEER.to_string(),
		force_resync: false,
	}
}

async fn wait_for<F>(mut condition: F, timeout: Duration)
where
	F: FnMut() -> bool,
{
	let deadline = tokio::time::Instant::now() + timeout;
	while !condition() {
		assert!(
			tokio::time::Instant::now() < deadline,
			"condition not reached in {timeout:?}"
		);
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}

#[tokio::test]
async fn worker_pool_never_exceeds_configured_concurrency() {
	let node = FakeNode::new().await;
	let processor = CountingProcessor::new(Duration::from_millis(50));
	let events = Arc::new(EventBus::default());
	let queue = SyncJobQueue::new(
		node.db.clone(),
		processor.clone(),
		events,
		QueueOptions {
			concurrency: 3,
			..QueueOptions::default()
		},
	);
	queue.start().await.unwrap();

	let mut handles = Vec::new();
	for i in 0..10 {
		handles.push(queue.enqueue_sync(request(&format!("0xw{i}"))).await.unwrap());
	}
	for handle in handles {
		assert_eq!(handle.wait().await, JobStatus::Completed);
	}

	assert_eq!(processor.processed(), 10);
	assert!(
		processor.max_concurrency() <= 3,
		"observed {} concurrent jobs",
		processor.max_concurrency()
	);
}

#[tokio::test]
async fn completed_jobs_are_removed_from_the_durable_store() {
	let node = FakeNode::new().await;
	let processor = CountingProcessor::new(Duration::from_millis(0));
	let queue = SyncJobQueue::new(
		node.db.clone(),
		processor,
		Arc::new(EventBus::default()),
		QueueOptions::default(),
	);
	queue.start().await.unwrap();

	let handle = queue.enqueue_sync(request("0xw1")).await.unwrap();
	assert_eq!(handle.wait().await, JobStatus::Completed);

	let db = node.db.clone();
	wait_for_rows(&db, 0).await;
}

async fn wait_for_rows(db: &cn_sync_core::infrastructure::database::Database, expected: usize) {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
	loop {
		let rows = entities::SyncJob::find().all(db.conn()).await.unwrap();
		if rows.len() == expected {
			return;
		}
		assert!(
			tokio::time::Instant::now() < deadline,
			"still {} rows in sync_jobs",
			rows.len()
		);
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}

#[tokio::test]
async fn failed_jobs_are_removed_and_reported() {
	let node = FakeNode::new().await;
	let events = Arc::new(EventBus::default());
	let mut event_rx = events.subscribe();
	let queue = SyncJobQueue::new(
		node.db.clone(),
		CountingProcessor::failing(),
		events,
		QueueOptions::default(),
	);
	queue.start().await.unwrap();

	let handle = queue.enqueue_sync(request("0xw1")).await.unwrap();
	let job_id = handle.id;
	assert_eq!(handle.wait().await, JobStatus::Failed);

	wait_for_rows(&node.db, 0).await;

	// Enqueue and failure both went out on the bus
	let mut saw_enqueued = false;
	let mut saw_failed = false;
	while let Ok(Ok(event)) =
		tokio::time::timeout(Duration::from_millis(200), event_rx.recv()).await
	{
		match event {
			Event::SyncJobEnqueued { job_id: id, .. } if id == job_id.0 => saw_enqueued = true,
			Event::SyncJobFailed { job_id: id, error, .. } if id == job_id.0 => {
				assert!(error.contains("injected"));
				saw_failed = true;
				break;
			}
			_ => {}
		}
	}
	assert!(saw_enqueued && saw_failed);
}

#[tokio::test]
async fn failed_jobs_can_be_retained_for_inspection() {
	let node = FakeNode::new().await;
	let queue = SyncJobQueue::new(
		node.db.clone(),
		CountingProcessor::failing(),
		Arc::new(EventBus::default()),
		QueueOptions {
			remove_on_fail: false,
			..QueueOptions::default()
		},
	);
	queue.start().await.unwrap();

	let handle = queue.enqueue_sync(request("0xw1")).await.unwrap();
	let job_id = handle.id;
	assert_eq!(handle.wait().await, JobStatus::Failed);

	// The durable row write can race the watch update; poll the store
	let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
	loop {
		if let Some(JobStatus::Failed) = queue.job_status(job_id).await.unwrap() {
			break;
		}
		assert!(tokio::time::Instant::now() < deadline);
		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	let row = entities::SyncJob::find_by_id(job_id.to_string())
		.one(node.db.conn())
		.await
		.unwrap()
		.expect("failed row retained");
	assert_eq!(row.status, "Failed");
	assert!(row.error_message.unwrap().contains("injected"));
}

#[tokio::test]
async fn interrupted_jobs_are_redispatched_on_startup() {
	let node = FakeNode::new().await;

	// First queue persists the job but is never started
	{
		let queue = SyncJobQueue::new(
			node.db.clone(),
			CountingProcessor::new(Duration::from_millis(0)),
			Arc::new(EventBus::default()),
			QueueOptions::default(),
		);
		queue.enqueue_sync(request("0xw1")).await.unwrap();
	}
	wait_for_rows(&node.db, 1).await;

	// A fresh queue over the same database picks the row up
	let processor = CountingProcessor::new(Duration::from_millis(0));
	let queue = SyncJobQueue::new(
		node.db.clone(),
		processor.clone(),
		Arc::new(EventBus::default()),
		QueueOptions::default(),
	);
	queue.start().await.unwrap();

	let processor_ref = processor.clone();
	wait_for(move || processor_ref.processed() == 1, Duration::from_secs(2)).await;
	wait_for_rows(&node.db, 0).await;
}

#[tokio::test]
async fn enqueue_rejects_malformed_requests() {
	let node = FakeNode::new().await;
	let queue = SyncJobQueue::new(
		node.db.clone(),
		CountingProcessor::new(Duration::from_millis(0)),
		Arc::new(EventBus::default()),
		QueueOptions::default(),
	);

	let err = queue
		.enqueue_sync(SyncJobRequest {
			wallet_public_keys: vec![],
			creator_node_endpoint: PEER.to_string(),
			force_resync: false,
		})
		.await
		.unwrap_err();
	assert!(matches!(err, QueueError::InvalidRequest(_)));

	let err = queue
		.enqueue_sync(SyncJobRequest {
			wallet_public_keys: vec!["0xw1".to_string()],
			creator_node_endpoint: String::new(),
			force_resync: false,
		})
		.await
		.unwrap_err();
	assert!(matches!(err, QueueError::InvalidRequest(_)));
}

#[tokio::test]
async fn status_of_unknown_job_is_none() {
	let node = FakeNode::new().await;
	let queue = SyncJobQueue::new(
		node.db.clone(),
		CountingProcessor::new(Duration::from_millis(0)),
		Arc::new(EventBus::default()),
		QueueOptions::default(),
	);
	assert_eq!(queue.job_status(JobId::new()).await.unwrap(), None);
}
