//! HTTP implementation of [`PeerClient`]

use super::{PeerClient, PeerError, UserExport, WalletClockStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Peer client speaking JSON over HTTP, with every request bounded by a
/// single configured timeout.
pub struct HttpPeerClient {
	http: reqwest::Client,
	timeout: Duration,
}

#[derive(Serialize)]
struct BatchClockStatusRequest<'a> {
	wallet_public_keys: &'a [String],
}

#[derive(Deserialize)]
struct BatchClockStatusResponse {
	data: BatchClockStatusData,
}

#[derive(Deserialize)]
struct BatchClockStatusData {
	users: Vec<WalletClockStatus>,
}

#[derive(Deserialize)]
struct ExportResponse {
	data: UserExport,
}

#[derive(Serialize)]
struct SyncRequest<'a> {
	wallet_public_keys: &'a [String],
	creator_node_endpoint: &'a str,
}

#[derive(Deserialize)]
struct SyncStatusResponse {
	data: SyncStatusData,
}

#[derive(Deserialize)]
struct SyncStatusData {
	clock_value: i32,
}

impl HttpPeerClient {
	pub fn new(timeout: Duration) -> Self {
		Self {
			http: reqwest::Client::new(),
			timeout,
		}
	}

	fn map_err(endpoint: &str, e: reqwest::Error) -> PeerError {
		if e.is_timeout() {
			PeerError::Timeout {
				endpoint: endpoint.to_string(),
			}
		} else if e.is_connect() {
			PeerError::Unreachable {
				endpoint: endpoint.to_string(),
				reason: e.to_string(),
			}
		} else {
			PeerError::BadResponse {
				endpoint: endpoint.to_string(),
				reason: e.to_string(),
			}
		}
	}

	fn check_status(endpoint: &str, resp: reqwest::Response) -> Result<reqwest::Response, PeerError> {
		if resp.status().is_success() {
			Ok(resp)
		} else {
			Err(PeerError::BadResponse {
				endpoint: endpoint.to_string(),
				reason: format!("status {}", resp.status()),
			})
		}
	}
}

#[async_trait]
impl PeerClient for HttpPeerClient {
	async fn batch_clock_status(
		&self,
		endpoint: &str,
		wallets: &[String],
	) -> Result<Vec<WalletClockStatus>, PeerError> {
		debug!(endpoint, wallets = wallets.len(), "requesting batch clock status");
		let resp = self
			.http
			.post(format!("{endpoint}/users/batch_clock_status"))
			.timeout(self.timeout)
			.json(&BatchClockStatusRequest {
				wallet_public_keys: wallets,
			})
			.send()
			.await
			.map_err(|e| Self::map_err(endpoint, e))?;

		let body: BatchClockStatusResponse = Self::check_status(endpoint, resp)?
			.json()
			.await
			.map_err(|e| Self::map_err(endpoint, e))?;

		Ok(body.data.users)
	}

	async fn fetch_export(
		&self,
		endpoint: &str,
		wallet: &str,
		clock_range_min: i32,
	) -> Result<UserExport, PeerError> {
		debug!(endpoint, wallet, clock_range_min, "fetching export");
		let clock_range_min = clock_range_min.to_string();
		let resp = self
			.http
			.get(format!("{endpoint}/export"))
			.timeout(self.timeout)
			.query(&[
				("wallet_public_key", wallet),
				("clock_range_min", clock_range_min.as_str()),
			])
			.send()
			.await
			.map_err(|e| Self::map_err(endpoint, e))?;

		let body: ExportResponse = Self::check_status(endpoint, resp)?
			.json()
			.await
			.map_err(|e| Self::map_err(endpoint, e))?;

		Ok(body.data)
	}

	async fn request_sync(
		&self,
		endpoint: &str,
		wallets: &[String],
		source_endpoint: &str,
	) -> Result<(), PeerError> {
		debug!(endpoint, source_endpoint, "issuing sync request to peer");
		let resp = self
			.http
			.post(format!("{endpoint}/sync"))
			.timeout(self.timeout)
			.json(&SyncRequest {
				wallet_public_keys: wallets,
				creator_node_endpoint: source_endpoint,
			})
			.send()
			.await
			.map_err(|e| Self::map_err(endpoint, e))?;

		Self::check_status(endpoint, resp)?;
		Ok(())
	}

	async fn sync_status(&self, endpoint: &str, wallet: &str) -> Result<i32, PeerError> {
		let resp = self
			.http
			.get(format!("{endpoint}/sync_status/{wallet}"))
			.timeout(self.timeout)
			.send()
			.await
			.map_err(|e| Self::map_err(endpoint, e))?;

		let body: SyncStatusResponse = Self::check_status(endpoint, resp)?
			.json()
			.await
			.map_err(|e| Self::map_err(endpoint, e))?;

		Ok(body.data.clock_value)
	}
}
