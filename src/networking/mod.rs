//! Peer communication seam
//!
//! The sync engine talks to other content nodes through the [`PeerClient`]
//! trait; the HTTP implementation lives in [`http`]. Tests substitute an
//! in-memory client.

use crate::domain::SourceTable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;

pub use http::HttpPeerClient;

/// Peer communication errors
#[derive(Error, Debug)]
pub enum PeerError {
	/// Peer could not be reached at all
	#[error("peer {endpoint} unreachable: {reason}")]
	Unreachable { endpoint: String, reason: String },

	/// Request exceeded the configured timeout
	#[error("request to peer {endpoint} timed out")]
	Timeout { endpoint: String },

	/// Peer answered with something we cannot use
	#[error("unexpected response from peer {endpoint}: {reason}")]
	BadResponse { endpoint: String, reason: String },
}

/// Clock value a peer reports for one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletClockStatus {
	pub wallet_public_key: String,
	pub clock: i32,
}

/// One clock record in an export payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportClockRecord {
	pub clock: i32,
	pub source_table: SourceTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportAudiusUser {
	pub clock: i32,
	pub blockchain_id: Option<i64>,
	pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTrack {
	pub clock: i32,
	pub blockchain_id: Option<i64>,
	pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFile {
	pub clock: i32,
	pub multihash: String,
	pub storage_path: String,
	pub file_type: String,
	pub skipped: bool,
}

/// Clock-ordered slice of one user's state, as served by the node that is
/// ahead. `clock` is the exporting node's current value for the user, which
/// can exceed the range carried here when exports are range-limited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserExport {
	pub wallet_public_key: String,
	pub clock: i32,
	pub latest_block_number: Option<i64>,
	pub clock_records: Vec<ExportClockRecord>,
	pub audius_users: Vec<ExportAudiusUser>,
	pub tracks: Vec<ExportTrack>,
	pub files: Vec<ExportFile>,
}

/// RPC surface this node needs from its peers.
#[async_trait]
pub trait PeerClient: Send + Sync {
	/// Clock values the peer holds for a batch of wallets.
	async fn batch_clock_status(
		&self,
		endpoint: &str,
		wallets: &[String],
	) -> Result<Vec<WalletClockStatus>, PeerError>;

	/// Fetch a user's export beginning at `clock_range_min`.
	async fn fetch_export(
		&self,
		endpoint: &str,
		wallet: &str,
		clock_range_min: i32,
	) -> Result<UserExport, PeerError>;

	/// Ask the peer to sync the given wallets from `source_endpoint`.
	async fn request_sync(
		&self,
		endpoint: &str,
		wallets: &[String],
		source_endpoint: &str,
	) -> Result<(), PeerError>;

	/// The peer's current clock value for one wallet.
	async fn sync_status(&self, endpoint: &str, wallet: &str) -> Result<i32, PeerError>;
}
