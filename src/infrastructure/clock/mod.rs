//! ClockStore: durable per-user monotonic sequence and change log
//!
//! Every content mutation on this node advances the owning user's clock and
//! appends a `clock_records` row in the same transaction as the content
//! write. Advancement uses a guarded update (optimistic concurrency) so two
//! writers racing on the same user cannot produce duplicate clock values.

use crate::domain::SourceTable;
use crate::infrastructure::database::{entities, Database};
use chrono::Utc;
use sea_orm::{
	sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseTransaction, DbErr,
	EntityTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Attempts before a raced `advance_clock` gives up
const MAX_ADVANCE_ATTEMPTS: u32 = 10;

/// Clock store errors
#[derive(Error, Debug)]
pub enum ClockError {
	/// A concurrent writer advanced the clock past the expected value
	#[error("clock advancement raced for wallet {wallet} at clock {expected}")]
	ConcurrencyConflict { wallet: String, expected: i32 },

	/// Database error
	#[error("database error: {0}")]
	Database(#[from] DbErr),
}

/// Result type for clock operations
pub type ClockResult<T> = Result<T, ClockError>;

/// A local content mutation paired with its clock advancement
#[derive(Debug, Clone)]
pub enum ContentWrite {
	AudiusUser {
		blockchain_id: Option<i64>,
		metadata: serde_json::Value,
	},
	Track {
		blockchain_id: Option<i64>,
		metadata: serde_json::Value,
	},
	File {
		multihash: String,
		storage_path: String,
		file_type: String,
	},
}

impl ContentWrite {
	pub fn source_table(&self) -> SourceTable {
		match self {
			Self::AudiusUser { .. } => SourceTable::AudiusUser,
			Self::Track { .. } => SourceTable::Track,
			Self::File { .. } => SourceTable::File,
		}
	}
}

/// Durable source of truth for how far along each user's content history is
/// on this node.
pub struct ClockStore {
	db: Arc<Database>,
}

impl ClockStore {
	pub fn new(db: Arc<Database>) -> Self {
		Self { db }
	}

	/// Current clock value for a wallet; 0 when the user is unknown here.
	pub async fn get_clock(&self, wallet: &str) -> ClockResult<i32> {
		Ok(self.get_user(wallet).await?.map(|user| user.clock).unwrap_or(0))
	}

	/// The full CNodeUser row for a wallet, if present.
	pub async fn get_user(&self, wallet: &str) -> ClockResult<Option<entities::cnode_user::Model>> {
		Ok(entities::CNodeUser::find()
			.filter(entities::cnode_user::Column::WalletPublicKey.eq(wallet))
			.one(self.db.conn())
			.await?)
	}

	/// Clock values for a batch of wallets in one query. Wallets unknown on
	/// this node are absent from the map.
	pub async fn batch_clock_values(
		&self,
		wallets: &[String],
	) -> ClockResult<HashMap<String, i32>> {
		let users = entities::CNodeUser::find()
			.filter(entities::cnode_user::Column::WalletPublicKey.is_in(wallets.iter().cloned()))
			.all(self.db.conn())
			.await?;

		Ok(users
			.into_iter()
			.map(|user| (user.wallet_public_key, user.clock))
			.collect())
	}

	/// Atomically advance a wallet's clock and append the clock record, with
	/// a bounded retry on concurrent-writer conflicts.
	pub async fn advance_clock(&self, wallet: &str, source: SourceTable) -> ClockResult<i32> {
		self.write_content_record(wallet, source, None).await
	}

	/// Write a content row together with its clock advancement in a single
	/// transaction. Returns the clock value assigned to the write.
	pub async fn write_content(&self, wallet: &str, content: ContentWrite) -> ClockResult<i32> {
		self.write_content_record(wallet, content.source_table(), Some(content))
			.await
	}

	async fn write_content_record(
		&self,
		wallet: &str,
		source: SourceTable,
		content: Option<ContentWrite>,
	) -> ClockResult<i32> {
		let mut attempt = 0;
		loop {
			attempt += 1;
			let txn = self.db.conn().begin().await?;
			match self.create_record_in_txn(&txn, wallet, source).await {
				Ok((cnode_user_uuid, clock)) => {
					if let Some(content) = &content {
						insert_content_row(&txn, cnode_user_uuid, clock, content).await?;
					}
					txn.commit().await?;
					return Ok(clock);
				}
				Err(e) if attempt < MAX_ADVANCE_ATTEMPTS && is_write_conflict(&e) => {
					let _ = txn.rollback().await;
					debug!(
						wallet,
						attempt, "clock advancement raced, retrying with fresh value: {e}"
					);
				}
				Err(e) => {
					let _ = txn.rollback().await;
					return Err(e);
				}
			}
		}
	}

	/// Transactional primitive: bump the user's clock (creating the user row
	/// on first write) and append the matching clock record. The caller owns
	/// the transaction and writes its content row with the returned clock
	/// before committing, so both land or neither does.
	pub async fn create_record_in_txn(
		&self,
		txn: &DatabaseTransaction,
		wallet: &str,
		source: SourceTable,
	) -> ClockResult<(Uuid, i32)> {
		let now = Utc::now();

		let existing = entities::CNodeUser::find()
			.filter(entities::cnode_user::Column::WalletPublicKey.eq(wallet))
			.one(txn)
			.await?;

		let (cnode_user_uuid, expected) = match existing {
			Some(user) => (user.cnode_user_uuid, user.clock),
			None => {
				let cnode_user_uuid = Uuid::new_v4();
				let inserted = entities::cnode_user::ActiveModel {
					cnode_user_uuid: Set(cnode_user_uuid),
					wallet_public_key: Set(wallet.to_string()),
					clock: Set(0),
					latest_block_number: Set(None),
					created_at: Set(now),
					updated_at: Set(now),
				}
				.insert(txn)
				.await;
				match inserted {
					Ok(_) => (cnode_user_uuid, 0),
					// A concurrent writer created the user first; surface it
					// as a conflict so the caller retries with a fresh read
					Err(e)
						if matches!(
							e.sql_err(),
							Some(SqlErr::UniqueConstraintViolation(_))
						) =>
					{
						return Err(ClockError::ConcurrencyConflict {
							wallet: wallet.to_string(),
							expected: 0,
						});
					}
					Err(e) => return Err(e.into()),
				}
			}
		};

		let new_clock = expected + 1;

		// Guarded update: only wins if no concurrent writer moved the clock
		// since we read it.
		let update = entities::CNodeUser::update_many()
			.col_expr(entities::cnode_user::Column::Clock, Expr::value(new_clock))
			.col_expr(entities::cnode_user::Column::UpdatedAt, Expr::value(now))
			.filter(entities::cnode_user::Column::CnodeUserUuid.eq(cnode_user_uuid))
			.filter(entities::cnode_user::Column::Clock.eq(expected))
			.exec(txn)
			.await?;

		if update.rows_affected != 1 {
			return Err(ClockError::ConcurrencyConflict {
				wallet: wallet.to_string(),
				expected,
			});
		}

		entities::clock_record::ActiveModel {
			cnode_user_uuid: Set(cnode_user_uuid),
			clock: Set(new_clock),
			source_table: Set(source.to_string()),
			created_at: Set(now),
		}
		.insert(txn)
		.await?;

		Ok((cnode_user_uuid, new_clock))
	}

	/// All clock records with `clock > since_clock`, ascending — the delta
	/// needed to bring a peer up to date. `limit` bounds page size for
	/// range-limited exports.
	pub async fn get_clock_records_since(
		&self,
		wallet: &str,
		since_clock: i32,
		limit: Option<u64>,
	) -> ClockResult<Vec<entities::clock_record::Model>> {
		let Some(user) = self.get_user(wallet).await? else {
			return Ok(Vec::new());
		};

		let mut query = entities::ClockRecord::find()
			.filter(entities::clock_record::Column::CnodeUserUuid.eq(user.cnode_user_uuid))
			.filter(entities::clock_record::Column::Clock.gt(since_clock))
			.order_by_asc(entities::clock_record::Column::Clock);
		if let Some(limit) = limit {
			query = query.limit(limit);
		}

		Ok(query.all(self.db.conn()).await?)
	}

	/// Delete all data for a wallet in one transaction: content rows, clock
	/// records and the user row itself. Returns the number of rows removed.
	pub async fn wipe_user_data(&self, wallet: &str) -> ClockResult<u64> {
		let Some(user) = self.get_user(wallet).await? else {
			return Ok(0);
		};
		let uuid = user.cnode_user_uuid;

		let txn = self.db.conn().begin().await?;
		let mut deleted = 0;

		deleted += entities::File::delete_many()
			.filter(entities::file::Column::CnodeUserUuid.eq(uuid))
			.exec(&txn)
			.await?
			.rows_affected;
		deleted += entities::Track::delete_many()
			.filter(entities::track::Column::CnodeUserUuid.eq(uuid))
			.exec(&txn)
			.await?
			.rows_affected;
		deleted += entities::AudiusUser::delete_many()
			.filter(entities::audius_user::Column::CnodeUserUuid.eq(uuid))
			.exec(&txn)
			.await?
			.rows_affected;
		deleted += entities::ClockRecord::delete_many()
			.filter(entities::clock_record::Column::CnodeUserUuid.eq(uuid))
			.exec(&txn)
			.await?
			.rows_affected;
		deleted += entities::CNodeUser::delete_many()
			.filter(entities::cnode_user::Column::CnodeUserUuid.eq(uuid))
			.exec(&txn)
			.await?
			.rows_affected;

		txn.commit().await?;

		warn!(wallet, rows = deleted, "wiped all local data for user");
		Ok(deleted)
	}
}

/// Losing a guarded update is the explicit conflict; sqlite can also report
/// the same race as a busy/locked error when two write transactions collide,
/// so both shapes go back around the retry loop.
fn is_write_conflict(e: &ClockError) -> bool {
	match e {
		ClockError::ConcurrencyConflict { .. } => true,
		ClockError::Database(db_err) => {
			let msg = db_err.to_string();
			msg.contains("database is locked") || msg.contains("snapshot")
		}
	}
}

async fn insert_content_row(
	txn: &DatabaseTransaction,
	cnode_user_uuid: Uuid,
	clock: i32,
	content: &ContentWrite,
) -> Result<(), DbErr> {
	let now = Utc::now();
	match content {
		ContentWrite::AudiusUser {
			blockchain_id,
			metadata,
		} => {
			entities::audius_user::ActiveModel {
				cnode_user_uuid: Set(cnode_user_uuid),
				clock: Set(clock),
				blockchain_id: Set(*blockchain_id),
				metadata: Set(metadata.clone()),
				created_at: Set(now),
			}
			.insert(txn)
			.await?;
		}
		ContentWrite::Track {
			blockchain_id,
			metadata,
		} => {
			entities::track::ActiveModel {
				cnode_user_uuid: Set(cnode_user_uuid),
				clock: Set(clock),
				blockchain_id: Set(*blockchain_id),
				metadata: Set(metadata.clone()),
				created_at: Set(now),
			}
			.insert(txn)
			.await?;
		}
		ContentWrite::File {
			multihash,
			storage_path,
			file_type,
		} => {
			entities::file::ActiveModel {
				cnode_user_uuid: Set(cnode_user_uuid),
				clock: Set(clock),
				multihash: Set(multihash.clone()),
				storage_path: Set(storage_path.clone()),
				file_type: Set(file_type.clone()),
				skipped: Set(false),
				created_at: Set(now),
			}
			.insert(txn)
			.await?;
		}
	}
	Ok(())
}
