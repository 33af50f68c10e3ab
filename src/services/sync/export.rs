//! Building and applying clock-ordered export payloads
//!
//! An export is the delta one node serves to bring a lagging replica up to
//! date: the user's clock records above a floor, plus the content rows they
//! point at. Application is all-or-nothing: the user row, clock records and
//! content rows land in a single transaction, in ascending clock order.

use crate::infrastructure::clock::{ClockError, ClockStore};
use crate::infrastructure::database::{entities, Database};
use crate::networking::{
	ExportAudiusUser, ExportClockRecord, ExportFile, ExportTrack, UserExport,
};
use crate::domain::SourceTable;
use chrono::Utc;
use sea_orm::{
	sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter,
	QueryOrder, TransactionTrait,
};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{SyncError, SyncResult};

/// Result of applying an export locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
	/// Both sides already agree on the clock value
	UpToDate,
	/// The delta was applied; local clock moved from `from_clock` to
	/// `to_clock`
	Applied {
		from_clock: i32,
		to_clock: i32,
		records: usize,
	},
}

/// Build the export for one wallet starting at `clock_range_min`, capped at
/// `max_range` records. The reported `clock` is capped to the range end so a
/// partial export is internally consistent; repeated pulls walk the rest.
/// Returns `None` when the wallet is unknown on this node.
pub async fn build_export(
	db: &Database,
	clock_store: &ClockStore,
	wallet: &str,
	clock_range_min: i32,
	max_range: u64,
) -> SyncResult<Option<UserExport>> {
	let Some(user) = clock_store.get_user(wallet).await? else {
		return Ok(None);
	};

	let records = clock_store
		.get_clock_records_since(wallet, clock_range_min - 1, Some(max_range))
		.await?;

	let range_max = records.last().map(|record| record.clock).unwrap_or(user.clock);
	let reported_clock = user.clock.min(range_max);

	let uuid = user.cnode_user_uuid;
	let audius_users = entities::AudiusUser::find()
		.filter(entities::audius_user::Column::CnodeUserUuid.eq(uuid))
		.filter(entities::audius_user::Column::Clock.between(clock_range_min, range_max))
		.order_by_asc(entities::audius_user::Column::Clock)
		.all(db.conn())
		.await?
		.into_iter()
		.map(|row| ExportAudiusUser {
			clock: row.clock,
			blockchain_id: row.blockchain_id,
			metadata: row.metadata,
		})
		.collect();

	let tracks = entities::Track::find()
		.filter(entities::track::Column::CnodeUserUuid.eq(uuid))
		.filter(entities::track::Column::Clock.between(clock_range_min, range_max))
		.order_by_asc(entities::track::Column::Clock)
		.all(db.conn())
		.await?
		.into_iter()
		.map(|row| ExportTrack {
			clock: row.clock,
			blockchain_id: row.blockchain_id,
			metadata: row.metadata,
		})
		.collect();

	let files = entities::File::find()
		.filter(entities::file::Column::CnodeUserUuid.eq(uuid))
		.filter(entities::file::Column::Clock.between(clock_range_min, range_max))
		.order_by_asc(entities::file::Column::Clock)
		.all(db.conn())
		.await?
		.into_iter()
		.map(|row| ExportFile {
			clock: row.clock,
			multihash: row.multihash,
			storage_path: row.storage_path,
			file_type: row.file_type,
			skipped: row.skipped,
		})
		.collect();

	let clock_records = records
		.into_iter()
		.map(|record| {
			SourceTable::from_str(&record.source_table)
				.map(|source_table| ExportClockRecord {
					clock: record.clock,
					source_table,
				})
				.map_err(|_| SyncError::CorruptRecord {
					wallet: wallet.to_string(),
					clock: record.clock,
				})
		})
		.collect::<SyncResult<Vec<_>>>()?;

	Ok(Some(UserExport {
		wallet_public_key: user.wallet_public_key,
		clock: reported_clock,
		latest_block_number: user.latest_block_number,
		clock_records,
		audius_users,
		tracks,
		files,
	}))
}

/// Apply an export to local state.
///
/// Records at or below the local clock are verified against local history
/// and skipped (idempotent replay); a mismatch at an existing clock value is
/// an ordering violation and rejects the whole payload. The remaining delta
/// must be contiguous from `local + 1` and consistent with the reported
/// clock before anything is written.
#[instrument(skip(db, clock_store, export), fields(wallet = %export.wallet_public_key))]
pub async fn apply_export(
	db: &Database,
	clock_store: &ClockStore,
	export: &UserExport,
) -> SyncResult<ApplyOutcome> {
	let wallet = &export.wallet_public_key;
	let local_user = clock_store.get_user(wallet).await?;
	let local_max = local_user.as_ref().map(|user| user.clock).unwrap_or(0);

	if export.clock == local_max {
		info!(clock = local_max, "already up to date, nothing to apply");
		return Ok(ApplyOutcome::UpToDate);
	}
	if export.clock < local_max {
		return Err(SyncError::InconsistentClock {
			local: local_max,
			fetched: export.clock,
		});
	}

	// Verify the already-known prefix instead of re-applying it
	let replayed: Vec<&ExportClockRecord> = export
		.clock_records
		.iter()
		.filter(|record| record.clock <= local_max)
		.collect();
	if !replayed.is_empty() {
		verify_replayed_records(db, clock_store, wallet, &replayed).await?;
	}

	let fresh: Vec<&ExportClockRecord> = export
		.clock_records
		.iter()
		.filter(|record| record.clock > local_max)
		.collect();

	let Some(first) = fresh.first() else {
		// Export claims to be ahead but carries no new records
		return Err(SyncError::InconsistentExport {
			reported: export.clock,
			max_record: local_max,
		});
	};

	if first.clock != local_max + 1 {
		return Err(SyncError::NotContiguous {
			local: local_max,
			first: first.clock,
		});
	}
	for pair in fresh.windows(2) {
		if pair[1].clock != pair[0].clock + 1 {
			return Err(SyncError::NotContiguous {
				local: pair[0].clock,
				first: pair[1].clock,
			});
		}
	}

	let max_record = fresh
		.last()
		.map(|record| record.clock)
		.unwrap_or(local_max);
	if max_record != export.clock {
		return Err(SyncError::InconsistentExport {
			reported: export.clock,
			max_record,
		});
	}

	let audius_users: HashMap<i32, &ExportAudiusUser> =
		export.audius_users.iter().map(|row| (row.clock, row)).collect();
	let tracks: HashMap<i32, &ExportTrack> =
		export.tracks.iter().map(|row| (row.clock, row)).collect();
	let files: HashMap<i32, &ExportFile> =
		export.files.iter().map(|row| (row.clock, row)).collect();

	let now = Utc::now();
	let txn = db.conn().begin().await?;

	// Upsert the user row. The guarded update keeps a concurrent local
	// writer from being silently overwritten mid-apply.
	let cnode_user_uuid = match &local_user {
		Some(user) => {
			let update = entities::CNodeUser::update_many()
				.col_expr(entities::cnode_user::Column::Clock, Expr::value(export.clock))
				.col_expr(
					entities::cnode_user::Column::LatestBlockNumber,
					Expr::value(export.latest_block_number),
				)
				.col_expr(entities::cnode_user::Column::UpdatedAt, Expr::value(now))
				.filter(
					entities::cnode_user::Column::CnodeUserUuid.eq(user.cnode_user_uuid),
				)
				.filter(entities::cnode_user::Column::Clock.eq(local_max))
				.exec(&txn)
				.await?;
			if update.rows_affected != 1 {
				txn.rollback().await?;
				return Err(SyncError::Clock(ClockError::ConcurrencyConflict {
					wallet: wallet.to_string(),
					expected: local_max,
				}));
			}
			user.cnode_user_uuid
		}
		None => {
			let cnode_user_uuid = Uuid::new_v4();
			entities::cnode_user::ActiveModel {
				cnode_user_uuid: Set(cnode_user_uuid),
				wallet_public_key: Set(wallet.clone()),
				clock: Set(export.clock),
				latest_block_number: Set(export.latest_block_number),
				created_at: Set(now),
				updated_at: Set(now),
			}
			.insert(&txn)
			.await?;
			cnode_user_uuid
		}
	};

	// Apply the delta in ascending clock order so no row lands before a
	// dependency at a lower clock value.
	for record in &fresh {
		entities::clock_record::ActiveModel {
			cnode_user_uuid: Set(cnode_user_uuid),
			clock: Set(record.clock),
			source_table: Set(record.source_table.to_string()),
			created_at: Set(now),
		}
		.insert(&txn)
		.await?;

		match record.source_table {
			SourceTable::AudiusUser => {
				let row = audius_users.get(&record.clock).ok_or(SyncError::MissingContent {
					clock: record.clock,
					source_table: record.source_table,
				})?;
				entities::audius_user::ActiveModel {
					cnode_user_uuid: Set(cnode_user_uuid),
					clock: Set(row.clock),
					blockchain_id: Set(row.blockchain_id),
					metadata: Set(row.metadata.clone()),
					created_at: Set(now),
				}
				.insert(&txn)
				.await?;
			}
			SourceTable::Track => {
				let row = tracks.get(&record.clock).ok_or(SyncError::MissingContent {
					clock: record.clock,
					source_table: record.source_table,
				})?;
				entities::track::ActiveModel {
					cnode_user_uuid: Set(cnode_user_uuid),
					clock: Set(row.clock),
					blockchain_id: Set(row.blockchain_id),
					metadata: Set(row.metadata.clone()),
					created_at: Set(now),
				}
				.insert(&txn)
				.await?;
			}
			SourceTable::File => {
				let row = files.get(&record.clock).ok_or(SyncError::MissingContent {
					clock: record.clock,
					source_table: record.source_table,
				})?;
				entities::file::ActiveModel {
					cnode_user_uuid: Set(cnode_user_uuid),
					clock: Set(row.clock),
					multihash: Set(row.multihash.clone()),
					storage_path: Set(row.storage_path.clone()),
					file_type: Set(row.file_type.clone()),
					skipped: Set(row.skipped),
					created_at: Set(now),
				}
				.insert(&txn)
				.await?;
			}
		}
	}

	txn.commit().await?;

	info!(
		from = local_max,
		to = export.clock,
		records = fresh.len(),
		"applied export delta"
	);

	Ok(ApplyOutcome::Applied {
		from_clock: local_max,
		to_clock: export.clock,
		records: fresh.len(),
	})
}

/// Check that records we already hold match what the export replays for the
/// same clock values. A divergent record at an existing clock means two
/// histories disagree; that is a data-integrity bug, not something to merge.
async fn verify_replayed_records(
	db: &Database,
	clock_store: &ClockStore,
	wallet: &str,
	replayed: &[&ExportClockRecord],
) -> SyncResult<()> {
	let Some(user) = clock_store.get_user(wallet).await? else {
		return Ok(());
	};

	let min_clock = replayed
		.iter()
		.map(|record| record.clock)
		.min()
		.unwrap_or(1);
	let local_records = entities::ClockRecord::find()
		.filter(entities::clock_record::Column::CnodeUserUuid.eq(user.cnode_user_uuid))
		.filter(entities::clock_record::Column::Clock.gte(min_clock))
		.all(db.conn())
		.await?;
	let local_by_clock: HashMap<i32, String> = local_records
		.into_iter()
		.map(|record| (record.clock, record.source_table))
		.collect();

	for record in replayed {
		match local_by_clock.get(&record.clock) {
			Some(source_table) if *source_table == record.source_table.to_string() => {}
			_ => {
				warn!(
					wallet,
					clock = record.clock,
					"replayed record conflicts with local history"
				);
				return Err(SyncError::OrderingViolation {
					wallet: wallet.to_string(),
					clock: record.clock,
				});
			}
		}
	}

	Ok(())
}
