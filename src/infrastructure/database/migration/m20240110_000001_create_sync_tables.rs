//! Initial migration for the replication data model and the durable job queue

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		// Create cnode_users table
		manager
			.create_table(
				Table::create()
					.table(CnodeUsers::Table)
					.if_not_exists()
					.col(ColumnDef::new(CnodeUsers::CnodeUserUuid).uuid().not_null().primary_key())
					.col(ColumnDef::new(CnodeUsers::WalletPublicKey).string().not_null().unique_key())
					.col(ColumnDef::new(CnodeUsers::Clock).integer().not_null().default(0))
					.col(ColumnDef::new(CnodeUsers::LatestBlockNumber).big_integer())
					.col(ColumnDef::new(CnodeUsers::CreatedAt).timestamp_with_time_zone().not_null())
					.col(ColumnDef::new(CnodeUsers::UpdatedAt).timestamp_with_time_zone().not_null())
					.to_owned(),
			)
			.await?;

		// Create clock_records change log with composite (user, clock) key
		manager
			.create_table(
				Table::create()
					.table(ClockRecords::Table)
					.if_not_exists()
					.col(ColumnDef::new(ClockRecords::CnodeUserUuid).uuid().not_null())
					.col(ColumnDef::new(ClockRecords::Clock).integer().not_null())
					.col(ColumnDef::new(ClockRecords::SourceTable).string().not_null())
					.col(ColumnDef::new(ClockRecords::CreatedAt).timestamp_with_time_zone().not_null())
					.primary_key(
						Index::create()
							.col(ClockRecords::CnodeUserUuid)
							.col(ClockRecords::Clock),
					)
					.foreign_key(
						ForeignKey::create()
							.from(ClockRecords::Table, ClockRecords::CnodeUserUuid)
							.to(CnodeUsers::Table, CnodeUsers::CnodeUserUuid)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		// Content tables share the (user, clock) key shape with clock_records
		manager
			.create_table(
				Table::create()
					.table(AudiusUsers::Table)
					.if_not_exists()
					.col(ColumnDef::new(AudiusUsers::CnodeUserUuid).uuid().not_null())
					.col(ColumnDef::new(AudiusUsers::Clock).integer().not_null())
					.col(ColumnDef::new(AudiusUsers::BlockchainId).big_integer())
					.col(ColumnDef::new(AudiusUsers::Metadata).json().not_null())
					.col(ColumnDef::new(AudiusUsers::CreatedAt).timestamp_with_time_zone().not_null())
					.primary_key(
						Index::create()
							.col(AudiusUsers::CnodeUserUuid)
							.col(AudiusUsers::Clock),
					)
					.foreign_key(
						ForeignKey::create()
							.from(AudiusUsers::Table, AudiusUsers::CnodeUserUuid)
							.to(CnodeUsers::Table, CnodeUsers::CnodeUserUuid)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Tracks::Table)
					.if_not_exists()
					.col(ColumnDef::new(Tracks::CnodeUserUuid).uuid().not_null())
					.col(ColumnDef::new(Tracks::Clock).integer().not_null())
					.col(ColumnDef::new(Tracks::BlockchainId).big_integer())
					.col(ColumnDef::new(Tracks::Metadata).json().not_null())
					.col(ColumnDef::new(Tracks::CreatedAt).timestamp_with_time_zone().not_null())
					.primary_key(Index::create().col(Tracks::CnodeUserUuid).col(Tracks::Clock))
					.foreign_key(
						ForeignKey::create()
							.from(Tracks::Table, Tracks::CnodeUserUuid)
							.to(CnodeUsers::Table, CnodeUsers::CnodeUserUuid)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Files::Table)
					.if_not_exists()
					.col(ColumnDef::new(Files::CnodeUserUuid).uuid().not_null())
					.col(ColumnDef::new(Files::Clock).integer().not_null())
					.col(ColumnDef::new(Files::Multihash).string().not_null())
					.col(ColumnDef::new(Files::StoragePath).string().not_null())
					.col(ColumnDef::new(Files::FileType).string().not_null())
					.col(ColumnDef::new(Files::Skipped).boolean().not_null().default(false))
					.col(ColumnDef::new(Files::CreatedAt).timestamp_with_time_zone().not_null())
					.primary_key(Index::create().col(Files::CnodeUserUuid).col(Files::Clock))
					.foreign_key(
						ForeignKey::create()
							.from(Files::Table, Files::CnodeUserUuid)
							.to(CnodeUsers::Table, CnodeUsers::CnodeUserUuid)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		// Create sync_jobs durable queue store
		manager
			.create_table(
				Table::create()
					.table(SyncJobs::Table)
					.if_not_exists()
					.col(ColumnDef::new(SyncJobs::Id).string().not_null().primary_key())
					.col(ColumnDef::new(SyncJobs::TargetEndpoint).string().not_null())
					.col(ColumnDef::new(SyncJobs::Payload).binary().not_null())
					.col(ColumnDef::new(SyncJobs::Status).string().not_null())
					.col(ColumnDef::new(SyncJobs::CreatedAt).timestamp_with_time_zone().not_null())
					.col(ColumnDef::new(SyncJobs::StartedAt).timestamp_with_time_zone())
					.col(ColumnDef::new(SyncJobs::CompletedAt).timestamp_with_time_zone())
					.col(ColumnDef::new(SyncJobs::ErrorMessage).string())
					.to_owned(),
			)
			.await?;

		// Delta reads scan a user's records above a clock floor
		manager
			.create_index(
				Index::create()
					.name("idx_clock_records_user_clock")
					.table(ClockRecords::Table)
					.col(ClockRecords::CnodeUserUuid)
					.col(ClockRecords::Clock)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_sync_jobs_status")
					.table(SyncJobs::Table)
					.col(SyncJobs::Status)
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(SyncJobs::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Files::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Tracks::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(AudiusUsers::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(ClockRecords::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(CnodeUsers::Table).to_owned())
			.await?;
		Ok(())
	}
}

#[derive(Iden)]
enum CnodeUsers {
	Table,
	CnodeUserUuid,
	WalletPublicKey,
	Clock,
	LatestBlockNumber,
	CreatedAt,
	UpdatedAt,
}

#[derive(Iden)]
enum ClockRecords {
	Table,
	CnodeUserUuid,
	Clock,
	SourceTable,
	CreatedAt,
}

#[derive(Iden)]
enum AudiusUsers {
	Table,
	CnodeUserUuid,
	Clock,
	BlockchainId,
	Metadata,
	CreatedAt,
}

#[derive(Iden)]
enum Tracks {
	Table,
	CnodeUserUuid,
	Clock,
	BlockchainId,
	Metadata,
	CreatedAt,
}

#[derive(Iden)]
enum Files {
	Table,
	CnodeUserUuid,
	Clock,
	Multihash,
	StoragePath,
	FileType,
	Skipped,
	CreatedAt,
}

#[derive(Iden)]
enum SyncJobs {
	Table,
	Id,
	TargetEndpoint,
	Payload,
	Status,
	CreatedAt,
	StartedAt,
	CompletedAt,
	ErrorMessage,
}
