//! Durable sync-job queue row
//!
//! `payload` is the MessagePack-encoded job request. Rows are removed on
//! completion or terminal failure when the queue's retention flags say so.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub id: String,
	pub target_endpoint: String,
	pub payload: Vec<u8>,
	pub status: String,
	pub created_at: DateTimeUtc,
	pub started_at: Option<DateTimeUtc>,
	pub completed_at: Option<DateTimeUtc>,
	pub error_message: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
