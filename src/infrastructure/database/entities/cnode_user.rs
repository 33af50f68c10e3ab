//! CNodeUser entity
//!
//! One row per user with content hosted on this node. `clock` is the user's
//! current (highest) clock value and is only ever advanced, never reused.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cnode_users")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub cnode_user_uuid: Uuid,
	#[sea_orm(unique)]
	pub wallet_public_key: String,
	pub clock: i32,
	pub latest_block_number: Option<i64>,
	pub created_at: DateTimeUtc,
	pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::clock_record::Entity")]
	ClockRecord,
}

impl Related<super::clock_record::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::ClockRecord.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
