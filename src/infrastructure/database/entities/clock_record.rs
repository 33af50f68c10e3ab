//! ClockRecord entity
//!
//! Append-only change log: one row per content mutation, keyed by
//! `(cnode_user_uuid, clock)`. Rows are never updated after creation and are
//! deleted only by a full user-data wipe.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "clock_records")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub cnode_user_uuid: Uuid,
	#[sea_orm(primary_key, auto_increment = false)]
	pub clock: i32,
	pub source_table: String,
	pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::cnode_user::Entity",
		from = "Column::CnodeUserUuid",
		to = "super::cnode_user::Column::CnodeUserUuid"
	)]
	CNodeUser,
}

impl Related<super::cnode_user::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::CNodeUser.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
