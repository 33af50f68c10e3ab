//! File entity, keyed by the clock value of its write
//!
//! `skipped` marks files whose content could not be fetched during a sync;
//! the row is still written so the clock sequence stays contiguous.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "files")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub cnode_user_uuid: Uuid,
	#[sea_orm(primary_key, auto_increment = false)]
	pub clock: i32,
	pub multihash: String,
	pub storage_path: String,
	pub file_type: String,
	pub skipped: bool,
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
