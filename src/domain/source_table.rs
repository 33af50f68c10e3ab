//! Logical entity kinds tracked by the per-user clock

use serde::{Deserialize, Serialize};

/// Which logical entity a clock record points at.
///
/// Stored as a string column on `clock_records`; adding a variant is a
/// compile-time-checked change everywhere it is matched.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	Serialize,
	Deserialize,
	strum::Display,
	strum::EnumString,
	strum::EnumIter,
)]
pub enum SourceTable {
	AudiusUser,
	Track,
	File,
}
