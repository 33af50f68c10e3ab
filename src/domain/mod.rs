//! Core domain types shared across the sync engine

pub mod replica_set;
pub mod source_table;

pub use replica_set::{compute_peer_set, NodeUserInfo, ReplicaSet};
pub use source_table::SourceTable;
