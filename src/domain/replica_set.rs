//! Replica-set membership and peer-set derivation

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The (primary, secondary1, secondary2) node assignment for one user.
///
/// Slots may be unassigned while a user's replica set is being provisioned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSet {
	pub primary: Option<String>,
	pub secondary1: Option<String>,
	pub secondary2: Option<String>,
}

impl ReplicaSet {
	pub fn new(
		primary: impl Into<String>,
		secondary1: impl Into<String>,
		secondary2: impl Into<String>,
	) -> Self {
		Self {
			primary: Some(primary.into()),
			secondary1: Some(secondary1.into()),
			secondary2: Some(secondary2.into()),
		}
	}

	/// All assigned, non-empty endpoints in slot order.
	pub fn assigned(&self) -> impl Iterator<Item = &str> {
		[&self.primary, &self.secondary1, &self.secondary2]
			.into_iter()
			.filter_map(|slot| slot.as_deref())
			.filter(|endpoint| !endpoint.is_empty())
	}

	/// Assigned secondary endpoints in slot order.
	pub fn secondaries(&self) -> impl Iterator<Item = &str> {
		[&self.secondary1, &self.secondary2]
			.into_iter()
			.filter_map(|slot| slot.as_deref())
			.filter(|endpoint| !endpoint.is_empty())
	}

	pub fn is_primary(&self, endpoint: &str) -> bool {
		self.primary.as_deref() == Some(endpoint)
	}

	pub fn is_secondary(&self, endpoint: &str) -> bool {
		self.secondaries().any(|secondary| secondary == endpoint)
	}
}

/// One user hosted on this node, with its current replica-set assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUserInfo {
	pub user_id: i64,
	pub wallet_public_key: String,
	pub replica_set: ReplicaSet,
}

/// Collect the full peer neighborhood for this node: every endpoint that
/// appears in any hosted user's replica set, minus unassigned slots and
/// minus this node itself.
pub fn compute_peer_set(users: &[NodeUserInfo], self_endpoint: &str) -> BTreeSet<String> {
	users
		.iter()
		.flat_map(|user| user.replica_set.assigned())
		.filter(|endpoint| *endpoint != self_endpoint)
		.map(str::to_owned)
		.collect()
}
