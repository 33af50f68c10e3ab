//! Node configuration

use crate::infrastructure::queue::QueueOptions;
use crate::services::coordinator::CoordinatorOptions;
use crate::services::sync::SyncWorkerOptions;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const CONFIG_FILE: &str = "cn-sync.json";

/// Versioned configuration with forward migration
pub trait Migrate {
	fn current_version(&self) -> u32;
	fn target_version() -> u32;
	fn migrate(&mut self) -> Result<()>;
}

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path (database and config live here)
	pub data_dir: PathBuf,

	/// This node's own public endpoint
	pub endpoint: String,

	/// Logging level
	pub log_level: String,

	/// Maximum concurrent sync jobs
	pub sync_concurrency: usize,

	/// Drop durable job rows on completion
	pub remove_on_complete: bool,

	/// Drop durable job rows on terminal failure
	pub remove_on_fail: bool,

	/// Seconds between audit cycles
	pub audit_interval_secs: u64,

	/// Users are spread across this many audit slices by user id
	pub modulo_base: i64,

	/// Per-request timeout for peer calls, seconds
	pub peer_timeout_secs: u64,

	/// How long to wait for a peer to catch up after a sync request, seconds
	pub sync_monitor_timeout_secs: u64,

	/// Poll spacing while monitoring a peer's clock, seconds
	pub sync_monitor_poll_secs: u64,

	/// Maximum clock records served in a single export
	pub max_export_clock_range: u64,
}

impl NodeConfig {
	/// Load configuration from a data directory, creating the default when
	/// no config file exists yet.
	pub fn load_from(data_dir: &PathBuf, endpoint: &str) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE);

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: NodeConfig = serde_json::from_str(&json)?;

			// Apply migrations if needed
			if config.version < Self::target_version() {
				info!(
					"Migrating config from v{} to v{}",
					config.version,
					Self::target_version()
				);
				config.migrate()?;
				config.save()?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(data_dir.clone(), endpoint);
			config.save()?;
			Ok(config)
		}
	}

	/// Create default configuration for a data directory and endpoint
	pub fn default_with_dir(data_dir: PathBuf, endpoint: &str) -> Self {
		Self {
			version: Self::target_version(),
			data_dir,
			endpoint: endpoint.to_string(),
			log_level: "info".to_string(),
			sync_concurrency: 10,
			remove_on_complete: true,
			remove_on_fail: true,
			audit_interval_secs: 3600,
			modulo_base: 24,
			peer_timeout_secs: 30,
			sync_monitor_timeout_secs: 360,
			sync_monitor_poll_secs: 15,
			max_export_clock_range: 10_000,
		}
	}

	/// Save configuration to disk
	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join(CONFIG_FILE);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	/// Path of the node database
	pub fn db_path(&self) -> PathBuf {
		self.data_dir.join("cn-sync.db")
	}

	/// Ensure all required directories exist
	pub fn ensure_directories(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;
		Ok(())
	}

	pub fn peer_timeout(&self) -> Duration {
		Duration::from_secs(self.peer_timeout_secs)
	}

	pub fn queue_options(&self) -> QueueOptions {
		QueueOptions {
			concurrency: self.sync_concurrency,
			remove_on_complete: self.remove_on_complete,
			remove_on_fail: self.remove_on_fail,
		}
	}

	pub fn worker_options(&self) -> SyncWorkerOptions {
		SyncWorkerOptions {
			self_endpoint: self.endpoint.clone(),
			monitor_timeout: Duration::from_secs(self.sync_monitor_timeout_secs),
			monitor_poll: Duration::from_secs(self.sync_monitor_poll_secs),
		}
	}

	pub fn coordinator_options(&self) -> CoordinatorOptions {
		CoordinatorOptions {
			self_endpoint: self.endpoint.clone(),
			audit_interval: Duration::from_secs(self.audit_interval_secs),
			modulo_base: self.modulo_base,
		}
	}
}

impl Migrate for NodeConfig {
	fn current_version(&self) -> u32 {
		self.version
	}

	fn target_version() -> u32 {
		1 // Current schema version
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			0 => {
				self.version = 1;
				Ok(())
			}
			1 => Ok(()),
			v => Err(anyhow!("Unknown config version: {}", v)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sane() {
		let config = NodeConfig::default_with_dir(PathBuf::from("/tmp/cn"), "https://cn1.test");
		assert_eq!(config.version, NodeConfig::target_version());
		assert_eq!(config.sync_concurrency, 10);
		assert!(config.remove_on_complete);
		assert!(config.remove_on_fail);
		assert_eq!(config.db_path(), PathBuf::from("/tmp/cn/cn-sync.db"));
	}

	#[test]
	fn save_and_load_round_trip() {
		let tmp = tempfile::TempDir::new().unwrap();
		let data_dir = tmp.path().to_path_buf();

		let mut config = NodeConfig::default_with_dir(data_dir.clone(), "https://cn1.test");
		config.sync_concurrency = 4;
		config.save().unwrap();

		let loaded = NodeConfig::load_from(&data_dir, "ignored-when-file-exists").unwrap();
		assert_eq!(loaded.endpoint, "https://cn1.test");
		assert_eq!(loaded.sync_concurrency, 4);
	}

	#[test]
	fn migrate_rejects_future_versions() {
		let mut config = NodeConfig::default_with_dir(PathBuf::from("/tmp/cn"), "https://cn1.test");
		config.version = 99;
		assert!(config.migrate().is_err());
	}
}
