//! Data directory resolution and the application config file.

use std::{
	env, fs,
	path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Overrides the platform data directory.
pub const DATA_DIR_ENV: &str = "SHELF_DATA_DIR";

const CONFIG_FILE_NAME: &str = "shelf.json";

/// Platform-specific data directory resolution
pub fn default_data_dir() -> Result<PathBuf> {
	let dir = match env::var_os(DATA_DIR_ENV) {
		Some(dir) if !dir.is_empty() => PathBuf::from(dir),
		_ => platform_data_dir()?,
	};

	// Create directory if it doesn't exist
	fs::create_dir_all(&dir)
		.with_context(|| format!("Failed to create data directory {}", dir.display()))?;

	Ok(dir)
}

fn platform_data_dir() -> Result<PathBuf> {
	#[cfg(target_os = "linux")]
	let base = dirs::data_local_dir();

	#[cfg(not(target_os = "linux"))]
	let base = dirs::data_dir();

	Ok(base
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("shelf"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
	pub workers: usize,
	pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerSection {
	fn default() -> Self {
		Self {
			workers: 2,
			shutdown_timeout_secs: 30,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
	pub fanout_workers: usize,
	/// Without the leading dot.
	pub extensions: Vec<String>,
}

impl Default for ScanSection {
	fn default() -> Self {
		Self {
			fanout_workers: 4,
			extensions: ["m4b", "mp3", "m4a", "aac", "ogg", "flac", "wma"]
				.into_iter()
				.map(String::from)
				.collect(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBackSection {
	pub batch_size: usize,
}

impl Default for WriteBackSection {
	fn default() -> Self {
		Self { batch_size: 50 }
	}
}

/// Main application configuration, persisted as `shelf.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
	/// Config schema version
	pub version: u32,
	pub data_dir: PathBuf,
	/// Default tracing filter when `RUST_LOG` isn't set
	pub log_level: String,
	#[serde(default)]
	pub scheduler: SchedulerSection,
	#[serde(default)]
	pub scan: ScanSection,
	#[serde(default)]
	pub write_back: WriteBackSection,
}

impl AppConfig {
	pub const CURRENT_VERSION: u32 = 2;

	/// Load configuration from a specific data directory, writing the defaults there
	/// when no config exists yet.
	pub fn load_from(data_dir: &Path) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		if !config_path.exists() {
			warn!(path = %config_path.display(), "No config found, creating default");
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			return Ok(config);
		}

		info!(path = %config_path.display(), "Loading config");
		let json = fs::read_to_string(&config_path)
			.with_context(|| format!("Failed to read {}", config_path.display()))?;
		let mut config: Self = serde_json::from_str(&json)
			.with_context(|| format!("Failed to parse {}", config_path.display()))?;

		// The file may have been copied from another machine
		config.data_dir = data_dir.to_path_buf();

		if config.version < Self::CURRENT_VERSION {
			info!(
				from = config.version,
				to = Self::CURRENT_VERSION,
				"Migrating config"
			);
			config.migrate()?;
			config.save()?;
		} else if config.version > Self::CURRENT_VERSION {
			bail!(
				"config version {} is newer than this build supports ({})",
				config.version,
				Self::CURRENT_VERSION
			);
		}

		Ok(config)
	}

	#[must_use]
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::CURRENT_VERSION,
			data_dir,
			log_level: "info".to_owned(),
			scheduler: SchedulerSection::default(),
			scan: ScanSection::default(),
			write_back: WriteBackSection::default(),
		}
	}

	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join(CONFIG_FILE_NAME);
		fs::write(&config_path, serde_json::to_string_pretty(self)?)
			.with_context(|| format!("Failed to write {}", config_path.display()))?;
		info!(path = %config_path.display(), "Saved config");

		Ok(())
	}

	#[must_use]
	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	#[must_use]
	pub fn database_path(&self) -> PathBuf {
		self.data_dir.join("operations.db")
	}

	fn migrate(&mut self) -> Result<()> {
		loop {
			match self.version {
				// v0 had no sections, serde defaults already filled them in
				0 => self.version = 1,
				// v1 listed extensions with their leading dot
				1 => {
					for ext in &mut self.scan.extensions {
						*ext = ext.trim_start_matches('.').to_lowercase();
					}
					self.version = 2;
				}
				Self::CURRENT_VERSION => return Ok(()),
				v => bail!("Unknown config version: {v}"),
			}
		}
	}
}
