//! Configuration management.

use crate::builder::cache::DEFAULT_CACHE_SIZE_LIMIT;
use crate::error::{HatchError, Result};
use crate::paths;
use crate::supervisor::SupervisorConfig;
use crate::variant::{VariantEntry, VariantTable, DEFAULT_REQUIREMENTS_PATH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable overriding `requires_database_client`.
pub const DATABASE_CLIENT_ENV: &str = "HATCH_DATABASE_CLIENT";

/// Persistent configuration for Hatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Whether the service needs a PostgreSQL client in its image
    pub requires_database_client: bool,
    /// Dependency manifest, relative to the project directory
    pub manifest_path: String,
    pub cache_size_limit_bytes: u64,
    /// Seconds between SIGTERM and SIGKILL when stopping the service
    pub grace_period_secs: u64,
    /// Watched paths, relative to the project directory
    pub watch_paths: Vec<String>,
    pub watch_debounce_ms: u64,
    pub log_level: String,
    /// Replaces the built-in variant table when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<VariantEntry>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            requires_database_client: false,
            manifest_path: DEFAULT_REQUIREMENTS_PATH.to_string(),
            cache_size_limit_bytes: DEFAULT_CACHE_SIZE_LIMIT,
            grace_period_secs: 10,
            watch_paths: vec![".".to_string()],
            watch_debounce_ms: 300,
            log_level: "info".to_string(),
            variants: None,
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_dir().join("config.json")
    }

    /// Load configuration from disk, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| HatchError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        serde_json::from_str(&content).map_err(|e| HatchError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HatchError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| HatchError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content)
            .map_err(|e| HatchError::IoError { path: path.to_path_buf(), source: e })
    }

    /// Applies `HATCH_DATABASE_CLIENT` (`1`/`true`/`yes` or `0`/`false`/`no`).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(DATABASE_CLIENT_ENV) {
            match parse_flag(&value) {
                Some(flag) => self.requires_database_client = flag,
                None => debug!(value = %value, "Ignoring unrecognized {}", DATABASE_CLIENT_ENV),
            }
        }
    }

    /// The configured variant table, or the built-in one.
    ///
    /// Manifest paths of the built-in variants follow `manifest_path`.
    pub fn variant_table(&self) -> Result<VariantTable> {
        match &self.variants {
            Some(entries) => VariantTable::new(entries.clone()),
            None => {
                let entries = VariantTable::builtin()
                    .entries()
                    .iter()
                    .cloned()
                    .map(|mut entry| {
                        entry.spec.python_requirements_path = self.manifest_path.clone();
                        entry
                    })
                    .collect();
                VariantTable::new(entries)
            }
        }
    }

    /// Supervisor settings derived from this configuration.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            grace_period: Duration::from_secs(self.grace_period_secs),
            watch_paths: self.watch_paths.iter().map(PathBuf::from).collect(),
            debounce: Duration::from_millis(self.watch_debounce_ms),
            env: Vec::new(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
