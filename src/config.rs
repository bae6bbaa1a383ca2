//! Stream configuration
//!
//! Loaded from a JSON file, every field optional:
//!
//! ```json
//! {
//!   "recovery_mode": "resync",
//!   "max_record_size": 16777216,
//!   "max_resync_scan_bytes": 1048576,
//!   "verify_replica_checksums": true
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::{Event, Logger};
use crate::op::{DEFAULT_MAX_RECORD_SIZE, MIN_RECORD_SIZE};

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// What replay does when a record cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    /// Stop at the first unreadable record
    #[default]
    Strict,
    /// Resync past damaged data and keep going
    Resync,
}

/// Tunables for edit log readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Replay failure policy (default: strict)
    #[serde(default)]
    pub recovery_mode: RecoveryMode,

    /// Largest record accepted by decode, in bytes (default: 16 MiB)
    #[serde(default = "default_max_record_size")]
    pub max_record_size: usize,

    /// How far a file resync scans past a bad record (default: 1 MiB)
    #[serde(default = "default_max_resync_scan_bytes")]
    pub max_resync_scan_bytes: u64,

    /// Compare checksums when a redundant stream fails over (default: true)
    #[serde(default = "default_verify_replica_checksums")]
    pub verify_replica_checksums: bool,
}

fn default_max_record_size() -> usize {
    DEFAULT_MAX_RECORD_SIZE
}

fn default_max_resync_scan_bytes() -> u64 {
    1024 * 1024
}

fn default_verify_replica_checksums() -> bool {
    true
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            recovery_mode: RecoveryMode::default(),
            max_record_size: default_max_record_size(),
            max_resync_scan_bytes: default_max_resync_scan_bytes(),
            verify_replica_checksums: default_verify_replica_checksums(),
        }
    }
}

impl StreamConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&content)?;

        Logger::info(
            Event::ConfigLoaded,
            &[
                ("path", &path.display().to_string()),
                ("recovery_mode", config.recovery_mode_str()),
            ],
        );
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: StreamConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_record_size < MIN_RECORD_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_record_size must be at least {}, got {}",
                MIN_RECORD_SIZE, self.max_record_size
            )));
        }
        if self.max_record_size > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_record_size cannot exceed {}",
                u32::MAX
            )));
        }
        if self.max_resync_scan_bytes == 0 {
            return Err(ConfigError::Invalid("max_resync_scan_bytes must be > 0".to_string()));
        }
        Ok(())
    }

    fn recovery_mode_str(&self) -> &'static str {
        match self.recovery_mode {
            RecoveryMode::Strict => "strict",
            RecoveryMode::Resync => "resync",
        }
    }
}
