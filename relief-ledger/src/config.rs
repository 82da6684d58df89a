//! Configuration for the relief ledger

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest window chrono can represent in whole seconds
const MAX_WINDOW_SECS: u64 = (i64::MAX / 1_000) as u64;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Payment policy
    pub policy: PolicyConfig,

    /// Event log storage
    pub storage: StorageConfig,

    /// Logging
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "relief-ledger".to_string(),
            policy: PolicyConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Payment policy enforced by the rule chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Ceiling for a single payment
    pub max_single_payment: Decimal,

    /// Span in which a repeated beneficiary/vendor pair counts as duplicate
    pub duplicate_window: DuplicateWindow,

    /// Refuse allocations that would exceed the donations raised so far
    pub require_funding: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_single_payment: Decimal::from(10_000),
            duplicate_window: DuplicateWindow::Seconds(24 * 60 * 60), // 24h
            require_funding: false,
        }
    }
}

/// Duplicate-payment window
///
/// In TOML: `duplicate_window = "forever"` or `duplicate_window = { seconds = 3600 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateWindow {
    /// Any earlier committed payment for the pair is a duplicate
    Forever,
    /// Only committed payments younger than this many seconds
    Seconds(u64),
}

impl DuplicateWindow {
    /// Window as a duration, `None` for unbounded
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            DuplicateWindow::Forever => None,
            DuplicateWindow::Seconds(secs) => {
                Some(Duration::seconds((*secs).min(MAX_WINDOW_SECS) as i64))
            }
        }
    }

    /// Whether a payment made at `previous` still blocks one at `now`
    pub fn covers(&self, previous: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.as_duration() {
            None => true,
            Some(window) => now.signed_duration_since(previous) < window,
        }
    }
}

/// Storage backend for the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process memory only
    Memory,
    /// One JSON document per line in `path`
    JsonLines,
    /// RocksDB at `path` (requires the `rocksdb` feature)
    Rocksdb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend
    pub backend: StorageBackend,

    /// File (json_lines) or directory (rocksdb)
    pub path: PathBuf,

    /// fsync after every append
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("./data/relief-ledger"),
            sync_writes: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(ceiling) = std::env::var("RELIEF_MAX_SINGLE_PAYMENT") {
            config.policy.max_single_payment = ceiling.parse().map_err(|e| {
                crate::Error::Config(format!("RELIEF_MAX_SINGLE_PAYMENT: {}", e))
            })?;
        }

        if let Ok(window) = std::env::var("RELIEF_DUPLICATE_WINDOW_SECS") {
            config.policy.duplicate_window = if window.eq_ignore_ascii_case("forever") {
                DuplicateWindow::Forever
            } else {
                DuplicateWindow::Seconds(window.parse().map_err(|e| {
                    crate::Error::Config(format!("RELIEF_DUPLICATE_WINDOW_SECS: {}", e))
                })?)
            };
        }

        if let Ok(required) = std::env::var("RELIEF_REQUIRE_FUNDING") {
            config.policy.require_funding = required.parse().map_err(|e| {
                crate::Error::Config(format!("RELIEF_REQUIRE_FUNDING: {}", e))
            })?;
        }

        if let Ok(backend) = std::env::var("RELIEF_STORAGE_BACKEND") {
            config.storage.backend = match backend.as_str() {
                "memory" => StorageBackend::Memory,
                "json_lines" => StorageBackend::JsonLines,
                "rocksdb" => StorageBackend::Rocksdb,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown storage backend: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(path) = std::env::var("RELIEF_DATA_PATH") {
            config.storage.path = PathBuf::from(path);
        }

        if let Ok(level) = std::env::var("RELIEF_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the rule chain cannot enforce
    pub fn validate(&self) -> crate::Result<()> {
        if self.policy.max_single_payment <= Decimal::ZERO {
            return Err(crate::Error::Config(format!(
                "max_single_payment must be positive, got {}",
                self.policy.max_single_payment
            )));
        }
        Ok(())
    }
}
