//! Configuration for reward-ledger

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reward-ledger")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Fixed UTC offset (minutes) used for day boundaries.
    /// Streaks and daily caps roll over at local midnight of this offset.
    #[serde(default = "default_timezone_offset")]
    pub timezone_offset_minutes: i32,

    /// Upper bound for any single storage call, including pool checkout
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,

    /// SQLite connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Maximum age of a served leaderboard snapshot (0 = always recompute)
    #[serde(default = "default_leaderboard_staleness")]
    pub leaderboard_max_staleness_secs: u64,

    /// Number of leaderboard rows kept in the snapshot
    #[serde(default = "default_leaderboard_depth")]
    pub leaderboard_cache_depth: u32,

    /// Display name of the token currency
    #[serde(default = "default_currency_name")]
    pub currency_name: String,

    /// Optional TOML catalog used to seed rules and badges on first start
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

fn default_http_port() -> u16 {
    8095
}

fn default_timezone_offset() -> i32 {
    60
}

fn default_storage_timeout_ms() -> u64 {
    5_000
}

fn default_pool_size() -> u32 {
    8
}

fn default_leaderboard_staleness() -> u64 {
    30
}

fn default_leaderboard_depth() -> u32 {
    100
}

fn default_currency_name() -> String {
    "AJL".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            timezone_offset_minutes: default_timezone_offset(),
            storage_timeout_ms: default_storage_timeout_ms(),
            pool_size: default_pool_size(),
            leaderboard_max_staleness_secs: default_leaderboard_staleness(),
            leaderboard_cache_depth: default_leaderboard_depth(),
            currency_name: default_currency_name(),
            catalog_path: None,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get SQLite database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("ledger.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn leaderboard_max_staleness(&self) -> Duration {
        Duration::from_secs(self.leaderboard_max_staleness_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("http_port = 9000\ncurrency_name = \"GEM\"").unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.currency_name, "GEM");
        assert_eq!(config.storage_timeout_ms, 5_000);
        assert_eq!(config.timezone_offset_minutes, 60);
        assert!(config.catalog_path.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage_dir = dir.path().to_path_buf();
        config.pool_size = 3;

        config.save(config.config_path()).unwrap();
        let loaded = Config::load(config.config_path()).unwrap();

        assert_eq!(loaded.pool_size, 3);
        assert_eq!(loaded.database_path(), dir.path().join("ledger.db"));
    }
}
