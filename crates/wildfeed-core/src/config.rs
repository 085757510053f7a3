use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::Source;

/// Main configuration structure
///
/// This gets loaded from config file, and CLI flags override it.
/// Priority: CLI > File > Defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Load config from default location, falling back to defaults
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Save config to disk
    pub fn save(&self) -> crate::Result<PathBuf> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&config_path, contents)?;
        Ok(config_path)
    }

    /// XDG config dir on Linux, the platform equivalent elsewhere
    pub fn config_path() -> crate::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find config directory".into()))?
            .join("wildfeed");

        Ok(config_dir.join("config.toml"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL the `/{source}-observations` collections hang off
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Transport-level timeout per request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ApiConfig {
    pub fn retry_config(&self) -> wildfeed_api::RetryConfig {
        wildfeed_api::RetryConfig {
            max_retries: self.max_retries,
            initial_delay_ms: self.retry_delay_ms,
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Records requested from each source per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Start the next page when the last visible item is this close to the end
    #[serde(default = "default_prefetch_threshold")]
    pub prefetch_threshold: usize,

    /// Quiet period before a filter edit turns into a query
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Sources queried when the user hasn't picked any
    #[serde(default = "default_sources")]
    pub sources: Vec<Source>,
}

fn default_page_size() -> u32 {
    30
}

fn default_prefetch_threshold() -> usize {
    5
}

fn default_debounce_ms() -> u64 {
    350
}

fn default_sources() -> Vec<Source> {
    Source::ALL.to_vec()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            prefetch_threshold: default_prefetch_threshold(),
            debounce_ms: default_debounce_ms(),
            sources: default_sources(),
        }
    }
}

impl FeedConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Upper bound on how long pagination may hold the stats latch
    #[serde(default = "default_latch_timeout_ms")]
    pub latch_timeout_ms: u64,

    /// How long the "just switched views" flag stays set
    #[serde(default = "default_switch_flag_ttl_secs")]
    pub switch_flag_ttl_secs: u64,
}

fn default_latch_timeout_ms() -> u64 {
    3000
}

fn default_switch_flag_ttl_secs() -> u64 {
    2
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            latch_timeout_ms: default_latch_timeout_ms(),
            switch_flag_ttl_secs: default_switch_flag_ttl_secs(),
        }
    }
}

impl StatsConfig {
    pub fn latch_timeout(&self) -> Duration {
        Duration::from_millis(self.latch_timeout_ms)
    }

    pub fn switch_flag_ttl(&self) -> Duration {
        Duration::from_secs(self.switch_flag_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// SQLite file for persisted client state; platform data dir when unset
    pub db_path: Option<PathBuf>,

    /// Keep state in memory only
    #[serde(default)]
    pub ephemeral: bool,
}

impl CacheConfig {
    pub fn resolved_db_path(&self) -> crate::Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find data directory".into()))?;
        Ok(data_dir.join("wildfeed").join("state.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feed.page_size, 30);
        assert_eq!(config.feed.sources, Source::ALL.to_vec());
        assert_eq!(config.stats.latch_timeout(), Duration::from_secs(3));
        assert!(!config.cache.ephemeral);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        assert!(toml.contains("page_size"));
        assert!(toml.contains("latch_timeout_ms"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [api]
            base_url = "https://fobi.example.org/api"

            [feed]
            page_size = 12
            sources = ["bird", "general"]
            "#,
        )
        .unwrap();

        assert_eq!(config.api.base_url, "https://fobi.example.org/api");
        assert_eq!(config.api.max_retries, 2);
        assert_eq!(config.feed.page_size, 12);
        assert_eq!(config.feed.sources, vec![Source::Bird, Source::General]);
        assert_eq!(config.feed.debounce_ms, 350);
        assert_eq!(config.stats.switch_flag_ttl_secs, 2);
    }
}
