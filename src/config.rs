use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{CacheConfig, DEFAULT_SEARCH_TTL, DEFAULT_TTL, SCHEMA_VERSION};
use crate::error::ConfigError;
use crate::fetcher::{FetcherConfig, DEFAULT_USER_AGENT};
use crate::musicbrainz::DEFAULT_BASE_URL;

const DAY_SECS: u64 = 24 * 60 * 60;

fn days(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(DAY_SECS))
}

/// Per-file budget for all network calls of one resolution.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration defaults that can be saved to a file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_ttl_days: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,

    /// Timeout of a single HTTP attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Deadline for resolving one file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Config {
    /// Create a new empty config
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the config file path (`<config dir>/genrebender/config.toml`)
    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("genrebender").join("config.toml"))
    }

    /// Load config from the default path; a missing file is an empty config
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::new());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::get_config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;
        Ok(())
    }

    /// Merge this config with another, preferring values from other
    pub fn merge(&mut self, other: &Config) {
        if other.cache_dir.is_some() {
            self.cache_dir = other.cache_dir.clone();
        }
        if other.ttl_days.is_some() {
            self.ttl_days = other.ttl_days;
        }
        if other.search_ttl_days.is_some() {
            self.search_ttl_days = other.search_ttl_days;
        }
        if other.schema_version.is_some() {
            self.schema_version = other.schema_version;
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
        if other.item_timeout_secs.is_some() {
            self.item_timeout_secs = other.item_timeout_secs;
        }
        if other.max_attempts.is_some() {
            self.max_attempts = other.max_attempts;
        }
        if other.rate_limit_ms.is_some() {
            self.rate_limit_ms = other.rate_limit_ms;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url.clone();
        }
        if other.user_agent.is_some() {
            self.user_agent = other.user_agent.clone();
        }
    }

    /// Cache settings, falling back to built-in defaults
    pub fn cache_config(&self) -> Result<CacheConfig, ConfigError> {
        let dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => CacheConfig::default_dir().ok_or(ConfigError::NoCacheDir)?,
        };
        Ok(CacheConfig {
            dir,
            ttl: self.ttl_days.map_or(DEFAULT_TTL, days),
            search_ttl: self.search_ttl_days.map_or(DEFAULT_SEARCH_TTL, days),
            schema_version: self.schema_version.unwrap_or(SCHEMA_VERSION),
        })
    }

    /// HTTP settings, falling back to built-in defaults
    pub fn fetcher_config(&self) -> FetcherConfig {
        let mut fetcher = FetcherConfig::default();
        if let Some(secs) = self.timeout_secs {
            fetcher.request_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.max_attempts {
            fetcher.max_attempts = attempts.max(1);
        }
        if let Some(ms) = self.rate_limit_ms {
            fetcher.rate_limit = Duration::from_millis(ms);
        }
        if let Some(ua) = &self.user_agent {
            fetcher.user_agent = ua.clone();
        }
        fetcher
    }

    pub fn item_timeout(&self) -> Duration {
        self.item_timeout_secs
            .map_or(DEFAULT_ITEM_TIMEOUT, Duration::from_secs)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Print the config in a human-readable format
    pub fn print(&self, title: &str) {
        println!("{}:", title);

        if let Some(dir) = &self.cache_dir {
            println!("  Cache directory:    {}", dir.display());
        }
        if let Some(days) = self.ttl_days {
            println!("  Lookup TTL:         {} days", days);
        }
        if let Some(days) = self.search_ttl_days {
            println!("  Search TTL:         {} days", days);
        }
        if let Some(version) = self.schema_version {
            println!("  Schema version:     {}", version);
        }
        if let Some(secs) = self.timeout_secs {
            println!("  Request timeout:    {} seconds", secs);
        }
        if let Some(secs) = self.item_timeout_secs {
            println!("  Per-file timeout:   {} seconds", secs);
        }
        if let Some(attempts) = self.max_attempts {
            println!("  Max attempts:       {}", attempts);
        }
        if let Some(ms) = self.rate_limit_ms {
            println!("  Request spacing:    {} ms", ms);
        }
        if let Some(url) = &self.base_url {
            println!("  MusicBrainz URL:    {}", url);
        }
        if let Some(ua) = &self.user_agent {
            println!("  User agent:         {}", ua);
        }
    }

    /// Every setting with its effective value
    pub fn builtin_defaults() -> Self {
        Config {
            cache_dir: CacheConfig::default_dir(),
            ttl_days: Some(DEFAULT_TTL.as_secs() / DAY_SECS),
            search_ttl_days: Some(DEFAULT_SEARCH_TTL.as_secs() / DAY_SECS),
            schema_version: Some(SCHEMA_VERSION),
            timeout_secs: Some(FetcherConfig::default().request_timeout.as_secs()),
            item_timeout_secs: Some(DEFAULT_ITEM_TIMEOUT.as_secs()),
            max_attempts: Some(FetcherConfig::default().max_attempts),
            rate_limit_ms: Some(FetcherConfig::default().rate_limit.as_millis() as u64),
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::new());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            ttl_days: Some(10),
            base_url: Some("http://localhost:5000/ws/2".to_string()),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("ttl_days = 10"));
        assert!(!text.contains("search_ttl_days"));
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "ttl_days = \"soon\"").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = Config {
            ttl_days: Some(30),
            max_attempts: Some(5),
            ..Config::default()
        };
        base.merge(&Config {
            ttl_days: Some(1),
            ..Config::default()
        });
        assert_eq!(base.ttl_days, Some(1));
        assert_eq!(base.max_attempts, Some(5));
    }

    #[test]
    fn test_effective_settings() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/tmp/gb")),
            search_ttl_days: Some(2),
            max_attempts: Some(0),
            rate_limit_ms: Some(0),
            ..Config::default()
        };
        let cache = config.cache_config().unwrap();
        assert_eq!(cache.dir, PathBuf::from("/tmp/gb"));
        assert_eq!(cache.ttl, DEFAULT_TTL);
        assert_eq!(cache.search_ttl, Duration::from_secs(2 * DAY_SECS));
        assert_eq!(cache.schema_version, SCHEMA_VERSION);

        let fetcher = config.fetcher_config();
        assert_eq!(fetcher.max_attempts, 1);
        assert_eq!(fetcher.rate_limit, Duration::ZERO);
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.item_timeout(), DEFAULT_ITEM_TIMEOUT);
    }

    #[test]
    fn test_huge_values_saturate() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/tmp/gb")),
            ttl_days: Some(u64::MAX),
            search_ttl_days: Some(u64::MAX / 2),
            ..Config::default()
        };
        let cache = config.cache_config().unwrap();
        assert_eq!(cache.ttl, Duration::from_secs(u64::MAX));
        assert_eq!(cache.search_ttl, Duration::from_secs(u64::MAX));
    }
}
