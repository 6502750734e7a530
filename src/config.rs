//! Application configuration
//!
//! Parsed from a TOML file given as a local path or an http(s) URL. Every
//! field has a default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fetch::{Fetcher, HttpFetcher};
use crate::registry::SourceSeed;
use crate::registry::source::MIN_INTERVAL_MINUTES;

// ============================================================================
// App Config Types
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AppConfig {
    /// Merged proxy list, default "./data/all_proxies.yaml"
    #[serde(default = "default_proxies_file")]
    pub proxies_file: String,

    /// Source registry, default "./data/sync_sources.json"
    #[serde(default = "default_sources_file")]
    pub sources_file: String,

    /// Seconds between scheduler passes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds to wait after a scheduler pass fails unexpectedly
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// User agent sent when fetching sources
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Country lookup endpoint, `{}` is replaced by the address
    #[serde(default = "default_lookup_url")]
    pub lookup_url: String,

    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,

    /// Minimum delay between two lookup requests
    #[serde(default = "default_lookup_delay")]
    pub lookup_delay_ms: u64,

    /// Sources seeded into a new registry; empty means the built-in list
    #[serde(default)]
    pub default_sources: Vec<SourceSeed>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            proxies_file: default_proxies_file(),
            sources_file: default_sources_file(),
            poll_interval_secs: default_poll_interval(),
            error_backoff_secs: default_error_backoff(),
            fetch_timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
            lookup_url: default_lookup_url(),
            lookup_timeout_secs: default_lookup_timeout(),
            lookup_delay_ms: default_lookup_delay(),
            default_sources: Vec::new(),
        }
    }
}

// ============================================================================
// App Config Implementation
// ============================================================================

impl AppConfig {
    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("error_backoff_secs", self.error_backoff_secs),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("lookup_timeout_secs", self.lookup_timeout_secs),
        ] {
            if value == 0 {
                bail!("{} must be positive", name);
            }
        }

        if !self.lookup_url.contains("{}") {
            bail!("lookup_url must contain a {{}} placeholder: {}", self.lookup_url);
        }

        if let Some(seed) = self
            .default_sources
            .iter()
            .find(|seed| seed.interval_minutes < MIN_INTERVAL_MINUTES)
        {
            bail!(
                "Default source '{}' has interval {} minutes, minimum is {}",
                seed.name,
                seed.interval_minutes,
                MIN_INTERVAL_MINUTES
            );
        }
        Ok(())
    }

    /// Load config from file path
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::from_toml(&content)
    }

    /// Load config from file path or URL
    pub async fn load(path_or_url: &str) -> Result<Self> {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            Self::from_url(path_or_url).await
        } else {
            let expanded = expand_tilde(path_or_url);
            Self::from_file(Path::new(&expanded)).await
        }
    }

    /// Like [`AppConfig::load`], but a missing local file yields the defaults
    pub async fn load_or_default(path_or_url: &str) -> Result<Self> {
        let is_url = path_or_url.starts_with("http://") || path_or_url.starts_with("https://");
        if !is_url && !Path::new(&expand_tilde(path_or_url)).exists() {
            debug!("Config {} not found, using defaults", path_or_url);
            return Ok(Self::default());
        }
        Self::load(path_or_url).await
    }

    /// Load config from URL
    pub async fn from_url(url: &str) -> Result<Self> {
        let fetcher = HttpFetcher::new(&default_user_agent(), Duration::from_secs(30))?;
        let content = fetcher.fetch(url).await?;
        Self::from_toml(&content)
    }

    pub fn proxies_path(&self) -> String {
        expand_tilde(&self.proxies_file)
    }

    pub fn sources_path(&self) -> String {
        expand_tilde(&self.sources_file)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn lookup_delay(&self) -> Duration {
        Duration::from_millis(self.lookup_delay_ms)
    }
}

// ============================================================================
// Path Utilities
// ============================================================================

/// Expand ~ to home directory in path
pub fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = dirs_home()
    {
        return path.replacen("~", &home, 1);
    }
    path.to_string()
}

fn dirs_home() -> Option<String> {
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(windows))]
    {
        std::env::var("HOME").ok()
    }
}

fn default_proxies_file() -> String {
    "./data/all_proxies.yaml".to_string()
}

fn default_sources_file() -> String {
    "./data/sync_sources.json".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_error_backoff() -> u64 {
    60
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    "Shadowrocket/1995 CFNetwork/1331.0.7 Darwin/21.4.0".to_string()
}

fn default_lookup_url() -> String {
    "http://ip-api.com/json/{}".to_string()
}

fn default_lookup_timeout() -> u64 {
    3
}

fn default_lookup_delay() -> u64 {
    1500
}
