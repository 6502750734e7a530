//! Configured proxy source

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::model::Protocol;

/// Default sync interval for sources added without one
pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;

/// Smallest sync interval accepted from callers
pub const MIN_INTERVAL_MINUTES: u32 = 5;

/// Remote URL that yields proxy records, with its sync bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySource {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Best-guess protocol of the content, set after the first good sync
    #[serde(default, deserialize_with = "lenient_protocol")]
    pub protocol_hint: Option<Protocol>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub fail_count: u64,
    /// Unix time of the last sync attempt
    #[serde(default, rename = "last_sync")]
    pub last_sync_timestamp: Option<f64>,
    #[serde(default)]
    pub last_proxy_count: usize,
    #[serde(default = "default_interval")]
    pub sync_interval_minutes: u32,
    #[serde(default)]
    pub next_sync_timestamp: Option<f64>,
}

impl ProxySource {
    pub fn new(name: &str, url: &str, interval_minutes: u32, now: f64) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            enabled: true,
            protocol_hint: None,
            success_count: 0,
            fail_count: 0,
            last_sync_timestamp: None,
            last_proxy_count: 0,
            sync_interval_minutes: interval_minutes,
            next_sync_timestamp: Some(now),
        }
    }

    /// Percentage of successful sync attempts, 0 before the first attempt
    pub fn success_rate(&self) -> f64 {
        let attempts = self.success_count + self.fail_count;
        if attempts == 0 {
            return 0.0;
        }
        self.success_count as f64 / attempts as f64 * 100.0
    }

    pub fn status(&self) -> SourceStatus {
        if !self.enabled {
            return SourceStatus::Paused;
        }
        match self.success_rate() {
            rate if rate >= 80.0 => SourceStatus::Healthy,
            rate if rate >= 50.0 => SourceStatus::Degraded,
            _ => SourceStatus::Unhealthy,
        }
    }

    /// Enabled and its next sync time has arrived
    pub fn is_due(&self, now: f64) -> bool {
        self.enabled && self.next_sync_timestamp.is_none_or(|next| next <= now)
    }

    pub(crate) fn interval_secs(&self) -> f64 {
        f64::from(self.sync_interval_minutes) * 60.0
    }
}

/// Health tier derived from enablement and success rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Paused,
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceStatus::Paused => "paused",
            SourceStatus::Healthy => "healthy",
            SourceStatus::Degraded => "degraded",
            SourceStatus::Unhealthy => "unhealthy",
        };
        write!(f, "{}", label)
    }
}

/// Source used to seed an empty registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSeed {
    pub name: String,
    pub url: String,
    #[serde(default = "default_seed_interval")]
    pub interval_minutes: u32,
}

impl SourceSeed {
    /// Built-in sources seeded on first run
    pub fn builtin() -> Vec<SourceSeed> {
        const BASE: &str = "https://raw.githubusercontent.com/iosDG001/_/refs/heads/main";
        [("SS源", "SS"), ("Trojan源", "SLVPN"), ("VV节点源", "VVV")]
            .into_iter()
            .map(|(name, file)| SourceSeed {
                name: name.to_string(),
                url: format!("{}/{}", BASE, file),
                interval_minutes: default_seed_interval(),
            })
            .collect()
    }
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_seed_interval() -> u32 {
    180
}

/// Unrecognised hints (e.g. `yaml`) load as no hint
fn lenient_protocol<'de, D>(deserializer: D) -> Result<Option<Protocol>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|hint| hint.parse().ok()))
}
