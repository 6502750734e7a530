//! Source registry
//!
//! Persisted list of remote sources with their scheduling state. The
//! registry is stored as a JSON array and rewritten after every mutation.
//! A missing or unreadable file is replaced by the seed list.

pub mod source;

pub use source::{ProxySource, SourceSeed, SourceStatus};

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::Protocol;
use source::{DEFAULT_INTERVAL_MINUTES, MIN_INTERVAL_MINUTES};

/// Clock returning Unix time in seconds
pub type Clock = fn() -> f64;

/// Wall-clock time as fractional Unix seconds
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// ============================================================================
// Registry Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("source '{0}' already exists")]
    DuplicateSource(String),
    #[error("source '{0}' does not exist")]
    UnknownSource(String),
    #[error("sync interval of {0} minutes is below the minimum of {min}", min = MIN_INTERVAL_MINUTES)]
    IntervalTooShort(u32),
}

// ============================================================================
// Source Registry
// ============================================================================

pub struct SourceRegistry {
    path: PathBuf,
    seeds: Vec<SourceSeed>,
    sources: Vec<ProxySource>,
    clock: Clock,
}

impl SourceRegistry {
    /// Loads the registry from `path`, seeding it when absent or corrupt
    pub fn load(path: impl Into<PathBuf>, seeds: Vec<SourceSeed>) -> Self {
        Self::with_clock(path, seeds, unix_now)
    }

    /// Same as [`SourceRegistry::load`] with an explicit clock
    pub fn with_clock(path: impl Into<PathBuf>, seeds: Vec<SourceSeed>, clock: Clock) -> Self {
        let mut registry = Self {
            path: path.into(),
            seeds,
            sources: Vec::new(),
            clock,
        };

        match registry.read_file() {
            Ok(Some(sources)) => {
                let now = registry.now();
                registry.sources = sources
                    .into_iter()
                    .map(|mut source| {
                        source.next_sync_timestamp.get_or_insert(now);
                        source
                    })
                    .collect();
                debug!(
                    "Loaded {} sources from {}",
                    registry.sources.len(),
                    registry.path.display()
                );
            }
            Ok(None) => {
                info!("No source registry at {}, seeding defaults", registry.path.display());
                registry.seed();
            }
            Err(e) => {
                warn!("Failed to load source registry, seeding defaults: {:#}", e);
                registry.seed();
            }
        }
        registry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sources(&self) -> &[ProxySource] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&ProxySource> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn enabled_sources(&self) -> Vec<ProxySource> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }

    /// Enabled sources whose next sync time is unset or has passed
    pub fn due_sources(&self) -> Vec<ProxySource> {
        let now = self.now();
        self.sources
            .iter()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect()
    }

    pub fn add(
        &mut self,
        name: &str,
        url: &str,
        protocol_hint: Option<Protocol>,
        interval_minutes: Option<u32>,
    ) -> Result<(), RegistryError> {
        if self.get(name).is_some() {
            return Err(RegistryError::DuplicateSource(name.to_string()));
        }
        let interval = interval_minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES);
        check_interval(interval)?;

        let mut source = ProxySource::new(name, url, interval, self.now());
        source.protocol_hint = protocol_hint;
        self.sources.push(source);
        info!(source = %name, "Added source {}", url);
        self.persist();
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<ProxySource, RegistryError> {
        let position = self
            .sources
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| RegistryError::UnknownSource(name.to_string()))?;
        let removed = self.sources.remove(position);
        info!(source = %name, "Removed source");
        self.persist();
        Ok(removed)
    }

    /// Enabling makes the source due immediately
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let now = self.now();
        let source = self.get_mut(name)?;
        source.enabled = enabled;
        if enabled {
            source.next_sync_timestamp = Some(now);
        }
        info!(source = %name, enabled, "Changed source state");
        self.persist();
        Ok(())
    }

    /// Changes the interval and reschedules from now
    pub fn set_interval(&mut self, name: &str, minutes: u32) -> Result<(), RegistryError> {
        check_interval(minutes)?;
        let now = self.now();
        let source = self.get_mut(name)?;
        source.sync_interval_minutes = minutes;
        source.next_sync_timestamp = Some(now + source.interval_secs());
        info!(source = %name, minutes, "Changed sync interval");
        self.persist();
        Ok(())
    }

    pub fn set_protocol_hint(
        &mut self,
        name: &str,
        protocol: Option<Protocol>,
    ) -> Result<(), RegistryError> {
        let source = self.get_mut(name)?;
        source.protocol_hint = protocol;
        self.persist();
        Ok(())
    }

    /// Records a sync attempt and schedules the next one
    ///
    /// Success and failure reschedule identically, one interval from now.
    pub fn record_result(
        &mut self,
        name: &str,
        success: bool,
        proxy_count: usize,
    ) -> Result<(), RegistryError> {
        let now = self.now();
        let source = self.get_mut(name)?;
        if success {
            source.success_count += 1;
            source.last_proxy_count = proxy_count;
        } else {
            source.fail_count += 1;
        }
        source.last_sync_timestamp = Some(now);
        source.next_sync_timestamp = Some(now + source.interval_secs());
        debug!(
            source = %name,
            success,
            "Recorded sync result, next sync at {:.0}",
            now + source.interval_secs()
        );
        self.persist();
        Ok(())
    }

    /// Discards every source and re-seeds the defaults
    pub fn reset(&mut self) {
        info!("Resetting source registry");
        self.seed();
    }

    /// Writes the registry as pretty-printed JSON
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.sources
            .serialize(&mut serializer)
            .context("Failed to serialize source registry")?;

        std::fs::write(&self.path, buffer)
            .with_context(|| format!("Failed to write source registry: {}", self.path.display()))
    }

    fn now(&self) -> f64 {
        (self.clock)()
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut ProxySource, RegistryError> {
        self.sources
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| RegistryError::UnknownSource(name.to_string()))
    }

    fn seed(&mut self) {
        let now = self.now();
        let seeds = if self.seeds.is_empty() {
            SourceSeed::builtin()
        } else {
            self.seeds.clone()
        };
        self.sources = seeds
            .iter()
            .map(|seed| ProxySource::new(&seed.name, &seed.url, seed.interval_minutes, now))
            .collect();
        self.persist();
    }

    /// In-memory state stays authoritative when the write fails
    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!("Failed to persist source registry: {:#}", e);
        }
    }

    fn read_file(&self) -> Result<Option<Vec<ProxySource>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read source registry: {}", self.path.display()))?;
        let sources = serde_json::from_str(&content)
            .with_context(|| format!("Invalid source registry: {}", self.path.display()))?;
        Ok(Some(sources))
    }
}

fn check_interval(minutes: u32) -> Result<(), RegistryError> {
    if minutes < MIN_INTERVAL_MINUTES {
        return Err(RegistryError::IntervalTooShort(minutes));
    }
    Ok(())
}
