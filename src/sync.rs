//! Source synchronization
//!
//! Drives fetch → parse → merge → save for one source or for every enabled
//! source, recording each attempt in the registry.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::fetch::Fetcher;
use crate::merge::{MergeStats, Merger};
use crate::model::{Protocol, ProxyRecord};
use crate::parser;
use crate::registry::{ProxySource, SourceRegistry};
use crate::store::ProxyStore;

// ============================================================================
// Sync Results
// ============================================================================

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source '{0}' does not exist")]
    UnknownSource(String),
    #[error("source '{0}' is disabled")]
    SourceDisabled(String),
    #[error("no enabled sources")]
    NoEnabledSources,
    #[error("source '{0}' returned empty content")]
    EmptyContent(String),
    #[error("no proxies parsed")]
    NoProxies,
    #[error("failed to fetch '{source_name}': {message}")]
    Fetch {
        source_name: String,
        message: String,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Result of one source within a sync pass
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResult {
    Parsed(usize),
    Failed(String),
}

impl fmt::Display for SourceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceResult::Parsed(count) => write!(f, "{} proxies", count),
            SourceResult::Failed(message) => write!(f, "error: {}", message),
        }
    }
}

/// Outcome of a successful sync pass
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub stats: MergeStats,
    /// Per-source results in sync order
    pub source_results: Vec<(String, SourceResult)>,
    /// Records in the store after saving
    pub total_proxies: usize,
    pub finished_at: DateTime<Local>,
}

pub type SyncOutcome = Result<SyncReport, SyncError>;

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Proxy sync complete")?;
        writeln!(f)?;
        writeln!(f, "Statistics:")?;
        writeln!(f, "  Added:    {}", self.stats.added)?;
        writeln!(f, "  Updated:  {}", self.stats.updated)?;
        writeln!(f, "  Incoming: {}", self.stats.total_incoming)?;
        writeln!(f, "  Total:    {}", self.total_proxies)?;

        writeln!(f)?;
        writeln!(f, "Sources:")?;
        if self.source_results.is_empty() {
            writeln!(f, "  none")?;
        }
        for (name, result) in &self.source_results {
            writeln!(f, "  {}: {}", name, result)?;
        }

        if !self.stats.by_protocol.is_empty() {
            writeln!(f)?;
            writeln!(f, "Protocols:")?;
            for (protocol, count) in &self.stats.by_protocol {
                writeln!(f, "  {}: {}", protocol, count)?;
            }
        }

        if self.stats.added > 0 || self.stats.updated > 0 {
            writeln!(f)?;
            writeln!(
                f,
                "Deduplicated by server:port, {} existing proxies overwritten",
                self.stats.updated
            )?;
        }

        if !self.stats.by_source.is_empty() {
            writeln!(f)?;
            writeln!(f, "Contribution:")?;
            for (name, count) in &self.stats.by_source {
                writeln!(f, "  {}: {}", name, count)?;
            }
        }

        writeln!(f)?;
        write!(f, "Synced at {}", self.finished_at.format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Text delivered to operators for a sync outcome
pub fn format_outcome(outcome: &SyncOutcome) -> String {
    match outcome {
        Ok(report) => report.to_string(),
        Err(e) => format!("Proxy sync failed\n\nError: {}", e),
    }
}

// ============================================================================
// Sync Service
// ============================================================================

pub struct SyncService {
    registry: Arc<Mutex<SourceRegistry>>,
    store: ProxyStore,
    fetcher: Arc<dyn Fetcher>,
    merger: Merger,
}

impl SyncService {
    pub fn new(
        registry: Arc<Mutex<SourceRegistry>>,
        store: ProxyStore,
        fetcher: Arc<dyn Fetcher>,
        merger: Merger,
    ) -> Self {
        Self {
            registry,
            store,
            fetcher,
            merger,
        }
    }

    pub fn registry(&self) -> &Arc<Mutex<SourceRegistry>> {
        &self.registry
    }

    pub fn store(&self) -> &ProxyStore {
        &self.store
    }

    /// Syncs a single named source into the store
    pub async fn sync_one(&self, source_name: &str) -> SyncOutcome {
        let source = {
            let mut registry = self.registry.lock().await;
            let Some(source) = registry.get(source_name).cloned() else {
                return Err(SyncError::UnknownSource(source_name.to_string()));
            };
            if !source.enabled {
                if let Err(e) = registry.record_result(source_name, false, 0) {
                    warn!("Failed to record sync result: {}", e);
                }
                return Err(SyncError::SourceDisabled(source_name.to_string()));
            }
            source
        };

        info!(source = %source.name, "Syncing source");
        let result = self.sync_source_records(&source).await;
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                self.record(&source.name, false, 0).await;
                error!(source = %source.name, "Sync failed: {}", e);
                return Err(e);
            }
        };

        let count = records.len();
        let first_protocol = first_known_protocol(&records);
        let saved = self.merge_and_save(records).await;
        match saved {
            Ok((stats, total_proxies)) => {
                self.record(&source.name, true, count).await;
                self.update_protocol_hint(&source, first_protocol).await;
                info!(source = %source.name, "Sync complete: {}", stats);
                Ok(SyncReport {
                    stats,
                    source_results: vec![(source.name.clone(), SourceResult::Parsed(count))],
                    total_proxies,
                    finished_at: Local::now(),
                })
            }
            Err(e) => {
                self.record(&source.name, false, 0).await;
                error!(source = %source.name, "Failed to save merged proxies: {:#}", e);
                Err(SyncError::Store(e))
            }
        }
    }

    /// Syncs every enabled source and merges the combined result once
    pub async fn sync_all(&self) -> SyncOutcome {
        let sources = self.registry.lock().await.enabled_sources();
        if sources.is_empty() {
            return Err(SyncError::NoEnabledSources);
        }
        info!("Syncing {} enabled sources", sources.len());

        let mut incoming = Vec::new();
        let mut source_results = Vec::with_capacity(sources.len());

        for source in &sources {
            match self.sync_source_records(source).await {
                Ok(records) => {
                    let count = records.len();
                    self.record(&source.name, true, count).await;
                    self.update_protocol_hint(source, first_known_protocol(&records))
                        .await;
                    info!(source = %source.name, "Parsed {} proxies", count);
                    source_results.push((source.name.clone(), SourceResult::Parsed(count)));
                    incoming.extend(records);
                }
                Err(e) => {
                    self.record(&source.name, false, 0).await;
                    warn!(source = %source.name, "Sync failed: {}", e);
                    source_results.push((source.name.clone(), SourceResult::Failed(e.to_string())));
                }
            }
        }

        if incoming.is_empty() {
            error!("No proxies parsed from any source");
            return Err(SyncError::NoProxies);
        }

        let (stats, total_proxies) = self.merge_and_save(incoming).await?;
        info!("Sync of all sources complete: {}", stats);

        Ok(SyncReport {
            stats,
            source_results,
            total_proxies,
            finished_at: Local::now(),
        })
    }

    /// Fetches and parses one source
    async fn sync_source_records(&self, source: &ProxySource) -> Result<Vec<ProxyRecord>, SyncError> {
        let content = self
            .fetcher
            .fetch(&source.url)
            .await
            .map_err(|e| SyncError::Fetch {
                source_name: source.name.clone(),
                message: format!("{:#}", e),
            })?;

        if content.trim().is_empty() {
            return Err(SyncError::EmptyContent(source.name.clone()));
        }

        let batch = parser::parse_content(&content, &source.name);
        if batch.records.is_empty() {
            return Err(SyncError::NoProxies);
        }
        Ok(batch.records)
    }

    async fn merge_and_save(
        &self,
        incoming: Vec<ProxyRecord>,
    ) -> anyhow::Result<(MergeStats, usize)> {
        let existing = self.store.load_records().await?;
        let (merged, stats) = self.merger.merge(existing, incoming).await;
        self.store.save_records(&merged).await?;
        Ok((stats, merged.len()))
    }

    async fn record(&self, source_name: &str, success: bool, count: usize) {
        if let Err(e) = self
            .registry
            .lock()
            .await
            .record_result(source_name, success, count)
        {
            warn!("Failed to record sync result: {}", e);
        }
    }

    /// Fills in a missing or unknown hint from the parsed records
    async fn update_protocol_hint(&self, source: &ProxySource, protocol: Option<Protocol>) {
        let Some(protocol) = protocol else {
            return;
        };
        let mut registry = self.registry.lock().await;
        let current = registry.get(&source.name).and_then(|s| s.protocol_hint);
        if current.is_none_or(|hint| hint == Protocol::Unknown) {
            info!(source = %source.name, "Detected protocol hint {}", protocol);
            if let Err(e) = registry.set_protocol_hint(&source.name, Some(protocol)) {
                warn!(source = %source.name, "Failed to store protocol hint: {}", e);
            }
        }
    }
}

fn first_known_protocol(records: &[ProxyRecord]) -> Option<Protocol> {
    records
        .iter()
        .map(|r| r.protocol)
        .find(|p| *p != Protocol::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::CountryLookup;
    use crate::registry::SourceSeed;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct MapFetcher(HashMap<String, String>);

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            match self.0.get(url) {
                Some(body) => Ok(body.clone()),
                None => bail!("HTTP request failed with status 404 Not Found: {}", url),
            }
        }
    }

    struct NoLookup;

    #[async_trait]
    impl CountryLookup for NoLookup {
        async fn country_code(&self, _ip: &str) -> Option<String> {
            None
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "proxy-sync-sync-{}-{}-{}",
            name,
            std::process::id(),
            nanos
        ))
    }

    fn service(dir: &PathBuf, bodies: &[(&str, &str)]) -> SyncService {
        let seeds = vec![
            SourceSeed {
                name: "good".to_string(),
                url: "https://example.com/good".to_string(),
                interval_minutes: 60,
            },
            SourceSeed {
                name: "broken".to_string(),
                url: "https://example.com/broken".to_string(),
                interval_minutes: 60,
            },
        ];
        let registry = SourceRegistry::load(dir.join("sources.json"), seeds);
        let fetcher = MapFetcher(
            bodies
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
        );
        SyncService::new(
            Arc::new(Mutex::new(registry)),
            ProxyStore::new(dir.join("proxies.yaml")),
            Arc::new(fetcher),
            Merger::new(Arc::new(NoLookup)),
        )
    }

    const GOOD_BODY: &str =
        "trojan://pw@1.1.1.1:443#A\nhy2://pw@2.2.2.2:443#B\nnot a proxy line";

    #[tokio::test]
    async fn test_sync_one_success() {
        let dir = temp_dir("one");
        let service = service(&dir, &[("https://example.com/good", GOOD_BODY)]);

        let report = service.sync_one("good").await.unwrap();
        assert_eq!(report.stats.added, 2);
        assert_eq!(report.total_proxies, 2);
        assert_eq!(report.source_results, vec![("good".to_string(), SourceResult::Parsed(2))]);

        let stored = service.store().load_records().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].name, "A");

        let registry = service.registry().lock().await;
        let source = registry.get("good").unwrap();
        assert_eq!(source.success_count, 1);
        assert_eq!(source.last_proxy_count, 2);
        assert_eq!(source.protocol_hint, Some(Protocol::Trojan));
        drop(registry);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_sync_one_failure_records_attempt() {
        let dir = temp_dir("fail");
        let service = service(&dir, &[]);

        let err = service.sync_one("broken").await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch { .. }));

        let registry = service.registry().lock().await;
        let source = registry.get("broken").unwrap();
        assert_eq!(source.fail_count, 1);
        assert!(source.next_sync_timestamp.unwrap() > source.last_sync_timestamp.unwrap());
        drop(registry);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_sync_one_unparseable_content() {
        let dir = temp_dir("noproxies");
        let service = service(&dir, &[("https://example.com/good", "hello world")]);

        assert!(matches!(
            service.sync_one("good").await,
            Err(SyncError::NoProxies)
        ));
        assert_eq!(
            service.registry().lock().await.get("good").unwrap().fail_count,
            1
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_sync_one_unknown_and_disabled() {
        let dir = temp_dir("disabled");
        let service = service(&dir, &[("https://example.com/good", GOOD_BODY)]);

        assert!(matches!(
            service.sync_one("missing").await,
            Err(SyncError::UnknownSource(_))
        ));

        service
            .registry()
            .lock()
            .await
            .set_enabled("good", false)
            .unwrap();
        assert!(matches!(
            service.sync_one("good").await,
            Err(SyncError::SourceDisabled(_))
        ));
        assert_eq!(
            service.registry().lock().await.get("good").unwrap().fail_count,
            1
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_sync_all_isolates_failures() {
        let dir = temp_dir("all");
        let service = service(&dir, &[("https://example.com/good", GOOD_BODY)]);

        let report = service.sync_all().await.unwrap();
        assert_eq!(report.stats.added, 2);
        assert_eq!(report.source_results.len(), 2);
        assert!(matches!(report.source_results[1].1, SourceResult::Failed(_)));

        let text = report.to_string();
        assert!(text.contains("good: 2 proxies"));
        assert!(text.contains("TROJAN: 1"));
        assert!(text.contains("HY2: 1"));

        let registry = service.registry().lock().await;
        assert_eq!(registry.get("good").unwrap().success_count, 1);
        assert_eq!(registry.get("broken").unwrap().fail_count, 1);
        drop(registry);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_sync_all_twice_updates_instead_of_adding() {
        let dir = temp_dir("twice");
        let service = service(&dir, &[("https://example.com/good", GOOD_BODY)]);

        service.sync_all().await.unwrap();
        let second = service.sync_all().await.unwrap();
        assert_eq!(second.stats.added, 0);
        assert_eq!(second.stats.updated, 2);
        assert_eq!(second.total_proxies, 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_sync_all_without_proxies_fails() {
        let dir = temp_dir("none");
        let service = service(&dir, &[]);
        assert!(matches!(service.sync_all().await, Err(SyncError::NoProxies)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_format_failure() {
        let text = format_outcome(&Err(SyncError::NoEnabledSources));
        assert!(text.contains("Proxy sync failed"));
        assert!(text.contains("no enabled sources"));
    }
}
