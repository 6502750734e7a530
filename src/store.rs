//! Persisted proxy store
//!
//! The merged proxy list lives in a single YAML file: a sequence of raw
//! field mappings in merge order. Writes go through a temporary file in the
//! same directory that is then renamed over the target.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use serde_yaml::Value as YamlValue;
use tracing::{debug, warn};

use crate::model::{ProxyRecord, RawFields, port_from_value};

/// Pseudo-field never written to disk
const COUNTRY_FIELD: &str = "country";

/// Suffix counter; every write gets its own temp file
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// Proxy Store
// ============================================================================

/// YAML file holding the merged proxy list
pub struct ProxyStore {
    path: PathBuf,
}

impl ProxyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every stored entry; a missing file is an empty store
    pub async fn load_proxies(&self) -> Result<Vec<RawFields>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!("Proxy store {} does not exist yet", self.path.display());
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read proxy store: {}", self.path.display()))?;

        parse_store(&content)
            .with_context(|| format!("Failed to parse proxy store: {}", self.path.display()))
    }

    /// Loads stored entries as records, skipping entries without server/port
    pub async fn load_records(&self) -> Result<Vec<ProxyRecord>> {
        let entries = self.load_proxies().await?;
        let total = entries.len();
        let records: Vec<ProxyRecord> = entries
            .into_iter()
            .filter_map(|fields| ProxyRecord::from_stored(fields).ok())
            .collect();

        if records.len() < total {
            warn!(
                "Ignored {} stored entries without server/port",
                total - records.len()
            );
        }
        Ok(records)
    }

    /// Writes entries in order, dropping the `country` pseudo-field
    pub async fn save_proxies(&self, proxies: &[RawFields]) -> Result<()> {
        let cleaned: Vec<RawFields> = proxies
            .iter()
            .map(|fields| {
                let mut fields = fields.clone();
                fields.shift_remove(COUNTRY_FIELD);
                fields
            })
            .collect();

        let content =
            serde_yaml::to_string(&cleaned).context("Failed to serialize proxy list")?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, content)
            .await
            .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e).with_context(|| {
                format!("Failed to replace proxy store: {}", self.path.display())
            });
        }

        debug!(
            "Saved {} proxies to {}",
            cleaned.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Writes the raw fields of merged records
    pub async fn save_records(&self, records: &[ProxyRecord]) -> Result<()> {
        let proxies: Vec<RawFields> = records.iter().map(|r| r.raw_fields.clone()).collect();
        self.save_proxies(&proxies).await
    }

    /// Keys stored more than once, with their counts, in first-seen order
    pub async fn duplicate_keys(&self) -> Result<Vec<(String, usize)>> {
        let entries = self.load_proxies().await?;

        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for fields in &entries {
            let Some(key) = entry_key(fields) else {
                continue;
            };
            let count = counts.entry(key.clone()).or_insert(0);
            if *count == 0 {
                order.push(key);
            }
            *count += 1;
        }

        Ok(order
            .into_iter()
            .filter_map(|key| {
                let count = counts[&key];
                (count > 1).then_some((key, count))
            })
            .collect())
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "proxies".to_string());
        let sequence = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.path.with_file_name(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            sequence
        ))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parses the store body: a sequence, or a mapping with a `proxies` sequence
fn parse_store(content: &str) -> Result<Vec<RawFields>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let document: YamlValue = serde_yaml::from_str(content).context("Invalid YAML")?;
    let entries = match document {
        YamlValue::Sequence(entries) => entries,
        YamlValue::Mapping(mut mapping) => match mapping.remove("proxies") {
            Some(YamlValue::Sequence(entries)) => entries,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    Ok(entries
        .into_iter()
        .filter(YamlValue::is_mapping)
        .filter_map(|entry| {
            serde_json::to_value(&entry)
                .ok()
                .and_then(|value| serde_json::from_value::<RawFields>(value).ok())
        })
        .collect())
}

/// `server:port` of a stored entry
fn entry_key(fields: &RawFields) -> Option<String> {
    let server = match fields.get("server")? {
        serde_json::Value::String(s) if !s.is_empty() => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let port = fields.get("port").and_then(port_from_value)?;
    Some(format!("{}:{}", server, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_store(name: &str) -> ProxyStore {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "proxy-sync-store-{}-{}-{}",
            name,
            std::process::id(),
            nanos
        ));
        ProxyStore::new(dir.join("all_proxies.yaml"))
    }

    fn fields(value: serde_json::Value) -> RawFields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_missing_store_is_empty() {
        let store = temp_store("missing");
        assert!(store.load_proxies().await.unwrap().is_empty());
        assert!(store.duplicate_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_preserves_order_and_strips_country() {
        let store = temp_store("roundtrip");
        let proxies = vec![
            fields(json!({"name": "b", "type": "trojan", "server": "2.2.2.2", "port": 443, "country": "US"})),
            fields(json!({"name": "a", "type": "ss", "server": "1.1.1.1", "port": 8388, "cipher": "aes-256-gcm"})),
        ];
        store.save_proxies(&proxies).await.unwrap();

        let loaded = store.load_proxies().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0]["name"], "b");
        assert!(loaded[0].get("country").is_none());
        assert_eq!(loaded[1]["cipher"], "aes-256-gcm");

        let keys: Vec<&String> = loaded[1].keys().collect();
        assert_eq!(keys, ["name", "type", "server", "port", "cipher"]);

        let _ = tokio::fs::remove_dir_all(store.path().parent().unwrap()).await;
    }

    #[tokio::test]
    async fn test_load_records_skips_incomplete_entries() {
        let store = temp_store("records");
        tokio::fs::create_dir_all(store.path().parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(
            store.path(),
            "- {name: ok, type: vless, server: 1.1.1.1, port: 443}\n- {name: broken, server: 2.2.2.2}\n- plain string\n",
        )
        .await
        .unwrap();

        let records = store.load_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "ok");

        let _ = tokio::fs::remove_dir_all(store.path().parent().unwrap()).await;
    }

    #[tokio::test]
    async fn test_duplicate_keys() {
        let store = temp_store("dupes");
        let proxies = vec![
            fields(json!({"server": "1.1.1.1", "port": 443})),
            fields(json!({"server": "2.2.2.2", "port": 443})),
            fields(json!({"server": "1.1.1.1", "port": "443"})),
            fields(json!({"server": "1.1.1.1", "port": 80})),
        ];
        store.save_proxies(&proxies).await.unwrap();

        let dupes = store.duplicate_keys().await.unwrap();
        assert_eq!(dupes, vec![("1.1.1.1:443".to_string(), 2)]);

        let _ = tokio::fs::remove_dir_all(store.path().parent().unwrap()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_never_corrupt_store() {
        let store = std::sync::Arc::new(temp_store("concurrent"));
        let batch = |count: u16| -> Vec<ProxyRecord> {
            (0..count)
                .map(|i| {
                    ProxyRecord::from_stored(fields(json!({
                        "name": format!("node-{}", i),
                        "type": "trojan",
                        "server": "10.0.0.1",
                        "port": i + 1,
                        "password": "secret",
                    })))
                    .unwrap()
                })
                .collect()
        };
        let small = std::sync::Arc::new(batch(399));
        let large = std::sync::Arc::new(batch(400));

        for _ in 0..50 {
            let first = {
                let (store, records) = (store.clone(), small.clone());
                tokio::spawn(async move { store.save_records(&records).await })
            };
            let second = {
                let (store, records) = (store.clone(), large.clone());
                tokio::spawn(async move { store.save_records(&records).await })
            };
            first.await.unwrap().unwrap();
            second.await.unwrap().unwrap();

            let loaded = store.load_records().await.unwrap();
            assert!(loaded.len() == 399 || loaded.len() == 400);
        }

        let dir = store.path().parent().unwrap();
        let mut entries = tokio::fs::read_dir(dir).await.unwrap();
        let mut files = 0;
        while entries.next_entry().await.unwrap().is_some() {
            files += 1;
        }
        assert_eq!(files, 1);

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[test]
    fn test_parse_store_accepts_proxies_mapping() {
        let entries = parse_store("proxies:\n  - {server: 1.1.1.1, port: 1}\n").unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_parse_store_rejects_invalid_yaml() {
        assert!(parse_store("- [unclosed").is_err());
    }
}
