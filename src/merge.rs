//! Proxy deduplication and merging
//!
//! Records are keyed by `server:port`. Merging folds incoming records into
//! the existing collection: everything is overwritten by the newer record
//! except a non-empty stored name, which survives re-syncs. New records keep
//! their decoded name; only nameless ones get a synthesized name.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::lookup::CountryLookup;
use crate::model::{Protocol, ProxyRecord};

/// Country shown when the lookup has no answer
pub const UNKNOWN_COUNTRY: &str = "未知";

// ============================================================================
// Merge Statistics
// ============================================================================

/// Counters for one merge pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Incoming records with a key not seen before
    pub added: usize,
    /// Incoming records that replaced a stored record
    pub updated: usize,
    pub total_incoming: usize,
    pub by_protocol: BTreeMap<Protocol, usize>,
    /// Incoming records per source; records without a source are not counted
    pub by_source: BTreeMap<String, usize>,
}

impl fmt::Display for MergeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} updated, {} incoming",
            self.added, self.updated, self.total_incoming
        )
    }
}

// ============================================================================
// Merger
// ============================================================================

/// Folds freshly parsed records into the stored collection
pub struct Merger {
    lookup: Arc<dyn CountryLookup>,
}

impl Merger {
    pub fn new(lookup: Arc<dyn CountryLookup>) -> Self {
        Self { lookup }
    }

    /// Resolves the country of a record and returns its synthesized name
    ///
    /// The name has the form `"{country}|{server}:{port}"`, with
    /// [`UNKNOWN_COUNTRY`] standing in when the country cannot be resolved.
    pub async fn generate_name(&self, record: &mut ProxyRecord) -> String {
        if record.country_code.is_none() {
            record.country_code = self.lookup.country_code(&record.server).await;
        }
        let country = record.country_code.as_deref().unwrap_or(UNKNOWN_COUNTRY);
        format!("{}|{}", country, record.unique_key())
    }

    /// Merges `incoming` into `existing`
    ///
    /// Output order is first-seen order of each key. Duplicate keys inside
    /// `existing` collapse into one record, the later entry winning.
    pub async fn merge(
        &self,
        existing: Vec<ProxyRecord>,
        incoming: Vec<ProxyRecord>,
    ) -> (Vec<ProxyRecord>, MergeStats) {
        let mut merged: Vec<ProxyRecord> = Vec::with_capacity(existing.len() + incoming.len());
        let mut index: HashMap<String, usize> = HashMap::with_capacity(existing.len());

        for record in existing {
            let key = record.unique_key();
            match index.get(&key) {
                Some(&position) => merged[position] = record,
                None => {
                    index.insert(key, merged.len());
                    merged.push(record);
                }
            }
        }

        let mut stats = MergeStats {
            total_incoming: incoming.len(),
            ..Default::default()
        };

        for mut record in incoming {
            *stats.by_protocol.entry(record.protocol).or_insert(0) += 1;
            if !record.source_name.is_empty() {
                *stats
                    .by_source
                    .entry(record.source_name.clone())
                    .or_insert(0) += 1;
            }

            let key = record.unique_key();
            let generated = self.generate_name(&mut record).await;

            match index.get(&key) {
                Some(&position) => {
                    let previous_name = std::mem::take(&mut merged[position].name);
                    if previous_name.is_empty() {
                        record.set_name(generated);
                    } else {
                        record.set_name(previous_name);
                    }
                    trace!("Updated {}", record.display_info());
                    merged[position] = record;
                    stats.updated += 1;
                }
                None => {
                    if record.name.is_empty() {
                        record.set_name(generated);
                    }
                    trace!("Added {}", record.display_info());
                    index.insert(key, merged.len());
                    merged.push(record);
                    stats.added += 1;
                }
            }
        }

        debug!("Merge complete: {}, {} total", stats, merged.len());
        (merged, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticLookup {
        codes: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl StaticLookup {
        fn new(codes: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                codes: codes
                    .iter()
                    .map(|(ip, cc)| (ip.to_string(), cc.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CountryLookup for StaticLookup {
        async fn country_code(&self, ip: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.codes.get(ip).cloned()
        }
    }

    fn record(server: &str, port: u16, name: &str, source: &str) -> ProxyRecord {
        ProxyRecord::from_raw_fields(
            json!({"name": name, "type": "trojan", "server": server, "port": port, "password": "p"})
                .as_object()
                .cloned()
                .unwrap(),
            Protocol::Trojan,
        )
        .unwrap()
        .with_source(source)
    }

    #[tokio::test]
    async fn test_update_keeps_non_empty_name() {
        let merger = Merger::new(StaticLookup::new(&[]));
        let existing = vec![record("1.1.1.1", 443, "Old", "")];
        let incoming = vec![record("1.1.1.1", 443, "", "src")];

        let (merged, stats) = merger.merge(existing, incoming).await;

        assert_eq!(stats.added, 0);
        assert_eq!(stats.updated, 1);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Old");
        assert_eq!(merged[0].raw_fields["name"], "Old");
        assert_eq!(merged[0].source_name, "src");
    }

    #[tokio::test]
    async fn test_update_overwrites_other_fields() {
        let merger = Merger::new(StaticLookup::new(&[]));
        let existing = vec![record("1.1.1.1", 443, "Old", "")];
        let mut newer = record("1.1.1.1", 443, "New", "");
        newer
            .raw_fields
            .insert("password".to_string(), json!("rotated"));

        let (merged, _) = merger.merge(existing, vec![newer]).await;
        assert_eq!(merged[0].raw_fields["password"], "rotated");
        assert_eq!(merged[0].name, "Old");
    }

    #[tokio::test]
    async fn test_empty_stored_name_is_replaced() {
        let merger = Merger::new(StaticLookup::new(&[("1.1.1.1", "JP")]));
        let existing = vec![record("1.1.1.1", 443, "", "")];
        let incoming = vec![record("1.1.1.1", 443, "Fresh", "")];

        let (merged, _) = merger.merge(existing, incoming).await;
        assert_eq!(merged[0].name, "JP|1.1.1.1:443");
    }

    #[tokio::test]
    async fn test_new_records_keep_decoded_names() {
        let merger = Merger::new(StaticLookup::new(&[("8.8.8.8", "US"), ("1.1.1.1", "HK")]));
        let incoming = vec![
            record("8.8.8.8", 443, "", "a"),
            record("9.9.9.9", 80, "", "b"),
            record("1.1.1.1", 443, "香港01", "b"),
        ];

        let (merged, stats) = merger.merge(Vec::new(), incoming).await;

        assert_eq!(stats.added, 3);
        assert_eq!(merged[0].name, "US|8.8.8.8:443");
        assert_eq!(merged[0].country_code.as_deref(), Some("US"));
        assert_eq!(merged[1].name, "未知|9.9.9.9:80");
        assert_eq!(merged[1].raw_fields["name"], "未知|9.9.9.9:80");
        assert_eq!(merged[2].name, "香港01");
        assert_eq!(merged[2].raw_fields["name"], "香港01");
        assert_eq!(merged[2].country_code.as_deref(), Some("HK"));
    }

    #[tokio::test]
    async fn test_merge_with_nothing_is_identity() {
        let lookup = StaticLookup::new(&[]);
        let merger = Merger::new(lookup.clone());
        let existing = vec![
            record("1.1.1.1", 443, "A", ""),
            record("2.2.2.2", 443, "B", ""),
        ];

        let (merged, stats) = merger.merge(existing.clone(), Vec::new()).await;

        assert_eq!(merged, existing);
        assert_eq!(stats, MergeStats::default());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keys_stay_unique_across_merges() {
        let merger = Merger::new(StaticLookup::new(&[]));
        let s = vec![record("1.1.1.1", 1, "s", "")];
        let a = vec![record("1.1.1.1", 1, "", ""), record("2.2.2.2", 2, "", "")];
        let b = vec![
            record("2.2.2.2", 2, "", ""),
            record("3.3.3.3", 3, "", ""),
            record("3.3.3.3", 3, "", ""),
        ];

        let (first, _) = merger.merge(s, a).await;
        let (second, stats) = merger.merge(first, b).await;

        let keys: Vec<String> = second.iter().map(ProxyRecord::unique_key).collect();
        assert_eq!(keys, ["1.1.1.1:1", "2.2.2.2:2", "3.3.3.3:3"]);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.updated, 2);
    }

    #[tokio::test]
    async fn test_duplicate_existing_entries_collapse() {
        let merger = Merger::new(StaticLookup::new(&[]));
        let existing = vec![
            record("1.1.1.1", 443, "first", ""),
            record("2.2.2.2", 443, "other", ""),
            record("1.1.1.1", 443, "second", ""),
        ];

        let (merged, _) = merger.merge(existing, Vec::new()).await;
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "second");
    }

    #[tokio::test]
    async fn test_stats_by_protocol_and_source() {
        let merger = Merger::new(StaticLookup::new(&[]));
        let mut hy2 = record("3.3.3.3", 443, "", "b");
        hy2.protocol = Protocol::Hysteria2;
        let incoming = vec![
            record("1.1.1.1", 443, "", "a"),
            record("2.2.2.2", 443, "", "a"),
            hy2,
            record("4.4.4.4", 443, "", ""),
        ];

        let (_, stats) = merger.merge(Vec::new(), incoming).await;

        assert_eq!(stats.total_incoming, 4);
        assert_eq!(stats.by_protocol[&Protocol::Trojan], 3);
        assert_eq!(stats.by_protocol[&Protocol::Hysteria2], 1);
        assert_eq!(stats.by_source["a"], 2);
        assert_eq!(stats.by_source["b"], 1);
        assert_eq!(stats.by_source.len(), 2);
    }
}
