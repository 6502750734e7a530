//! YAML proxy list parsing
//!
//! Accepts a Clash-style document (`proxies:` mapping), a bare sequence of
//! proxy mappings, or a body whose first line is `proxies:` followed by such
//! a sequence. Entries are kept verbatim as raw fields.

use anyhow::{Context, Result};
use serde_yaml::Value as YamlValue;
use tracing::{debug, warn};

use crate::model::{Protocol, ProxyRecord, RawFields};

/// Parses a YAML proxy list into records
///
/// Entries that are not mappings or lack a usable `server`/`port` are skipped.
/// An unparseable document yields an empty list.
pub fn parse_yaml_content(content: &str, source_name: &str) -> Vec<ProxyRecord> {
    let entries = match load_entries(content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to parse YAML proxy list: {:#}", e);
            return Vec::new();
        }
    };

    let total = entries.len();
    let records: Vec<ProxyRecord> = entries
        .into_iter()
        .filter_map(|entry| match entry_to_record(entry) {
            Ok(record) => Some(record.with_source(source_name)),
            Err(e) => {
                debug!("Skipping YAML proxy entry: {:#}", e);
                None
            }
        })
        .collect();

    debug!(
        "YAML parsing complete: {} entries, {} usable",
        total,
        records.len()
    );
    records
}

/// Extracts the list of proxy entries from the document
fn load_entries(content: &str) -> Result<Vec<YamlValue>> {
    let content = content.trim();
    if content.is_empty() {
        return Ok(Vec::new());
    }

    let document: YamlValue = match serde_yaml::from_str(content) {
        Ok(document) => document,
        // A `proxies:` header line followed by a bare list
        Err(_) if content.starts_with("proxies:") => {
            let body = content.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
            serde_yaml::from_str(body).context("Invalid YAML after proxies: header")?
        }
        Err(e) => return Err(e).context("Invalid YAML document"),
    };

    Ok(match document {
        YamlValue::Sequence(entries) => entries,
        YamlValue::Mapping(mut mapping) => match mapping.remove("proxies") {
            Some(YamlValue::Sequence(entries)) => entries,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    })
}

/// Converts one YAML mapping into a record, protocol taken from `type`
fn entry_to_record(entry: YamlValue) -> Result<ProxyRecord> {
    if !entry.is_mapping() {
        anyhow::bail!("Entry is not a mapping");
    }
    let raw_fields: RawFields =
        serde_json::from_value(serde_json::to_value(&entry).context("Unsupported YAML value")?)
            .context("Entry is not a mapping")?;

    let protocol = raw_fields
        .get("type")
        .and_then(serde_json::Value::as_str)
        .map(Protocol::from_type)
        .unwrap_or(Protocol::Unknown);

    ProxyRecord::from_raw_fields(raw_fields, protocol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxies_document() {
        let content = "proxies:\n- name: A\n  server: 1.1.1.1\n  port: 443\n  type: trojan\n  password: x";
        let records = parse_yaml_content(content, "src");

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.unique_key(), "1.1.1.1:443");
        assert_eq!(record.protocol, Protocol::Trojan);
        assert_eq!(record.name, "A");
        assert_eq!(record.source_name, "src");
        assert_eq!(record.raw_fields["password"], "x");
    }

    #[test]
    fn test_parse_bare_list() {
        let content = "- {name: a, server: example.com, port: 8388, type: ss, cipher: aes-256-gcm, password: p}\n- {name: b, server: example.org, port: \"443\", type: hysteria2}";
        let records = parse_yaml_content(content, "");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].protocol, Protocol::Shadowsocks);
        assert_eq!(records[1].protocol, Protocol::Hysteria2);
        assert_eq!(records[1].port, 443);
    }

    #[test]
    fn test_parse_full_clash_config() {
        let content = "port: 7890\nmode: rule\nproxies:\n  - name: v\n    type: vless\n    server: 2.2.2.2\n    port: 443\n    uuid: u\nproxy-groups: []";
        let records = parse_yaml_content(content, "");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].protocol, Protocol::VLess);
        assert_eq!(records[0].raw_fields["uuid"], "u");
    }

    #[test]
    fn test_skips_incomplete_entries() {
        let content = "proxies:\n- name: no-port\n  server: 1.1.1.1\n- name: no-server\n  port: 80\n- just a string\n- name: ok\n  server: 3.3.3.3\n  port: 80\n  type: socks5";
        let records = parse_yaml_content(content, "");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "ok");
        assert_eq!(records[0].protocol, Protocol::Unknown);
    }

    #[test]
    fn test_keeps_nested_options() {
        let content = "proxies:\n- name: ws\n  type: vmess\n  server: 1.1.1.1\n  port: 443\n  ws-opts:\n    path: /ws\n    headers:\n      Host: cdn.example.com";
        let records = parse_yaml_content(content, "");
        assert_eq!(
            records[0].raw_fields["ws-opts"]["headers"]["Host"],
            "cdn.example.com"
        );
    }

    #[test]
    fn test_invalid_yaml_is_empty() {
        assert!(parse_yaml_content("proxies: [unclosed", "").is_empty());
        assert!(parse_yaml_content("", "").is_empty());
        assert!(parse_yaml_content("proxies: not-a-list", "").is_empty());
    }
}
