//! Proxy record model
//!
//! This module defines the canonical in-memory representation of a decoded
//! proxy endpoint. A record is identified solely by its `server:port` pair;
//! everything protocol-specific lives in the raw field map, which is the
//! payload that ends up in the persisted proxy store.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol-specific configuration, kept in insertion order for export
pub type RawFields = Map<String, Value>;

// ============================================================================
// Protocol
// ============================================================================

/// Proxy protocol of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "ss")]
    Shadowsocks,
    #[serde(rename = "ssr")]
    ShadowsocksR,
    #[serde(rename = "vmess")]
    VMess,
    #[serde(rename = "vless")]
    VLess,
    #[serde(rename = "trojan")]
    Trojan,
    #[serde(rename = "hy2")]
    Hysteria2,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Protocol {
    /// Every protocol that has a URI decoder
    pub const KNOWN: [Protocol; 6] = [
        Protocol::Shadowsocks,
        Protocol::ShadowsocksR,
        Protocol::VMess,
        Protocol::VLess,
        Protocol::Trojan,
        Protocol::Hysteria2,
    ];

    /// Short identifier used in statistics and the source registry
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Shadowsocks => "ss",
            Protocol::ShadowsocksR => "ssr",
            Protocol::VMess => "vmess",
            Protocol::VLess => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Hysteria2 => "hy2",
            Protocol::Unknown => "unknown",
        }
    }

    /// Value written to the `type` key of the raw field map
    pub fn type_name(self) -> &'static str {
        match self {
            Protocol::Hysteria2 => "hysteria2",
            other => other.as_str(),
        }
    }

    /// Maps a proxy-list `type` value to a protocol
    pub fn from_type(type_name: &str) -> Protocol {
        match type_name.trim().to_ascii_lowercase().as_str() {
            "ss" | "shadowsocks" => Protocol::Shadowsocks,
            "ssr" | "shadowsocksr" => Protocol::ShadowsocksR,
            "vmess" => Protocol::VMess,
            "vless" => Protocol::VLess,
            "trojan" => Protocol::Trojan,
            "hysteria2" | "hy2" => Protocol::Hysteria2,
            _ => Protocol::Unknown,
        }
    }

    /// Display name used when a link carries no name of its own
    pub fn default_name(self) -> &'static str {
        match self {
            Protocol::Shadowsocks => "SS节点",
            Protocol::ShadowsocksR => "SSR节点",
            Protocol::VMess => "VMess节点",
            Protocol::VLess => "VLESS节点",
            Protocol::Trojan => "Trojan节点",
            Protocol::Hysteria2 => "Hysteria2节点",
            Protocol::Unknown => "",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

impl FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Protocol::from_type(s) {
            Protocol::Unknown if !s.eq_ignore_ascii_case("unknown") => {
                Err(anyhow!("Unknown protocol: {}", s))
            }
            protocol => Ok(protocol),
        }
    }
}

// ============================================================================
// Proxy Record
// ============================================================================

/// One decoded proxy endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRecord {
    pub server: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Display name, may be empty until the merger synthesises one
    pub name: String,
    /// Resolved lazily at merge time
    pub country_code: Option<String>,
    /// Name of the configured source that produced this record
    pub source_name: String,
    pub raw_fields: RawFields,
}

impl ProxyRecord {
    /// Builds a record from a raw field map, reading `server`, `port` and `name`
    pub fn from_raw_fields(raw_fields: RawFields, protocol: Protocol) -> Result<Self> {
        let server = match raw_fields.get("server") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => bail!("Proxy entry missing server"),
        };

        let port = raw_fields
            .get("port")
            .and_then(port_from_value)
            .ok_or_else(|| anyhow!("Proxy entry {} has missing or invalid port", server))?;

        let name = raw_fields
            .get("name")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .unwrap_or_default();

        Ok(Self {
            server,
            port,
            protocol,
            name,
            country_code: None,
            source_name: String::new(),
            raw_fields,
        })
    }

    /// Builds a record from a persisted entry, taking the protocol from `type`
    pub fn from_stored(raw_fields: RawFields) -> Result<Self> {
        let protocol = raw_fields
            .get("type")
            .and_then(Value::as_str)
            .map(Protocol::from_type)
            .unwrap_or(Protocol::Unknown);
        Self::from_raw_fields(raw_fields, protocol)
    }

    /// Deduplication identity: `server:port`
    pub fn unique_key(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// Sets the display name, keeping the raw field map in sync
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.raw_fields
            .insert("name".to_string(), Value::String(self.name.clone()));
    }

    /// Tags the record with the source it was parsed from
    pub fn with_source(mut self, source_name: &str) -> Self {
        self.source_name = source_name.to_string();
        self
    }

    /// Short human-readable description, e.g. `[SS]HK-01 - 1.2.3.4:8388`
    pub fn display_info(&self) -> String {
        format!("[{}]{} - {}", self.protocol, self.name, self.unique_key())
    }
}

/// Reads a port that may be encoded as a number or a numeric string
pub(crate) fn port_from_value(value: &Value) -> Option<u16> {
    let port = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u16::try_from(port).ok().filter(|p| *p != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> RawFields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_unique_key() {
        let record = ProxyRecord::from_raw_fields(
            fields(json!({"server": "1.2.3.4", "port": 8388})),
            Protocol::Shadowsocks,
        )
        .unwrap();
        assert_eq!(record.unique_key(), "1.2.3.4:8388");
        assert!(record.name.is_empty());
    }

    #[test]
    fn test_from_raw_fields_string_port() {
        let record = ProxyRecord::from_raw_fields(
            fields(json!({"name": "A", "server": "example.com", "port": "443"})),
            Protocol::Trojan,
        )
        .unwrap();
        assert_eq!(record.port, 443);
        assert_eq!(record.name, "A");
    }

    #[test]
    fn test_from_raw_fields_rejects_bad_port() {
        for port in [json!(0), json!(70000), json!("abc"), json!(null)] {
            let result = ProxyRecord::from_raw_fields(
                fields(json!({"server": "example.com", "port": port})),
                Protocol::Trojan,
            );
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_from_raw_fields_missing_server() {
        let result =
            ProxyRecord::from_raw_fields(fields(json!({"port": 443})), Protocol::Trojan);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_stored_reads_type() {
        let record = ProxyRecord::from_stored(fields(
            json!({"name": "x", "type": "hysteria2", "server": "h.example", "port": 443}),
        ))
        .unwrap();
        assert_eq!(record.protocol, Protocol::Hysteria2);
    }

    #[test]
    fn test_set_name_updates_raw_fields() {
        let mut record = ProxyRecord::from_raw_fields(
            fields(json!({"name": "old", "server": "1.1.1.1", "port": 443})),
            Protocol::Trojan,
        )
        .unwrap();
        record.set_name("new");
        assert_eq!(record.name, "new");
        assert_eq!(record.raw_fields["name"], json!("new"));
    }

    #[test]
    fn test_protocol_from_type() {
        assert_eq!(Protocol::from_type("hy2"), Protocol::Hysteria2);
        assert_eq!(Protocol::from_type("Hysteria2"), Protocol::Hysteria2);
        assert_eq!(Protocol::from_type("vless"), Protocol::VLess);
        assert_eq!(Protocol::from_type("socks5"), Protocol::Unknown);
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("ssr".parse::<Protocol>().unwrap(), Protocol::ShadowsocksR);
        assert_eq!("unknown".parse::<Protocol>().unwrap(), Protocol::Unknown);
        assert!("http".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_protocol_serde_uses_short_names() {
        assert_eq!(serde_json::to_string(&Protocol::Hysteria2).unwrap(), "\"hy2\"");
        let parsed: Protocol = serde_json::from_str("\"vmess\"").unwrap();
        assert_eq!(parsed, Protocol::VMess);
    }

    #[test]
    fn test_display_info() {
        let mut record = ProxyRecord::from_raw_fields(
            fields(json!({"server": "1.2.3.4", "port": 8388})),
            Protocol::Shadowsocks,
        )
        .unwrap();
        record.set_name("HK");
        assert_eq!(record.display_info(), "[SS]HK - 1.2.3.4:8388");
    }
}
