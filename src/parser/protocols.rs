//! Protocol parsers module
//!
//! This module contains parsers for the supported share-link dialects. Each
//! parser implements the `ProtocolParser` trait to provide a consistent
//! interface for decoding a link into a `ProxyRecord` and encoding a record's
//! raw fields back into a link.

mod hysteria2;
mod shadowsocks;
mod shadowsocksr;
mod trojan;
mod vless;
mod vmess;

pub use hysteria2::Hysteria2Parser;
pub use shadowsocks::ShadowsocksParser;
pub use shadowsocksr::ShadowsocksRParser;
pub use trojan::TrojanParser;
pub use vless::VLessParser;
pub use vmess::VMessParser;

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use url::{Host, Url};

use crate::model::{Protocol, ProxyRecord, RawFields};

// ============================================================================
// Protocol Parser Trait
// ============================================================================

/// Trait for decoding and encoding individual protocol links
pub trait ProtocolParser: Send + Sync {
    /// Protocol produced by this parser
    fn protocol(&self) -> Protocol;

    /// URI schemes this parser accepts (e.g. `["hy2", "hysteria2"]`)
    fn schemes(&self) -> &'static [&'static str];

    /// Parses a single link into a record
    fn parse(&self, uri: &str) -> Result<ProxyRecord>;

    /// Encodes raw fields back into a link of this dialect
    fn encode(&self, fields: &RawFields) -> Result<String>;

    /// Checks if this parser can handle the given link
    fn can_parse(&self, uri: &str) -> bool {
        self.schemes()
            .iter()
            .any(|scheme| uri.strip_prefix(scheme).is_some_and(|rest| rest.starts_with("://")))
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Returns the parser for a protocol, `None` for `Unknown`
pub fn parser_for(protocol: Protocol) -> Option<&'static dyn ProtocolParser> {
    match protocol {
        Protocol::Shadowsocks => Some(&ShadowsocksParser),
        Protocol::ShadowsocksR => Some(&ShadowsocksRParser),
        Protocol::VMess => Some(&VMessParser),
        Protocol::VLess => Some(&VLessParser),
        Protocol::Trojan => Some(&TrojanParser),
        Protocol::Hysteria2 => Some(&Hysteria2Parser),
        Protocol::Unknown => None,
    }
}

/// Decodes a link with the parser for `protocol`
///
/// Fails without invoking the parser when the link does not start with one
/// of the parser's schemes.
pub fn decode(protocol: Protocol, uri: &str) -> Result<ProxyRecord> {
    let parser =
        parser_for(protocol).ok_or_else(|| anyhow!("No parser for protocol {}", protocol))?;
    if !parser.can_parse(uri) {
        bail!("Link does not start with a {} scheme", protocol);
    }

    let result = parser.parse(uri);
    match &result {
        Ok(record) => debug!("Parsed {} link -> {}", protocol, record.unique_key()),
        Err(e) => debug!("Failed to parse {} link: {}", protocol, e),
    }
    result
}

/// Encodes a record back into a share link of its own protocol
pub fn encode(record: &ProxyRecord) -> Result<String> {
    let parser = parser_for(record.protocol)
        .ok_or_else(|| anyhow!("Cannot encode {} record", record.protocol))?;
    parser.encode(&record.raw_fields)
}

// ============================================================================
// Helper Functions
// ============================================================================

static VIP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)vip").expect("VIP pattern is valid"));

/// Strips "VIP" marketing text and surrounding separators from a display name
///
/// Falls back to the untouched name when nothing would be left.
pub fn clean_display_name(name: &str) -> String {
    let stripped = VIP_PATTERN.replace_all(name, "");
    let cleaned = stripped.trim_matches(|c| matches!(c, ' ' | '-' | '_' | '|'));
    if cleaned.is_empty() {
        name.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Percent-decodes a fragment into a cleaned display name
pub fn fragment_name(fragment: Option<&str>, protocol: Protocol) -> String {
    match fragment.filter(|f| !f.is_empty()) {
        Some(raw) => {
            let decoded = urlencoding::decode(raw)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            clean_display_name(&decoded)
        }
        None => protocol.default_name().to_string(),
    }
}

/// Parses a query string; the first occurrence of a key wins and blank values are dropped
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

/// Reads query pairs from a parsed URL; the first occurrence of a key wins
pub fn url_params(url: &Url) -> HashMap<String, String> {
    url.query().map(parse_query).unwrap_or_default()
}

/// Host of a parsed URL without IPv6 brackets
pub fn url_host(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Ipv6(addr) => Some(addr.to_string()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Domain(domain) if !domain.is_empty() => Some(domain.to_string()),
        Host::Domain(_) => None,
    }
}

/// Parses host:port string, handling IPv6 addresses in brackets
pub fn parse_host_port(hostport: &str) -> Result<(String, u16)> {
    // Handle IPv6 addresses: [::1]:8080
    if hostport.starts_with('[') {
        let bracket_end = hostport
            .find(']')
            .ok_or_else(|| anyhow!("Invalid IPv6 address: missing closing bracket"))?;

        let host = hostport[1..bracket_end].to_string();
        let port_str = hostport
            .get(bracket_end + 2..)
            .ok_or_else(|| anyhow!("Missing port after IPv6 address"))?;

        return Ok((host, parse_port(port_str)?));
    }

    let (host, port_str) = hostport
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Invalid host:port format: missing colon"))?;

    if host.is_empty() {
        bail!("Invalid host:port format: empty host");
    }

    Ok((host.to_string(), parse_port(port_str)?))
}

/// Parses a port number in 1..=65535
pub fn parse_port(port: &str) -> Result<u16> {
    match port.trim().parse::<u16>() {
        Ok(0) | Err(_) => bail!("Invalid port number: {}", port),
        Ok(p) => Ok(p),
    }
}

/// Formats a host for use inside a URI authority
pub fn authority_host(server: &str) -> String {
    if server.contains(':') && !server.starts_with('[') {
        format!("[{}]", server)
    } else {
        server.to_string()
    }
}

/// Builds a record from a JSON object literal of raw fields
pub(crate) fn build_record(protocol: Protocol, fields: Value) -> Result<ProxyRecord> {
    match fields {
        Value::Object(map) => ProxyRecord::from_raw_fields(map, protocol),
        _ => bail!("Raw fields must be an object"),
    }
}

/// Reads a string field from raw fields
pub(crate) fn field_str<'a>(fields: &'a RawFields, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Reads a required string field from raw fields
pub(crate) fn require_str<'a>(fields: &'a RawFields, key: &str) -> Result<&'a str> {
    field_str(fields, key).ok_or_else(|| anyhow!("Missing field: {}", key))
}

/// Reads the required port field from raw fields
pub(crate) fn require_port(fields: &RawFields) -> Result<u16> {
    fields
        .get("port")
        .and_then(crate::model::port_from_value)
        .ok_or_else(|| anyhow!("Missing or invalid field: port"))
}

/// Reads a boolean field, accepting `true`, `"1"` and `"true"`
pub(crate) fn field_bool(fields: &RawFields, key: &str) -> bool {
    match fields.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

/// Percent-encodes a display name for use as a link fragment
pub(crate) fn encode_fragment(fields: &RawFields) -> String {
    field_str(fields, "name")
        .map(|name| format!("#{}", urlencoding::encode(name)))
        .unwrap_or_default()
}
