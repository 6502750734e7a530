//! ShadowsocksR protocol parser
//!
//! This module provides parsing for ShadowsocksR (ssr://) URIs.
//! Format: ssr://BASE64(server:port:protocol:method:obfs:BASE64(password)/?params)
//! where every parameter value is itself URL-safe Base64.

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use tracing::trace;

use crate::model::{Protocol, ProxyRecord, RawFields};
use crate::parser::base64::{Alphabet, decode_to_string};

use super::{
    ProtocolParser, build_record, clean_display_name, field_str, parse_port, require_port,
    require_str,
};

/// Parameters carried in the query part, in encode order
const PARAMS: [(&str, &str); 4] = [
    ("obfsparam", "obfs-param"),
    ("protoparam", "protocol-param"),
    ("remarks", "name"),
    ("group", "group"),
];

// ============================================================================
// ShadowsocksR Parser
// ============================================================================

/// Parser for ShadowsocksR (ssr://) URIs
pub struct ShadowsocksRParser;

impl ProtocolParser for ShadowsocksRParser {
    fn protocol(&self) -> Protocol {
        Protocol::ShadowsocksR
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["ssr"]
    }

    fn parse(&self, uri: &str) -> Result<ProxyRecord> {
        trace!("Parsing ShadowsocksR URI");
        let encoded = uri
            .trim()
            .strip_prefix("ssr://")
            .ok_or_else(|| anyhow!("Invalid SSR URI: missing ssr:// prefix"))?;

        let decoded = decode_to_string(encoded, Alphabet::UrlSafe)
            .context("Failed to decode SSR URI")?;
        trace!("Decoded SSR body: {}", decoded);

        let (main_part, params_part) = decoded.split_once("/?").unwrap_or((decoded.as_str(), ""));

        // server:port:protocol:method:obfs:password_b64
        let parts: Vec<&str> = main_part.split(':').collect();
        if parts.len() < 6 {
            bail!(
                "Invalid SSR URI: expected 6 components in main part, found {}",
                parts.len()
            );
        }

        let port = parse_port(parts[1])?;
        let password = decode_to_string(parts[5], Alphabet::UrlSafe)
            .context("Failed to decode SSR password")?;

        let params = parse_params(params_part);
        let param = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let name = param("remarks")
            .map(|remarks| clean_display_name(&remarks))
            .unwrap_or_else(|| Protocol::ShadowsocksR.default_name().to_string());

        build_record(
            Protocol::ShadowsocksR,
            json!({
                "name": name,
                "type": Protocol::ShadowsocksR.type_name(),
                "server": parts[0],
                "port": port,
                "cipher": parts[3],
                "password": password,
                "protocol": parts[2],
                "obfs": parts[4],
                "protocol-param": param("protoparam").unwrap_or_default(),
                "obfs-param": param("obfsparam").unwrap_or_default(),
                "group": param("group").unwrap_or_default(),
            }),
        )
    }

    fn encode(&self, fields: &RawFields) -> Result<String> {
        let server = require_str(fields, "server")?;
        let port = require_port(fields)?;
        let main = format!(
            "{}:{}:{}:{}:{}:{}",
            server,
            port,
            field_str(fields, "protocol").unwrap_or("origin"),
            require_str(fields, "cipher")?,
            field_str(fields, "obfs").unwrap_or("plain"),
            URL_SAFE_NO_PAD.encode(field_str(fields, "password").unwrap_or_default()),
        );

        let query: Vec<String> = PARAMS
            .iter()
            .filter_map(|(param, field)| {
                field_str(fields, field)
                    .map(|value| format!("{}={}", param, URL_SAFE_NO_PAD.encode(value)))
            })
            .collect();

        let body = if query.is_empty() {
            main
        } else {
            format!("{}/?{}", main, query.join("&"))
        };
        Ok(format!("ssr://{}", URL_SAFE_NO_PAD.encode(body)))
    }
}

/// Splits `key=value_b64` pairs, decoding each value and falling back to the raw text
fn parse_params(params_part: &str) -> Vec<(String, String)> {
    params_part
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| {
            let decoded =
                decode_to_string(value, Alphabet::UrlSafe).unwrap_or_else(|_| value.to_string());
            (key.to_string(), decoded)
        })
        .collect()
}
