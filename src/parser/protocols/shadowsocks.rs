//! Shadowsocks protocol parser
//!
//! This module provides parsing for Shadowsocks (ss://) URIs.
//! Supports both SIP002 format and legacy format, as well as SIP003 plugins.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use tracing::trace;

use crate::model::{Protocol, ProxyRecord, RawFields};
use crate::parser::base64::{Alphabet, decode_to_string};

use super::{
    ProtocolParser, authority_host, build_record, encode_fragment, field_str, fragment_name,
    parse_host_port, require_port, require_str,
};

// ============================================================================
// Shadowsocks Parser
// ============================================================================

/// Parser for Shadowsocks (ss://) URIs
///
/// - SIP002: ss://BASE64(method:password)@host:port#name
/// - SIP002 with plain userinfo: ss://method:password@host:port#name
/// - SIP002 with SIP003 plugin: ss://userinfo@host:port/?plugin=name;opts#name
/// - Legacy: ss://BASE64(method:password@host:port)#name
pub struct ShadowsocksParser;

impl ProtocolParser for ShadowsocksParser {
    fn protocol(&self) -> Protocol {
        Protocol::Shadowsocks
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["ss"]
    }

    fn parse(&self, uri: &str) -> Result<ProxyRecord> {
        trace!("Parsing Shadowsocks URI");
        let without_scheme = uri
            .trim()
            .strip_prefix("ss://")
            .ok_or_else(|| anyhow!("Invalid Shadowsocks URI: missing ss:// prefix"))?;

        let (main_part, fragment) = match without_scheme.split_once('#') {
            Some((main, fragment)) => (main, Some(fragment)),
            None => (without_scheme, None),
        };
        let name = fragment_name(fragment, Protocol::Shadowsocks);

        let endpoint = match main_part.rfind('@') {
            Some(at_pos) => {
                trace!("Parsing as SIP002 format (found @ separator)");
                parse_sip002(main_part, at_pos)?
            }
            None => {
                trace!("Parsing as legacy Base64 format");
                parse_legacy(main_part)?
            }
        };

        let mut fields = json!({
            "name": name,
            "type": Protocol::Shadowsocks.type_name(),
            "server": endpoint.server,
            "port": endpoint.port,
            "cipher": endpoint.method,
            "password": endpoint.password,
        });
        if let Some(plugin) = endpoint.plugin {
            fields["plugin"] = json!(plugin);
            if let Some(opts) = endpoint.plugin_opts {
                fields["plugin-opts"] = json!(opts);
            }
        }

        build_record(Protocol::Shadowsocks, fields)
    }

    fn encode(&self, fields: &RawFields) -> Result<String> {
        let server = require_str(fields, "server")?;
        let port = require_port(fields)?;
        let method = require_str(fields, "cipher")?;
        let password = field_str(fields, "password").unwrap_or_default();

        let userinfo = URL_SAFE_NO_PAD.encode(format!("{}:{}", method, password));
        let query = match field_str(fields, "plugin") {
            Some(plugin) => {
                let value = match field_str(fields, "plugin-opts") {
                    Some(opts) => format!("{};{}", plugin, opts),
                    None => plugin.to_string(),
                };
                format!("/?plugin={}", urlencoding::encode(&value))
            }
            None => String::new(),
        };

        Ok(format!(
            "ss://{}@{}:{}{}{}",
            userinfo,
            authority_host(server),
            port,
            query,
            encode_fragment(fields)
        ))
    }
}

struct Endpoint {
    server: String,
    port: u16,
    method: String,
    password: String,
    plugin: Option<String>,
    plugin_opts: Option<String>,
}

/// Parses SIP002 format: BASE64(method:password)@host:port or method:password@host:port
fn parse_sip002(main_part: &str, at_pos: usize) -> Result<Endpoint> {
    let userinfo = &main_part[..at_pos];
    let hostport_and_query = &main_part[at_pos + 1..];

    let (hostport_raw, query_string) = match hostport_and_query.split_once('?') {
        Some((hostport, query)) => (hostport, Some(query)),
        None => (hostport_and_query, None),
    };

    // Strip trailing slash that may appear before the query string
    let (server, port) = parse_host_port(hostport_raw.trim_end_matches('/'))?;
    let (method, password) = parse_userinfo(userinfo)?;
    let (plugin, plugin_opts) = parse_plugin_query(query_string);

    Ok(Endpoint {
        server,
        port,
        method,
        password,
        plugin,
        plugin_opts,
    })
}

/// Parses legacy format: BASE64(method:password@host:port)
fn parse_legacy(main_part: &str) -> Result<Endpoint> {
    let decoded = decode_to_string(main_part, Alphabet::Standard)
        .context("Failed to decode legacy Shadowsocks URI")?;

    let (userinfo, hostport) = decoded
        .split_once('@')
        .ok_or_else(|| anyhow!("Invalid legacy Shadowsocks format: missing @"))?;

    let (server, port) = parse_host_port(hostport.trim())?;
    let (method, password) = userinfo.split_once(':').ok_or_else(|| {
        anyhow!("Invalid Shadowsocks userinfo: missing method:password separator")
    })?;

    Ok(Endpoint {
        server,
        port,
        method: method.to_string(),
        password: password.to_string(),
        plugin: None,
        plugin_opts: None,
    })
}

/// Parses userinfo which can be Base64(method:password) or method:password
fn parse_userinfo(userinfo: &str) -> Result<(String, String)> {
    if let Ok(decoded) = decode_to_string(userinfo, Alphabet::Standard)
        && let Some((method, password)) = decoded.split_once(':')
    {
        return Ok((method.to_string(), password.to_string()));
    }

    // Plain method:password, URL-encoded
    let decoded = urlencoding::decode(userinfo)
        .unwrap_or_else(|_| userinfo.into())
        .into_owned();
    let (method, password) = decoded
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid Shadowsocks userinfo format"))?;

    Ok((method.to_string(), password.to_string()))
}

/// Parses the SIP003 `plugin` query parameter: `plugin=plugin-name;plugin-opts`
fn parse_plugin_query(query_string: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(query) = query_string.filter(|q| !q.is_empty()) else {
        return (None, None);
    };

    for param in query.split('&') {
        if let Some(raw_value) = param.strip_prefix("plugin=") {
            let decoded = urlencoding::decode(raw_value)
                .unwrap_or_else(|_| raw_value.into())
                .into_owned();

            if decoded.is_empty() {
                return (None, None);
            }

            // First ';' separates the plugin name from its options
            return match decoded.split_once(';') {
                Some((plugin, opts)) => (
                    Some(plugin.to_string()),
                    (!opts.is_empty()).then(|| opts.to_string()),
                ),
                None => (Some(decoded), None),
            };
        }
    }

    (None, None)
}
