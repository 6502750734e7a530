//! Trojan protocol parser
//!
//! This module provides parsing for Trojan (trojan://) URIs.
//! Format: trojan://password@host:port?params#name

use anyhow::{Result, anyhow, bail};
use serde_json::{Value, json};
use tracing::trace;
use url::Url;

use crate::model::{Protocol, ProxyRecord, RawFields};

use super::{
    ProtocolParser, authority_host, build_record, encode_fragment, field_bool, field_str,
    fragment_name, require_port, require_str, url_host, url_params,
};

// ============================================================================
// Trojan Parser
// ============================================================================

/// Parser for Trojan (trojan://) URIs
pub struct TrojanParser;

impl ProtocolParser for TrojanParser {
    fn protocol(&self) -> Protocol {
        Protocol::Trojan
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["trojan"]
    }

    fn parse(&self, uri: &str) -> Result<ProxyRecord> {
        trace!("Parsing Trojan URI");
        let url =
            Url::parse(uri.trim()).map_err(|e| anyhow!("Failed to parse Trojan URI: {}", e))?;

        let password = urlencoding::decode(url.username())
            .unwrap_or_else(|_| url.username().into())
            .into_owned();
        if password.is_empty() {
            bail!("Trojan URI missing password");
        }

        let server = url_host(&url).ok_or_else(|| anyhow!("Trojan URI missing host"))?;
        let port = url.port().ok_or_else(|| anyhow!("Trojan URI missing port"))?;

        let params = url_params(&url);
        let param = |key: &str| params.get(key).map(String::as_str);

        let mut fields = json!({
            "name": fragment_name(url.fragment(), Protocol::Trojan),
            "type": Protocol::Trojan.type_name(),
            "server": server,
            "port": port,
            "password": password,
            "sni": param("sni").unwrap_or(server.as_str()),
            "skip-cert-verify": param("allowInsecure") == Some("1"),
        });

        match param("type") {
            Some("ws") => {
                fields["network"] = json!("ws");
                fields["ws-opts"] = json!({
                    "path": param("path").unwrap_or("/"),
                    "headers": { "Host": param("host").unwrap_or(server.as_str()) },
                });
            }
            Some("grpc") => {
                fields["network"] = json!("grpc");
                fields["grpc-opts"] = json!({
                    "grpc-service-name": param("serviceName").unwrap_or(""),
                });
            }
            _ => {}
        }

        build_record(Protocol::Trojan, fields)
    }

    fn encode(&self, fields: &RawFields) -> Result<String> {
        let server = require_str(fields, "server")?;
        let port = require_port(fields)?;
        let password = require_str(fields, "password")?;

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if let Some(sni) = field_str(fields, "sni") {
            query.append_pair("sni", sni);
        }
        if field_bool(fields, "skip-cert-verify") {
            query.append_pair("allowInsecure", "1");
        }

        let opts = |key: &str| fields.get(key).and_then(Value::as_object);
        match field_str(fields, "network") {
            Some("ws") => {
                query.append_pair("type", "ws");
                if let Some(ws) = opts("ws-opts") {
                    if let Some(path) = field_str(ws, "path") {
                        query.append_pair("path", path);
                    }
                    if let Some(host) = ws
                        .get("headers")
                        .and_then(Value::as_object)
                        .and_then(|headers| field_str(headers, "Host"))
                    {
                        query.append_pair("host", host);
                    }
                }
            }
            Some("grpc") => {
                query.append_pair("type", "grpc");
                if let Some(service) =
                    opts("grpc-opts").and_then(|grpc| field_str(grpc, "grpc-service-name"))
                {
                    query.append_pair("serviceName", service);
                }
            }
            _ => {}
        }

        let query = query.finish();
        Ok(format!(
            "trojan://{}@{}:{}{}{}{}",
            urlencoding::encode(password),
            authority_host(server),
            port,
            if query.is_empty() { "" } else { "?" },
            query,
            encode_fragment(fields)
        ))
    }
}
