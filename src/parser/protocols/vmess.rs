//! VMess protocol parser
//!
//! This module provides parsing for VMess (vmess://) URIs.
//! VMess URIs are Base64 encoded JSON containing connection details.

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::trace;

use crate::model::{Protocol, ProxyRecord, RawFields, port_from_value};
use crate::parser::base64::{Alphabet, decode_to_string};

use super::{
    ProtocolParser, build_record, clean_display_name, field_bool, field_str, require_port,
    require_str,
};

// ============================================================================
// VMess Parser
// ============================================================================

/// Parser for VMess (vmess://) URIs
///
/// vmess://BASE64({ "v": "2", "ps": "name", "add": "host", "port": 443, "id": "uuid", ... })
pub struct VMessParser;

impl ProtocolParser for VMessParser {
    fn protocol(&self) -> Protocol {
        Protocol::VMess
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["vmess"]
    }

    fn parse(&self, uri: &str) -> Result<ProxyRecord> {
        trace!("Parsing VMess URI");
        let encoded = uri
            .trim()
            .strip_prefix("vmess://")
            .ok_or_else(|| anyhow!("Invalid VMess URI: missing vmess:// prefix"))?;

        let decoded = decode_to_string(encoded, Alphabet::Standard)
            .context("Failed to decode VMess URI")?;
        trace!("Decoded VMess JSON: {}", decoded);

        let json: Value = serde_json::from_str(&decoded).context("Failed to parse VMess JSON")?;
        let text = |key: &str| -> Option<String> {
            match json.get(key)? {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };

        let (Some(server), Some(port_value), Some(uuid)) =
            (text("add"), json.get("port"), text("id"))
        else {
            bail!("VMess config missing add, port or id");
        };
        let port = port_from_value(port_value)
            .ok_or_else(|| anyhow!("Invalid VMess port: {}", port_value))?;

        let name = text("ps")
            .map(|ps| clean_display_name(&ps))
            .unwrap_or_else(|| Protocol::VMess.default_name().to_string());
        let alter_id = text("aid")
            .and_then(|aid| aid.parse::<u64>().ok())
            .unwrap_or(0);
        let network = text("net").unwrap_or_else(|| "tcp".to_string());
        let tls = match json.get("tls") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty() && s != "none",
            _ => false,
        };

        trace!(
            "VMess config: server={}:{}, net={}, tls={}",
            server, port, network, tls
        );

        let mut fields = json!({
            "name": name,
            "type": Protocol::VMess.type_name(),
            "server": server,
            "port": port,
            "uuid": uuid,
            "alterId": alter_id,
            "cipher": text("scy").unwrap_or_else(|| "auto".to_string()),
            "network": network,
            "tls": tls,
        });
        if let Some(sni) = text("sni") {
            fields["servername"] = json!(sni);
        }

        let path = text("path");
        let host = text("host");
        match network.as_str() {
            "ws" => {
                let mut ws = json!({ "path": path.as_deref().unwrap_or("/") });
                if let Some(host) = &host {
                    ws["headers"] = json!({ "Host": host });
                }
                fields["ws-opts"] = ws;
            }
            "grpc" => {
                let service = text("serviceName").or(path).unwrap_or_default();
                fields["grpc-opts"] = json!({ "grpc-service-name": service });
            }
            "http" => {
                fields["http-opts"] = json!({
                    "method": "GET",
                    "path": [path.as_deref().unwrap_or("/")],
                    "headers": { "Host": [host.as_deref().unwrap_or(server.as_str())] },
                });
            }
            _ => {}
        }

        build_record(Protocol::VMess, fields)
    }

    fn encode(&self, fields: &RawFields) -> Result<String> {
        let network = field_str(fields, "network").unwrap_or("tcp");
        let (path, host) = transport_path_host(fields, network);

        let config = json!({
            "v": "2",
            "ps": field_str(fields, "name").unwrap_or_default(),
            "add": require_str(fields, "server")?,
            "port": require_port(fields)?,
            "id": require_str(fields, "uuid")?,
            "aid": fields.get("alterId").and_then(Value::as_u64).unwrap_or(0),
            "scy": field_str(fields, "cipher").unwrap_or("auto"),
            "net": network,
            "type": "none",
            "host": host.unwrap_or_default(),
            "path": path.unwrap_or_default(),
            "tls": if field_bool(fields, "tls") { "tls" } else { "" },
            "sni": field_str(fields, "servername").unwrap_or_default(),
        });

        Ok(format!("vmess://{}", STANDARD.encode(config.to_string())))
    }
}

/// Reads the transport path and host back out of the Clash-style option blocks
fn transport_path_host<'a>(
    fields: &'a RawFields,
    network: &str,
) -> (Option<&'a str>, Option<&'a str>) {
    let opts = move |key: &str| fields.get(key).and_then(Value::as_object);
    match network {
        "ws" => {
            let Some(ws) = opts("ws-opts") else {
                return (None, None);
            };
            let host = ws
                .get("headers")
                .and_then(|h| h.get("Host"))
                .and_then(Value::as_str);
            (field_str(ws, "path"), host)
        }
        "grpc" => (
            opts("grpc-opts").and_then(|grpc| field_str(grpc, "grpc-service-name")),
            None,
        ),
        "http" => {
            let Some(http) = opts("http-opts") else {
                return (None, None);
            };
            let first = |value: Option<&'a Value>| {
                value
                    .and_then(Value::as_array)
                    .and_then(|items| items.first())
                    .and_then(Value::as_str)
            };
            (
                first(http.get("path")),
                first(http.get("headers").and_then(|h| h.get("Host"))),
            )
        }
        _ => (None, None),
    }
}
