//! Hysteria2 protocol parser
//!
//! This module provides parsing for Hysteria2 (hysteria2:// or hy2://) URIs.
//! Format: hysteria2://auth@host:port?params#name

use anyhow::{Result, anyhow, bail};
use serde_json::json;
use tracing::trace;
use url::Url;

use crate::model::{Protocol, ProxyRecord, RawFields};

use super::{
    ProtocolParser, authority_host, build_record, encode_fragment, field_bool, field_str,
    fragment_name, require_port, require_str, url_host, url_params,
};

// ============================================================================
// Hysteria2 Parser
// ============================================================================

/// Parser for Hysteria2 (hysteria2:// or hy2://) URIs
pub struct Hysteria2Parser;

impl ProtocolParser for Hysteria2Parser {
    fn protocol(&self) -> Protocol {
        Protocol::Hysteria2
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["hysteria2", "hy2"]
    }

    fn parse(&self, uri: &str) -> Result<ProxyRecord> {
        let url =
            Url::parse(uri.trim()).map_err(|e| anyhow!("Failed to parse Hysteria2 URI: {}", e))?;
        trace!("Parsing Hysteria2 URI (scheme: {})", url.scheme());

        let password = urlencoding::decode(url.username())
            .unwrap_or_else(|_| url.username().into())
            .into_owned();
        if password.is_empty() {
            bail!("Hysteria2 URI missing password");
        }

        let server = url_host(&url).ok_or_else(|| anyhow!("Hysteria2 URI missing host"))?;
        let port = url
            .port()
            .ok_or_else(|| anyhow!("Hysteria2 URI missing port"))?;

        let params = url_params(&url);
        let param = |key: &str| params.get(key).map(String::as_str);

        let mut fields = json!({
            "name": fragment_name(url.fragment(), Protocol::Hysteria2),
            "type": Protocol::Hysteria2.type_name(),
            "server": server,
            "port": port,
            "password": password,
            "sni": param("sni").unwrap_or(server.as_str()),
            "skip-cert-verify": param("insecure") == Some("1"),
        });

        if let Some(obfs) = param("obfs") {
            fields["obfs"] = json!(obfs);
            if let Some(obfs_password) = param("obfs-password") {
                fields["obfs-password"] = json!(obfs_password);
            }
        }

        build_record(Protocol::Hysteria2, fields)
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
            query.append_pair("insecure", "1");
        }
        if let Some(obfs) = field_str(fields, "obfs") {
            query.append_pair("obfs", obfs);
            if let Some(obfs_password) = field_str(fields, "obfs-password") {
                query.append_pair("obfs-password", obfs_password);
            }
        }

        let query = query.finish();
        Ok(format!(
            "hysteria2://{}@{}:{}{}{}{}",
            urlencoding::encode(password),
            authority_host(server),
            port,
            if query.is_empty() { "" } else { "?" },
            query,
            encode_fragment(fields)
        ))
    }
}
