//! Protocol detection
//!
//! This module classifies a block of text as one of the supported share-link
//! dialects, a YAML proxy list, or unknown content. Detection always runs on
//! the Base64-normalized form of the input.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::model::Protocol;

use super::base64::try_decode;

// ============================================================================
// Protocol Tag
// ============================================================================

/// Detected content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolTag {
    Shadowsocks,
    ShadowsocksR,
    VMess,
    VLess,
    Trojan,
    Hysteria2,
    /// YAML proxy list (`proxies:` document or bare list)
    Yaml,
    Unknown,
}

impl ProtocolTag {
    /// Record protocol decoded for this tag, `None` for YAML and unknown content
    pub fn protocol(self) -> Option<Protocol> {
        match self {
            ProtocolTag::Shadowsocks => Some(Protocol::Shadowsocks),
            ProtocolTag::ShadowsocksR => Some(Protocol::ShadowsocksR),
            ProtocolTag::VMess => Some(Protocol::VMess),
            ProtocolTag::VLess => Some(Protocol::VLess),
            ProtocolTag::Trojan => Some(Protocol::Trojan),
            ProtocolTag::Hysteria2 => Some(Protocol::Hysteria2),
            ProtocolTag::Yaml | ProtocolTag::Unknown => None,
        }
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol() {
            Some(protocol) => write!(f, "{}", protocol),
            None if *self == ProtocolTag::Yaml => write!(f, "YAML"),
            None => write!(f, "Unknown"),
        }
    }
}

/// Scheme prefixes in prefix-match order; supersets come before their substrings
const PREFIXES: [(&str, ProtocolTag); 7] = [
    ("vless://", ProtocolTag::VLess),
    ("vmess://", ProtocolTag::VMess),
    ("trojan://", ProtocolTag::Trojan),
    ("hy2://", ProtocolTag::Hysteria2),
    ("hysteria2://", ProtocolTag::Hysteria2),
    ("ssr://", ProtocolTag::ShadowsocksR),
    ("ss://", ProtocolTag::Shadowsocks),
];

/// Whole-scheme patterns for the frequency scan, in tie-break priority order
static SCHEME_PATTERNS: LazyLock<[(ProtocolTag, Regex); 6]> = LazyLock::new(|| {
    let build = |pattern: &str| Regex::new(pattern).expect("scheme pattern is valid");
    [
        (ProtocolTag::VLess, build(r"(?i)\bvless://")),
        (ProtocolTag::VMess, build(r"(?i)\bvmess://")),
        (ProtocolTag::Trojan, build(r"(?i)\btrojan://")),
        (ProtocolTag::ShadowsocksR, build(r"(?i)\bssr://")),
        (ProtocolTag::Shadowsocks, build(r"(?i)\bss://")),
        (ProtocolTag::Hysteria2, build(r"(?i)\b(?:hy2|hysteria2)://")),
    ]
});

// ============================================================================
// Detection
// ============================================================================

/// Detects the protocol of a block of text
///
/// The text is Base64-normalized first. Detection then tries, in order: a
/// scheme prefix at the start of the text, the YAML heuristics, and finally
/// a frequency scan of whole-scheme occurrences anywhere in the text.
pub fn detect(content: &str) -> ProtocolTag {
    let normalized = try_decode(content);
    let trimmed = normalized.trim();
    let preview: String = trimmed.chars().take(100).collect();
    debug!(
        "Detecting protocol, content length: {} bytes, preview: {:?}",
        trimmed.len(),
        preview
    );

    if let Some(tag) = detect_prefix(trimmed) {
        debug!("Detected {} by scheme prefix", tag);
        return tag;
    }

    if is_yaml_proxy_list(trimmed) {
        debug!("Detected YAML proxy list");
        return ProtocolTag::Yaml;
    }

    let tag = detect_by_frequency(trimmed);
    debug!("Frequency scan result: {}", tag);
    tag
}

/// Matches a scheme prefix at the very start of the text
pub fn detect_prefix(text: &str) -> Option<ProtocolTag> {
    PREFIXES
        .iter()
        .find(|(prefix, _)| text.starts_with(prefix))
        .map(|(_, tag)| *tag)
}

/// Checks the YAML heuristics
pub fn is_yaml_proxy_list(text: &str) -> bool {
    text.contains("proxies:")
        || (text.starts_with('-') && text.contains("server:"))
        || (text.contains("name:") && text.contains("server:") && text.contains("port:"))
}

/// Counts whole-scheme occurrences and returns the most frequent protocol
///
/// Ties go to the earlier entry of VLESS, VMess, Trojan, SSR, SS, Hysteria2.
pub fn detect_by_frequency(text: &str) -> ProtocolTag {
    let mut best: Option<(ProtocolTag, usize)> = None;
    for (tag, pattern) in SCHEME_PATTERNS.iter() {
        let count = pattern.find_iter(text).count();
        if count > 0 && best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((*tag, count));
        }
    }
    best.map(|(tag, _)| tag).unwrap_or(ProtocolTag::Unknown)
}
