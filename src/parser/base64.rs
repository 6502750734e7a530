//! Base64 decoding utilities
//!
//! Subscription bodies and individual share links are Base64 encoded in a
//! number of sloppy ways: standard or URL-safe alphabet, padding present,
//! missing or excessive, and line breaks inserted every 76 characters. This
//! module provides the lenient decoders used by the protocol parsers and the
//! opportunistic normalizer applied to every fetched body.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use tracing::trace;

/// Markers that identify decoded text as proxy data
const PROXY_MARKERS: [&str; 8] = [
    "ss://",
    "ssr://",
    "vmess://",
    "vless://",
    "trojan://",
    "hy2://",
    "hysteria2://",
    "proxies:",
];

const LENIENT_CONFIG: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

/// Standard alphabet, padding optional
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_CONFIG);

/// URL-safe alphabet, padding optional
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_CONFIG);

/// Base64 alphabet to try first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    Standard,
    UrlSafe,
}

impl Alphabet {
    fn other(self) -> Self {
        match self {
            Alphabet::Standard => Alphabet::UrlSafe,
            Alphabet::UrlSafe => Alphabet::Standard,
        }
    }

    fn engine(self) -> &'static GeneralPurpose {
        match self {
            Alphabet::Standard => &STANDARD_LENIENT,
            Alphabet::UrlSafe => &URL_SAFE_LENIENT,
        }
    }
}

// ============================================================================
// Lenient Decoding
// ============================================================================

/// Decodes with the given alphabet, tolerating missing or excess padding
///
/// Trailing `=` characters are discarded before decoding, so `abc`, `abc=`
/// and `abc===` all decode the same way.
pub fn decode_padded(content: &str, alphabet: Alphabet) -> Result<Vec<u8>> {
    let cleaned = content.trim().trim_end_matches('=');
    alphabet
        .engine()
        .decode(cleaned)
        .with_context(|| format!("Invalid {:?} Base64 content", alphabet))
}

/// Decodes to UTF-8 text, trying `first` and then the other alphabet
pub fn decode_to_string(content: &str, first: Alphabet) -> Result<String> {
    for alphabet in [first, first.other()] {
        if let Ok(bytes) = decode_padded(content, alphabet)
            && let Ok(text) = String::from_utf8(bytes)
        {
            trace!("Decoded {} bytes using {:?} alphabet", text.len(), alphabet);
            return Ok(text);
        }
    }
    bail!("Failed to decode Base64 content")
}

// ============================================================================
// Normalizer
// ============================================================================

/// Checks whether text contains any known proxy scheme or a YAML proxy list
pub fn contains_proxy_marker(text: &str) -> bool {
    let lowered = text.to_lowercase();
    PROXY_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Opportunistically decodes a Base64 body
///
/// Attempts, in order: strict standard Base64, URL-safe with padding
/// tolerated, standard with padding tolerated, and standard after removing
/// line breaks. The first attempt that yields UTF-8 text containing a proxy
/// marker wins and is returned trimmed (inner line breaks are kept, they
/// separate entries). Otherwise the input is returned trimmed.
pub fn try_decode(content: &str) -> String {
    let original = content.trim();
    let attempts: [(&str, fn(&str) -> Option<Vec<u8>>); 4] = [
        ("standard", |s| STANDARD.decode(s).ok()),
        ("url-safe padded", |s| decode_padded(s, Alphabet::UrlSafe).ok()),
        ("standard padded", |s| decode_padded(s, Alphabet::Standard).ok()),
        ("standard without line breaks", |s| {
            let joined: String = s.chars().filter(|c| *c != '\n' && *c != '\r').collect();
            decode_padded(&joined, Alphabet::Standard).ok()
        }),
    ];

    for (label, attempt) in attempts {
        if let Some(bytes) = attempt(original)
            && let Ok(decoded) = String::from_utf8(bytes)
            && contains_proxy_marker(&decoded)
        {
            trace!("Normalized content via {} Base64 decode", label);
            return decoded.trim().to_string();
        }
    }

    original.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;

    #[test]
    fn test_decode_padded_standard() {
        let decoded = decode_padded("aGVsbG8gd29ybGQ=", Alphabet::Standard).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "hello world");
    }

    #[test]
    fn test_decode_padded_without_padding() {
        let decoded = decode_padded("aGVsbG8gd29ybGQ", Alphabet::Standard).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "hello world");
    }

    #[test]
    fn test_decode_padded_excess_padding() {
        let decoded = decode_padded("aGVsbG8gd29ybGQ===", Alphabet::Standard).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "hello world");
    }

    #[test]
    fn test_decode_padded_url_safe() {
        // "hello-world?" with URL-safe encoding
        let decoded = decode_padded("aGVsbG8td29ybGQ_", Alphabet::UrlSafe).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "hello-world?");
        assert!(decode_padded("aGVsbG8td29ybGQ_", Alphabet::Standard).is_err());
    }

    #[test]
    fn test_decode_to_string_falls_back_to_other_alphabet() {
        let text = decode_to_string("aGVsbG8td29ybGQ_", Alphabet::Standard).unwrap();
        assert_eq!(text, "hello-world?");
    }

    #[test]
    fn test_decode_to_string_invalid() {
        assert!(decode_to_string("not valid base64!!!", Alphabet::Standard).is_err());
    }

    #[test]
    fn test_try_decode_uri_list() {
        let original = "ss://abc@host1:1234#node1\nvmess://xyz";
        let encoded = STANDARD.encode(original);
        assert_eq!(try_decode(&encoded), original);
    }

    #[test]
    fn test_try_decode_with_line_breaks() {
        let original = "trojan://password@example.com:443#a\ntrojan://password@example.org:443#b";
        let encoded = STANDARD.encode(original);
        let wrapped = format!("{}\r\n{}", &encoded[..40], &encoded[40..]);
        assert_eq!(try_decode(&wrapped), original);
    }

    #[test]
    fn test_try_decode_yaml() {
        let original = "proxies:\n- name: A\n  server: 1.1.1.1";
        let encoded = URL_SAFE.encode(original);
        assert_eq!(try_decode(&encoded), original);
    }

    #[test]
    fn test_try_decode_passes_through_plain_text() {
        let plain = "vless://uuid@example.com:443#node";
        assert_eq!(try_decode(plain), plain);
    }

    #[test]
    fn test_try_decode_trims_undecodable_content() {
        assert_eq!(try_decode("  \n garbage text \r\n"), "garbage text");
    }

    #[test]
    fn test_try_decode_ignores_non_proxy_base64() {
        // Valid Base64 of "hello world" does not look like proxy data
        assert_eq!(try_decode("aGVsbG8gd29ybGQ="), "aGVsbG8gd29ybGQ=");
    }

    #[test]
    fn test_try_decode_is_stable() {
        let encoded = STANDARD.encode("ss://abc@host1:1234#node1");
        let once = try_decode(&encoded);
        assert_eq!(try_decode(&once), once);
    }

    #[test]
    fn test_contains_proxy_marker_case_insensitive() {
        assert!(contains_proxy_marker("VLESS://abc"));
        assert!(contains_proxy_marker("foo\nproxies:\n"));
        assert!(!contains_proxy_marker("http://example.com"));
    }
}
