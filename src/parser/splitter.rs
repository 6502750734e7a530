//! Mixed content splitting
//!
//! Sources frequently concatenate several share links on one line, or
//! prepend status annotations such as `STATUS=🟢 12ms` to each link. This
//! module turns such a blob into one candidate line per link.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Recognized scheme prefixes; longer schemes come first so that a match
/// never starts inside a longer scheme (`ss://` inside `vless://`)
static SCHEME_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"vless://|vmess://|ssr://|ss://|trojan://|hysteria2://|hy2://")
        .expect("scheme pattern is valid")
});

/// Splits text into candidate proxy lines
///
/// Multi-line text is split on line breaks, dropping blank lines and `#`
/// comments. A single line holding several links is split before each
/// scheme prefix. Every candidate has its status annotation stripped.
pub fn split(content: &str) -> Vec<String> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let candidates: Vec<String> = match lines.as_slice() {
        [single] if SCHEME_START.find_iter(single).count() > 1 => {
            debug!("Splitting single line with concatenated links");
            split_concatenated(single)
        }
        _ => lines.iter().map(|line| line.to_string()).collect(),
    };

    let result: Vec<String> = candidates
        .into_iter()
        .filter(|line| !line.starts_with('#'))
        .map(|line| strip_status_prefix(&line).to_string())
        .collect();

    debug!("Split content into {} candidate lines", result.len());
    result
}

/// Splits one line immediately before each recognized scheme prefix
pub fn split_concatenated(line: &str) -> Vec<String> {
    let mut starts: Vec<usize> = SCHEME_START.find_iter(line).map(|m| m.start()).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }

    starts
        .iter()
        .zip(starts.iter().skip(1).chain(std::iter::once(&line.len())))
        .map(|(&start, &end)| line[start..end].trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Drops a `STATUS=` annotation preceding the first scheme prefix
pub fn strip_status_prefix(line: &str) -> &str {
    let Some(status_pos) = line.find("STATUS=") else {
        return line;
    };
    match SCHEME_START.find(line) {
        Some(scheme) if scheme.start() > status_pos => &line[scheme.start()..],
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_multiline() {
        let content = "ss://a\n\n  # comment\n  vmess://b  \ntrojan://c";
        assert_eq!(split(content), vec!["ss://a", "vmess://b", "trojan://c"]);
    }

    #[test]
    fn test_split_concatenated_single_line() {
        let content = "vmess://abcvless://uuid@h:1?x=y#nss://def#n2";
        assert_eq!(
            split(content),
            vec!["vmess://abc", "vless://uuid@h:1?x=y#n", "ss://def#n2"]
        );
    }

    #[test]
    fn test_split_does_not_break_inside_longer_scheme() {
        let parts = split_concatenated("vless://a@h:1vless://b@h:2");
        assert_eq!(parts, vec!["vless://a@h:1", "vless://b@h:2"]);
    }

    #[test]
    fn test_split_single_link_untouched() {
        assert_eq!(split("trojan://pw@h:443#x"), vec!["trojan://pw@h:443#x"]);
    }

    #[test]
    fn test_split_concatenated_keeps_leading_text() {
        let parts = split_concatenated("junk ss://a ss://b");
        assert_eq!(parts, vec!["junk", "ss://a", "ss://b"]);
    }

    #[test]
    fn test_strip_status_prefix() {
        assert_eq!(
            strip_status_prefix("STATUS=🟢 120ms|vless://uuid@h:1#n"),
            "vless://uuid@h:1#n"
        );
        assert_eq!(strip_status_prefix("ss://abc"), "ss://abc");
        // Marker after the link is left alone
        assert_eq!(
            strip_status_prefix("ss://abc#STATUS=ok"),
            "ss://abc#STATUS=ok"
        );
    }

    #[test]
    fn test_split_applies_status_stripping() {
        let content = "STATUS=ok trojan://pw@h:1\nSTATUS=bad ss://abc";
        assert_eq!(split(content), vec!["trojan://pw@h:1", "ss://abc"]);
    }

    #[test]
    fn test_split_empty() {
        assert!(split("").is_empty());
        assert!(split("\n  \n# only comment").is_empty());
    }
}
