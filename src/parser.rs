//! Subscription content parsing
//!
//! This module provides functionality for:
//! - Normalizing Base64-wrapped subscription bodies
//! - Detecting the protocol of a block of text (share links or YAML)
//! - Splitting mixed or concatenated content into candidate lines
//! - Decoding each candidate with the parser for its protocol
//!
//! A malformed line never aborts the batch: it is logged, counted and skipped.

pub mod base64;
pub mod detection;
pub mod protocols;
pub mod splitter;
pub mod yaml;

pub use detection::{ProtocolTag, detect};
pub use protocols::{ProtocolParser, parser_for};

use tracing::{debug, trace, warn};

use crate::model::ProxyRecord;

// ============================================================================
// Parse Result
// ============================================================================

/// Outcome of parsing one fetched body
#[derive(Debug, Default)]
pub struct ParsedBatch {
    /// Protocol detected for the body as a whole
    pub detected: Option<ProtocolTag>,
    pub records: Vec<ProxyRecord>,
    /// Candidate lines handed to a decoder
    pub attempted: usize,
    /// Candidate lines a decoder rejected
    pub failed: usize,
    /// Candidate lines with no recognizable protocol
    pub skipped: usize,
}

// ============================================================================
// Unified Content Parsing
// ============================================================================

/// Parses fetched content into records tagged with `source_name`
///
/// YAML proxy lists are handed to the YAML parser as a whole. Anything else
/// is split into candidate lines, each detected and decoded on its own.
pub fn parse_content(content: &str, source_name: &str) -> ParsedBatch {
    let normalized = base64::try_decode(content);
    let detected = detect(&normalized);
    debug!("Detected content type: {}", detected);

    if detected == ProtocolTag::Yaml {
        let records = yaml::parse_yaml_content(&normalized, source_name);
        return ParsedBatch {
            detected: Some(detected),
            attempted: records.len(),
            records,
            ..Default::default()
        };
    }

    let mut batch = ParsedBatch {
        detected: Some(detected),
        ..Default::default()
    };

    let lines = splitter::split(&normalized);
    debug!("Parsing {} candidate lines", lines.len());

    for (index, line) in lines.iter().enumerate() {
        let tag = detect(line);
        let Some(protocol) = tag.protocol() else {
            trace!("Line {}: no protocol detected ({}), skipping", index + 1, tag);
            batch.skipped += 1;
            continue;
        };

        batch.attempted += 1;
        match protocols::decode(protocol, line) {
            Ok(record) => {
                trace!("Line {}: parsed {}", index + 1, record.display_info());
                batch.records.push(record.with_source(source_name));
            }
            Err(e) => {
                warn!("Failed to parse line {} as {}: {:#}", index + 1, protocol, e);
                batch.failed += 1;
            }
        }
    }

    debug!(
        "Parsing complete: {} parsed, {} failed, {} skipped",
        batch.records.len(),
        batch.failed,
        batch.skipped
    );
    batch
}
