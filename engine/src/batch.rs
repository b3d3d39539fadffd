//! Turning raw submissions into an ordered, deduplicated candidate batch.

use std::collections::HashSet;

use claimgrid_config::BatchConfig;
use claimgrid_types::{Username, ValidationError};

/// Header cell accepted (and dropped) on the first line of CSV exports.
const CSV_HEADER: &str = "username";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_batch: usize,
    pub max_identifier_len: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

impl From<&BatchConfig> for BatchLimits {
    fn from(config: &BatchConfig) -> Self {
        Self {
            max_batch: config.max_batch,
            max_identifier_len: config.max_identifier_len,
        }
    }
}

/// Split raw text on newlines and commas, then normalize.
///
/// Surrounding double quotes are stripped from each field, and a lone
/// `username` header on the first line is ignored. This is not a CSV parser:
/// commas split fields before quotes are stripped, so `"a,b"` yields two
/// identifiers.
pub fn parse_batch(raw: &str, limits: BatchLimits) -> Result<Vec<Username>, ValidationError> {
    let mut fields = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line_no == 0 && line.trim().trim_matches('"').eq_ignore_ascii_case(CSV_HEADER) {
            continue;
        }
        fields.extend(line.split(',').map(|field| field.trim().trim_matches('"')));
    }
    normalize_batch(fields, limits)
}

/// Trim, lowercase, drop empties, validate and deduplicate, keeping the first
/// occurrence of each identifier in input order.
pub fn normalize_batch<I, S>(items: I, limits: BatchLimits) -> Result<Vec<Username>, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut batch = Vec::new();
    for item in items {
        let raw = item.as_ref();
        if raw.trim().is_empty() {
            continue;
        }
        let username = Username::parse(raw, limits.max_identifier_len)?;
        if seen.insert(username.clone()) {
            batch.push(username);
        }
    }

    if batch.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if batch.len() > limits.max_batch {
        return Err(ValidationError::BatchTooLarge {
            len: batch.len(),
            max: limits.max_batch,
        });
    }
    Ok(batch)
}
