//! Timestamp parsing and identity comparison
//!
//! Feed records carry timestamps written by many different clients. This
//! module folds the encodings seen in practice into a single `DateTime<Utc>`;
//! anything it cannot read is reported as `None` and treated by the filter as
//! an unresolvable timestamp rather than an error.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Offset-carrying formats not covered by RFC 3339 (e.g. `+0000`, space separator)
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Formats without an offset; these are read as UTC
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a timestamp into a comparable UTC instant
///
/// Accepts:
/// - RFC 3339 with or without fractional seconds (`2024-05-01T12:00:00Z`,
///   `2024-05-01T12:00:00.123456Z`, `2024-05-01T14:00:00+02:00`)
/// - compact offsets (`2024-05-01T12:00:00+0000`)
/// - a trailing `Z`/`UTC` designator after a space-separated time
/// - naive date-times, which are taken to be UTC
///
/// Returns `None` when the string matches none of these.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = strip_utc_designator(raw);
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(dt.and_utc());
        }
    }

    None
}

fn strip_utc_designator(raw: &str) -> &str {
    let trimmed = raw
        .strip_suffix(" UTC")
        .or_else(|| raw.strip_suffix('Z'))
        .or_else(|| raw.strip_suffix('z'))
        .unwrap_or(raw);
    trimmed.trim_end()
}

/// Format an instant the way the service expects record timestamps
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Normalize an account identifier for comparison
///
/// Handles are case-insensitive and may be written with a leading `@`.
/// DIDs are returned untouched.
pub fn normalize_identity(id: &str) -> String {
    let id = id.trim();
    if is_did(id) {
        return id.to_string();
    }
    id.trim_start_matches('@').to_ascii_lowercase()
}

/// Compare two account identifiers (handles or DIDs)
///
/// Handles compare case-insensitively ignoring a leading `@`; DIDs compare
/// exactly. A handle never equals a DID.
pub fn same_identity(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a.is_empty() || b.is_empty() {
        return false;
    }
    normalize_identity(a) == normalize_identity(b)
}

pub fn is_did(id: &str) -> bool {
    id.starts_with("did:")
}
