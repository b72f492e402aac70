//! Shared type aliases and small helpers

use chrono::{DateTime as ChronoDateTime, Utc};

/// Database DateTime type used across all Consentry crates
///
/// Every TIMESTAMPTZ column of the webhook tables maps to this type, and it
/// serializes as RFC 3339 in API responses.
pub type DBDateTime = ChronoDateTime<Utc>;

/// Truncate a string to at most `max_chars` characters without splitting a
/// UTF-8 code point.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}
