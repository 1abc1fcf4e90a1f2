//! Identity normalization shared by every reader.
//!
//! Whitelist entries and candidate identities arrive in whatever shape
//! humans typed them (`@Alice`, `bob `, `CHARLIE`). Both sides of every
//! membership comparison go through [`normalize`] first.

/// Canonical form of an identity: surrounding whitespace and leading `@`
/// removed, lower-cased.
///
/// Applying it twice yields the same string, so already-normalized values
/// pass through unchanged.
#[must_use]
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('@')
        .trim()
        .to_lowercase()
}

/// Strips whitespace and the leading `@` but keeps the original casing.
///
/// Remote check services receive this form; they own their own
/// normalization rules.
#[must_use]
pub fn strip_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').trim().to_string()
}
