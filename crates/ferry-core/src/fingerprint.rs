//! Content fingerprints for migration scripts.
//!
//! A fingerprint is the lowercase hex SHA-256 of the script text after line
//! endings are normalized to `\n`, so a checkout with CRLF endings hashes the
//! same as one with LF endings.

use sha2::{Digest, Sha256};

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

/// Computes the fingerprint of a script's text.
#[must_use]
pub fn fingerprint(content: &str) -> String {
    let normalized = normalize_line_endings(content);
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Collapses `\r\n`, `\n\r`, `\r` and `\n` to a single `\n`.
///
/// Pairs are matched left to right, so `"\r\n\r\n"` becomes `"\n\n"`.
#[must_use]
pub fn normalize_line_endings(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                chars.next_if_eq(&'\n');
                out.push('\n');
            }
            '\n' => {
                chars.next_if_eq(&'\r');
                out.push('\n');
            }
            other => out.push(other),
        }
    }

    out
}
