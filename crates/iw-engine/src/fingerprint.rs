//! Content-addressed cache keys.

use sha2::{Digest, Sha256};

/// Stable key for `text`, optionally namespaced by `scope`.
///
/// The full content is hashed, so inputs that share a prefix and length
/// never collide systematically. Case and whitespace are significant.
pub fn fingerprint(text: &str, scope: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    if let Some(scope) = scope {
        hasher.update(scope.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(text.as_bytes());
    to_hex(&hasher.finalize())
}

/// Like [`fingerprint`], but trims and lowercases first so that trivially
/// different spellings of a search query share a key.
pub fn normalized_fingerprint(text: &str, scope: Option<&str>) -> String {
    fingerprint(&text.trim().to_lowercase(), scope)
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
