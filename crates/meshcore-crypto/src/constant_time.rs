//! Constant-time comparison.
//!
//! Admin authentication compares a client-supplied hash against one
//! computed locally; neither comparison may leak how many bytes matched.

use subtle::ConstantTimeEq;

/// Compare two byte slices in time that depends only on their lengths.
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Compare a digest against its hex rendering as sent by a client.
///
/// Either case is accepted. Text that is not hex of the right length never
/// matches.
#[must_use]
pub fn digest_matches_hex(digest: &[u8], text: &[u8]) -> bool {
    if text.len() != digest.len() * 2 {
        return false;
    }
    match hex::decode(text) {
        Ok(bytes) => ct_eq(digest, &bytes),
        Err(_) => false,
    }
}
