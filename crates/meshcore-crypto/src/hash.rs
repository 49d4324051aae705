//! SHA-2 hashing.
//!
//! SHA-512 backs address derivation, SHA-256 backs admin
//! password/cookie authentication.

use sha2::{Digest, Sha256, Sha512};

/// SHA-512 output (64 bytes).
pub type Sha512Output = [u8; 64];

/// SHA-256 output (32 bytes).
pub type Sha256Output = [u8; 32];

/// Compute SHA-512 of input data.
#[must_use]
pub fn sha512(data: &[u8]) -> Sha512Output {
    Sha512::digest(data).into()
}

/// Compute SHA-256 of input data.
#[must_use]
pub fn sha256(data: &[u8]) -> Sha256Output {
    Sha256::digest(data).into()
}

/// Compute SHA-256 over several parts without concatenating them.
#[must_use]
pub fn sha256_parts(parts: &[&[u8]]) -> Sha256Output {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty_vector() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha512_abc_vector() {
        assert_eq!(
            hex::encode(&sha512(b"abc")[..16]),
            "ddaf35a193617abacc417349ae204131"
        );
    }

    #[test]
    fn test_sha256_parts_matches_concatenation() {
        assert_eq!(sha256_parts(&[b"pass", b"1234"]), sha256(b"pass1234"));
    }
}
