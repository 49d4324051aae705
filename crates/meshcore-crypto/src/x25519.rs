//! X25519 node keys (RFC 7748).
//!
//! A node's long-term key is an X25519 scalar; its public key is the
//! fixed-base scalar multiplication of that scalar. Clamping is applied
//! by `x25519-dalek`, so every 32-byte string is a usable private key.

use std::fmt;

use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{CryptoError, X25519_SECRET_KEY_SIZE};

/// X25519 private key (32 bytes).
#[derive(Clone, ZeroizeOnDrop, Zeroize)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// X25519 shared secret (32 bytes).
#[derive(ZeroizeOnDrop, Zeroize)]
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl PrivateKey {
    /// Generate a new random private key.
    ///
    /// Only about one key in 256 yields an address inside fc00::/8; callers
    /// that need a usable node key keep generating until one does.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    /// Import from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    /// Parse a key written as exactly 64 hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] when the text is not 64
    /// characters long and [`CryptoError::InvalidKeyEncoding`] when it
    /// contains anything other than hex digits.
    pub fn from_hex(text: &[u8]) -> Result<Self, CryptoError> {
        if text.len() != X25519_SECRET_KEY_SIZE * 2 {
            return Err(CryptoError::InvalidKeyLength {
                expected: X25519_SECRET_KEY_SIZE * 2,
                actual: text.len(),
            });
        }

        let mut bytes = Zeroizing::new([0u8; X25519_SECRET_KEY_SIZE]);
        hex::decode_to_slice(text, bytes.as_mut())
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        Ok(Self::from_bytes(*bytes))
    }

    /// Derive the public key from this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Diffie-Hellman with a peer's public key.
    ///
    /// Returns `None` for low-order peer keys, which yield an all-zero secret.
    #[must_use]
    pub fn exchange(&self, peer_public: &PublicKey) -> Option<SharedSecret> {
        let shared = self.0.diffie_hellman(&peer_public.0);
        if !shared.was_contributory() {
            return None;
        }
        Some(SharedSecret(shared))
    }

    /// Export as bytes.
    ///
    /// # Security
    ///
    /// The returned bytes contain the raw private key. Handle with care.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

impl PublicKey {
    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl SharedSecret {
    /// Shared secret bytes; feed them through a hash before keying anything.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}
