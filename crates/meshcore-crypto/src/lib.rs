//! # meshcore Crypto
//!
//! Cryptographic primitives used while a meshcore worker establishes its identity.
//!
//! This crate provides:
//! - X25519 node keys and Diffie-Hellman exchange
//! - Self-certifying mesh addresses derived from public keys
//! - SHA-2 hashing used by address derivation and admin authentication
//! - Constant-time comparison helpers
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Output |
//! |----------|-----------|--------|
//! | Node key | X25519 | 32 bytes |
//! | Address | SHA-512(SHA-512(pk)) truncated | 16 bytes |
//! | Admin auth | SHA-256 | 32 bytes |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod address;
pub mod constant_time;
pub mod error;
pub mod hash;
pub mod random;
pub mod x25519;

pub use address::MeshAddress;
pub use error::CryptoError;
pub use x25519::{PrivateKey, PublicKey, SharedSecret};

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size
pub const X25519_SECRET_KEY_SIZE: usize = 32;

/// Mesh address size (an IPv6 address)
pub const ADDRESS_SIZE: usize = 16;

/// First byte every valid mesh address carries (fc00::/8)
pub const ADDRESS_PREFIX: u8 = 0xFC;
