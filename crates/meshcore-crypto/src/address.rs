//! Self-certifying mesh addresses.
//!
//! An address is the first 16 bytes of `SHA-512(SHA-512(public_key))`.
//! Only addresses inside fc00::/8 are valid; a key whose address falls
//! elsewhere cannot be used as a node key.

use std::fmt;
use std::net::Ipv6Addr;

use crate::hash::sha512;
use crate::x25519::PublicKey;
use crate::{ADDRESS_PREFIX, ADDRESS_SIZE};

/// 16-byte mesh address derived from a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshAddress([u8; ADDRESS_SIZE]);

impl MeshAddress {
    /// Derive the address for a public key.
    ///
    /// The result is not range-checked; see [`MeshAddress::is_valid`].
    #[must_use]
    pub fn for_public_key(key: &PublicKey) -> Self {
        let first = sha512(key.as_bytes());
        let second = sha512(&first);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&second[..ADDRESS_SIZE]);
        Self(bytes)
    }

    /// Wrap raw address bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Whether the address lies in fc00::/8.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0[0] == ADDRESS_PREFIX
    }

    /// Raw address bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// The address as an IPv6 address.
    #[must_use]
    pub fn to_ipv6(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.0)
    }
}

/// Renders eight colon-separated groups of four hex digits, without
/// IPv6 zero compression.
impl fmt::Display for MeshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pair) in self.0.chunks_exact(2).enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}{:02x}", pair[0], pair[1])?;
        }
        Ok(())
    }
}

impl fmt::Debug for MeshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeshAddress({self})")
    }
}
