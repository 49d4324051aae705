//! Node identity.
//!
//! A node's identity is fully determined by its private key: the X25519
//! public key, and the self-certifying address hashed from it. It is
//! derived once during bootstrap and then shared read-only through an
//! `Arc<NodeIdentity>` with every module that needs to know who it is.

use meshcore_crypto::{MeshAddress, PrivateKey, PublicKey};

use crate::error::{FatalError, Result};

/// Public identity of this node
#[derive(Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    public_key: PublicKey,
    address: MeshAddress,
}

impl NodeIdentity {
    /// Derive the identity for a private key.
    ///
    /// Deterministic: the same key yields the same identity on every node.
    ///
    /// # Errors
    ///
    /// Returns [`FatalError::AddressOutOfRange`] if the derived address is
    /// not inside fc00::/8. The key must then be regenerated out of band;
    /// this function never retries with another key.
    pub fn derive(private_key: &PrivateKey) -> Result<Self> {
        let public_key = private_key.public_key();
        let address = MeshAddress::for_public_key(&public_key);
        if !address.is_valid() {
            return Err(FatalError::AddressOutOfRange {
                address: address.to_string(),
            });
        }
        Ok(Self {
            public_key,
            address,
        })
    }

    /// The node's X25519 public key
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The node's mesh address
    #[must_use]
    pub fn address(&self) -> &MeshAddress {
        &self.address
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("public_key", &hex::encode(&self.public_key.as_bytes()[..8]))
            .field("address", &self.address.to_string())
            .finish()
    }
}
