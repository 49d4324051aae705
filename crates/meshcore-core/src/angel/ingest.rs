//! Decoding the initial configuration sent by the supervisor.
//!
//! Expected shape:
//!
//! ```text
//! {
//!   "privateKey": "<64 hex chars>",
//!   "admin": { "pass": "<password>" }
//! }
//! ```
//!
//! Unknown keys are ignored. Everything here is consumed once: the private
//! key moves into the crypto-session layer and the password into the admin
//! table, and neither is kept verbatim anywhere else.

use meshcore_crypto::PrivateKey;
use zeroize::Zeroizing;

use crate::benc::Dict;
use crate::error::{FatalError, Result};

/// Admin password, wiped from memory on drop
#[derive(Clone)]
pub struct AdminPassword(Zeroizing<Vec<u8>>);

impl AdminPassword {
    /// Wrap password bytes
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Password bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the password is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for AdminPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AdminPassword(<{} bytes>)", self.0.len())
    }
}

/// Validated initial configuration
#[derive(Debug)]
pub struct BootstrapConfig {
    /// The node's long-term private key
    pub private_key: PrivateKey,
    /// Password guarding privileged admin methods
    pub admin_password: AdminPassword,
}

impl BootstrapConfig {
    /// Extract and validate the required fields.
    ///
    /// # Errors
    ///
    /// - [`FatalError::MissingConfigKey`] if `privateKey`, `admin` or
    ///   `admin.pass` is absent or not the expected type
    /// - [`FatalError::InvalidPrivateKey`] if `privateKey` is not exactly
    ///   64 hex characters
    pub fn from_dict(config: &Dict) -> Result<Self> {
        let private_key_hex = config
            .get_bytes("privateKey")
            .ok_or(FatalError::MissingConfigKey("privateKey"))?;
        let pass = config
            .get_dict("admin")
            .ok_or(FatalError::MissingConfigKey("admin"))?
            .get_bytes("pass")
            .ok_or(FatalError::MissingConfigKey("admin.pass"))?;

        let private_key = PrivateKey::from_hex(private_key_hex)
            .map_err(|e| FatalError::InvalidPrivateKey(e.to_string()))?;

        let admin_password = AdminPassword::new(pass.to_vec());
        if admin_password.is_empty() {
            tracing::warn!("admin password is empty; privileged admin methods are unprotected");
        }
        tracing::debug!(
            "initial configuration accepted, admin password is {} bytes",
            admin_password.len()
        );

        Ok(Self {
            private_key,
            admin_password,
        })
    }
}
