//! Crypto session layer.
//!
//! [`CryptoAuth`] is the only place the node's private key lives after
//! bootstrap. It also keeps the list of passwords peers may use to open a
//! session with us.

use std::sync::{Arc, Mutex, PoisonError};

use meshcore_crypto::hash::sha256;
use meshcore_crypto::{PrivateKey, PublicKey};
use zeroize::Zeroizing;

use crate::admin::{AdminReply, AdminTable};
use crate::arena::Arena;
use crate::benc::{Dict, Value};
use crate::error::{RequestError, Result};

/// Most passwords that can be authorized at once
pub const MAX_AUTHORIZED_PASSWORDS: usize = 256;

struct AuthorizedPassword {
    user: String,
    password: Zeroizing<Vec<u8>>,
    // Released when the entry is removed.
    _arena: Arena,
}

/// Session-key holder and peer password list
pub struct CryptoAuth {
    private_key: PrivateKey,
    public_key: PublicKey,
    passwords: Mutex<Vec<AuthorizedPassword>>,
    arena: Arena,
}

impl std::fmt::Debug for CryptoAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoAuth")
            .field("public_key", &hex::encode(self.public_key.as_bytes()))
            .field("users", &self.users())
            .finish_non_exhaustive()
    }
}

impl CryptoAuth {
    /// Take ownership of the private key.
    #[must_use]
    pub fn new(private_key: PrivateKey, arena: Arena) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
            passwords: Mutex::new(Vec::new()),
            arena,
        }
    }

    /// Our public key
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Session key shared with `peer`, or `None` for a degenerate peer key.
    #[must_use]
    pub fn session_key(&self, peer: &PublicKey) -> Option<[u8; 32]> {
        self.private_key
            .exchange(peer)
            .map(|shared| sha256(shared.as_bytes()))
    }

    /// Authorize a password for `user`.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidArgument`] when the password is empty, either
    /// the user or the password is already present, the list is full, or
    /// storing the entry would cross the memory ceiling.
    pub fn add_password(&self, password: &[u8], user: &str) -> std::result::Result<(), RequestError> {
        if password.is_empty() {
            return Err(RequestError::InvalidArgument("password is empty".into()));
        }
        let mut passwords = self.passwords.lock().unwrap_or_else(PoisonError::into_inner);
        if passwords.iter().any(|p| p.user == user) {
            return Err(RequestError::InvalidArgument(
                format!("user '{user}' already exists").into(),
            ));
        }
        if passwords.iter().any(|p| p.password.as_slice() == password) {
            return Err(RequestError::InvalidArgument("password already added".into()));
        }
        if passwords.len() >= MAX_AUTHORIZED_PASSWORDS {
            return Err(RequestError::InvalidArgument(
                format!("at most {MAX_AUTHORIZED_PASSWORDS} passwords").into(),
            ));
        }
        let entry = self.arena.child("password");
        entry
            .try_charge(password.len() + user.len())
            .map_err(|breach| RequestError::InvalidArgument(breach.to_string().into()))?;
        passwords.push(AuthorizedPassword {
            user: user.to_string(),
            password: Zeroizing::new(password.to_vec()),
            _arena: entry,
        });
        tracing::info!("authorized password added for {}", user);
        Ok(())
    }

    /// Remove every password belonging to `user`; returns how many went.
    pub fn remove_user(&self, user: &str) -> usize {
        let mut passwords = self.passwords.lock().unwrap_or_else(PoisonError::into_inner);
        let before = passwords.len();
        passwords.retain(|p| p.user != user);
        before - passwords.len()
    }

    /// Users with an authorized password, in insertion order
    #[must_use]
    pub fn users(&self) -> Vec<String> {
        self.passwords
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.user.clone())
            .collect()
    }

    /// Register the `AuthorizedPasswords_*` methods.
    pub fn register_admin(self: &Arc<Self>, table: &mut AdminTable) -> Result<()> {
        let ca = Arc::clone(self);
        table.register("AuthorizedPasswords_add", true, move |args: &Dict| {
            let password = args
                .get_bytes("password")
                .ok_or(RequestError::MissingField("password"))?;
            let user = match args.get("user") {
                None => format!("user{}", ca.users().len()),
                Some(v) => v
                    .as_str()
                    .ok_or(RequestError::MissingField("user"))?
                    .to_string(),
            };
            ca.add_password(password, &user)?;
            Ok(AdminReply::Message(Dict::new().with("error", "none")))
        })?;

        let ca = Arc::clone(self);
        table.register("AuthorizedPasswords_remove", true, move |args: &Dict| {
            let user = args
                .get_str("user")
                .ok_or(RequestError::MissingField("user"))?;
            if ca.remove_user(user) == 0 {
                return Err(RequestError::InvalidArgument(
                    format!("no such user '{user}'").into(),
                ));
            }
            Ok(AdminReply::Message(Dict::new().with("error", "none")))
        })?;

        let ca = Arc::clone(self);
        table.register("AuthorizedPasswords_list", true, move |_: &Dict| {
            let users: Vec<Value> = ca.users().into_iter().map(Value::from).collect();
            Ok(AdminReply::Message(Dict::new().with("users", users)))
        })
    }
}
