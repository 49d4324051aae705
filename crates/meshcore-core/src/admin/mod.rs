//! Administrative RPC.
//!
//! Modules contribute named methods to an [`AdminTable`] during bootstrap.
//! Names are unique: registering one twice is a programming error reported
//! at registration time. Once bootstrap finishes the table is frozen into
//! a [`FrozenAdminTable`], which the event loop consults for every request.
//!
//! # Request shape
//!
//! ```text
//! { "q": "<method>", "args": { ... }, "txid": "<opaque>" }
//! ```
//!
//! Methods flagged `requires_auth` must be wrapped:
//!
//! ```text
//! { "q": "auth", "aq": "<method>", "cookie": "<from cookie>",
//!   "hash": hex(sha256(password || cookie)), "args": { ... }, "txid": ... }
//! ```
//!
//! Every reply carries the request's `txid`. Errors are replies of the form
//! `{"error": "<text>"}`; they never affect other requests.

mod auth;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::angel::AdminPassword;
use crate::arena::Arena;
use crate::benc::{Dict, Value};
use crate::error::{FatalError, RequestError, Result};

pub use auth::{auth_hash, now_secs};

/// Successful outcome of an admin method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminReply {
    /// Send this dictionary back to the caller
    Message(Dict),
    /// Terminate the process with this status, without replying
    Exit(i32),
}

/// Result of an admin method
pub type AdminResult = std::result::Result<AdminReply, RequestError>;

/// An admin method body.
///
/// Handlers run inside the event loop and must not block.
pub trait AdminHandler: Send + Sync {
    /// Run the method with the request's `args`.
    fn call(&self, args: &Dict) -> AdminResult;
}

impl<F> AdminHandler for F
where
    F: Fn(&Dict) -> AdminResult + Send + Sync,
{
    fn call(&self, args: &Dict) -> AdminResult {
        self(args)
    }
}

enum Handler {
    Cookie,
    AvailableFunctions,
    Module(Box<dyn AdminHandler>),
}

struct AdminMethod {
    requires_auth: bool,
    handler: Handler,
}

/// Admin methods under construction
pub struct AdminTable {
    methods: BTreeMap<String, AdminMethod>,
    arena: Arena,
}

impl AdminTable {
    /// Create a table holding the built-in `cookie` and
    /// `Admin_availableFunctions` methods.
    #[must_use]
    pub fn new(arena: Arena) -> Self {
        let mut table = Self {
            methods: BTreeMap::new(),
            arena,
        };
        table.insert("cookie", false, Handler::Cookie);
        table.insert("Admin_availableFunctions", false, Handler::AvailableFunctions);
        table
    }

    fn insert(&mut self, name: &str, requires_auth: bool, handler: Handler) -> bool {
        if self.methods.contains_key(name) {
            return false;
        }
        self.arena
            .charge(name.len() + std::mem::size_of::<AdminMethod>());
        self.methods.insert(
            name.to_string(),
            AdminMethod {
                requires_auth,
                handler,
            },
        );
        true
    }

    /// Register a method.
    ///
    /// # Errors
    ///
    /// [`FatalError::DuplicateAdminMethod`] if `name` is already taken.
    pub fn register<F>(&mut self, name: &str, requires_auth: bool, handler: F) -> Result<()>
    where
        F: Fn(&Dict) -> AdminResult + Send + Sync + 'static,
    {
        if !self.insert(name, requires_auth, Handler::Module(Box::new(handler))) {
            return Err(FatalError::DuplicateAdminMethod(name.to_string()));
        }
        tracing::trace!("registered admin method {}", name);
        Ok(())
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Number of registered methods
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Freeze the table. No methods can be added afterwards.
    #[must_use]
    pub fn freeze(
        self,
        password: AdminPassword,
        cookie_lifetime: Duration,
    ) -> FrozenAdminTable {
        let listing = self
            .methods
            .iter()
            .fold(Dict::new(), |acc, (name, method)| {
                acc.with(
                    name,
                    Dict::new().with("auth", i64::from(method.requires_auth)),
                )
            });
        FrozenAdminTable {
            inner: Arc::new(AdminInner {
                methods: self.methods,
                listing,
                password,
                cookie_lifetime,
                _arena: self.arena,
            }),
        }
    }
}

struct AdminInner {
    methods: BTreeMap<String, AdminMethod>,
    listing: Dict,
    password: AdminPassword,
    cookie_lifetime: Duration,
    _arena: Arena,
}

/// What the event loop should do with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Send this reply
    Reply(Dict),
    /// Terminate the process with this status
    Exit(i32),
    /// Nothing to send; the request could not be correlated
    Dropped(RequestError),
}

/// Frozen admin method table
#[derive(Clone)]
pub struct FrozenAdminTable {
    inner: Arc<AdminInner>,
}

fn error_reply(err: &RequestError) -> Dict {
    Dict::new().with("error", err.reply_text())
}

impl FrozenAdminTable {
    /// Handle one decoded request.
    pub fn handle(&self, request: &Dict) -> Dispatched {
        let Some(txid) = request.get("txid").cloned() else {
            return Dispatched::Dropped(RequestError::MissingField("txid"));
        };

        match self.call(request) {
            Ok(AdminReply::Exit(status)) => Dispatched::Exit(status),
            Ok(AdminReply::Message(mut reply)) => {
                reply.insert("txid", txid);
                Dispatched::Reply(reply)
            }
            Err(err) => {
                tracing::debug!("admin request failed: {}", err);
                let mut reply = error_reply(&err);
                reply.insert("txid", txid);
                Dispatched::Reply(reply)
            }
        }
    }

    fn call(&self, request: &Dict) -> AdminResult {
        let query = request
            .get_str("q")
            .ok_or(RequestError::MissingField("q"))?;

        let (name, authenticated) = if query == "auth" {
            let name = request
                .get_str("aq")
                .ok_or(RequestError::MissingField("aq"))?;
            auth::verify(
                request,
                self.inner.password.as_bytes(),
                self.inner.cookie_lifetime,
                now_secs(),
            )?;
            (name, true)
        } else {
            (query, false)
        };

        let method = self
            .inner
            .methods
            .get(name)
            .ok_or_else(|| RequestError::NoSuchFunction(name.to_string()))?;
        if method.requires_auth && !authenticated {
            return Err(RequestError::AuthFailed);
        }

        let empty = Dict::new();
        let args = match request.get("args") {
            None => &empty,
            Some(Value::Dict(args)) => args,
            Some(_) => return Err(RequestError::MissingField("args")),
        };

        match &method.handler {
            Handler::Cookie => Ok(AdminReply::Message(
                Dict::new().with("cookie", now_secs().to_string()),
            )),
            Handler::AvailableFunctions => Ok(AdminReply::Message(
                Dict::new().with("availableFunctions", self.inner.listing.clone()),
            )),
            Handler::Module(handler) => handler.call(args),
        }
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.methods.contains_key(name)
    }

    /// Registered method names in order
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.inner.methods.keys().map(String::as_str)
    }
}
