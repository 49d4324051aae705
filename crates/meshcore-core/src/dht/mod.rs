//! DHT message dispatch.
//!
//! Incoming DHT messages are bencoded dictionaries. Queries carry a `q`
//! (`"pn"` ping, `"fn"` find node) and a `txid`; responses carry the `txid`
//! of the query they answer and no `q`.
//!
//! Messages flow through a fixed [`DispatchChain`]: reply correlation,
//! then the router, then the serialization catch-all. The first stage that
//! claims a message handles it and later stages never see it.

pub mod registry;
pub mod reply;
pub mod router;
pub mod serialization;

use crate::benc::Dict;
use crate::error::RequestError;

pub use registry::{ChainBuilder, Dispatch, DispatchChain, StageKind};
pub use reply::ReplyModule;
pub use router::{NodeEntry, NodeStore, RouterModule};
pub use serialization::SerializationModule;

/// A decoded DHT message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtMessage {
    body: Dict,
}

impl DhtMessage {
    /// Wrap a decoded dictionary
    #[must_use]
    pub fn new(body: Dict) -> Self {
        Self { body }
    }

    /// The query name, if this is a query
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.body.get_str("q")
    }

    /// Transaction id
    #[must_use]
    pub fn txid(&self) -> Option<&[u8]> {
        self.body.get_bytes("txid")
    }

    /// Whether this message is a response (txid without q)
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.txid().is_some() && !self.body.contains_key("q")
    }

    /// The underlying dictionary
    #[must_use]
    pub fn body(&self) -> &Dict {
        &self.body
    }
}

/// One stage of the dispatch chain.
///
/// Stages are shared with their admin methods, so handlers take `&self`
/// and keep mutable state behind their own locks.
pub trait DhtModule: Send + Sync {
    /// Whether this stage takes the message
    fn claims(&self, message: &DhtMessage) -> bool;

    /// Handle a claimed message, optionally producing a response.
    fn handle(&self, message: &DhtMessage) -> Result<Option<Dict>, RequestError>;
}

impl<T: DhtModule + ?Sized> DhtModule for std::sync::Arc<T> {
    fn claims(&self, message: &DhtMessage) -> bool {
        (**self).claims(message)
    }

    fn handle(&self, message: &DhtMessage) -> Result<Option<Dict>, RequestError> {
        (**self).handle(message)
    }
}
