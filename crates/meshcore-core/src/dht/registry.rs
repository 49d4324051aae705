//! The ordered dispatch chain and its typestate builder.
//!
//! ```text
//! DispatchChain::builder()
//!     .reply_correlation(reply)
//!     .router(router)
//!     .serialization(serialization)
//! ```
//!
//! Each builder method is only available in the state the previous one
//! leaves behind, so the chain cannot be assembled in another order.

use std::fmt;

use super::{DhtMessage, DhtModule};
use crate::benc::{self, Dict};
use crate::error::RequestError;

/// Position of a stage in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Matches responses to queries we sent
    ReplyCorrelation,
    /// Answers queries
    Router,
    /// Takes whatever is left
    Serialization,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::ReplyCorrelation => "reply",
            StageKind::Router => "router",
            StageKind::Serialization => "serialization",
        })
    }
}

/// Result of dispatching one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Stage that claimed the message
    pub stage: StageKind,
    /// Response to send back, if any
    pub response: Option<Dict>,
}

type Stage = Box<dyn DhtModule>;

/// Builder state: nothing registered
pub struct Empty;
/// Builder state: reply correlation registered
pub struct WithReply(Stage);
/// Builder state: reply correlation and router registered
pub struct WithRouter(Stage, Stage);

/// Typestate builder for [`DispatchChain`]
pub struct ChainBuilder<S> {
    state: S,
}

impl ChainBuilder<Empty> {
    /// First stage: reply correlation.
    pub fn reply_correlation(self, module: impl DhtModule + 'static) -> ChainBuilder<WithReply> {
        ChainBuilder {
            state: WithReply(Box::new(module)),
        }
    }
}

impl ChainBuilder<WithReply> {
    /// Second stage: the router.
    pub fn router(self, module: impl DhtModule + 'static) -> ChainBuilder<WithRouter> {
        ChainBuilder {
            state: WithRouter(self.state.0, Box::new(module)),
        }
    }
}

impl ChainBuilder<WithRouter> {
    /// Last stage: serialization. Completes the chain.
    pub fn serialization(self, module: impl DhtModule + 'static) -> DispatchChain {
        let WithRouter(reply, router) = self.state;
        DispatchChain {
            stages: [
                (StageKind::ReplyCorrelation, reply),
                (StageKind::Router, router),
                (StageKind::Serialization, Box::new(module)),
            ],
        }
    }
}

/// Frozen, ordered set of DHT stages
pub struct DispatchChain {
    stages: [(StageKind, Stage); 3],
}

impl fmt::Debug for DispatchChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|(kind, _)| kind))
            .finish()
    }
}

impl DispatchChain {
    /// Start building a chain
    #[must_use]
    pub fn builder() -> ChainBuilder<Empty> {
        ChainBuilder { state: Empty }
    }

    /// Stage kinds in dispatch order
    pub fn order(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.stages.iter().map(|(kind, _)| *kind)
    }

    /// Offer `message` to each stage in order; the first claimant handles it.
    ///
    /// # Errors
    ///
    /// Whatever the claiming stage reports. Errors stay with this message.
    pub fn dispatch(&self, message: &DhtMessage) -> Result<Dispatch, RequestError> {
        for (kind, stage) in &self.stages {
            if stage.claims(message) {
                tracing::trace!("dht message claimed by {}", kind);
                let response = stage.handle(message)?;
                return Ok(Dispatch {
                    stage: *kind,
                    response,
                });
            }
        }
        // The serialization stage claims everything it is offered.
        Ok(Dispatch {
            stage: StageKind::Serialization,
            response: None,
        })
    }

    /// Decode a raw message and dispatch it.
    ///
    /// # Errors
    ///
    /// [`RequestError::Decode`] if `bytes` is not a bencoded dictionary.
    pub fn dispatch_bytes(&self, bytes: &[u8]) -> Result<Dispatch, RequestError> {
        let body = benc::decode_dict(bytes).map_err(|e| RequestError::Decode(e.to_string()))?;
        self.dispatch(&DhtMessage::new(body))
    }
}
