//! Glue between the switch, the crypto layer and the DHT.
//!
//! Frames arriving from the switch that carry DHT traffic are decoded and
//! pushed through the dispatch chain; whatever the chain answers is encoded
//! and handed back for the return path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::switch::{Label, SwitchCore};
use crate::arena::Arena;
use crate::dht::{DispatchChain, StageKind};
use crate::error::RequestError;
use crate::identity::NodeIdentity;

/// Counters kept by the ducttape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DucttapeStats {
    /// DHT messages delivered to the chain
    pub delivered: u64,
    /// Messages that produced a response
    pub answered: u64,
    /// Messages rejected with an error
    pub rejected: u64,
}

/// Connects incoming fabric traffic to the DHT
#[derive(Debug)]
pub struct Ducttape {
    identity: Arc<NodeIdentity>,
    chain: DispatchChain,
    switch: Arc<SwitchCore>,
    tun: Mutex<Option<String>>,
    delivered: AtomicU64,
    answered: AtomicU64,
    rejected: AtomicU64,
    arena: Arena,
}

impl Ducttape {
    /// Take ownership of the dispatch chain.
    #[must_use]
    pub fn new(
        identity: Arc<NodeIdentity>,
        chain: DispatchChain,
        switch: Arc<SwitchCore>,
        arena: Arena,
    ) -> Self {
        Self {
            identity,
            chain,
            switch,
            tun: Mutex::new(None),
            delivered: AtomicU64::new(0),
            answered: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            arena,
        }
    }

    /// Deliver a DHT message that arrived over `from`.
    ///
    /// Entry point for the switch when a frame addressed to this node
    /// carries DHT traffic. Returns the encoded response, if the claiming
    /// stage produced one.
    ///
    /// # Errors
    ///
    /// Per-message errors from decoding or from the claiming stage, and
    /// [`RequestError::InvalidArgument`] when the message would cross the
    /// memory ceiling.
    pub fn deliver_dht(
        &self,
        from: Label,
        bytes: &[u8],
    ) -> Result<(StageKind, Option<Vec<u8>>), RequestError> {
        let scratch = self.arena.child("message");
        scratch
            .try_charge(bytes.len())
            .map_err(|breach| RequestError::InvalidArgument(breach.to_string().into()))?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let dispatch = self.chain.dispatch_bytes(bytes).inspect_err(|e| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("dht message from {} rejected: {}", from, e);
        })?;
        let response = dispatch.response.map(|r| {
            self.answered.fetch_add(1, Ordering::Relaxed);
            r.to_bytes()
        });
        Ok((dispatch.stage, response))
    }

    /// Record the TUN device once it is configured.
    pub fn attach_tun(&self, name: &str) {
        tracing::info!(
            "tun {} carries traffic for {} ({} switch interfaces)",
            name,
            self.identity.address(),
            self.switch.interface_count()
        );
        *self.tun.lock().unwrap_or_else(PoisonError::into_inner) = Some(name.to_string());
    }

    /// Name of the attached TUN device
    #[must_use]
    pub fn tun_name(&self) -> Option<String> {
        self.tun
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> DucttapeStats {
        DucttapeStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            answered: self.answered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
