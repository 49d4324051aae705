//! Interface controller: fabric interfaces and the peers behind them.
//!
//! Interfaces are registered with the switch as they are created. Peers
//! learned on an interface get a switch label and are handed to the node
//! store so the router can find them.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use meshcore_crypto::{MeshAddress, PublicKey};

use super::crypto_auth::CryptoAuth;
use super::switch::{Label, SwitchCore};
use crate::admin::{AdminReply, AdminTable};
use crate::arena::Arena;
use crate::benc::{Dict, Value};
use crate::dht::NodeStore;
use crate::error::{RequestError, Result};

/// Default bind address for `UDPInterface_new`
pub const DEFAULT_BIND: &str = "0.0.0.0:0";

/// Most peers tracked at once
pub const MAX_PEERS: usize = 1024;

/// A registered interface
#[derive(Debug)]
struct Interface {
    number: u32,
    bind: SocketAddr,
    _arena: Arena,
}

/// Link state of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Session keys not yet confirmed
    Handshake,
    /// Traffic is flowing
    Established,
    /// No traffic for too long
    Unresponsive,
}

impl PeerState {
    fn as_str(self) -> &'static str {
        match self {
            PeerState::Handshake => "HANDSHAKE",
            PeerState::Established => "ESTABLISHED",
            PeerState::Unresponsive => "UNRESPONSIVE",
        }
    }
}

/// A peer reachable over one of our interfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Peer public key
    pub public_key: PublicKey,
    /// Route to the peer
    pub label: Label,
    /// Interface it was learned on
    pub interface: u32,
    /// Remote socket address
    pub remote: SocketAddr,
    /// Link state
    pub state: PeerState,
    /// Bytes received
    pub bytes_in: u64,
    /// Bytes sent
    pub bytes_out: u64,
}

#[derive(Debug, Default)]
struct State {
    interfaces: Vec<Interface>,
    peers: Vec<Peer>,
}

/// Owner of fabric interfaces and their peers
#[derive(Debug)]
pub struct InterfaceController {
    switch: Arc<SwitchCore>,
    crypto_auth: Arc<CryptoAuth>,
    store: Arc<NodeStore>,
    state: Mutex<State>,
    arena: Arena,
}

impl InterfaceController {
    /// Create a controller over the switch and node store
    #[must_use]
    pub fn new(
        switch: Arc<SwitchCore>,
        crypto_auth: Arc<CryptoAuth>,
        store: Arc<NodeStore>,
        arena: Arena,
    ) -> Self {
        Self {
            switch,
            crypto_auth,
            store,
            state: Mutex::new(State::default()),
            arena,
        }
    }

    /// Register a UDP interface bound to `bind`; returns its number.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidArgument`] when the switch has no free slot
    /// or the interface would cross the memory ceiling.
    pub fn add_udp_interface(&self, bind: SocketAddr) -> std::result::Result<u32, RequestError> {
        let entry = self.arena.child("interface");
        entry
            .try_charge(std::mem::size_of::<Interface>())
            .map_err(|breach| RequestError::InvalidArgument(breach.to_string().into()))?;
        let number = self.switch.attach(&format!("udp/{bind}"))?;
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .interfaces
            .push(Interface {
                number,
                bind,
                _arena: entry,
            });
        Ok(number)
    }

    /// Registered interfaces as `(number, bind address)`
    #[must_use]
    pub fn interfaces(&self) -> Vec<(u32, SocketAddr)> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .interfaces
            .iter()
            .map(|i| (i.number, i.bind))
            .collect()
    }

    /// Add a peer on `interface` and hand it to the node store.
    ///
    /// Entry point for interface drivers when a handshake arrives. The
    /// peer's label is its interface slot, which routes one hop out.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidArgument`] when the interface is unknown, the
    /// key is degenerate or already peered, the peer is ourselves, the peer
    /// table is full, or the entry would cross the memory ceiling.
    pub fn add_peer(
        &self,
        interface: u32,
        public_key: PublicKey,
        remote: SocketAddr,
    ) -> std::result::Result<Label, RequestError> {
        if public_key == *self.crypto_auth.public_key() {
            return Err(RequestError::InvalidArgument("cannot peer with self".into()));
        }
        if self.crypto_auth.session_key(&public_key).is_none() {
            return Err(RequestError::InvalidArgument("degenerate peer key".into()));
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.interfaces.iter().any(|i| i.number == interface) {
            return Err(RequestError::InvalidArgument(
                format!("no interface {interface}").into(),
            ));
        }
        if state.peers.iter().any(|p| p.public_key == public_key) {
            return Err(RequestError::InvalidArgument("already peered".into()));
        }
        if state.peers.len() >= MAX_PEERS {
            return Err(RequestError::InvalidArgument(
                format!("at most {MAX_PEERS} peers").into(),
            ));
        }
        self.arena
            .try_charge(std::mem::size_of::<Peer>())
            .map_err(|breach| RequestError::InvalidArgument(breach.to_string().into()))?;
        let label = Label::new((u64::from(interface) << 1) | 1);
        state.peers.push(Peer {
            public_key,
            label,
            interface,
            remote,
            state: PeerState::Handshake,
            bytes_in: 0,
            bytes_out: 0,
        });
        drop(state);

        self.store.insert(public_key, label, 0);
        tracing::info!(
            "peer {} added on interface {} at {}",
            MeshAddress::for_public_key(&public_key),
            interface,
            label
        );
        Ok(label)
    }

    /// Current peers
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peers
            .clone()
    }

    /// Register `UDPInterface_new` and `InterfaceController_peerStats`.
    pub fn register_admin(self: &Arc<Self>, table: &mut AdminTable) -> Result<()> {
        let controller = Arc::clone(self);
        table.register("UDPInterface_new", true, move |args: &Dict| {
            let text = match args.get("bindAddress") {
                None => DEFAULT_BIND,
                Some(v) => v.as_str().ok_or(RequestError::MissingField("bindAddress"))?,
            };
            let bind: SocketAddr = text.parse().map_err(|_| {
                RequestError::InvalidArgument(format!("malformed bindAddress '{text}'").into())
            })?;
            let number = controller.add_udp_interface(bind)?;
            Ok(AdminReply::Message(
                Dict::new()
                    .with("error", "none")
                    .with("interfaceNumber", i64::from(number)),
            ))
        })?;

        let controller = Arc::clone(self);
        table.register("InterfaceController_peerStats", false, move |_: &Dict| {
            let peers: Vec<Value> = controller
                .peers()
                .iter()
                .map(|p| {
                    Dict::new()
                        .with("addr", MeshAddress::for_public_key(&p.public_key).to_string())
                        .with("switchLabel", p.label.to_string())
                        .with("state", p.state.as_str())
                        .with("bytesIn", i64::try_from(p.bytes_in).unwrap_or(i64::MAX))
                        .with("bytesOut", i64::try_from(p.bytes_out).unwrap_or(i64::MAX))
                        .into()
                })
                .collect();
            let total = peers.len();
            Ok(AdminReply::Message(
                Dict::new().with("peers", peers).with("total", total),
            ))
        })
    }
}
