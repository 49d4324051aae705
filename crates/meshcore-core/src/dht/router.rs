//! DHT router: answers queries from the node store.
//!
//! Distance between addresses is their XOR read as a 128-bit big-endian
//! integer. The store always holds this node at the self label.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use meshcore_crypto::{ADDRESS_SIZE, MeshAddress, PublicKey};

use super::{DhtMessage, DhtModule};
use crate::admin::{AdminReply, AdminTable};
use crate::arena::Arena;
use crate::benc::{Dict, Value};
use crate::error::{RequestError, Result};
use crate::identity::NodeIdentity;
use crate::node::switch::Label;

/// DHT protocol version advertised in responses
pub const PROTOCOL_VERSION: i64 = 1;

/// Nodes returned by a find-node query
pub const K: usize = 8;

/// Node store entries per `NodeStore_dumpTable` page
pub const ENTRIES_PER_PAGE: usize = 16;

/// Size of one node in a find-node response: key then label
pub const NODE_ENTRY_SIZE: usize = 32 + 8;

/// A known node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    /// Its public key
    pub public_key: PublicKey,
    /// Its address
    pub address: MeshAddress,
    /// Switch route to it
    pub path: Label,
    /// Link quality estimate; higher is better
    pub reach: u32,
}

fn distance(a: &MeshAddress, b: &MeshAddress) -> u128 {
    u128::from_be_bytes(*a.as_bytes()) ^ u128::from_be_bytes(*b.as_bytes())
}

/// Known nodes, keyed by address
#[derive(Debug)]
pub struct NodeStore {
    nodes: Mutex<Vec<NodeEntry>>,
    arena: Arena,
}

impl NodeStore {
    /// Create a store holding only `identity`.
    #[must_use]
    pub fn new(identity: &NodeIdentity, arena: Arena) -> Self {
        let store = Self {
            nodes: Mutex::new(Vec::new()),
            arena,
        };
        store.insert(*identity.public_key(), Label::SELF, u32::MAX);
        store
    }

    /// Add or update a node; returns true if it was new.
    pub fn insert(&self, public_key: PublicKey, path: Label, reach: u32) -> bool {
        let address = MeshAddress::for_public_key(&public_key);
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = nodes.iter_mut().find(|n| n.address == address) {
            existing.path = path;
            existing.reach = reach;
            return false;
        }
        self.arena.charge(std::mem::size_of::<NodeEntry>());
        nodes.push(NodeEntry {
            public_key,
            address,
            path,
            reach,
        });
        true
    }

    /// Look up a node by address
    #[must_use]
    pub fn get(&self, address: &MeshAddress) -> Option<NodeEntry> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|n| n.address == *address)
            .cloned()
    }

    /// Up to `count` nodes closest to `target`, nearest first.
    #[must_use]
    pub fn closest(&self, target: &MeshAddress, count: usize) -> Vec<NodeEntry> {
        let mut nodes = self
            .nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        nodes.sort_by_key(|n| distance(&n.address, target));
        nodes.truncate(count);
        nodes
    }

    /// Number of known nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One page of entries in insertion order
    #[must_use]
    pub fn page(&self, page: usize) -> (Vec<NodeEntry>, bool) {
        let nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        let start = page.saturating_mul(ENTRIES_PER_PAGE);
        let entries: Vec<NodeEntry> = nodes
            .iter()
            .skip(start)
            .take(ENTRIES_PER_PAGE)
            .cloned()
            .collect();
        let more = start.saturating_add(ENTRIES_PER_PAGE) < nodes.len();
        (entries, more)
    }
}

fn entry_dict(entry: &NodeEntry) -> Dict {
    Dict::new()
        .with("ip", entry.address.to_string())
        .with("path", entry.path.to_string())
        .with("link", i64::from(entry.reach))
}

/// Second stage of the chain: answers `pn` and `fn` queries
#[derive(Debug)]
pub struct RouterModule {
    identity: Arc<NodeIdentity>,
    store: Arc<NodeStore>,
    answered: AtomicU64,
}

impl RouterModule {
    /// Create a router for `identity` over `store`
    #[must_use]
    pub fn new(identity: Arc<NodeIdentity>, store: Arc<NodeStore>) -> Self {
        tracing::debug!("router for {}", identity.address());
        Self {
            identity,
            store,
            answered: AtomicU64::new(0),
        }
    }

    /// The node store
    #[must_use]
    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    /// Queries answered so far
    #[must_use]
    pub fn answered(&self) -> u64 {
        self.answered.load(Ordering::Relaxed)
    }

    fn find_node(&self, message: &DhtMessage) -> std::result::Result<Vec<u8>, RequestError> {
        let target: [u8; ADDRESS_SIZE] = message
            .body()
            .get_bytes("tar")
            .ok_or(RequestError::MissingField("tar"))?
            .try_into()
            .map_err(|_| RequestError::InvalidArgument("tar must be 16 bytes".into()))?;
        let target = MeshAddress::from_bytes(target);

        let closest = self.store.closest(&target, K);
        let mut nodes = Vec::with_capacity(closest.len() * NODE_ENTRY_SIZE);
        for node in &closest {
            nodes.extend_from_slice(node.public_key.as_bytes());
            nodes.extend_from_slice(&node.path.to_be_bytes());
        }
        Ok(nodes)
    }

    /// Register `NodeStore_dumpTable` and `RouterModule_lookup`.
    pub fn register_admin(self: &Arc<Self>, table: &mut AdminTable) -> Result<()> {
        let store = Arc::clone(&self.store);
        table.register("NodeStore_dumpTable", false, move |args: &Dict| {
            let page = match args.get("page") {
                None => 0,
                Some(v) => v
                    .as_int()
                    .and_then(|p| usize::try_from(p).ok())
                    .ok_or(RequestError::MissingField("page"))?,
            };
            let (entries, more) = store.page(page);
            let table: Vec<Value> = entries.iter().map(|e| entry_dict(e).into()).collect();
            let mut reply = Dict::new()
                .with("routingTable", table)
                .with("count", store.len());
            if more {
                reply.insert("more", 1i64);
            }
            Ok(AdminReply::Message(reply))
        })?;

        let store = Arc::clone(&self.store);
        let identity = Arc::clone(&self.identity);
        table.register("RouterModule_lookup", false, move |args: &Dict| {
            let text = args
                .get_str("address")
                .ok_or(RequestError::MissingField("address"))?;
            let ip: std::net::Ipv6Addr = text.parse().map_err(|_| {
                RequestError::InvalidArgument(format!("malformed address '{text}'").into())
            })?;
            let target = MeshAddress::from_bytes(ip.octets());
            if !target.is_valid() {
                return Err(RequestError::InvalidArgument(
                    "address outside fc00::/8".into(),
                ));
            }
            let reply = match store.closest(&target, 1).first() {
                Some(best) => {
                    let mut reply = entry_dict(best).with("result", best.path.to_string());
                    if best.address == *identity.address() && target != best.address {
                        reply.insert("note", "no closer node known");
                    }
                    reply
                }
                None => Dict::new().with("result", "not found"),
            };
            Ok(AdminReply::Message(reply))
        })
    }
}

impl DhtModule for RouterModule {
    fn claims(&self, message: &DhtMessage) -> bool {
        message.query().is_some()
    }

    fn handle(&self, message: &DhtMessage) -> std::result::Result<Option<Dict>, RequestError> {
        let txid = message.txid().ok_or(RequestError::MissingField("txid"))?;
        let response = Dict::new()
            .with("txid", txid)
            .with("p", PROTOCOL_VERSION);

        let response = match message.query() {
            Some("pn") => response,
            Some("fn") => response.with("n", self.find_node(message)?),
            other => {
                tracing::debug!("router ignoring query {:?}", other);
                return Ok(None);
            }
        };
        self.answered.fetch_add(1, Ordering::Relaxed);
        Ok(Some(response))
    }
}
