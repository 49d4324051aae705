//! Correlates responses with the queries we sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{DhtMessage, DhtModule};
use crate::arena::Arena;
use crate::benc::Dict;
use crate::error::RequestError;

/// First stage of the chain: claims responses to outstanding queries
#[derive(Debug)]
pub struct ReplyModule {
    pending: Mutex<HashMap<Vec<u8>, Arena>>,
    matched: AtomicU64,
    arena: Arena,
}

impl ReplyModule {
    /// Most queries tracked at once
    pub const MAX_PENDING: usize = 1024;

    /// Create an empty tracker
    #[must_use]
    pub fn new(arena: Arena) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            matched: AtomicU64::new(0),
            arena,
        }
    }

    /// Start tracking a query we are about to send.
    ///
    /// Called by the search code before a query goes out on the fabric;
    /// the entry's memory is released when the response is matched.
    ///
    /// Returns false if the txid is already outstanding, the table is full,
    /// or the entry would cross the memory ceiling.
    pub fn expect(&self, txid: &[u8]) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.len() >= Self::MAX_PENDING {
            tracing::warn!("reply table full, not tracking txid {}", hex::encode(txid));
            return false;
        }
        if pending.contains_key(txid) {
            return false;
        }
        let entry = self.arena.child("txid");
        if let Err(breach) = entry.try_charge(txid.len()) {
            tracing::warn!("not tracking txid {}: {}", hex::encode(txid), breach);
            return false;
        }
        pending.insert(txid.to_vec(), entry);
        true
    }

    /// Number of outstanding queries
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of responses matched so far
    #[must_use]
    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::Relaxed)
    }
}

impl DhtModule for ReplyModule {
    fn claims(&self, message: &DhtMessage) -> bool {
        if !message.is_response() {
            return false;
        }
        let Some(txid) = message.txid() else {
            return false;
        };
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(txid)
    }

    fn handle(&self, message: &DhtMessage) -> Result<Option<Dict>, RequestError> {
        let txid = message.txid().ok_or(RequestError::MissingField("txid"))?;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(txid);
        self.matched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("matched reply {}", hex::encode(txid));
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(txid: &str) -> DhtMessage {
        DhtMessage::new(Dict::new().with("txid", txid))
    }

    #[test]
    fn test_claims_only_tracked_responses() {
        let module = ReplyModule::new(Arena::root(1 << 20));
        assert!(module.expect(b"a1"));
        assert!(!module.expect(b"a1"));

        assert!(module.claims(&reply("a1")));
        assert!(!module.claims(&reply("zz")));
        let query = DhtMessage::new(Dict::new().with("q", "pn").with("txid", "a1"));
        assert!(!module.claims(&query));
    }

    #[test]
    fn test_matched_txid_releases_memory() {
        let root = Arena::root(1 << 20);
        let module = ReplyModule::new(root.child("reply"));
        for round in 0..500u32 {
            let txid = round.to_be_bytes();
            assert!(module.expect(&txid));
            assert_eq!(root.bytes_allocated(), 4);
            let response = DhtMessage::new(Dict::new().with("txid", &txid[..]));
            module.handle(&response).unwrap();
            assert_eq!(root.bytes_allocated(), 0);
        }
        assert_eq!(module.matched(), 500);
    }

    #[test]
    fn test_expect_past_ceiling_is_refused() {
        let root = Arena::root(8);
        let module = ReplyModule::new(root.child("reply"));
        assert!(module.expect(b"abcdef"));
        assert!(!module.expect(b"ghijkl"));
        assert_eq!(module.pending(), 1);
    }

    #[test]
    fn test_handle_consumes_txid() {
        let module = ReplyModule::new(Arena::root(1 << 20));
        module.expect(b"a1");
        assert_eq!(module.handle(&reply("a1")), Ok(None));
        assert_eq!(module.pending(), 0);
        assert_eq!(module.matched(), 1);
        assert!(!module.claims(&reply("a1")));
    }

    #[test]
    fn test_pending_limit() {
        let module = ReplyModule::new(Arena::root(1 << 20));
        for i in 0..ReplyModule::MAX_PENDING {
            assert!(module.expect(&i.to_be_bytes()));
        }
        assert!(!module.expect(b"one more"));
    }
}
