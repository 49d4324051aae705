//! Fuzz target for DHT dispatch
//!
//! Pushes arbitrary bytes through the full dispatch chain.

#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use meshcore_core::dht::{DispatchChain, NodeStore, ReplyModule, RouterModule, SerializationModule};
use meshcore_core::{Arena, NodeIdentity};
use meshcore_crypto::PrivateKey;

struct Fixture {
    chain: DispatchChain,
    _root: Arena,
}

fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let identity = (0u32..)
            .find_map(|n| {
                let mut bytes = [0x3cu8; 32];
                bytes[..4].copy_from_slice(&n.to_be_bytes());
                NodeIdentity::derive(&PrivateKey::from_bytes(bytes)).ok()
            })
            .map(Arc::new)
            .unwrap();
        let root = Arena::root(1 << 30);
        let store = Arc::new(NodeStore::new(&identity, root.child("store")));
        let chain = DispatchChain::builder()
            .reply_correlation(ReplyModule::new(root.child("reply")))
            .router(RouterModule::new(identity, store))
            .serialization(SerializationModule::new());
        Fixture { chain, _root: root }
    })
}

fuzz_target!(|data: &[u8]| {
    let _ = fixture().chain.dispatch_bytes(data);
});
