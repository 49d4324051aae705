//! Integration tests for the worker bootstrap.
//!
//! Each test plays the supervisor over in-memory pipes and drives a real
//! `Core` through the handshake, bootstrap and admin event loop.

use std::sync::Arc;
use std::time::Duration;

use meshcore_core::admin::{AdminReply, AdminTable};
use meshcore_core::angel::frame::{FRAME_HEADER_SIZE, handshake_response};
use meshcore_core::benc::{Dict, decode_dict};
use meshcore_core::bootstrap::register_core_methods;
use meshcore_core::dht::{
    DispatchChain, NodeStore, ReplyModule, RouterModule, SerializationModule, StageKind,
};
use meshcore_core::node::Label;
use meshcore_core::{Arena, BootstrapOptions, Core, CoreConfig, FatalError, NodeIdentity};
use meshcore_crypto::PrivateKey;
use meshcore_integration_tests::{
    Angel, authed, config_blob, invalid_key, start_core, valid_key,
};
use tokio::io::AsyncWriteExt;

/// Bootstrap against `blob` and return the outcome without reading the ack.
async fn bootstrap_with(blob: &[u8]) -> Result<(), FatalError> {
    let (channel, mut angel) = Angel::connect();
    angel.tx.write_all(blob).await.unwrap();
    Core::bootstrap(channel, BootstrapOptions::default())
        .await
        .map(drop)
}

fn blob_with_key_text(key: &str) -> Vec<u8> {
    Dict::new()
        .with("privateKey", key)
        .with("admin", Dict::new().with("pass", "pw"))
        .to_bytes()
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_ack_carries_generated_magic() {
    let (channel, mut angel) = Angel::connect();
    angel.tx.write_all(&config_blob(&valid_key(0))).await.unwrap();
    let core = Core::bootstrap(channel, BootstrapOptions::default())
        .await
        .unwrap();

    let ack = angel.read_ack().await;
    let parsed = decode_dict(&ack).unwrap();
    let magic = parsed
        .get_dict("angel")
        .and_then(|a| a.get_str("syncMagic"))
        .unwrap();
    assert_eq!(magic, angel.magic.to_hex());
    assert_eq!(magic.len(), 16);
    assert_eq!(core.sync_magic(), angel.magic);
}

#[tokio::test]
async fn test_each_run_gets_a_new_magic() {
    let (_, first) = Angel::connect();
    let (_, second) = Angel::connect();
    assert_ne!(first.magic, second.magic);
}

#[tokio::test]
async fn test_config_split_across_writes() {
    let (channel, mut angel) = Angel::connect();
    let blob = config_blob(&valid_key(0));
    let (head, tail) = blob.split_at(blob.len() / 2);
    angel.tx.write_all(head).await.unwrap();

    let late_tail = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        angel.tx.write_all(tail).await.unwrap();
    };
    let (booted, ()) = tokio::join!(
        Core::bootstrap(channel, BootstrapOptions::default()),
        late_tail
    );

    let core = booted.unwrap();
    assert!(core.identity().address().is_valid());
}

#[tokio::test]
async fn test_handshake_timeout() {
    let (channel, _angel) = Angel::connect();
    let options = BootstrapOptions::default().with_config(
        CoreConfig::default().with_handshake_timeout(Duration::from_millis(50)),
    );
    let err = Core::bootstrap(channel, options).await.unwrap_err();
    assert!(matches!(err, FatalError::HandshakeTimeout));
}

#[tokio::test]
async fn test_supervisor_closing_before_config() {
    let (channel, angel) = Angel::connect();
    drop(angel);
    let err = Core::bootstrap(channel, BootstrapOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FatalError::SupervisorClosed(_)));
}

// ============================================================================
// Malformed configuration
// ============================================================================

#[tokio::test]
async fn test_oversized_config_is_fatal() {
    let blob = Dict::new()
        .with("privateKey", hex::encode(valid_key(0)))
        .with("admin", Dict::new().with("pass", "pw"))
        .with("padding", vec![b'x'; 10_000])
        .to_bytes();
    let err = bootstrap_with(&blob).await.unwrap_err();
    assert!(matches!(err, FatalError::FrameTooLarge { limit: 8192 }));
}

#[tokio::test]
async fn test_missing_keys_are_fatal() {
    let no_key = Dict::new()
        .with("admin", Dict::new().with("pass", "pw"))
        .to_bytes();
    let err = bootstrap_with(&no_key).await.unwrap_err();
    assert!(matches!(err, FatalError::MissingConfigKey("privateKey")));

    let no_admin = Dict::new()
        .with("privateKey", hex::encode(valid_key(0)))
        .to_bytes();
    let err = bootstrap_with(&no_admin).await.unwrap_err();
    assert!(matches!(err, FatalError::MissingConfigKey("admin")));

    let no_pass = Dict::new()
        .with("privateKey", hex::encode(valid_key(0)))
        .with("admin", Dict::new())
        .to_bytes();
    let err = bootstrap_with(&no_pass).await.unwrap_err();
    assert!(matches!(err, FatalError::MissingConfigKey("admin.pass")));
}

#[tokio::test]
async fn test_bad_key_text_is_fatal() {
    let good = hex::encode(valid_key(0));
    let short = &good[..63];
    let long = format!("{good}0");
    let not_hex = format!("{}zz", &good[..62]);

    for text in [short, long.as_str(), not_hex.as_str()] {
        let err = bootstrap_with(&blob_with_key_text(text)).await.unwrap_err();
        assert!(matches!(err, FatalError::InvalidPrivateKey(_)), "{text}");
    }
}

#[tokio::test]
async fn test_not_bencode_is_fatal() {
    let err = bootstrap_with(b"this is not bencode").await.unwrap_err();
    assert!(matches!(err, FatalError::MalformedConfig(_)));
}

#[tokio::test]
async fn test_out_of_range_key_fails_after_ack() {
    let (channel, mut angel) = Angel::connect();
    angel.tx.write_all(&config_blob(&invalid_key(0))).await.unwrap();
    let err = Core::bootstrap(channel, BootstrapOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FatalError::AddressOutOfRange { .. }));
    assert!(err.to_string().contains("fc00::/8"));

    let ack = angel.read_ack().await;
    assert_eq!(ack, handshake_response(&angel.magic));

    let mut last = None;
    while let Some(record) = angel.next_log().await {
        last = Some(record);
    }
    let last = last.expect("fatal record after the acknowledgement");
    assert_eq!(last.get_str("level"), Some("ERROR"));
    let message = last.get_str("message").unwrap();
    assert_eq!(message, err.to_string());
    assert!(message.contains("fc00::/8"));
}

// ============================================================================
// Identity and registry
// ============================================================================

#[test]
fn test_identity_derivation_is_stable() {
    let key = valid_key(1000);
    let a = NodeIdentity::derive(&PrivateKey::from_bytes(key)).unwrap();
    let b = NodeIdentity::derive(&PrivateKey::from_bytes(key)).unwrap();
    assert_eq!(a.address(), b.address());
    assert_eq!(a.address().as_bytes()[0], 0xFC);
}

#[test]
fn test_reply_correlation_runs_before_router() {
    let root = Arena::root(1 << 20);
    let key = PrivateKey::from_bytes(valid_key(0));
    let identity = Arc::new(NodeIdentity::derive(&key).unwrap());
    let store = Arc::new(NodeStore::new(&identity, root.child("store")));
    let reply = Arc::new(ReplyModule::new(root.child("reply")));
    let router = Arc::new(RouterModule::new(Arc::clone(&identity), store));
    let chain = DispatchChain::builder()
        .reply_correlation(Arc::clone(&reply))
        .router(Arc::clone(&router))
        .serialization(SerializationModule::new());

    assert!(reply.expect(b"t1"));
    let response = Dict::new().with("txid", "t1").with("p", 1i64).to_bytes();
    let dispatch = chain.dispatch_bytes(&response).unwrap();
    assert_eq!(dispatch.stage, StageKind::ReplyCorrelation);
    assert!(dispatch.response.is_none());
    assert_eq!(reply.matched(), 1);
    assert_eq!(router.answered(), 0);

    let query = Dict::new().with("q", "pn").with("txid", "t2").to_bytes();
    let dispatch = chain.dispatch_bytes(&query).unwrap();
    assert_eq!(dispatch.stage, StageKind::Router);
    assert_eq!(router.answered(), 1);

    let stray = Dict::new().with("txid", "t1").to_bytes();
    let dispatch = chain.dispatch_bytes(&stray).unwrap();
    assert_eq!(dispatch.stage, StageKind::Serialization);
}

#[test]
fn test_duplicate_ping_fails_at_registration() {
    let root = Arena::root(1 << 20);
    let mut table = AdminTable::new(root.child("admin"));
    table
        .register("ping", false, |_: &Dict| {
            Ok(AdminReply::Message(Dict::new()))
        })
        .unwrap();
    let err = register_core_methods(&mut table, root.stats()).unwrap_err();
    assert!(matches!(err, FatalError::DuplicateAdminMethod(name) if name == "ping"));
}

#[tokio::test]
async fn test_ducttape_answers_dht_queries() {
    let (core, _angel) = start_core().await;
    let query = Dict::new().with("q", "pn").with("txid", "d1").to_bytes();
    let (stage, response) = core.ducttape().deliver_dht(Label::SELF, &query).unwrap();
    assert_eq!(stage, StageKind::Router);
    let response = decode_dict(&response.unwrap()).unwrap();
    assert_eq!(response.get_str("txid"), Some("d1"));
    assert_eq!(core.ducttape().stats().answered, 1);
}

// ============================================================================
// Admin RPC over the pipe
// ============================================================================

#[tokio::test]
async fn test_ping_and_memory() {
    let (core, mut angel) = start_core().await;
    let floor = core.bytes_allocated();
    let running = tokio::spawn(core.run());

    let pong = angel
        .call(&Dict::new().with("q", "ping").with("txid", "p1"))
        .await;
    assert_eq!(pong, Dict::new().with("q", "pong").with("txid", "p1"));

    let request = Dict::new().with("q", "memory").with("txid", "m1");
    let memory = angel.call(&request).await;
    assert_eq!(
        memory.get_int("bytes").unwrap() as usize,
        floor + FRAME_HEADER_SIZE + request.to_bytes().len()
    );
    assert_eq!(memory.get_str("txid"), Some("m1"));

    running.abort();
}

#[tokio::test]
async fn test_password_churn_keeps_memory_flat() {
    let (core, mut angel) = start_core().await;
    let running = tokio::spawn(core.run());
    let memory = Dict::new().with("q", "memory").with("txid", "m");
    let baseline = angel.call(&memory).await.get_int("bytes").unwrap();

    for round in 0..200 {
        let password = format!("churn-password-{round}");
        let added = angel
            .call(&authed(
                "AuthorizedPasswords_add",
                Dict::new()
                    .with("password", password.as_str())
                    .with("user", "churn"),
                "a",
            ))
            .await;
        assert_eq!(added.get_str("error"), Some("none"));
        let removed = angel
            .call(&authed(
                "AuthorizedPasswords_remove",
                Dict::new().with("user", "churn"),
                "r",
            ))
            .await;
        assert_eq!(removed.get_str("error"), Some("none"));
    }

    assert_eq!(angel.call(&memory).await.get_int("bytes").unwrap(), baseline);
    running.abort();
}

#[tokio::test]
async fn test_available_functions_lists_auth_flags() {
    let (core, mut angel) = start_core().await;
    let running = tokio::spawn(core.run());

    let reply = angel
        .call(
            &Dict::new()
                .with("q", "Admin_availableFunctions")
                .with("txid", "f"),
        )
        .await;
    let functions = reply.get_dict("availableFunctions").unwrap();
    assert_eq!(
        functions.get_dict("ping").and_then(|f| f.get_int("auth")),
        Some(0)
    );
    assert_eq!(
        functions.get_dict("Core_exit").and_then(|f| f.get_int("auth")),
        Some(1)
    );

    running.abort();
}

#[tokio::test]
async fn test_core_exit_requires_auth() {
    let (core, mut angel) = start_core().await;
    let running = tokio::spawn(core.run());

    let denied = angel
        .call(&Dict::new().with("q", "Core_exit").with("txid", "e1"))
        .await;
    assert_eq!(denied.get_str("error"), Some("Auth failed."));

    let mut wrong = authed("Core_exit", Dict::new(), "e2");
    wrong.insert("hash", "00".repeat(32));
    let denied = angel.call(&wrong).await;
    assert_eq!(denied.get_str("error"), Some("Auth failed."));

    angel.send(&authed("Core_exit", Dict::new(), "e3")).await;
    let status = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.unwrap(), 1);
}

#[tokio::test]
async fn test_interfaces_and_peer_stats() {
    let (core, mut angel) = start_core().await;
    let running = tokio::spawn(core.run());

    let created = angel
        .call(&authed(
            "UDPInterface_new",
            Dict::new().with("bindAddress", "127.0.0.1:0"),
            "u1",
        ))
        .await;
    assert_eq!(created.get_str("error"), Some("none"));
    assert_eq!(created.get_int("interfaceNumber"), Some(1));

    let stats = angel
        .call(
            &Dict::new()
                .with("q", "InterfaceController_peerStats")
                .with("txid", "s1"),
        )
        .await;
    assert_eq!(stats.get_int("total"), Some(0));

    running.abort();
}

#[tokio::test]
async fn test_unknown_method_keeps_loop_alive() {
    let (core, mut angel) = start_core().await;
    let running = tokio::spawn(core.run());

    let reply = angel
        .call(&Dict::new().with("q", "Nope_nothing").with("txid", "n1"))
        .await;
    assert_eq!(reply.get_str("error"), Some("no such function"));

    let pong = angel
        .call(&Dict::new().with("q", "ping").with("txid", "n2"))
        .await;
    assert_eq!(pong.get_str("q"), Some("pong"));

    drop(angel);
    let outcome = running.await.unwrap();
    assert!(matches!(outcome, Err(FatalError::SupervisorClosed(_))));
}
