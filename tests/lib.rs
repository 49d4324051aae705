//! Shared helpers for the meshcore integration tests.
//!
//! [`Angel`] plays the supervisor over in-memory duplex pipes: it writes the
//! initial configuration, reads the acknowledgement and exchanges admin
//! frames with a running worker.

use meshcore_core::angel::frame::{FrameReader, encode_frame, handshake_response};
use meshcore_core::angel::{StreamTag, SupervisorChannel, SyncMagic};
use meshcore_core::benc::{Dict, decode_dict};
use meshcore_core::{BootstrapOptions, Core, NodeIdentity};
use meshcore_crypto::PrivateKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

/// Password every harness configuration uses
pub const ADMIN_PASSWORD: &str = "integration";

/// Worker end of a harness pipe pair
pub type TestCore = Core<DuplexStream, DuplexStream>;

/// Deterministic key candidate number `n`.
pub fn candidate(n: u32) -> [u8; 32] {
    let mut bytes = [0xa5u8; 32];
    bytes[28..].copy_from_slice(&n.to_le_bytes());
    bytes
}

/// First candidate at or after `start` that derives an fc00::/8 address.
pub fn valid_key(start: u32) -> [u8; 32] {
    (start..)
        .map(candidate)
        .find(|b| NodeIdentity::derive(&PrivateKey::from_bytes(*b)).is_ok())
        .expect("about one key in 256 is valid")
}

/// First candidate at or after `start` whose address is out of range.
pub fn invalid_key(start: u32) -> [u8; 32] {
    (start..)
        .map(candidate)
        .find(|b| NodeIdentity::derive(&PrivateKey::from_bytes(*b)).is_err())
        .expect("most keys are invalid")
}

/// Initial configuration blob for `key`.
pub fn config_blob(key: &[u8; 32]) -> Vec<u8> {
    Dict::new()
        .with("privateKey", hex::encode(key))
        .with("admin", Dict::new().with("pass", ADMIN_PASSWORD))
        .to_bytes()
}

/// Supervisor end of the pipes
pub struct Angel {
    /// Writes into the worker
    pub tx: DuplexStream,
    /// Reads what the worker writes, before the acknowledgement is consumed
    pub rx: Option<DuplexStream>,
    frames: Option<FrameReader<DuplexStream>>,
    /// This run's session token
    pub magic: SyncMagic,
}

impl Angel {
    /// Open a pipe pair and the worker's channel over it.
    pub fn connect() -> (SupervisorChannel<DuplexStream, DuplexStream>, Angel) {
        let (angel_tx, core_rx) = duplex(1 << 16);
        let (core_tx, angel_rx) = duplex(1 << 16);
        let channel = SupervisorChannel::open(core_rx, core_tx).expect("random source");
        let magic = channel.sync_magic();
        (
            channel,
            Angel {
                tx: angel_tx,
                rx: Some(angel_rx),
                frames: None,
                magic,
            },
        )
    }

    /// Read the acknowledgement and switch to framed traffic.
    pub async fn read_ack(&mut self) -> Vec<u8> {
        let mut rx = self.rx.take().expect("acknowledgement already read");
        let mut ack = vec![0u8; handshake_response(&self.magic).len()];
        rx.read_exact(&mut ack).await.expect("acknowledgement");
        self.frames = Some(FrameReader::new(rx, Vec::new(), 1 << 16));
        ack
    }

    /// Send one admin request.
    pub async fn send(&mut self, request: &Dict) {
        let frame = encode_frame(&self.magic, StreamTag::Admin, request);
        self.tx.write_all(&frame).await.expect("pipe open");
    }

    /// Next admin reply, skipping log records.
    pub async fn next_admin(&mut self) -> Dict {
        let frames = self.frames.as_mut().expect("read_ack first");
        loop {
            let frame = frames
                .next_frame()
                .await
                .expect("well-formed frame")
                .expect("worker still running");
            if frame.stream == StreamTag::Admin as u8 {
                return frame.into_admin_request(&self.magic).expect("admin reply");
            }
        }
    }

    /// Next log record, skipping admin replies; `None` once the worker
    /// closes its end.
    pub async fn next_log(&mut self) -> Option<Dict> {
        let frames = self.frames.as_mut().expect("read_ack first");
        while let Some(frame) = frames.next_frame().await.expect("well-formed frame") {
            if frame.stream == StreamTag::Log as u8 {
                assert_eq!(&frame.magic, self.magic.as_bytes());
                return Some(decode_dict(&frame.payload).expect("log record"));
            }
        }
        None
    }

    /// Send a request and wait for its reply.
    pub async fn call(&mut self, request: &Dict) -> Dict {
        self.send(request).await;
        self.next_admin().await
    }
}

/// Bootstrap a worker with a valid key and consume its acknowledgement.
pub async fn start_core() -> (TestCore, Angel) {
    let (channel, mut angel) = Angel::connect();
    angel
        .tx
        .write_all(&config_blob(&valid_key(0)))
        .await
        .expect("pipe open");
    let core = Core::bootstrap(channel, BootstrapOptions::default())
        .await
        .expect("bootstrap");
    angel.read_ack().await;
    (core, angel)
}

/// An authenticated admin request for `method`.
pub fn authed(method: &str, args: Dict, txid: &str) -> Dict {
    let cookie = meshcore_core::admin::now_secs().to_string();
    Dict::new()
        .with("q", "auth")
        .with("aq", method)
        .with("cookie", cookie.as_str())
        .with(
            "hash",
            meshcore_core::admin::auth_hash(ADMIN_PASSWORD.as_bytes(), cookie.as_bytes()),
        )
        .with("args", args)
        .with("txid", txid)
}
