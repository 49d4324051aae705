//! The admin event loop.
//!
//! Reads framed requests from the supervisor, answers them through the
//! frozen admin table, and drains outbound frames through a single writer.
//! Per-request failures are logged and dropped; the loop only ends on
//! `Core_exit` or a fatal pipe error.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::admin::Dispatched;
use crate::angel::frame::FRAME_HEADER_SIZE;
use crate::angel::{StreamTag, run_writer};
use crate::bootstrap::Core;
use crate::error::{FatalError, Result};

impl<R, W> Core<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Serve admin requests until asked to exit.
    ///
    /// Returns the process exit status requested over admin.
    ///
    /// # Errors
    ///
    /// [`FatalError::SupervisorClosed`] when the supervisor goes away, and
    /// any other fatal pipe error.
    pub async fn run(self) -> Result<i32> {
        let Core {
            admin,
            mut frames,
            mut writer,
            magic,
            outbound,
            outbound_rx,
            log_switch,
            requests,
            root,
            ..
        } = self;

        let writing = run_writer(&mut writer, outbound_rx);
        tokio::pin!(writing);

        let serve = async {
            while let Some(frame) = frames.next_frame().await? {
                let scratch = requests.child("request");
                if let Err(breach) = scratch.try_charge(FRAME_HEADER_SIZE + frame.payload.len()) {
                    tracing::warn!("dropping admin frame: {}", breach);
                    continue;
                }

                let request = match frame.into_admin_request(&magic) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!("dropping admin frame: {}", e);
                        continue;
                    }
                };

                match admin.handle(&request) {
                    Dispatched::Reply(reply) => {
                        if !outbound.send(StreamTag::Admin, &reply).await {
                            return Err(FatalError::SupervisorClosed("sending a reply".into()));
                        }
                    }
                    Dispatched::Exit(status) => return Ok(status),
                    Dispatched::Dropped(e) => {
                        tracing::warn!("dropping admin request: {}", e);
                    }
                }
            }
            Err(FatalError::SupervisorClosed("serving admin requests".into()))
        };

        let (outcome, writer_done) = tokio::select! {
            outcome = serve => (outcome, false),
            written = &mut writing => match written {
                Ok(()) => (Err(FatalError::SupervisorClosed("writing frames".into())), true),
                Err(e) => (Err(e), true),
            },
        };

        // Dropping every sender lets the writer flush what is queued and stop.
        log_switch.detach();
        drop(outbound);
        let drained = if writer_done { Ok(()) } else { writing.await };
        if let Err(e) = drained {
            tracing::debug!("outbound pipe closed while draining: {}", e);
        }

        tracing::debug!(
            "event loop finished with {} bytes allocated",
            root.bytes_allocated()
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

    use crate::angel::frame::{FRAME_HEADER_SIZE, FrameReader, encode_frame, handshake_response};
    use crate::angel::{StreamTag, SupervisorChannel, SyncMagic};
    use crate::benc::Dict;
    use crate::bootstrap::{BootstrapOptions, Core};
    use crate::error::FatalError;
    use crate::identity::test_keys::valid_key_bytes;

    struct Angel {
        tx: DuplexStream,
        frames: FrameReader<DuplexStream>,
        magic: SyncMagic,
    }

    impl Angel {
        async fn send(&mut self, request: &Dict) {
            let frame = encode_frame(&self.magic, StreamTag::Admin, request);
            self.tx.write_all(&frame).await.unwrap();
        }

        async fn next_admin(&mut self) -> Dict {
            loop {
                let frame = self.frames.next_frame().await.unwrap().unwrap();
                if frame.stream == StreamTag::Admin as u8 {
                    return frame.into_admin_request(&self.magic).unwrap();
                }
            }
        }
    }

    async fn start() -> (Core<DuplexStream, DuplexStream>, Angel) {
        let (mut angel_tx, core_rx) = duplex(1 << 16);
        let (core_tx, mut angel_rx) = duplex(1 << 16);
        let channel = SupervisorChannel::open(core_rx, core_tx).unwrap();
        let magic = channel.sync_magic();

        let blob = Dict::new()
            .with("privateKey", hex::encode(valid_key_bytes(0)))
            .with("admin", Dict::new().with("pass", "pw"))
            .to_bytes();
        angel_tx.write_all(&blob).await.unwrap();
        let core = Core::bootstrap(channel, BootstrapOptions::default())
            .await
            .unwrap();

        let mut ack = vec![0u8; handshake_response(&magic).len()];
        angel_rx.read_exact(&mut ack).await.unwrap();
        (
            core,
            Angel {
                tx: angel_tx,
                frames: FrameReader::new(angel_rx, Vec::new(), 1 << 16),
                magic,
            },
        )
    }

    #[tokio::test]
    async fn test_ping_and_exit() {
        let (core, mut angel) = start().await;
        let running = tokio::spawn(core.run());

        angel
            .send(&Dict::new().with("q", "ping").with("txid", "1"))
            .await;
        let reply = angel.next_admin().await;
        assert_eq!(reply, Dict::new().with("q", "pong").with("txid", "1"));

        let cookie = crate::admin::now_secs().to_string();
        angel
            .send(
                &Dict::new()
                    .with("q", "auth")
                    .with("aq", "Core_exit")
                    .with("cookie", cookie.as_str())
                    .with("hash", crate::admin::auth_hash(b"pw", cookie.as_bytes()))
                    .with("txid", "2"),
            )
            .await;
        let status = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bad_frames_do_not_stop_the_loop() {
        let (core, mut angel) = start().await;
        let running = tokio::spawn(core.run());

        let foreign = encode_frame(
            &SyncMagic::from_bytes([1; 8]),
            StreamTag::Admin,
            &Dict::new().with("q", "ping").with("txid", "x"),
        );
        angel.tx.write_all(&foreign).await.unwrap();
        angel.send(&Dict::new().with("q", "ping")).await;
        angel
            .send(&Dict::new().with("q", "nope").with("txid", "3"))
            .await;

        let reply = angel.next_admin().await;
        assert_eq!(reply.get_str("txid"), Some("3"));
        assert_eq!(reply.get_str("error"), Some("no such function"));

        drop(angel);
        let outcome = running.await.unwrap();
        assert!(matches!(outcome, Err(FatalError::SupervisorClosed(_))));
    }

    #[tokio::test]
    async fn test_memory_reports_root_counter() {
        let (core, mut angel) = start().await;
        let before = core.bytes_allocated();
        let running = tokio::spawn(core.run());

        let request = Dict::new().with("q", "memory").with("txid", "m");
        angel.send(&request).await;
        let reply = angel.next_admin().await;
        let bytes = reply.get_int("bytes").unwrap() as usize;
        assert_eq!(bytes, before + FRAME_HEADER_SIZE + request.to_bytes().len());

        angel.send(&request).await;
        let again = angel.next_admin().await;
        assert_eq!(again.get_int("bytes").unwrap() as usize, bytes);
        running.abort();
    }
}
