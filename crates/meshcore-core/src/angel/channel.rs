//! The worker's end of the supervisor pipes.
//!
//! Lifecycle:
//!
//! 1. [`SupervisorChannel::open`] draws the [`SyncMagic`] before any I/O.
//! 2. [`SupervisorChannel::receive_config`] performs the single bounded
//!    read and validates the initial configuration.
//! 3. [`SupervisorChannel::acknowledge`] writes the fixed acknowledgement
//!    and turns the channel into an [`AngelLink`] carrying framed admin
//!    and log traffic.
//!
//! Every failure on this path is fatal: without a live supervisor link the
//! worker has no safe degraded mode.

use std::os::fd::{FromRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;

use super::frame::{
    BoundedReader, FrameReader, SyncMagic, StreamTag, encode_frame, handshake_response,
};
use super::ingest::BootstrapConfig;
use super::log::fatal_record;
use crate::arena::Arena;
use crate::benc::Dict;
use crate::config::CoreConfig;
use crate::error::{FatalError, Result};

/// Pipe end the supervisor writes into
pub type PipeReader = pipe::Receiver;

/// Pipe end the worker writes into
pub type PipeWriter = pipe::Sender;

/// Channel to the supervisor before the handshake completes
pub struct SupervisorChannel<R, W> {
    reader: R,
    writer: W,
    magic: SyncMagic,
    leftover: Vec<u8>,
}

fn check_descriptor(fd: RawFd) -> Result<()> {
    // SAFETY: F_GETFD only queries descriptor flags and has no memory effects.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(FatalError::DescriptorUnavailable {
            fd,
            reason: std::io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}

impl SupervisorChannel<PipeReader, PipeWriter> {
    /// Adopt the two pipe descriptors passed on the command line.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`FatalError::DescriptorUnavailable`] if either descriptor is not
    /// open or is not a pipe.
    pub fn from_descriptors(to_angel: RawFd, from_angel: RawFd) -> Result<Self> {
        check_descriptor(to_angel)?;
        check_descriptor(from_angel)?;

        // SAFETY: both descriptors were verified open above and are handed to
        // this process by the supervisor for its exclusive use.
        let (to_file, from_file) = unsafe {
            (
                std::fs::File::from_raw_fd(to_angel),
                std::fs::File::from_raw_fd(from_angel),
            )
        };

        let writer = pipe::Sender::from_file(to_file).map_err(|e| {
            FatalError::DescriptorUnavailable {
                fd: to_angel,
                reason: e.to_string(),
            }
        })?;
        let reader = pipe::Receiver::from_file(from_file).map_err(|e| {
            FatalError::DescriptorUnavailable {
                fd: from_angel,
                reason: e.to_string(),
            }
        })?;
        Self::open(reader, writer)
    }
}

impl<R, W> SupervisorChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap an already-open pipe pair, generating this run's sync magic.
    ///
    /// # Errors
    ///
    /// [`FatalError::Random`] if the OS random source fails.
    pub fn open(reader: R, writer: W) -> Result<Self> {
        let magic = SyncMagic::generate()?;
        Ok(Self::with_magic(reader, writer, magic))
    }

    /// Wrap a pipe pair with a known sync magic.
    pub fn with_magic(reader: R, writer: W, magic: SyncMagic) -> Self {
        Self {
            reader,
            writer,
            magic,
            leftover: Vec::new(),
        }
    }

    /// This run's sync magic
    #[must_use]
    pub fn sync_magic(&self) -> SyncMagic {
        self.magic
    }

    /// Read and validate the initial configuration.
    ///
    /// The read buffer is carved from `arena` and released once the
    /// configuration is decoded.
    ///
    /// # Errors
    ///
    /// Any read, framing, timeout, decode or validation failure; all fatal.
    pub async fn receive_config(
        &mut self,
        arena: &Arena,
        config: &CoreConfig,
    ) -> Result<BootstrapConfig> {
        let scratch = arena.child("initial-config");
        let reader = BoundedReader::new(
            &mut self.reader,
            scratch.allocate(config.initial_conf_buffer),
        );
        let (dict, _, leftover) =
            tokio::time::timeout(config.handshake_timeout, reader.read_dict())
                .await
                .map_err(|_| FatalError::HandshakeTimeout)??;
        self.leftover = leftover;

        BootstrapConfig::from_dict(&dict)
    }

    /// Send the handshake acknowledgement and switch to framed traffic.
    ///
    /// # Errors
    ///
    /// [`FatalError::SupervisorIo`] if the write fails.
    pub async fn acknowledge(mut self, config: &CoreConfig) -> Result<AngelLink<R, W>> {
        self.writer.write_all(&handshake_response(&self.magic)).await?;
        self.writer.flush().await?;
        tracing::debug!("acknowledged supervisor with {:?}", self.magic);

        Ok(AngelLink {
            frames: FrameReader::new(self.reader, self.leftover, config.max_frame_payload),
            writer: self.writer,
            magic: self.magic,
        })
    }
}

/// Post-handshake link: framed inbound admin requests, outbound writer
pub struct AngelLink<R, W> {
    /// Inbound frames
    pub frames: FrameReader<R>,
    /// Outbound pipe
    pub writer: W,
    /// Session token
    pub magic: SyncMagic,
}

/// Frames that may wait for the writer at once
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Cloneable handle for queueing frames to the supervisor.
///
/// Frames are written in queue order by a single writer task, so admin
/// replies and log records never interleave mid-frame. The queue is
/// bounded: replies wait for room, log records are dropped when it is full.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Vec<u8>>,
    magic: SyncMagic,
    dropped: Arc<AtomicU64>,
}

impl Outbound {
    /// Create a handle and the receiving end for the writer task.
    #[must_use]
    pub fn new(magic: SyncMagic) -> (Self, mpsc::Receiver<Vec<u8>>) {
        Self::with_depth(magic, OUTBOUND_QUEUE_DEPTH)
    }

    /// Create a handle whose queue holds at most `depth` frames.
    #[must_use]
    pub fn with_depth(magic: SyncMagic, depth: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            Self {
                tx,
                magic,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Queue a message on `stream`, waiting for room.
    ///
    /// Returns `false` if the writer has gone away.
    pub async fn send(&self, stream: StreamTag, payload: &Dict) -> bool {
        self.tx
            .send(encode_frame(&self.magic, stream, payload))
            .await
            .is_ok()
    }

    /// Queue a log record without waiting.
    ///
    /// Returns `false` if the record was dropped.
    pub fn try_log(&self, record: &Dict) -> bool {
        match self.tx.try_send(encode_frame(&self.magic, StreamTag::Log, record)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Log records dropped because the queue was full
    #[must_use]
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Session token frames are tagged with
    #[must_use]
    pub fn magic(&self) -> SyncMagic {
        self.magic
    }
}

/// Drain queued frames onto the outbound pipe until every [`Outbound`]
/// handle is dropped.
///
/// # Errors
///
/// [`FatalError::SupervisorIo`] if a write fails.
pub async fn run_writer<W: AsyncWrite + Unpin>(
    writer: &mut W,
    mut rx: mpsc::Receiver<Vec<u8>>,
) -> Result<()> {
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Flush what is queued, then write `error` as the last log record.
///
/// Every [`Outbound`] handle must already be dropped, or this never
/// returns.
///
/// # Errors
///
/// [`FatalError::SupervisorIo`] if a write fails.
#[track_caller]
pub fn report_fatal<'a, W: AsyncWrite + Unpin>(
    writer: &'a mut W,
    rx: mpsc::Receiver<Vec<u8>>,
    magic: SyncMagic,
    error: &FatalError,
) -> impl std::future::Future<Output = Result<()>> + 'a {
    let frame = encode_frame(&magic, StreamTag::Log, &fatal_record(error));
    async move {
        run_writer(writer, rx).await?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}
