//! Framing on the supervisor pipes.
//!
//! The handshake is a single bare bencoded dictionary in each direction.
//! After that, every message is framed:
//!
//! ```text
//! +----------------+--------+-----------------+-----------------+
//! | syncMagic (8)  | stream | length (u32 BE) | bencoded payload|
//! +----------------+--------+-----------------+-----------------+
//! ```
//!
//! The stream byte separates admin RPC traffic from log records, which
//! share the outbound descriptor.

use meshcore_crypto::random::random_8;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::arena::Block;
use crate::benc::{self, DecodeError, Dict, Value};
use crate::error::{FatalError, RequestError, Result};

/// Size of the frame header
pub const FRAME_HEADER_SIZE: usize = 13;

/// Per-run correlation token shared with the supervisor.
///
/// Not a secret; it only has to differ between runs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncMagic([u8; 8]);

impl SyncMagic {
    /// Draw a fresh token from the OS random source.
    ///
    /// # Errors
    ///
    /// Returns [`FatalError::Random`] if the random source fails.
    pub fn generate() -> Result<Self> {
        Ok(Self(random_8()?))
    }

    /// Wrap known bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Raw token bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// 16 lowercase hex characters
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for SyncMagic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SyncMagic({})", self.to_hex())
    }
}

/// Logical stream a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamTag {
    /// Admin RPC requests and replies
    Admin = 0x01,
    /// Structured log records
    Log = 0x02,
}

impl TryFrom<u8> for StreamTag {
    type Error = RequestError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Admin),
            0x02 => Ok(Self::Log),
            _ => Err(RequestError::WrongSession),
        }
    }
}

/// Encode a framed message.
#[must_use]
pub fn encode_frame(magic: &SyncMagic, stream: StreamTag, payload: &Dict) -> Vec<u8> {
    let body = payload.to_bytes();
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    out.extend_from_slice(magic.as_bytes());
    out.push(stream as u8);
    // Payload limits are far below u32::MAX
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// The handshake acknowledgement: `{"angel": {"syncMagic": <hex>}}`.
#[must_use]
pub fn handshake_response(magic: &SyncMagic) -> Vec<u8> {
    Dict::new()
        .with("angel", Dict::new().with("syncMagic", magic.to_hex()))
        .to_bytes()
}

/// A frame as read off the wire, before session checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Token the sender tagged the frame with
    pub magic: [u8; 8],
    /// Raw stream byte
    pub stream: u8,
    /// Undecoded payload
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Check the frame belongs to this session's admin stream and decode it.
    ///
    /// # Errors
    ///
    /// [`RequestError::WrongSession`] for a foreign token or stream,
    /// [`RequestError::Decode`] for a payload that is not a dictionary.
    pub fn into_admin_request(self, session: &SyncMagic) -> std::result::Result<Dict, RequestError> {
        if &self.magic != session.as_bytes() || StreamTag::try_from(self.stream)? != StreamTag::Admin
        {
            return Err(RequestError::WrongSession);
        }
        benc::decode_dict(&self.payload).map_err(|e| RequestError::Decode(e.to_string()))
    }
}

/// Reads one bencoded dictionary from a pipe into a fixed-capacity buffer.
///
/// Reading stops as soon as the buffered prefix decodes to a complete
/// value. A buffer that fills up first is a [`FatalError::FrameTooLarge`].
pub struct BoundedReader<R> {
    inner: R,
    buf: Block,
    filled: usize,
}

impl<R: AsyncRead + Unpin> BoundedReader<R> {
    /// Wrap a reader; `buf` bounds how much will ever be buffered.
    pub fn new(inner: R, buf: Block) -> Self {
        Self {
            inner,
            buf,
            filled: 0,
        }
    }

    /// Read until one complete dictionary is buffered.
    ///
    /// Returns the dictionary and whatever bytes followed it.
    ///
    /// # Errors
    ///
    /// - [`FatalError::FrameTooLarge`] if the buffer fills first
    /// - [`FatalError::SupervisorClosed`] on end of stream
    /// - [`FatalError::MalformedConfig`] if the bytes can never decode
    /// - [`FatalError::SupervisorIo`] on read errors
    pub async fn read_dict(mut self) -> Result<(Dict, R, Vec<u8>)> {
        loop {
            match benc::decode_prefix(&self.buf[..self.filled]) {
                Ok((Value::Dict(dict), used)) => {
                    let rest = self.buf[used..self.filled].to_vec();
                    return Ok((dict, self.inner, rest));
                }
                Ok(_) => {
                    return Err(FatalError::MalformedConfig(
                        DecodeError::NotADictionary.to_string(),
                    ));
                }
                Err(DecodeError::Incomplete) => {}
                Err(e) => return Err(FatalError::MalformedConfig(e.to_string())),
            }

            if self.filled == self.buf.len() {
                return Err(FatalError::FrameTooLarge {
                    limit: self.buf.len(),
                });
            }
            let n = self.inner.read(&mut self.buf[self.filled..]).await?;
            if n == 0 {
                return Err(FatalError::SupervisorClosed(
                    "sending the initial configuration".into(),
                ));
            }
            self.filled += n;
        }
    }
}

/// Reads framed messages after the handshake.
pub struct FrameReader<R> {
    inner: R,
    pending: Vec<u8>,
    max_payload: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader; `pending` holds bytes already read past the handshake.
    pub fn new(inner: R, pending: Vec<u8>, max_payload: usize) -> Self {
        Self {
            inner,
            pending,
            max_payload,
        }
    }

    async fn fill_to(&mut self, len: usize) -> Result<bool> {
        while self.pending.len() < len {
            let mut chunk = [0u8; 4096];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Ok(false);
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
        Ok(true)
    }

    /// Read the next frame, or `None` when the supervisor closes the pipe
    /// on a frame boundary.
    ///
    /// # Errors
    ///
    /// [`FatalError::FrameTooLarge`] when the declared length exceeds the
    /// limit, since framing cannot be recovered after that;
    /// [`FatalError::SupervisorClosed`] when the pipe closes mid-frame.
    pub async fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if !self.fill_to(FRAME_HEADER_SIZE).await? {
            if self.pending.is_empty() {
                return Ok(None);
            }
            return Err(FatalError::SupervisorClosed("completing a frame".into()));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&self.pending[..8]);
        let stream = self.pending[8];
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&self.pending[9..FRAME_HEADER_SIZE]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > self.max_payload {
            return Err(FatalError::FrameTooLarge {
                limit: self.max_payload,
            });
        }

        if !self.fill_to(FRAME_HEADER_SIZE + len).await? {
            return Err(FatalError::SupervisorClosed("completing a frame".into()));
        }
        let payload = self.pending[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len].to_vec();
        self.pending.drain(..FRAME_HEADER_SIZE + len);
        Ok(Some(RawFrame {
            magic,
            stream,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use tokio::io::AsyncWriteExt;

    fn magic() -> SyncMagic {
        SyncMagic::from_bytes([0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04])
    }

    #[test]
    fn test_handshake_response_layout() {
        assert_eq!(
            handshake_response(&magic()),
            b"d5:angeld9:syncMagic16:deadbeef01020304ee".to_vec()
        );
    }

    #[test]
    fn test_generated_magic_differs() {
        let a = SyncMagic::generate().unwrap();
        let b = SyncMagic::generate().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.to_hex().len(), 16);
    }

    #[test]
    fn test_encode_frame_header() {
        let frame = encode_frame(&magic(), StreamTag::Log, &Dict::new().with("a", 1i64));
        assert_eq!(&frame[..8], magic().as_bytes());
        assert_eq!(frame[8], 0x02);
        assert_eq!(&frame[9..13], &6u32.to_be_bytes());
        assert_eq!(&frame[13..], b"d1:ai1ee");
    }

    #[test]
    fn test_admin_request_rejects_foreign_magic() {
        let frame = RawFrame {
            magic: [0u8; 8],
            stream: 0x01,
            payload: b"de".to_vec(),
        };
        assert_eq!(
            frame.into_admin_request(&magic()),
            Err(RequestError::WrongSession)
        );
    }

    #[test]
    fn test_admin_request_rejects_log_stream() {
        let frame = RawFrame {
            magic: *magic().as_bytes(),
            stream: StreamTag::Log as u8,
            payload: b"de".to_vec(),
        };
        assert_eq!(
            frame.into_admin_request(&magic()),
            Err(RequestError::WrongSession)
        );
    }

    #[test]
    fn test_admin_request_reports_bad_payload() {
        let frame = RawFrame {
            magic: *magic().as_bytes(),
            stream: 0x01,
            payload: b"i1e".to_vec(),
        };
        assert!(matches!(
            frame.into_admin_request(&magic()),
            Err(RequestError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_bounded_reader_split_across_reads() {
        let arena = Arena::root(1 << 16);
        let (mut tx, rx) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            tx.write_all(b"d1:a").await.unwrap();
            tokio::task::yield_now().await;
            tx.write_all(b"i1eeXY").await.unwrap();
        });
        let (dict, _rx, rest) = BoundedReader::new(rx, arena.allocate(64))
            .read_dict()
            .await
            .unwrap();
        writer.await.unwrap();
        assert_eq!(dict.get_int("a"), Some(1));
        assert!(rest.is_empty() || rest.starts_with(b"X"));
    }

    #[tokio::test]
    async fn test_bounded_reader_overflow() {
        let arena = Arena::root(1 << 16);
        let blob = format!("d1:p200:{}e", "x".repeat(200));
        let reader = std::io::Cursor::new(blob.into_bytes());
        let err = BoundedReader::new(reader, arena.allocate(64))
            .read_dict()
            .await
            .unwrap_err();
        assert!(matches!(err, FatalError::FrameTooLarge { limit: 64 }));
    }

    #[tokio::test]
    async fn test_bounded_reader_eof() {
        let arena = Arena::root(1 << 16);
        let reader = std::io::Cursor::new(b"d1:a".to_vec());
        let err = BoundedReader::new(reader, arena.allocate(64))
            .read_dict()
            .await
            .unwrap_err();
        assert!(matches!(err, FatalError::SupervisorClosed(_)));
    }

    #[tokio::test]
    async fn test_frame_reader_sequence() {
        let mut bytes = encode_frame(&magic(), StreamTag::Admin, &Dict::new().with("q", "ping"));
        let second = encode_frame(&magic(), StreamTag::Admin, &Dict::new());
        let (pending, rest) = second.split_at(5);
        bytes.extend_from_slice(pending);

        let mut reader = FrameReader::new(std::io::Cursor::new(rest.to_vec()), bytes, 1024);
        let first = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(
            first.into_admin_request(&magic()).unwrap().get_str("q"),
            Some("ping")
        );
        let second = reader.next_frame().await.unwrap().unwrap();
        assert!(second.into_admin_request(&magic()).unwrap().is_empty());
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_reader_rejects_oversized_length() {
        let mut header = magic().as_bytes().to_vec();
        header.push(0x01);
        header.extend_from_slice(&2048u32.to_be_bytes());
        let mut reader = FrameReader::new(std::io::Cursor::new(header), Vec::new(), 1024);
        assert!(matches!(
            reader.next_frame().await,
            Err(FatalError::FrameTooLarge { limit: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_frame_reader_truncated_frame() {
        let frame = encode_frame(&magic(), StreamTag::Admin, &Dict::new().with("q", "ping"));
        let mut reader =
            FrameReader::new(std::io::Cursor::new(frame[..20].to_vec()), Vec::new(), 1024);
        assert!(matches!(
            reader.next_frame().await,
            Err(FatalError::SupervisorClosed(_))
        ));
    }
}
