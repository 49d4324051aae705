//! Error types for the meshcore worker.
//!
//! Errors are split by blast radius:
//!
//! - [`FatalError`]: the process cannot continue. Anything that invalidates
//!   the node identity or the supervisor link lands here and ends in process
//!   termination.
//! - [`RequestError`]: scoped to a single admin request or inbound message.
//!   The request is answered with an error or dropped; the event loop keeps
//!   running.

use std::borrow::Cow;
use thiserror::Error;

use crate::arena::ArenaBreach;

/// Conditions that terminate the worker
#[derive(Debug, Error)]
pub enum FatalError {
    /// The process was not launched by a supervisor
    #[error("This is internal to meshcore and shouldn't be started manually. ({0})")]
    InvalidInvocation(Cow<'static, str>),

    /// A descriptor handed over by the supervisor is not open
    #[error("supervisor descriptor {fd} is not usable: {reason}")]
    DescriptorUnavailable {
        /// Descriptor number
        fd: i32,
        /// OS error text
        reason: String,
    },

    /// No initial configuration arrived in time
    #[error("timed out waiting for initial configuration")]
    HandshakeTimeout,

    /// The supervisor closed its end of the pipe
    #[error("supervisor closed the pipe before {0}")]
    SupervisorClosed(Cow<'static, str>),

    /// Reading or writing a supervisor pipe failed
    #[error("supervisor pipe error: {0}")]
    SupervisorIo(String),

    /// A frame exceeded its size limit
    #[error("frame exceeds {limit} byte limit")]
    FrameTooLarge {
        /// Maximum accepted size
        limit: usize,
    },

    /// The initial configuration could not be decoded
    #[error("failed to parse initial configuration: {0}")]
    MalformedConfig(String),

    /// A required configuration key is absent or has the wrong type
    #[error("expected '{0}' in configuration")]
    MissingConfigKey(&'static str),

    /// The private key text is malformed
    #[error("privateKey must be 64 bytes of hex: {0}")]
    InvalidPrivateKey(String),

    /// The key derives to an address outside fc00::/8
    #[error("ip address {address} outside of the fc00::/8 range, invalid private key")]
    AddressOutOfRange {
        /// Rendered address
        address: String,
    },

    /// The memory failsafe tripped
    #[error("memory failsafe: {0}")]
    ArenaCeiling(#[from] ArenaBreach),

    /// An admin method name was registered twice
    #[error("admin method '{0}' registered twice")]
    DuplicateAdminMethod(String),

    /// The OS random source failed
    #[error("random source failed: {0}")]
    Random(#[from] meshcore_crypto::CryptoError),
}

impl From<std::io::Error> for FatalError {
    fn from(err: std::io::Error) -> Self {
        FatalError::SupervisorIo(err.to_string())
    }
}

/// Failures contained to one request or message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// A required field is missing or has the wrong type
    #[error("missing or invalid field '{0}'")]
    MissingField(&'static str),

    /// An argument is present but unacceptable
    #[error("invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),

    /// Authentication failed for a privileged method
    #[error("Auth failed.")]
    AuthFailed,

    /// The method is not registered
    #[error("no such function")]
    NoSuchFunction(String),

    /// Frame tagged with a different session token or stream
    #[error("frame does not belong to this session")]
    WrongSession,

    /// The operation needs a collaborator this build does not link
    #[error("unsupported: {0}")]
    Unsupported(Cow<'static, str>),
}

impl RequestError {
    /// Text placed in the `error` field of an admin reply
    #[must_use]
    pub fn reply_text(&self) -> String {
        self.to_string()
    }
}

/// Either kind of error, for callers that handle both
#[derive(Debug, Error)]
pub enum Error {
    /// Process-terminating error
    #[error(transparent)]
    Fatal(#[from] FatalError),

    /// Per-request error
    #[error(transparent)]
    Request(#[from] RequestError),
}

impl Error {
    /// Returns true if the process must terminate
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

/// Result type for bootstrap operations
pub type Result<T> = std::result::Result<T, FatalError>;
