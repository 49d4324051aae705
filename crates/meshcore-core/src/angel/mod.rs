//! Supervisor ("angel") link.
//!
//! The worker is spawned by a privileged supervisor and talks to it over a
//! pipe pair. This module owns the bootstrap handshake, the framing used
//! afterwards, and the log stream multiplexed onto the outbound pipe.

pub mod channel;
pub mod frame;
pub mod ingest;
pub mod log;

pub use channel::{
    AngelLink, OUTBOUND_QUEUE_DEPTH, Outbound, SupervisorChannel, report_fatal, run_writer,
};
pub use frame::{RawFrame, StreamTag, SyncMagic};
pub use ingest::{AdminPassword, BootstrapConfig};
pub use log::{AngelLogLayer, LogSwitch};
