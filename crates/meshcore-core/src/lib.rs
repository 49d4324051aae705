//! # meshcore Core
//!
//! The worker half of a meshcore node. A supervisor ("angel") spawns the
//! worker with two pipe descriptors; the worker reads its configuration,
//! acknowledges with a per-run sync magic, derives its identity and wires
//! up its modules, then serves administrative RPC until told to exit.
//!
//! This crate provides:
//! - Hierarchical memory accounting with a hard ceiling
//! - A bencode codec
//! - The supervisor handshake, framing and log stream
//! - Node identity derivation
//! - The DHT dispatch chain (reply correlation, router, catch-all)
//! - The admin RPC table with cookie authentication
//! - The bootstrap orchestrator and event loop
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  config blob   ┌──────────────────────────────────────┐
//! │  Supervisor  │ ─────────────► │ SupervisorChannel                    │
//! │   (angel)    │ ◄───────────── │   ack {"angel":{"syncMagic":...}}    │
//! │              │  admin + logs  ├──────────────────────────────────────┤
//! │              │ ◄────────────► │ Core::bootstrap                      │
//! └──────────────┘                │   identity → CryptoAuth → SwitchCore │
//!                                 │   → DispatchChain → Ducttape         │
//!                                 │   → SwitchPinger → Interfaces        │
//!                                 │   → admin table (frozen)             │
//!                                 ├──────────────────────────────────────┤
//!                                 │ Core::run (admin event loop)         │
//!                                 └──────────────────────────────────────┘
//! ```
//!
//! Errors come in two kinds: [`FatalError`] stops the process with exit
//! status 1, [`RequestError`] affects one request only.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod admin;
pub mod angel;
pub mod arena;
pub mod benc;
pub mod bootstrap;
pub mod config;
pub mod dht;
pub mod error;
mod event_loop;
pub mod identity;
pub mod node;

pub use admin::{AdminReply, AdminTable, Dispatched, FrozenAdminTable};
pub use angel::{AngelLogLayer, LogSwitch, SupervisorChannel, SyncMagic};
pub use arena::{ALLOCATOR_FAILSAFE, Arena, ArenaBreach};
pub use bootstrap::{BootstrapOptions, Core};
pub use config::{CoreConfig, INITIAL_CONF_BUFF_SIZE, MAX_FRAME_PAYLOAD};
pub use error::{Error, FatalError, RequestError, Result};
pub use identity::NodeIdentity;
