//! Packet switch and switch-level pinger.
//!
//! Routes through the switch fabric are 64-bit labels written as four
//! dot-separated groups of four hex digits, most significant first. The
//! label `0000.0000.0000.0001` always routes to this node.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::admin::{AdminReply, AdminTable};
use crate::arena::Arena;
use crate::benc::Dict;
use crate::error::{RequestError, Result};

/// A switch route label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u64);

impl Label {
    /// Route to this node
    pub const SELF: Label = Label(1);

    /// Wrap a raw label
    #[must_use]
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Big-endian bytes
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:04x}.{:04x}.{:04x}.{:04x}",
            (b >> 48) & 0xffff,
            (b >> 32) & 0xffff,
            (b >> 16) & 0xffff,
            b & 0xffff
        )
    }
}

impl FromStr for Label {
    type Err = RequestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || RequestError::InvalidArgument(format!("malformed label '{s}'").into());
        let groups: Vec<&str> = s.split('.').collect();
        if groups.len() != 4 {
            return Err(invalid());
        }
        groups.iter().try_fold(0u64, |acc, group| {
            if group.len() != 4 || !group.bytes().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            let word = u64::from_str_radix(group, 16).map_err(|_| invalid())?;
            Ok((acc << 16) | word)
        })
        .map(Label)
    }
}

/// An interface plugged into the switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchSlot {
    /// Slot number
    pub number: u32,
    /// Human readable name
    pub name: String,
}

/// The packet switch
#[derive(Debug)]
pub struct SwitchCore {
    slots: Mutex<Vec<SwitchSlot>>,
    arena: Arena,
}

impl SwitchCore {
    /// Most interfaces the switch carries
    pub const MAX_SLOTS: usize = 64;

    /// Create a switch with no interfaces. Slot 0 is the router itself.
    #[must_use]
    pub fn new(arena: Arena) -> Self {
        tracing::debug!("switch core ready");
        Self {
            slots: Mutex::new(Vec::new()),
            arena,
        }
    }

    /// Plug in an interface and return its slot number.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidArgument`] when every slot is taken or the
    /// slot would cross the memory ceiling.
    pub fn attach(&self, name: &str) -> std::result::Result<u32, RequestError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.len() >= Self::MAX_SLOTS {
            return Err(RequestError::InvalidArgument(
                format!("all {} switch slots are in use", Self::MAX_SLOTS).into(),
            ));
        }
        self.arena
            .try_charge(name.len() + std::mem::size_of::<SwitchSlot>())
            .map_err(|breach| RequestError::InvalidArgument(breach.to_string().into()))?;
        let number = u32::try_from(slots.len() + 1).unwrap_or(u32::MAX);
        slots.push(SwitchSlot {
            number,
            name: name.to_string(),
        });
        tracing::info!("interface {} attached to switch slot {}", name, number);
        Ok(number)
    }

    /// Number of attached interfaces
    #[must_use]
    pub fn interface_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot of attached interfaces
    #[must_use]
    pub fn slots(&self) -> Vec<SwitchSlot> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Outcome of a switch ping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    /// The far end answered, echoing `data`
    Pong {
        /// Echoed payload
        data: Vec<u8>,
    },
    /// No answer
    Timeout,
}

/// Sends switch-level pings along a label
#[derive(Debug)]
pub struct SwitchPinger {
    switch: Arc<SwitchCore>,
    _arena: Arena,
}

impl SwitchPinger {
    /// Largest payload a ping may carry
    pub const MAX_DATA: usize = 256;

    /// Create a pinger over `switch`
    #[must_use]
    pub fn new(switch: Arc<SwitchCore>, arena: Arena) -> Self {
        Self {
            switch,
            _arena: arena,
        }
    }

    /// Ping `label`.
    ///
    /// The self route answers immediately. Every other label times out
    /// until a fabric interface can carry the ping.
    pub fn ping(&self, label: Label, data: &[u8]) -> PingOutcome {
        if label == Label::SELF {
            PingOutcome::Pong {
                data: data.to_vec(),
            }
        } else {
            tracing::debug!(
                "ping to {} has no route ({} interfaces)",
                label,
                self.switch.interface_count()
            );
            PingOutcome::Timeout
        }
    }

    /// Register `SwitchPinger_ping`.
    pub fn register_admin(self: &Arc<Self>, table: &mut AdminTable) -> Result<()> {
        let pinger = Arc::clone(self);
        table.register("SwitchPinger_ping", false, move |args: &Dict| {
            let path: Label = args
                .get_str("path")
                .ok_or(RequestError::MissingField("path"))?
                .parse()?;
            let data = args.get_bytes("data").unwrap_or_default();
            if data.len() > Self::MAX_DATA {
                return Err(RequestError::InvalidArgument("data too long".into()));
            }
            let reply = match pinger.ping(path, data) {
                PingOutcome::Pong { data } => {
                    let mut reply = Dict::new()
                        .with("result", "pong")
                        .with("path", path.to_string())
                        .with("ms", 0i64);
                    if !data.is_empty() {
                        reply.insert("data", data);
                    }
                    reply
                }
                PingOutcome::Timeout => Dict::new()
                    .with("result", "timeout")
                    .with("path", path.to_string()),
            };
            Ok(AdminReply::Message(reply))
        })
    }
}
