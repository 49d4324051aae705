//! Collaborators wired up during bootstrap.

pub mod crypto_auth;
pub mod ducttape;
pub mod interface;
pub mod security;
pub mod switch;
pub mod tun;

pub use crypto_auth::CryptoAuth;
pub use ducttape::{Ducttape, DucttapeStats};
pub use interface::{InterfaceController, Peer, PeerState};
pub use switch::{Label, PingOutcome, SwitchCore, SwitchPinger};
pub use tun::{DEFAULT_MTU, NullTun, TunConfigurator};
