//! TUN device setup.
//!
//! Configuring a TUN device is platform work this crate does not link in.
//! `Core_initTunnel` drives a [`TunConfigurator`]; the default one reports
//! the feature as unsupported.

use std::sync::Arc;

use meshcore_crypto::MeshAddress;

use super::ducttape::Ducttape;
use crate::admin::{AdminReply, AdminTable};
use crate::benc::Dict;
use crate::error::{RequestError, Result};
use crate::identity::NodeIdentity;

const IPV4_HEADER_SIZE: u32 = 20;
const UDP_HEADER_SIZE: u32 = 8;
const NONCE_SIZE: u32 = 4;
const POLY1305_TAG_SIZE: u32 = 16;
const SWITCH_HEADER_SIZE: u32 = 12;
const CRYPTO_AUTH_HEADER_SIZE: u32 = 120;
const IPV6_HEADER_SIZE: u32 = 40;

/// Overhead when a packet is handed off to another node and both crypto
/// sessions need a full handshake header.
pub const WORST_CASE_OVERHEAD: u32 = IPV4_HEADER_SIZE
    + UDP_HEADER_SIZE
    + NONCE_SIZE
    + POLY1305_TAG_SIZE
    + SWITCH_HEADER_SIZE
    + CRYPTO_AUTH_HEADER_SIZE
    + IPV6_HEADER_SIZE
    + CRYPTO_AUTH_HEADER_SIZE;

/// MTU for the TUN device assuming a 1492 byte (PPPoE) external link.
///
/// The OS subtracts the IPv6 header itself, and one crypto header is added
/// back so the result stays above the 1280 minimum Linux enforces.
pub const DEFAULT_MTU: u32 =
    1492 - WORST_CASE_OVERHEAD + IPV6_HEADER_SIZE + CRYPTO_AUTH_HEADER_SIZE;

/// Prefix length assigned to the TUN address
pub const ADDRESS_PREFIX_LEN: u8 = 8;

/// Brings up a TUN device
pub trait TunConfigurator: Send + Sync {
    /// Create and configure a device; returns its actual name.
    fn configure(
        &self,
        desired_name: Option<&str>,
        address: &MeshAddress,
        prefix_len: u8,
        mtu: u32,
    ) -> std::result::Result<String, RequestError>;
}

/// Configurator for builds without TUN support
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTun;

impl TunConfigurator for NullTun {
    fn configure(
        &self,
        _desired_name: Option<&str>,
        _address: &MeshAddress,
        _prefix_len: u8,
        _mtu: u32,
    ) -> std::result::Result<String, RequestError> {
        Err(RequestError::Unsupported("TUN support is not linked in".into()))
    }
}

/// Register `Core_initTunnel`.
pub fn register_admin(
    table: &mut AdminTable,
    identity: Arc<NodeIdentity>,
    ducttape: Arc<Ducttape>,
    configurator: Arc<dyn TunConfigurator>,
) -> Result<()> {
    table.register("Core_initTunnel", true, move |args: &Dict| {
        let desired = match args.get("desiredTunName") {
            None => None,
            Some(v) => Some(
                v.as_str()
                    .ok_or(RequestError::MissingField("desiredTunName"))?,
            ),
        };
        if let Some(existing) = ducttape.tun_name() {
            return Err(RequestError::InvalidArgument(
                format!("tunnel already initialized as {existing}").into(),
            ));
        }
        let name = configurator.configure(
            desired,
            identity.address(),
            ADDRESS_PREFIX_LEN,
            DEFAULT_MTU,
        )?;
        ducttape.attach_tun(&name);
        Ok(AdminReply::Message(
            Dict::new().with("error", "none").with("tunName", name),
        ))
    })
}
