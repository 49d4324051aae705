//! Fuzz target for initial configuration ingest
//!
//! Decodes arbitrary bytes the way the handshake does and validates the
//! result. Must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use meshcore_core::NodeIdentity;
use meshcore_core::angel::BootstrapConfig;
use meshcore_core::benc::decode_dict;

fuzz_target!(|data: &[u8]| {
    let Ok(dict) = decode_dict(data) else {
        return;
    };
    if let Ok(config) = BootstrapConfig::from_dict(&dict) {
        let _ = NodeIdentity::derive(&config.private_key);
    }
});
