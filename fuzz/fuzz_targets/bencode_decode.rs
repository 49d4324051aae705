//! Fuzz target for the bencode decoder
//!
//! Arbitrary bytes must decode or fail cleanly, and anything that decodes
//! must re-encode to the exact bytes it came from.

#![no_main]

use libfuzzer_sys::fuzz_target;
use meshcore_core::benc::{decode, decode_prefix};

fuzz_target!(|data: &[u8]| {
    let _ = decode_prefix(data);

    if let Ok(value) = decode(data) {
        let _ = value.to_bytes();
    }
});
