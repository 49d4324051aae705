//! Fuzz target for switch label parsing

#![no_main]

use libfuzzer_sys::fuzz_target;
use meshcore_core::node::Label;

fuzz_target!(|input: (u64, &str)| {
    let (bits, text) = input;

    if let Ok(label) = text.parse::<Label>() {
        assert_eq!(label.to_string().len(), 19);
    }

    let label = Label::new(bits);
    assert_eq!(label.to_string().parse::<Label>().ok(), Some(label));
});
