//! Fuzz target for admin request handling
//!
//! Arbitrary bytes are decoded and handed to a table holding the core
//! methods. Authentication and argument errors must stay per-request.

#![no_main]

use std::sync::OnceLock;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use meshcore_core::admin::{AdminTable, FrozenAdminTable};
use meshcore_core::angel::AdminPassword;
use meshcore_core::benc::decode_dict;
use meshcore_core::bootstrap::register_core_methods;
use meshcore_core::Arena;

fn admin() -> &'static (FrozenAdminTable, Arena) {
    static ADMIN: OnceLock<(FrozenAdminTable, Arena)> = OnceLock::new();
    ADMIN.get_or_init(|| {
        let root = Arena::root(1 << 30);
        let mut table = AdminTable::new(root.child("admin"));
        register_core_methods(&mut table, root.stats()).unwrap();
        let admin = table.freeze(AdminPassword::new(b"fuzz".to_vec()), Duration::from_secs(10));
        (admin, root)
    })
}

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = decode_dict(data) {
        let _ = admin().0.handle(&request);
    }
});
