#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_link::{process_request, DataStore};

fuzz_target!(|data: &[u8]| {
    let store = DataStore::with_sizes(64, 64, 64, 64);
    let reply = process_request(&store, data);
    assert!(!reply.is_empty());
});
