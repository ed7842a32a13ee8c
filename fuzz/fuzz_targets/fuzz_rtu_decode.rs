#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_link::frame::{ascii, rtu};

fuzz_target!(|data: &[u8]| {
    let _ = rtu::request_frame_len(data);
    let _ = rtu::response_frame_len(data);
    let _ = rtu::decode_frame(data);
    let _ = ascii::decode_frame(data);
});
