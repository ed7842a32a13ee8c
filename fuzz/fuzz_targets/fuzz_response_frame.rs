#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use modbus_link::codec::decode_response;
use modbus_link::frame::tcp;
use modbus_link::Request;

#[derive(Debug, Arbitrary)]
struct Input {
    function: u8,
    address: u16,
    quantity: u16,
    frame: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let request = match input.function % 4 {
        0 => Request::ReadCoils { address: input.address, quantity: input.quantity },
        1 => Request::ReadDiscreteInputs { address: input.address, quantity: input.quantity },
        2 => Request::ReadHoldingRegisters { address: input.address, quantity: input.quantity },
        _ => Request::ReadInputRegisters { address: input.address, quantity: input.quantity },
    };
    if let Ok((_, pdu)) = tcp::decode_frame(&input.frame) {
        let _ = decode_response(&request, pdu);
    }
});
