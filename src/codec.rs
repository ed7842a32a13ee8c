//! # Modbus PDU Codec
//!
//! Converts between the typed [`Request`]/[`Response`] variants and PDU bytes,
//! for both sides of the link.
//!
//! | Code | Request payload | Response payload |
//! |------|-----------------|------------------|
//! | 0x01/0x02 | addr(u16) qty(u16) | byte_count(u8) packed bits |
//! | 0x03/0x04 | addr(u16) qty(u16) | byte_count(u8) qty x u16 |
//! | 0x05 | addr(u16) 0xFF00/0x0000 | echo of request |
//! | 0x06 | addr(u16) value(u16) | echo of request |
//! | 0x0F | addr(u16) qty(u16) byte_count(u8) packed bits | addr(u16) qty(u16) |
//! | 0x10 | addr(u16) qty(u16) byte_count(u8) qty x u16 | addr(u16) qty(u16) |
//!
//! All multi-byte fields are big-endian. Bits are packed LSB-first.
//!
//! Client side: [`encode_request`] / [`decode_response`].
//! Server side: [`decode_request`] / [`encode_response`] / [`encode_exception`].

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::{pack_bits, unpack_bits, ModbusPdu, PduBuilder};
use crate::protocol::{ExceptionCode, ModbusFunction, Request, Response};

#[inline]
fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn be_u16_values(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

// ============================================================================
// Client side
// ============================================================================

/// Build the request PDU, rejecting out-of-range arguments before any I/O.
pub fn encode_request(request: &Request) -> ModbusResult<ModbusPdu> {
    request.validate()?;

    match request {
        Request::ReadCoils { address, quantity }
        | Request::ReadDiscreteInputs { address, quantity }
        | Request::ReadHoldingRegisters { address, quantity }
        | Request::ReadInputRegisters { address, quantity } => {
            PduBuilder::build_read_request(request.function().to_u8(), *address, *quantity)
        }
        Request::WriteSingleCoil { address, value } => {
            PduBuilder::build_write_single_coil(*address, *value)
        }
        Request::WriteSingleRegister { address, value } => {
            PduBuilder::build_write_single_register(*address, *value)
        }
        Request::WriteMultipleCoils { address, values } => {
            PduBuilder::build_write_multiple_coils(*address, values)
        }
        Request::WriteMultipleRegisters { address, values } => {
            PduBuilder::build_write_multiple_registers(*address, values)
        }
    }
}

/// Parse a response PDU against the request that produced it.
///
/// The response function code must be the request's code (success) or the
/// request's code | 0x80 followed by exactly one exception byte. Byte counts
/// must match both the payload length and the requested quantity, and write
/// echoes must match the request exactly.
pub fn decode_response(request: &Request, pdu: &[u8]) -> ModbusResult<Response> {
    let expected_fc = request.function().to_u8();
    let (&fc, payload) = pdu
        .split_first()
        .ok_or_else(|| ModbusError::invalid_response("empty response PDU"))?;

    if fc == expected_fc | EXCEPTION_FLAG {
        return match payload {
            [code] => match ExceptionCode::from_u8(*code) {
                Some(code) => Err(ModbusError::exception(expected_fc, code)),
                None => Err(ModbusError::invalid_response(format!(
                    "unknown exception code 0x{:02X}",
                    code
                ))),
            },
            _ => Err(ModbusError::invalid_response(format!(
                "exception response carries {} bytes, expected 1",
                payload.len()
            ))),
        };
    }

    if fc != expected_fc {
        return Err(ModbusError::invalid_response(format!(
            "function code mismatch: expected 0x{:02X}, got 0x{:02X}",
            expected_fc, fc
        )));
    }

    match request {
        Request::ReadCoils { quantity, .. } => {
            let data = read_payload(payload, (*quantity as usize).div_ceil(8))?;
            Ok(Response::ReadCoils(unpack_bits(data, *quantity as usize)))
        }
        Request::ReadDiscreteInputs { quantity, .. } => {
            let data = read_payload(payload, (*quantity as usize).div_ceil(8))?;
            Ok(Response::ReadDiscreteInputs(unpack_bits(
                data,
                *quantity as usize,
            )))
        }
        Request::ReadHoldingRegisters { quantity, .. } => {
            let data = read_payload(payload, *quantity as usize * 2)?;
            Ok(Response::ReadHoldingRegisters(be_u16_values(data)))
        }
        Request::ReadInputRegisters { quantity, .. } => {
            let data = read_payload(payload, *quantity as usize * 2)?;
            Ok(Response::ReadInputRegisters(be_u16_values(data)))
        }
        Request::WriteSingleCoil { address, value } => {
            let raw = if *value { COIL_ON } else { COIL_OFF };
            expect_echo(payload, *address, raw)?;
            Ok(Response::WriteSingleCoil {
                address: *address,
                value: *value,
            })
        }
        Request::WriteSingleRegister { address, value } => {
            expect_echo(payload, *address, *value)?;
            Ok(Response::WriteSingleRegister {
                address: *address,
                value: *value,
            })
        }
        Request::WriteMultipleCoils { address, .. } => {
            let quantity = request.quantity();
            expect_echo(payload, *address, quantity)?;
            Ok(Response::WriteMultipleCoils {
                address: *address,
                quantity,
            })
        }
        Request::WriteMultipleRegisters { address, .. } => {
            let quantity = request.quantity();
            expect_echo(payload, *address, quantity)?;
            Ok(Response::WriteMultipleRegisters {
                address: *address,
                quantity,
            })
        }
    }
}

/// Strip and check the byte count of a read response
fn read_payload(payload: &[u8], expected_len: usize) -> ModbusResult<&[u8]> {
    let (&byte_count, data) = payload
        .split_first()
        .ok_or_else(|| ModbusError::invalid_response("read response missing byte count"))?;

    if byte_count as usize != data.len() {
        return Err(ModbusError::invalid_response(format!(
            "byte count {} does not match payload length {}",
            byte_count,
            data.len()
        )));
    }
    if data.len() != expected_len {
        return Err(ModbusError::invalid_response(format!(
            "byte count {} does not match requested quantity ({} bytes expected)",
            byte_count, expected_len
        )));
    }
    Ok(data)
}

/// Check a 4-byte write echo: address + value/quantity
fn expect_echo(payload: &[u8], address: u16, value: u16) -> ModbusResult<()> {
    if payload.len() != 4 {
        return Err(ModbusError::invalid_response(format!(
            "write response carries {} bytes, expected 4",
            payload.len()
        )));
    }
    let (echo_address, echo_value) = (be_u16(payload, 0), be_u16(payload, 2));
    if echo_address != address || echo_value != value {
        return Err(ModbusError::invalid_response(format!(
            "write echo mismatch: sent {:04X}/{:04X}, got {:04X}/{:04X}",
            address, value, echo_address, echo_value
        )));
    }
    Ok(())
}

// ============================================================================
// Server side
// ============================================================================

/// Parse a request PDU received by a server.
///
/// Failures are returned as the exception code the server should answer
/// with: unsupported function → 01, address overflow → 02, malformed
/// length/quantity/coil value/byte count → 03.
pub fn decode_request(pdu: &[u8]) -> Result<Request, ExceptionCode> {
    let (&fc, payload) = pdu.split_first().ok_or(ExceptionCode::IllegalFunction)?;
    let function = ModbusFunction::from_u8(fc).ok_or(ExceptionCode::IllegalFunction)?;

    match function {
        ModbusFunction::ReadCoils
        | ModbusFunction::ReadDiscreteInputs
        | ModbusFunction::ReadHoldingRegisters
        | ModbusFunction::ReadInputRegisters => {
            if payload.len() != 4 {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let address = be_u16(payload, 0);
            let quantity = be_u16(payload, 2);
            let max = match function {
                ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => MAX_READ_COILS,
                _ => MAX_READ_REGISTERS,
            };
            check_range(address, quantity as usize, max)?;

            Ok(match function {
                ModbusFunction::ReadCoils => Request::ReadCoils { address, quantity },
                ModbusFunction::ReadDiscreteInputs => {
                    Request::ReadDiscreteInputs { address, quantity }
                }
                ModbusFunction::ReadHoldingRegisters => {
                    Request::ReadHoldingRegisters { address, quantity }
                }
                _ => Request::ReadInputRegisters { address, quantity },
            })
        }
        ModbusFunction::WriteSingleCoil => {
            if payload.len() != 4 {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let value = match be_u16(payload, 2) {
                COIL_ON => true,
                COIL_OFF => false,
                _ => return Err(ExceptionCode::IllegalDataValue),
            };
            Ok(Request::WriteSingleCoil {
                address: be_u16(payload, 0),
                value,
            })
        }
        ModbusFunction::WriteSingleRegister => {
            if payload.len() != 4 {
                return Err(ExceptionCode::IllegalDataValue);
            }
            Ok(Request::WriteSingleRegister {
                address: be_u16(payload, 0),
                value: be_u16(payload, 2),
            })
        }
        ModbusFunction::WriteMultipleCoils => {
            let (address, quantity, data) = write_multiple_parts(payload, |q| q.div_ceil(8))?;
            check_range(address, quantity, MAX_WRITE_COILS)?;
            Ok(Request::WriteMultipleCoils {
                address,
                values: unpack_bits(data, quantity),
            })
        }
        ModbusFunction::WriteMultipleRegisters => {
            let (address, quantity, data) = write_multiple_parts(payload, |q| q * 2)?;
            check_range(address, quantity, MAX_WRITE_REGISTERS)?;
            Ok(Request::WriteMultipleRegisters {
                address,
                values: be_u16_values(data),
            })
        }
    }
}

/// Split an FC0F/FC10 payload into address, quantity and data, checking
/// the byte count against both the quantity and the bytes present.
fn write_multiple_parts(
    payload: &[u8],
    bytes_for: impl Fn(usize) -> usize,
) -> Result<(u16, usize, &[u8]), ExceptionCode> {
    if payload.len() < 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let address = be_u16(payload, 0);
    let quantity = be_u16(payload, 2) as usize;
    let byte_count = payload[4] as usize;
    let data = &payload[5..];

    if byte_count != bytes_for(quantity) || data.len() != byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok((address, quantity, data))
}

fn check_range(address: u16, quantity: usize, max: usize) -> Result<(), ExceptionCode> {
    if quantity == 0 || quantity > max {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if address as usize + quantity > DEFAULT_TABLE_SIZE {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

/// Build the response PDU a server sends for a successful request.
pub fn encode_response(response: &Response) -> ModbusResult<ModbusPdu> {
    let fc = response.function().to_u8();
    let builder = PduBuilder::new().function_code(fc)?;

    let pdu = match response {
        Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
            let data = pack_bits(bits);
            let byte_count = u8::try_from(data.len())
                .map_err(|_| ModbusError::invalid_data("too many bits for one response"))?;
            builder.byte(byte_count)?.data(&data)?.build()
        }
        Response::ReadHoldingRegisters(values) | Response::ReadInputRegisters(values) => {
            let byte_count = u8::try_from(values.len() * 2)
                .map_err(|_| ModbusError::invalid_data("too many registers for one response"))?;
            let mut builder = builder.byte(byte_count)?;
            for value in values {
                builder = builder.data(&value.to_be_bytes())?;
            }
            builder.build()
        }
        Response::WriteSingleCoil { address, value } => builder
            .address(*address)?
            .quantity(if *value { COIL_ON } else { COIL_OFF })?
            .build(),
        Response::WriteSingleRegister { address, value } => {
            builder.address(*address)?.quantity(*value)?.build()
        }
        Response::WriteMultipleCoils { address, quantity }
        | Response::WriteMultipleRegisters { address, quantity } => {
            builder.address(*address)?.quantity(*quantity)?.build()
        }
    };
    Ok(pdu)
}

/// Build an exception response PDU for the given request function code.
pub fn encode_exception(function_code: u8, code: ExceptionCode) -> ModbusPdu {
    ModbusPdu::exception(function_code, code.to_u8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_read_holding_registers_scenario() {
        let request = Request::ReadHoldingRegisters { address: 0, quantity: 2 };
        let pdu = encode_request(&request).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x00, 0x00, 0x02]);

        let response = encode_response(&Response::ReadHoldingRegisters(vec![1000, 2000])).unwrap();
        assert_eq!(response.payload(), &[0x04, 0x03, 0xE8, 0x07, 0xD0]);

        let decoded = decode_response(&request, response.as_slice()).unwrap();
        assert_eq!(decoded, Response::ReadHoldingRegisters(vec![1000, 2000]));
    }

    #[test]
    fn test_write_single_coil_scenario() {
        let request = Request::WriteSingleCoil { address: 0, value: true };
        let pdu = encode_request(&request).unwrap();
        assert_eq!(pdu.as_slice(), &[0x05, 0x00, 0x00, 0xFF, 0x00]);

        // The echo of the request is the only valid answer
        let decoded = decode_response(&request, pdu.as_slice()).unwrap();
        assert_eq!(decoded, Response::WriteSingleCoil { address: 0, value: true });

        let wrong_echo = [0x05, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            decode_response(&request, &wrong_echo),
            Err(ModbusError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_exception_response_mapping() {
        let request = Request::ReadHoldingRegisters { address: 100, quantity: 1 };
        let err = decode_response(&request, &[0x83, 0x02]).unwrap_err();
        assert_eq!(
            err,
            ModbusError::exception(0x03, ExceptionCode::IllegalDataAddress)
        );

        // Unknown exception byte is malformed, not a named exception
        let err = decode_response(&request, &[0x83, 0x07]).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidResponse { .. }));

        // Exception flag on a different function code
        let err = decode_response(&request, &[0x84, 0x02]).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidResponse { .. }));

        let err = decode_response(&request, &[0x83, 0x02, 0x00]).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidResponse { .. }));
    }

    #[test]
    fn test_function_code_mismatch() {
        let request = Request::ReadCoils { address: 0, quantity: 8 };
        let err = decode_response(&request, &[0x02, 0x01, 0xFF]).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidResponse { .. }));
        assert!(decode_response(&request, &[]).is_err());
    }

    #[test]
    fn test_byte_count_mismatch() {
        let request = Request::ReadHoldingRegisters { address: 0, quantity: 2 };
        // byte count claims 4, only 2 data bytes present
        let short = [0x03, 0x04, 0x00, 0x01];
        assert!(matches!(
            decode_response(&request, &short),
            Err(ModbusError::InvalidResponse { .. })
        ));

        // self-consistent but answers a different quantity
        let wrong_quantity = [0x03, 0x02, 0x00, 0x01];
        assert!(matches!(
            decode_response(&request, &wrong_quantity),
            Err(ModbusError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_read_coils_response_trims_padding() {
        let request = Request::ReadCoils { address: 0x13, quantity: 10 };
        let decoded = decode_response(&request, &[0x01, 0x02, 0xCD, 0x01]).unwrap();
        assert_eq!(
            decoded,
            Response::ReadCoils(vec![
                true, false, true, true, false, false, true, true, true, false
            ])
        );
    }

    #[test]
    fn test_quantity_limits_rejected_before_encoding() {
        let over = Request::ReadHoldingRegisters { address: 0, quantity: 126 };
        assert!(matches!(encode_request(&over), Err(ModbusError::InvalidData { .. })));

        let over = Request::WriteMultipleCoils { address: 0, values: vec![false; 1969] };
        assert!(matches!(encode_request(&over), Err(ModbusError::InvalidData { .. })));

        let max = Request::WriteMultipleRegisters { address: 0, values: vec![0xABCD; 123] };
        assert_eq!(encode_request(&max).unwrap().len(), 6 + 246);
    }

    #[test]
    fn test_decode_request_exceptions() {
        assert_eq!(decode_request(&[]), Err(ExceptionCode::IllegalFunction));
        assert_eq!(decode_request(&[0x2B, 0x0E]), Err(ExceptionCode::IllegalFunction));

        // quantity 0 and quantity above the limit
        assert_eq!(
            decode_request(&[0x03, 0x00, 0x00, 0x00, 0x00]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            decode_request(&[0x03, 0x00, 0x00, 0x00, 0x7E]),
            Err(ExceptionCode::IllegalDataValue)
        );
        // address + quantity past 65535
        assert_eq!(
            decode_request(&[0x03, 0xFF, 0xFF, 0x00, 0x02]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        // coil value must be FF00 or 0000
        assert_eq!(
            decode_request(&[0x05, 0x00, 0x01, 0x12, 0x34]),
            Err(ExceptionCode::IllegalDataValue)
        );
        // byte count disagrees with quantity
        assert_eq!(
            decode_request(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00, 0x01]),
            Err(ExceptionCode::IllegalDataValue)
        );
        // truncated
        assert_eq!(decode_request(&[0x06, 0x00]), Err(ExceptionCode::IllegalDataValue));
    }

    #[test]
    fn test_encode_exception() {
        let pdu = encode_exception(0x03, ExceptionCode::IllegalDataAddress);
        assert_eq!(pdu.as_slice(), &[0x83, 0x02]);
        assert!(pdu.is_exception());
    }

    fn request_strategy() -> impl Strategy<Value = Request> {
        prop_oneof![
            (any::<u16>(), 1..=2000u16).prop_map(|(a, q)| Request::ReadCoils {
                address: a.min(65535 - (q - 1)),
                quantity: q
            }),
            (any::<u16>(), 1..=2000u16).prop_map(|(a, q)| Request::ReadDiscreteInputs {
                address: a.min(65535 - (q - 1)),
                quantity: q
            }),
            (any::<u16>(), 1..=125u16).prop_map(|(a, q)| Request::ReadHoldingRegisters {
                address: a.min(65535 - (q - 1)),
                quantity: q
            }),
            (any::<u16>(), 1..=125u16).prop_map(|(a, q)| Request::ReadInputRegisters {
                address: a.min(65535 - (q - 1)),
                quantity: q
            }),
            (any::<u16>(), any::<bool>())
                .prop_map(|(address, value)| Request::WriteSingleCoil { address, value }),
            (any::<u16>(), any::<u16>())
                .prop_map(|(address, value)| Request::WriteSingleRegister { address, value }),
            (0..=63000u16, proptest::collection::vec(any::<bool>(), 1..=1968))
                .prop_map(|(address, values)| Request::WriteMultipleCoils { address, values }),
            (0..=65000u16, proptest::collection::vec(any::<u16>(), 1..=123))
                .prop_map(|(address, values)| Request::WriteMultipleRegisters { address, values }),
        ]
    }

    proptest! {
        #[test]
        fn prop_request_symmetry(request in request_strategy()) {
            let pdu = encode_request(&request).unwrap();
            prop_assert_eq!(decode_request(pdu.as_slice()), Ok(request));
        }

        #[test]
        fn prop_register_response_symmetry(
            values in proptest::collection::vec(any::<u16>(), 1..=125)
        ) {
            let request = Request::ReadInputRegisters { address: 0, quantity: values.len() as u16 };
            let response = Response::ReadInputRegisters(values);
            let pdu = encode_response(&response).unwrap();
            prop_assert_eq!(decode_response(&request, pdu.as_slice()).unwrap(), response);
        }

        #[test]
        fn prop_bit_response_symmetry(bits in proptest::collection::vec(any::<bool>(), 1..=2000)) {
            let request = Request::ReadCoils { address: 0, quantity: bits.len() as u16 };
            let response = Response::ReadCoils(bits);
            let pdu = encode_response(&response).unwrap();
            prop_assert_eq!(decode_response(&request, pdu.as_slice()).unwrap(), response);
        }
    }
}
