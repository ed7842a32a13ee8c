//! Modbus RTU framing
//!
//! `[address][function][data...][crc_lo][crc_hi]`
//!
//! RTU has no length prefix, so readers use [`request_frame_len`] and
//! [`response_frame_len`] to learn where a frame ends once enough of it has
//! arrived, and fall back to line silence otherwise.

use bytes::{BufMut, BytesMut};

use crate::checksum::{crc16_modbus, received_crc};
use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};

/// Append `address + pdu + crc` to `dst`
pub fn encode_frame(address: u8, pdu: &[u8], dst: &mut BytesMut) -> ModbusResult<()> {
    if pdu.is_empty() || pdu.len() > MAX_PDU_SIZE {
        return Err(ModbusError::invalid_data(format!(
            "PDU length {} outside 1..={}",
            pdu.len(),
            MAX_PDU_SIZE
        )));
    }
    let start = dst.len();
    dst.reserve(pdu.len() + 3);
    dst.put_u8(address);
    dst.put_slice(pdu);
    let crc = crc16_modbus(&dst[start..]);
    dst.put_u16_le(crc);
    Ok(())
}

/// Verify the CRC of a complete frame and split it into address and PDU
pub fn decode_frame(frame: &[u8]) -> ModbusResult<(u8, &[u8])> {
    if frame.len() < MIN_RTU_FRAME_SIZE {
        return Err(ModbusError::invalid_response(format!(
            "RTU frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame.len() > MAX_RTU_FRAME_SIZE {
        return Err(ModbusError::invalid_response(format!(
            "RTU frame too long: {} bytes",
            frame.len()
        )));
    }

    let body = &frame[..frame.len() - 2];
    let expected = crc16_modbus(body);
    let actual = received_crc(frame).unwrap_or_default();
    if expected != actual {
        return Err(ModbusError::crc_mismatch(expected, actual));
    }

    Ok((body[0], &body[1..]))
}

/// Total length of the request frame starting in `buf`, once known.
///
/// `None` means not enough bytes yet, or an unsupported function code whose
/// length can only be found by waiting for silence.
pub fn request_frame_len(buf: &[u8]) -> Option<usize> {
    let fc = *buf.get(1)?;
    let pdu_len = match fc {
        FC_READ_COILS..=FC_WRITE_SINGLE_REGISTER => 5,
        FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => 6 + *buf.get(6)? as usize,
        _ => return None,
    };
    Some(1 + pdu_len + 2)
}

/// Total length of the response frame starting in `buf`, once known.
pub fn response_frame_len(buf: &[u8]) -> Option<usize> {
    let fc = *buf.get(1)?;
    if fc & EXCEPTION_FLAG != 0 {
        return Some(RTU_EXCEPTION_FRAME_SIZE);
    }
    let pdu_len = match fc {
        FC_READ_COILS..=FC_READ_INPUT_REGISTERS => 2 + *buf.get(2)? as usize,
        FC_WRITE_SINGLE_COIL
        | FC_WRITE_SINGLE_REGISTER
        | FC_WRITE_MULTIPLE_COILS
        | FC_WRITE_MULTIPLE_REGISTERS => 5,
        _ => return None,
    };
    Some(1 + pdu_len + 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_read_request() {
        let mut buf = BytesMut::new();
        encode_frame(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02], &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
    }

    #[test]
    fn test_decode_response() {
        let frame = [0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B, 0x9A, 0x9B];
        let (address, pdu) = decode_frame(&frame).unwrap();
        assert_eq!(address, 0x01);
        assert_eq!(pdu, &[0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B]);
    }

    #[test]
    fn test_decode_crc_mismatch() {
        let frame = [0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B, 0x9A, 0x9C];
        match decode_frame(&frame) {
            Err(ModbusError::CrcMismatch { expected, actual }) => {
                assert_eq!(expected, 0x9B9A);
                assert_eq!(actual, 0x9C9A);
            }
            other => panic!("expected CRC mismatch, got {:?}", other),
        }
        assert!(decode_frame(&[0x01, 0x03, 0x00]).is_err());
    }

    #[test]
    fn test_frame_round_trip() {
        let pdu = [0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01];
        let mut buf = BytesMut::new();
        encode_frame(0x11, &pdu, &mut buf).unwrap();
        let (address, decoded) = decode_frame(&buf).unwrap();
        assert_eq!(address, 0x11);
        assert_eq!(decoded, &pdu);
    }

    #[test]
    fn test_request_frame_len() {
        assert_eq!(request_frame_len(&[0x01]), None);
        assert_eq!(request_frame_len(&[0x01, 0x03]), Some(8));
        assert_eq!(request_frame_len(&[0x01, 0x06]), Some(8));
        // FC0F: byte count sits at offset 6
        assert_eq!(request_frame_len(&[0x01, 0x0F, 0x00, 0x13, 0x00, 0x0A]), None);
        assert_eq!(
            request_frame_len(&[0x01, 0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02]),
            Some(1 + 6 + 2 + 2)
        );
        assert_eq!(request_frame_len(&[0x01, 0x2B]), None);
    }

    #[test]
    fn test_response_frame_len() {
        assert_eq!(response_frame_len(&[0x01, 0x83]), Some(5));
        assert_eq!(response_frame_len(&[0x01, 0x03]), None);
        assert_eq!(response_frame_len(&[0x01, 0x03, 0x04]), Some(9));
        assert_eq!(response_frame_len(&[0x01, 0x10]), Some(8));
        assert_eq!(response_frame_len(&[0x01, 0x05]), Some(8));
    }
}
