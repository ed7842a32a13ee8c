//! Modbus ASCII framing
//!
//! `:` + hex(address) + hex(PDU) + hex(LRC) + `\r\n`, two uppercase hex
//! digits per byte. The LRC covers the decoded address and PDU bytes.

use bytes::{BufMut, BytesMut};

use crate::checksum::lrc;
use crate::constants::{ASCII_END, ASCII_START, MAX_ASCII_FRAME_SIZE, MAX_PDU_SIZE};
use crate::error::{ModbusError, ModbusResult};

/// Append a complete ASCII frame for `address + pdu` to `dst`
pub fn encode_frame(address: u8, pdu: &[u8], dst: &mut BytesMut) -> ModbusResult<()> {
    if pdu.is_empty() || pdu.len() > MAX_PDU_SIZE {
        return Err(ModbusError::invalid_data(format!(
            "PDU length {} outside 1..={}",
            pdu.len(),
            MAX_PDU_SIZE
        )));
    }

    let mut raw = Vec::with_capacity(pdu.len() + 2);
    raw.push(address);
    raw.extend_from_slice(pdu);
    raw.push(lrc(&raw));

    dst.reserve(1 + raw.len() * 2 + ASCII_END.len());
    dst.put_u8(ASCII_START);
    dst.put_slice(hex::encode_upper(&raw).as_bytes());
    dst.put_slice(ASCII_END);
    Ok(())
}

/// Decode a complete frame (start marker through CRLF) into address and PDU
pub fn decode_frame(frame: &[u8]) -> ModbusResult<(u8, Vec<u8>)> {
    if frame.len() > MAX_ASCII_FRAME_SIZE {
        return Err(ModbusError::invalid_response(format!(
            "ASCII frame too long: {} characters",
            frame.len()
        )));
    }
    let body = frame
        .strip_prefix(&[ASCII_START])
        .and_then(|rest| rest.strip_suffix(ASCII_END))
        .ok_or_else(|| ModbusError::invalid_response("ASCII frame missing ':' or CRLF"))?;

    // address + function code + LRC
    if body.len() < 6 || body.len() % 2 != 0 {
        return Err(ModbusError::invalid_response(format!(
            "ASCII frame body has invalid length {}",
            body.len()
        )));
    }

    let mut raw = hex::decode(body)
        .map_err(|e| ModbusError::invalid_response(format!("malformed ASCII hex: {}", e)))?;

    let received = raw.pop().unwrap_or_default();
    let expected = lrc(&raw);
    if received != expected {
        return Err(ModbusError::lrc_mismatch(expected, received));
    }

    let address = raw.remove(0);
    Ok((address, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_read_request() {
        let mut buf = BytesMut::new();
        encode_frame(0x01, &[0x03, 0x00, 0x00, 0x00, 0x0A], &mut buf).unwrap();
        assert_eq!(&buf[..], b":01030000000AF2\r\n");
    }

    #[test]
    fn test_decode_response() {
        // 01 03 02 00 2A, LRC = -(0x30) = 0xD0
        let (address, pdu) = decode_frame(b":010302002AD0\r\n").unwrap();
        assert_eq!(address, 0x01);
        assert_eq!(pdu, vec![0x03, 0x02, 0x00, 0x2A]);
    }

    #[test]
    fn test_decode_lrc_mismatch() {
        match decode_frame(b":010302002AD1\r\n") {
            Err(ModbusError::LrcMismatch { expected, actual }) => {
                assert_eq!(expected, 0xD0);
                assert_eq!(actual, 0xD1);
            }
            other => panic!("expected LRC mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_frame(b":0103ZZ002AD0\r\n"),
            Err(ModbusError::InvalidResponse { .. })
        ));
        assert!(decode_frame(b"010302002AD0\r\n").is_err());
        assert!(decode_frame(b":010302002AD0").is_err());
        assert!(decode_frame(b":010302002AD\r\n").is_err());
        assert!(decode_frame(b":01F\r\n").is_err());
    }

    #[test]
    fn test_frame_round_trip() {
        let pdu = [0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02];
        let mut buf = BytesMut::new();
        encode_frame(0xF7, &pdu, &mut buf).unwrap();
        assert!(buf.iter().all(|b| !b.is_ascii_lowercase()));

        let (address, decoded) = decode_frame(&buf).unwrap();
        assert_eq!(address, 0xF7);
        assert_eq!(decoded, pdu.to_vec());
    }
}
