//! Frame checksums
//!
//! RTU frames end with CRC-16/MODBUS (init 0xFFFF, reflected polynomial
//! 0xA001, no final XOR), transmitted low byte first. ASCII frames end with
//! the LRC: the two's complement of the 8-bit sum of address and PDU bytes.

use crc::{Crc, CRC_16_MODBUS};

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute CRC-16/MODBUS over `data`
#[inline]
pub fn crc16_modbus(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Append the CRC of `frame` to it, low byte first
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check that the trailing two bytes of `frame` are the CRC of the rest.
///
/// Frames shorter than the CRC itself never verify.
pub fn verify_crc(frame: &[u8]) -> bool {
    match received_crc(frame) {
        Some(received) => crc16_modbus(&frame[..frame.len() - 2]) == received,
        None => false,
    }
}

/// The CRC carried in the last two bytes of `frame`
pub fn received_crc(frame: &[u8]) -> Option<u16> {
    if frame.len() < 2 {
        return None;
    }
    let tail = &frame[frame.len() - 2..];
    Some(u16::from_le_bytes([tail[0], tail[1]]))
}

/// Compute the Modbus ASCII LRC over `data`
#[inline]
pub fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_crc_reference_vector() {
        let request = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        let crc = crc16_modbus(&request);
        assert_eq!(crc.to_le_bytes(), [0xC4, 0x0B]);

        let mut frame = request.to_vec();
        append_crc(&mut frame);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
        assert!(verify_crc(&frame));
    }

    #[test]
    fn test_crc_response_vector() {
        let frame = [0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B, 0x9A, 0x9B];
        assert!(verify_crc(&frame));

        let mut corrupted = frame;
        corrupted[4] ^= 0x01;
        assert!(!verify_crc(&corrupted));
    }

    #[test]
    fn test_crc_short_frame() {
        assert!(!verify_crc(&[]));
        assert!(!verify_crc(&[0x01]));
        assert_eq!(received_crc(&[0x01]), None);
    }

    #[test]
    fn test_lrc_reference_vector() {
        // 01 03 00 00 00 0A -> sum 0x0E -> LRC 0xF2
        assert_eq!(lrc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xF2);
        assert_eq!(lrc(&[]), 0x00);
        assert_eq!(lrc(&[0xFF, 0x01]), 0x00);
    }

    proptest! {
        #[test]
        fn prop_crc_round_trip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut frame = data.clone();
            append_crc(&mut frame);
            prop_assert!(verify_crc(&frame));
            // CRC-16/MODBUS over data + CRC leaves a zero residual
            prop_assert_eq!(crc16_modbus(&frame), 0);
        }

        #[test]
        fn prop_lrc_round_trip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut frame = data.clone();
            frame.push(lrc(&data));
            prop_assert_eq!(frame.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)), 0);
        }
    }
}
