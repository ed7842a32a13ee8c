//! Modbus TCP (MBAP) framing

use bytes::{BufMut, BytesMut};

use crate::constants::{
    MAX_MBAP_LENGTH, MAX_PDU_SIZE, MBAP_HEADER_LEN, MIN_MBAP_LENGTH, MODBUS_PROTOCOL_ID,
};
use crate::error::{ModbusError, ModbusResult};

/// MBAP header: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of unit id + PDU
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Header for a PDU of `pdu_len` bytes
    pub fn new(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    /// Parse the first 7 bytes of `buf`. Does not validate field values.
    pub fn parse(buf: &[u8]) -> ModbusResult<Self> {
        if buf.len() < MBAP_HEADER_LEN {
            return Err(ModbusError::invalid_response(format!(
                "MBAP header needs {} bytes, got {}",
                MBAP_HEADER_LEN,
                buf.len()
            )));
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
            protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            unit_id: buf[6],
        })
    }

    /// Reject foreign protocol ids and impossible lengths
    pub fn validate(&self) -> ModbusResult<()> {
        if self.protocol_id != MODBUS_PROTOCOL_ID {
            return Err(ModbusError::invalid_response(format!(
                "unexpected MBAP protocol id 0x{:04X}",
                self.protocol_id
            )));
        }
        let length = self.length as usize;
        if !(MIN_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(ModbusError::invalid_response(format!(
                "MBAP length {} outside {}..={}",
                length, MIN_MBAP_LENGTH, MAX_MBAP_LENGTH
            )));
        }
        Ok(())
    }

    /// Number of PDU bytes following the header
    pub fn pdu_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }

    /// Write the 7 header bytes
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(MBAP_HEADER_LEN);
        dst.put_u16(self.transaction_id);
        dst.put_u16(self.protocol_id);
        dst.put_u16(self.length);
        dst.put_u8(self.unit_id);
    }
}

/// Append a complete MBAP frame for `pdu` to `dst`
pub fn encode_frame(
    transaction_id: u16,
    unit_id: u8,
    pdu: &[u8],
    dst: &mut BytesMut,
) -> ModbusResult<()> {
    if pdu.is_empty() || pdu.len() > MAX_PDU_SIZE {
        return Err(ModbusError::invalid_data(format!(
            "PDU length {} outside 1..={}",
            pdu.len(),
            MAX_PDU_SIZE
        )));
    }
    dst.reserve(MBAP_HEADER_LEN + pdu.len());
    MbapHeader::new(transaction_id, unit_id, pdu.len()).encode(dst);
    dst.put_slice(pdu);
    Ok(())
}

/// Split a complete MBAP frame into its header and PDU
pub fn decode_frame(frame: &[u8]) -> ModbusResult<(MbapHeader, &[u8])> {
    let header = MbapHeader::parse(frame)?;
    header.validate()?;

    let pdu = &frame[MBAP_HEADER_LEN..];
    if pdu.len() != header.pdu_len() {
        return Err(ModbusError::invalid_response(format!(
            "MBAP length announces {} PDU bytes, frame carries {}",
            header.pdu_len(),
            pdu.len()
        )));
    }
    Ok((header, pdu))
}
