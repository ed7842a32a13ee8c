//! Modbus RTU transport
//!
//! Frames are delimited by line silence. Once the function code (and byte
//! count, where there is one) has arrived the expected length is known and
//! reading stops there; otherwise an inter-character gap ends the frame.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::constants::MAX_RTU_FRAME_SIZE;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::rtu;
use crate::pdu::ModbusPdu;
use crate::transport::serial::{Direction, SerialFramer, SerialTransport};

/// RTU framing: address + PDU + CRC-16
#[derive(Debug, Clone, Copy, Default)]
pub struct Rtu;

/// RTU client transport over link `S`
pub type RtuTransport<S> = SerialTransport<S, Rtu>;

impl SerialFramer for Rtu {
    const PROTOCOL: &'static str = "RTU";

    fn encode(address: u8, pdu: &[u8], dst: &mut BytesMut) -> ModbusResult<()> {
        rtu::encode_frame(address, pdu, dst)
    }

    fn decode(frame: &[u8]) -> ModbusResult<(u8, ModbusPdu)> {
        let (address, pdu) = rtu::decode_frame(frame)?;
        Ok((address, ModbusPdu::from_slice(pdu)?))
    }

    async fn read_frame<R: AsyncRead + Unpin + Send>(
        reader: &mut R,
        inter_char_timeout: Duration,
        direction: Direction,
    ) -> ModbusResult<Vec<u8>> {
        let mut frame = Vec::with_capacity(MAX_RTU_FRAME_SIZE);
        let mut buf = [0u8; MAX_RTU_FRAME_SIZE];

        loop {
            let expected = match direction {
                Direction::Request => rtu::request_frame_len(&frame),
                Direction::Response => rtu::response_frame_len(&frame),
            };
            // byte at a time until the length is known, so a following frame is never consumed
            let want = match expected {
                Some(len) if frame.len() >= len => return Ok(frame),
                Some(len) => (len - frame.len()).min(buf.len()),
                None => 1,
            };

            let read = if frame.is_empty() {
                reader.read(&mut buf[..want]).await
            } else {
                match timeout(inter_char_timeout, reader.read(&mut buf[..want])).await {
                    Ok(read) => read,
                    // silence ends the frame
                    Err(_) => return Ok(frame),
                }
            };

            let n =
                read.map_err(|e| ModbusError::connection(format!("serial read failed: {}", e)))?;
            if n == 0 {
                if frame.is_empty() {
                    return Err(ModbusError::connection("serial link closed"));
                }
                return Ok(frame);
            }
            frame.extend_from_slice(&buf[..n]);

            if frame.len() > MAX_RTU_FRAME_SIZE {
                return Err(ModbusError::invalid_response(format!(
                    "RTU frame exceeds {} bytes",
                    MAX_RTU_FRAME_SIZE
                )));
            }
        }
    }
}
