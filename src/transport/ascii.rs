//! Modbus ASCII transport
//!
//! Frames run from `:` to CRLF. Anything received before the start marker is
//! line noise and is skipped.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::constants::{ASCII_END, ASCII_START, MAX_ASCII_FRAME_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::ascii;
use crate::pdu::ModbusPdu;
use crate::transport::serial::{Direction, SerialFramer, SerialTransport};

/// ASCII framing: `:` + hex + LRC + CRLF
#[derive(Debug, Clone, Copy, Default)]
pub struct Ascii;

/// ASCII client transport over link `S`
pub type AsciiTransport<S> = SerialTransport<S, Ascii>;

impl SerialFramer for Ascii {
    const PROTOCOL: &'static str = "ASCII";

    fn encode(address: u8, pdu: &[u8], dst: &mut BytesMut) -> ModbusResult<()> {
        ascii::encode_frame(address, pdu, dst)
    }

    fn decode(frame: &[u8]) -> ModbusResult<(u8, ModbusPdu)> {
        let (address, pdu) = ascii::decode_frame(frame)?;
        Ok((address, ModbusPdu::from_slice(&pdu)?))
    }

    async fn read_frame<R: AsyncRead + Unpin + Send>(
        reader: &mut R,
        inter_char_timeout: Duration,
        _direction: Direction,
    ) -> ModbusResult<Vec<u8>> {
        let mut frame = Vec::with_capacity(MAX_ASCII_FRAME_SIZE);
        let mut byte = [0u8; 1];

        loop {
            let read = if frame.is_empty() {
                reader.read(&mut byte).await
            } else {
                timeout(inter_char_timeout, reader.read(&mut byte))
                    .await
                    .map_err(|_| ModbusError::invalid_response("incomplete ASCII frame"))?
            };
            let n =
                read.map_err(|e| ModbusError::connection(format!("serial read failed: {}", e)))?;
            if n == 0 {
                return Err(ModbusError::connection("serial link closed"));
            }

            if byte[0] == ASCII_START {
                // a new start marker restarts the frame
                frame.clear();
            } else if frame.is_empty() {
                continue;
            }
            frame.push(byte[0]);

            if frame.ends_with(ASCII_END) {
                return Ok(frame);
            }
            if frame.len() >= MAX_ASCII_FRAME_SIZE {
                return Err(ModbusError::invalid_response(format!(
                    "ASCII frame exceeds {} characters",
                    MAX_ASCII_FRAME_SIZE
                )));
            }
        }
    }
}
