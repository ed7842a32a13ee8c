//! Byte-exact envelopes around a PDU
//!
//! - **TCP**: MBAP header (transaction, protocol, length, unit) + PDU
//! - **RTU**: address + PDU + CRC-16 (little-endian)
//! - **ASCII**: `:` + hex(address + PDU + LRC) + CRLF
//!
//! Everything here is pure: encoders append to a `BytesMut`, decoders take a
//! complete frame and hand back the address and PDU.

pub mod ascii;
pub mod rtu;
pub mod tcp;
