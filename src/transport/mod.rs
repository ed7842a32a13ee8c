//! Frame transports
//!
//! A transport owns one connection and moves PDUs across it inside a
//! protocol envelope:
//!
//! - [`TcpTransport`]: MBAP header, requests pipelined by transaction id
//! - [`RtuTransport`]: address + PDU + CRC-16, one request at a time
//! - [`AsciiTransport`]: `:` hex LRC CRLF, one request at a time
//!
//! Transports know nothing about function-code semantics; that lives in
//! [`crate::codec`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;
use crate::protocol::SlaveId;

pub mod ascii;
pub mod rtu;
pub mod serial;
pub mod tcp;

pub use ascii::{Ascii, AsciiTransport};
pub use rtu::{Rtu, RtuTransport};
pub use serial::{
    DataBits, Parity, SerialConfig, SerialFramer, SerialLink, SerialTransport, StopBits,
};
pub use tcp::{TcpConfig, TcpTransport};

/// A connection that carries Modbus PDUs.
///
/// All methods take `&self`: a transport is shared by concurrent callers and
/// does its own locking. TCP lets requests overlap; serial transports queue
/// them behind a per-connection lock.
pub trait ModbusTransport: Send + Sync {
    /// Whether address 0 requests can be sent without awaiting a reply
    const SUPPORTS_BROADCAST: bool = false;

    /// Open the connection. Connecting an open transport is a no-op.
    fn connect(&self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Close the connection. Closing a closed transport is a no-op.
    fn disconnect(&self) -> impl Future<Output = ModbusResult<()>> + Send;

    fn is_connected(&self) -> bool;

    /// Send one request PDU and wait for the matching response PDU.
    ///
    /// Exception responses are returned as PDUs; interpreting them is the
    /// caller's job.
    fn send_and_receive(
        &self,
        slave_id: SlaveId,
        pdu: &ModbusPdu,
    ) -> impl Future<Output = ModbusResult<ModbusPdu>> + Send;

    /// Send a request to every device without waiting for a reply
    fn broadcast(&self, pdu: &ModbusPdu) -> impl Future<Output = ModbusResult<()>> + Send {
        let _ = pdu;
        async {
            Err(ModbusError::invalid_data(
                "broadcast is not supported on this transport",
            ))
        }
    }

    fn get_stats(&self) -> TransportStats;
}

/// Snapshot of transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Lock-free counters shared between a transport and its reader task
#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count a failed exchange, timeouts separately
    pub(crate) fn record_error(&self, error: &ModbusError) {
        if matches!(error, ModbusError::Timeout { .. }) {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        } else {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> TransportStats {
        TransportStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
