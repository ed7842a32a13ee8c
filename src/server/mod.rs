//! Modbus slave/server emulator
//!
//! [`process_request`] is the whole application layer: request PDU in,
//! response or exception PDU out, against a shared [`DataStore`]. The TCP and
//! serial servers only differ in how they find frames on the wire.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::codec::{decode_request, encode_exception, encode_response};
use crate::data_store::DataStore;
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;
use crate::protocol::{ExceptionCode, Request, Response};

pub mod serial;
pub mod tcp;

pub use serial::{ModbusAsciiServer, ModbusRtuServer, SerialServer, SerialServerConfig};
pub use tcp::{ModbusTcpServer, TcpServerConfig};

/// Execute one request PDU against `store` and build the reply PDU.
///
/// Malformed requests map to IllegalFunction or IllegalDataValue, ranges
/// outside the store to IllegalDataAddress, anything else to
/// ServerDeviceFailure. Never fails.
pub fn process_request(store: &DataStore, pdu: &[u8]) -> ModbusPdu {
    let function_code = pdu.first().copied().unwrap_or(0);

    let request = match decode_request(pdu) {
        Ok(request) => request,
        Err(code) => {
            debug!("Rejecting request 0x{:02X}: {}", function_code, code);
            return encode_exception(function_code, code);
        }
    };

    let response = match execute(store, &request) {
        Ok(response) => response,
        Err(ModbusError::InvalidAddress { start, count }) => {
            debug!("Address range {}+{} outside data store", start, count);
            return encode_exception(function_code, ExceptionCode::IllegalDataAddress);
        }
        Err(e) => {
            debug!("Request {} failed: {}", request, e);
            return encode_exception(function_code, ExceptionCode::ServerDeviceFailure);
        }
    };

    encode_response(&response)
        .unwrap_or_else(|_| encode_exception(function_code, ExceptionCode::ServerDeviceFailure))
}

fn execute(store: &DataStore, request: &Request) -> ModbusResult<Response> {
    let response = match request {
        Request::ReadCoils { address, quantity } => {
            Response::ReadCoils(store.read_coils(*address, *quantity)?)
        }
        Request::ReadDiscreteInputs { address, quantity } => {
            Response::ReadDiscreteInputs(store.read_discrete_inputs(*address, *quantity)?)
        }
        Request::ReadHoldingRegisters { address, quantity } => {
            Response::ReadHoldingRegisters(store.read_holding_registers(*address, *quantity)?)
        }
        Request::ReadInputRegisters { address, quantity } => {
            Response::ReadInputRegisters(store.read_input_registers(*address, *quantity)?)
        }
        Request::WriteSingleCoil { address, value } => {
            store.write_coils(*address, &[*value])?;
            Response::WriteSingleCoil {
                address: *address,
                value: *value,
            }
        }
        Request::WriteSingleRegister { address, value } => {
            store.write_holding_registers(*address, &[*value])?;
            Response::WriteSingleRegister {
                address: *address,
                value: *value,
            }
        }
        Request::WriteMultipleCoils { address, values } => {
            store.write_coils(*address, values)?;
            Response::WriteMultipleCoils {
                address: *address,
                quantity: request.quantity(),
            }
        }
        Request::WriteMultipleRegisters { address, values } => {
            store.write_holding_registers(*address, values)?;
            Response::WriteMultipleRegisters {
                address: *address,
                quantity: request.quantity(),
            }
        }
    };
    Ok(response)
}

/// Snapshot of server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections: u64,
    pub requests: u64,
    pub exceptions: u64,
    /// Frames ignored for a bad checksum, a foreign address or bad framing
    pub dropped_frames: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// State shared between a server, its handle and its connection tasks
#[derive(Debug, Default)]
pub(crate) struct ServerState {
    connections: AtomicU64,
    requests: AtomicU64,
    exceptions: AtomicU64,
    dropped_frames: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    active: AtomicUsize,
    stopping: AtomicBool,
}

impl ServerState {
    pub(crate) fn record_request(&self, bytes: usize) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_reply(&self, response: &ModbusPdu, bytes: usize) {
        if response.is_exception() {
            self.exceptions.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, bytes: usize) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Count a new connection and hold its slot until the guard drops
    pub(crate) fn open_connection(self: &Arc<Self>) -> ActiveConnection {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveConnection(Arc::clone(self))
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> ServerStats {
        ServerStats {
            connections: self.connections.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct ActiveConnection(Arc<ServerState>);

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Shutdown signal shared by a server and its handle
#[derive(Debug, Clone)]
pub(crate) struct Shutdown {
    state: Arc<ServerState>,
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub(crate) fn new(state: Arc<ServerState>) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { state, tx }
    }

    /// Subscribe before checking [`ServerState::is_stopping`] so no signal is missed
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub(crate) fn trigger(&self) {
        self.state.stopping.store(true, Ordering::Release);
        let _ = self.tx.send(());
    }
}

/// Handle to a server running on a background task
pub struct ServerHandle {
    local_addr: Option<SocketAddr>,
    state: Arc<ServerState>,
    store: Arc<DataStore>,
    shutdown: Shutdown,
    task: JoinHandle<ModbusResult<()>>,
}

impl ServerHandle {
    pub(crate) fn new(
        local_addr: Option<SocketAddr>,
        state: Arc<ServerState>,
        store: Arc<DataStore>,
        shutdown: Shutdown,
        task: JoinHandle<ModbusResult<()>>,
    ) -> Self {
        Self {
            local_addr,
            state,
            store,
            shutdown,
            task,
        }
    }

    /// Listening address, for network servers
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn connected_clients(&self) -> usize {
        self.state.active()
    }

    pub fn stats(&self) -> ServerStats {
        self.state.snapshot()
    }

    pub fn data_store(&self) -> &Arc<DataStore> {
        &self.store
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the server task to finish
    pub async fn shutdown(self) -> ModbusResult<()> {
        self.shutdown.trigger();
        let result = self
            .task
            .await
            .map_err(|e| ModbusError::internal(format!("server task failed: {}", e)))?;
        info!("Modbus server stopped");
        result
    }
}
