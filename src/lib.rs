//! # modbus_link - Modbus master/slave stack
//!
//! Async Modbus over TCP, RTU and ASCII, with a blocking client wrapper and a
//! slave emulator backed by an in-memory data store.
//!
//! ## Layers
//!
//! - [`checksum`]: CRC-16/MODBUS and LRC
//! - [`pdu`] / [`codec`]: PDU bytes to and from typed [`Request`] / [`Response`]
//! - [`frame`]: MBAP, RTU and ASCII envelopes
//! - [`transport`]: connections that move PDUs ([`TcpTransport`], [`RtuTransport`],
//!   [`AsciiTransport`])
//! - [`client`]: [`AsyncModbusClient`] and the blocking [`SyncModbusClient`]
//! - [`server`]: [`ModbusTcpServer`], [`ModbusRtuServer`], [`ModbusAsciiServer`] over a
//!   [`DataStore`]
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client | Server |
//! |------|----------|--------|--------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modbus_link::{
//!     AsyncModbusClient, DataStore, ModbusClient, ModbusResult, ModbusTcpServer, TcpConfig,
//!     TcpServerConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let store = Arc::new(DataStore::new());
//!     let server = ModbusTcpServer::bind(TcpServerConfig::new("127.0.0.1:0"), store).await?;
//!     let address = server.local_addr().to_string();
//!     let handle = server.spawn();
//!
//!     let client = AsyncModbusClient::tcp(TcpConfig::new(address)).await?;
//!     client.write_single_register(1, 100, 0x1234).await?;
//!     let values = client.read_holding_registers(1, 100, 1).await?;
//!     assert_eq!(values, vec![0x1234]);
//!
//!     client.disconnect().await?;
//!     handle.shutdown().await
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants
pub mod constants;

/// CRC-16 and LRC checksums
pub mod checksum;

/// PDU buffer and builder
pub mod pdu;

/// Function codes, exception codes, typed requests and responses
pub mod protocol;

/// PDU encoding and decoding for both sides of the link
pub mod codec;

/// MBAP, RTU and ASCII envelopes
pub mod frame;

/// Injected logging sink
pub mod logging;

// ============================================================================
// Master and slave
// ============================================================================

/// Connections that carry PDUs
pub mod transport;

/// Modbus client implementations
pub mod client;

/// Server-side register and coil tables
pub mod data_store;

/// Slave emulator
pub mod server;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use modbus_link::tokio) ===
pub use tokio;

// === Client API ===
pub use client::{AsyncModbusClient, ModbusClient, SyncModbusClient};

// === Server API ===
pub use data_store::DataStore;
pub use server::{
    process_request, ModbusAsciiServer, ModbusRtuServer, ModbusTcpServer, SerialServer,
    SerialServerConfig, ServerHandle, ServerStats, TcpServerConfig,
};

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use protocol::{ExceptionCode, ModbusFunction, Request, Response, SlaveId};

// === Transports ===
pub use transport::{
    AsciiTransport, DataBits, ModbusTransport, Parity, RtuTransport, SerialConfig, SerialLink,
    StopBits, TcpConfig, TcpTransport, TransportStats,
};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

// === PDU (advanced usage) ===
pub use pdu::{ModbusPdu, PduBuilder};

pub use constants::{DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("modbus_link v{} - Modbus TCP/RTU/ASCII master and slave", VERSION)
}
