//! Blocking client
//!
//! Each call runs the async path to completion on a private current-thread
//! runtime. Do not call these methods from inside another Tokio runtime.

use tokio::runtime::{Builder, Runtime};

use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{Request, Response, SlaveId};
use crate::transport::{ModbusTransport, TcpConfig, TcpTransport, TransportStats};

#[cfg(feature = "rtu")]
use crate::transport::{AsciiTransport, RtuTransport, SerialConfig};

use super::{AsyncModbusClient, ModbusClient};

/// Blocking client over any transport; one request at a time
pub struct SyncModbusClient<T> {
    // dropped before the runtime that owns its I/O resources
    inner: AsyncModbusClient<T>,
    runtime: Runtime,
}

impl<T: ModbusTransport> SyncModbusClient<T> {
    /// Wrap `transport`; call [`connect`](Self::connect) unless it is already open
    pub fn new(transport: T) -> ModbusResult<Self> {
        Self::from_client(AsyncModbusClient::new(transport))
    }

    pub fn with_logger(transport: T, logger: CallbackLogger) -> ModbusResult<Self> {
        Self::from_client(AsyncModbusClient::with_logger(transport, logger))
    }

    fn from_client(inner: AsyncModbusClient<T>) -> ModbusResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ModbusError::internal(format!("Failed to create runtime: {}", e)))?;
        Ok(Self { inner, runtime })
    }

    pub fn connect(&mut self) -> ModbusResult<()> {
        self.runtime.block_on(self.inner.connect())
    }

    pub fn disconnect(&mut self) -> ModbusResult<()> {
        self.runtime.block_on(self.inner.disconnect())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn request(&mut self, slave_id: SlaveId, request: Request) -> ModbusResult<Response> {
        self.runtime.block_on(self.inner.request(slave_id, request))
    }

    pub fn read_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.runtime.block_on(self.inner.read_coils(slave_id, address, quantity))
    }

    pub fn read_discrete_inputs(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.runtime.block_on(self.inner.read_discrete_inputs(slave_id, address, quantity))
    }

    pub fn read_holding_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.runtime.block_on(self.inner.read_holding_registers(slave_id, address, quantity))
    }

    pub fn read_input_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.runtime.block_on(self.inner.read_input_registers(slave_id, address, quantity))
    }

    pub fn write_single_coil(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> ModbusResult<()> {
        self.runtime.block_on(self.inner.write_single_coil(slave_id, address, value))
    }

    pub fn write_single_register(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> ModbusResult<()> {
        self.runtime.block_on(self.inner.write_single_register(slave_id, address, value))
    }

    pub fn write_multiple_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<()> {
        self.runtime.block_on(self.inner.write_multiple_coils(slave_id, address, values))
    }

    pub fn write_multiple_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        self.runtime.block_on(self.inner.write_multiple_registers(slave_id, address, values))
    }

    pub fn stats(&self) -> TransportStats {
        self.inner.get_stats()
    }
}

impl SyncModbusClient<TcpTransport> {
    /// Connect to a Modbus TCP server
    pub fn tcp(config: TcpConfig) -> ModbusResult<Self> {
        let mut client = Self::new(TcpTransport::new(config))?;
        client.connect()?;
        Ok(client)
    }
}

#[cfg(feature = "rtu")]
impl SyncModbusClient<RtuTransport<tokio_serial::SerialStream>> {
    /// Open a serial port for Modbus RTU
    pub fn rtu(config: SerialConfig) -> ModbusResult<Self> {
        let mut client = Self::new(RtuTransport::new(config))?;
        client.connect()?;
        Ok(client)
    }
}

#[cfg(feature = "rtu")]
impl SyncModbusClient<AsciiTransport<tokio_serial::SerialStream>> {
    /// Open a serial port for Modbus ASCII
    pub fn ascii(config: SerialConfig) -> ModbusResult<Self> {
        let mut client = Self::new(AsciiTransport::new(config))?;
        client.connect()?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_while_disconnected() {
        let mut client = SyncModbusClient::new(TcpTransport::new(TcpConfig::default())).unwrap();
        assert!(!client.is_connected());

        let err = client.read_holding_registers(1, 0, 1).unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
        assert_eq!(client.stats().requests_sent, 0);
    }

    #[test]
    fn test_connect_refused() {
        // bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = TcpConfig::new(format!("127.0.0.1:{}", port))
            .with_connect_timeout(Duration::from_millis(500));

        let err = SyncModbusClient::tcp(config).err().unwrap();
        assert!(err.is_transport_error());
    }

    #[test]
    fn test_validation_before_io() {
        let mut client = SyncModbusClient::new(TcpTransport::new(TcpConfig::default())).unwrap();
        let err = client.write_multiple_registers(1, 0, &[0; 124]).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
    }
}
