//! Modbus master side
//!
//! [`ModbusClient`] is the application-level interface. It is implemented by
//! [`AsyncModbusClient`], which runs over any [`ModbusTransport`]; the
//! blocking [`SyncModbusClient`] drives the same code on its own runtime.
//!
//! | Code | Method |
//! |------|--------|
//! | 0x01 | `read_coils()` |
//! | 0x02 | `read_discrete_inputs()` |
//! | 0x03 | `read_holding_registers()` |
//! | 0x04 | `read_input_registers()` |
//! | 0x05 | `write_single_coil()` |
//! | 0x06 | `write_single_register()` |
//! | 0x0F | `write_multiple_coils()` |
//! | 0x10 | `write_multiple_registers()` |
//!
//! ```rust,no_run
//! use modbus_link::{AsyncModbusClient, ModbusClient, ModbusResult, TcpConfig};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let client = AsyncModbusClient::tcp(TcpConfig::new("127.0.0.1:502")).await?;
//!
//!     let registers = client.read_holding_registers(1, 0, 10).await?;
//!     println!("Registers: {:?}", registers);
//!
//!     client.write_single_register(1, 100, 0x1234).await?;
//!     client.disconnect().await
//! }
//! ```

use std::future::Future;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{Request, Response, SlaveId};
use crate::transport::{ModbusTransport, TransportStats};

pub mod async_client;
pub mod sync_client;

pub use async_client::AsyncModbusClient;
pub use sync_client::SyncModbusClient;

/// Interface for Modbus client operations.
///
/// Methods take `&self`, so one client can be shared between tasks. Whether
/// requests overlap on the wire is up to the transport.
///
/// Exception responses surface as [`ModbusError::Exception`]; no method
/// retries.
pub trait ModbusClient: Send + Sync {
    /// Send one request and return the decoded response
    fn request(
        &self,
        slave_id: SlaveId,
        request: Request,
    ) -> impl Future<Output = ModbusResult<Response>> + Send;

    fn connect(&self) -> impl Future<Output = ModbusResult<()>> + Send;

    fn disconnect(&self) -> impl Future<Output = ModbusResult<()>> + Send;

    fn is_connected(&self) -> bool;

    fn get_stats(&self) -> TransportStats;

    /// Read coils (function code 0x01), 1-2000 per request
    fn read_coils(
        &self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        async move {
            match self
                .request(slave_id, Request::ReadCoils { address, quantity })
                .await?
            {
                Response::ReadCoils(bits) => Ok(bits),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Read discrete inputs (function code 0x02), 1-2000 per request
    fn read_discrete_inputs(
        &self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        async move {
            match self
                .request(slave_id, Request::ReadDiscreteInputs { address, quantity })
                .await?
            {
                Response::ReadDiscreteInputs(bits) => Ok(bits),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Read holding registers (function code 0x03), 1-125 per request
    fn read_holding_registers(
        &self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        async move {
            match self
                .request(slave_id, Request::ReadHoldingRegisters { address, quantity })
                .await?
            {
                Response::ReadHoldingRegisters(values) => Ok(values),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Read input registers (function code 0x04), 1-125 per request
    fn read_input_registers(
        &self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        async move {
            match self
                .request(slave_id, Request::ReadInputRegisters { address, quantity })
                .await?
            {
                Response::ReadInputRegisters(values) => Ok(values),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Write single coil (function code 0x05)
    fn write_single_coil(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        async move {
            self.request(slave_id, Request::WriteSingleCoil { address, value })
                .await
                .map(|_| ())
        }
    }

    /// Write single register (function code 0x06)
    fn write_single_register(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        async move {
            self.request(slave_id, Request::WriteSingleRegister { address, value })
                .await
                .map(|_| ())
        }
    }

    /// Write multiple coils (function code 0x0F), 1-1968 per request
    fn write_multiple_coils(
        &self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        let request = Request::WriteMultipleCoils {
            address,
            values: values.to_vec(),
        };
        async move { self.request(slave_id, request).await.map(|_| ()) }
    }

    /// Write multiple registers (function code 0x10), 1-123 per request
    fn write_multiple_registers(
        &self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        let request = Request::WriteMultipleRegisters {
            address,
            values: values.to_vec(),
        };
        async move { self.request(slave_id, request).await.map(|_| ()) }
    }
}

fn unexpected(response: Response) -> ModbusError {
    ModbusError::invalid_response(format!("unexpected response {}", response))
}
