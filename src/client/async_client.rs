use tracing::debug;

use crate::codec::{decode_response, encode_request};
use crate::constants::{BROADCAST_ADDRESS, MAX_SLAVE_ID};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::pdu::ModbusPdu;
use crate::protocol::{Request, Response, SlaveId};
use crate::transport::{ModbusTransport, TcpConfig, TcpTransport, TransportStats};

use super::ModbusClient;

/// Client over any transport.
///
/// The application layer (validation, PDU encoding, response checks) is the
/// same for every transport; only the envelope differs.
#[derive(Debug)]
pub struct AsyncModbusClient<T> {
    transport: T,
    logger: Option<CallbackLogger>,
}

impl<T: ModbusTransport> AsyncModbusClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            logger: None,
        }
    }

    /// Create a client that reports decoded requests and responses to `logger`
    pub fn with_logger(transport: T, logger: CallbackLogger) -> Self {
        Self {
            transport,
            logger: Some(logger),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn send_broadcast(&self, request: &Request, pdu: &ModbusPdu) -> ModbusResult<Response> {
        let echo = Response::write_echo(request).ok_or_else(|| {
            ModbusError::invalid_data(format!(
                "{} cannot be broadcast, only writes can",
                request.function()
            ))
        })?;
        self.transport.broadcast(pdu).await?;
        debug!("Broadcast {}", request);
        Ok(echo)
    }
}

impl AsyncModbusClient<TcpTransport> {
    /// Connect to a Modbus TCP server
    pub async fn tcp(config: TcpConfig) -> ModbusResult<Self> {
        Ok(Self::new(TcpTransport::connect_to(config).await?))
    }
}

impl<T: ModbusTransport> ModbusClient for AsyncModbusClient<T> {
    async fn request(&self, slave_id: SlaveId, request: Request) -> ModbusResult<Response> {
        let pdu = encode_request(&request)?;
        if let Some(ref logger) = self.logger {
            logger.log_request(slave_id, &request, pdu.as_slice());
        }

        if T::SUPPORTS_BROADCAST {
            if slave_id == BROADCAST_ADDRESS {
                return self.send_broadcast(&request, &pdu).await;
            }
            if slave_id > MAX_SLAVE_ID {
                return Err(ModbusError::invalid_data(format!(
                    "serial slave address {} outside 1..={}",
                    slave_id, MAX_SLAVE_ID
                )));
            }
        }

        let reply = self.transport.send_and_receive(slave_id, &pdu).await?;
        let response = decode_response(&request, reply.as_slice());

        if let Some(ref logger) = self.logger {
            match &response {
                Ok(response) => logger.log_response(slave_id, response, reply.as_slice()),
                Err(e) => {
                    logger.warn(&format!("Modbus request to slave {} failed: {}", slave_id, e))
                }
            }
        }
        response
    }

    async fn connect(&self) -> ModbusResult<()> {
        self.transport.connect().await
    }

    async fn disconnect(&self) -> ModbusResult<()> {
        self.transport.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio_test::io::Builder;

    use crate::logging::LogLevel;
    use crate::protocol::ExceptionCode;
    use crate::transport::{RtuTransport, SerialConfig};

    fn config() -> SerialConfig {
        SerialConfig::rtu("mock", 115_200).with_timeout(Duration::from_millis(500))
    }

    fn client(mock: tokio_test::io::Mock) -> AsyncModbusClient<RtuTransport<tokio_test::io::Mock>> {
        AsyncModbusClient::new(RtuTransport::attach(mock, config()))
    }

    #[tokio::test]
    async fn test_read_holding_registers() {
        let mock = Builder::new()
            .write(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B])
            .read(&[0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B, 0x9A, 0x9B])
            .build();
        let client = client(mock);

        let values = client.read_holding_registers(1, 0, 2).await.unwrap();
        assert_eq!(values, vec![10, 11]);
    }

    #[tokio::test]
    async fn test_exception_response() {
        // 01 83 02 + CRC
        let mock = Builder::new()
            .write(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B])
            .read(&[0x01, 0x83, 0x02, 0xC0, 0xF1])
            .build();
        let client = client(mock);

        let err = client.read_holding_registers(1, 0, 2).await.unwrap_err();
        assert_eq!(
            err,
            ModbusError::Exception {
                function: 0x03,
                code: ExceptionCode::IllegalDataAddress
            }
        );
        assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalDataAddress));
    }

    #[tokio::test]
    async fn test_invalid_quantity_rejected_before_io() {
        let client = client(Builder::new().build());

        let err = client.read_holding_registers(1, 0, 126).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        let err = client.write_multiple_coils(1, 0, &[]).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        assert_eq!(client.get_stats().requests_sent, 0);
    }

    #[tokio::test]
    async fn test_serial_address_above_247_rejected_before_io() {
        let client = client(Builder::new().build());

        let err = client.read_holding_registers(250, 0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        let err = client.write_single_coil(248, 0, true).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        assert_eq!(client.get_stats().requests_sent, 0);
    }

    #[tokio::test]
    async fn test_broadcast_write() {
        let mut frame = bytes::BytesMut::new();
        crate::frame::rtu::encode_frame(0x00, &[0x06, 0x00, 0x01, 0x00, 0x03], &mut frame).unwrap();
        let client = client(Builder::new().write(&frame).build());

        client.write_single_register(0, 1, 3).await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_read_rejected() {
        let client = client(Builder::new().build());

        let err = client.read_coils(0, 0, 8).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
    }

    #[tokio::test]
    async fn test_logger_sees_request_and_response() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let logger = CallbackLogger::new(
            Some(Box::new(move |_level: LogLevel, message: &str| {
                sink.lock().unwrap().push(message.to_string());
            })),
            LogLevel::Info,
        );
        let mock = Builder::new()
            .write(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B])
            .read(&[0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B, 0x9A, 0x9B])
            .build();
        let client = AsyncModbusClient::with_logger(RtuTransport::attach(mock, config()), logger);

        client.read_holding_registers(1, 0, 2).await.unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Modbus Request -> Slave: 1"));
        assert!(lines[1].starts_with("Modbus Response <- Slave: 1"));
    }
}
