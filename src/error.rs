//! # Modbus Error Handling
//!
//! Every fallible operation in the crate returns [`ModbusResult`]. The error
//! variants follow the layers a request passes through:
//!
//! ## Transport errors
//! - **Connection**: connect/accept failure, or the peer went away mid-session
//! - **Timeout**: no complete response inside the configured window
//!
//! ## Integrity errors
//! - **CrcMismatch**: RTU frame failed its CRC-16 check
//! - **LrcMismatch**: ASCII frame failed its LRC check
//!
//! ## Protocol errors
//! - **InvalidResponse**: frame is intact but semantically wrong (stale
//!   transaction id, foreign function code, bad byte count, malformed hex)
//! - **Exception**: the peer answered with a well-formed exception response
//!
//! ## Local errors
//! - **InvalidData**: request arguments rejected before any I/O
//! - **InvalidAddress**: data store range check failed
//! - **Configuration** / **Internal**
//!
//! Nothing in the crate retries. Callers that want resilience wrap calls in
//! their own retry loop and can use [`ModbusError::is_recoverable`] to decide:
//!
//! ```rust
//! use modbus_link::{ModbusError, ModbusResult};
//!
//! fn handle(result: ModbusResult<Vec<u16>>) {
//!     match result {
//!         Ok(values) => println!("read {:?}", values),
//!         Err(e) if e.is_recoverable() => println!("retry later: {}", e),
//!         Err(e) => println!("giving up: {}", e),
//!     }
//! }
//! ```

use thiserror::Error;

use crate::protocol::ExceptionCode;

/// Result type alias for Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Connection could not be established, or was lost during a request.
    ///
    /// # Examples
    /// - Connection refused by the remote host
    /// - Peer closed the socket while a response was pending
    /// - Request issued on a transport that is not connected
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No response inside the configured window.
    ///
    /// The connection state afterwards is undefined; callers should
    /// disconnect and reconnect before issuing further requests.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// RTU frame failed its CRC-16 check
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// ASCII frame failed its LRC check
    #[error("LRC validation failed: expected={expected:02X}, actual={actual:02X}")]
    LrcMismatch { expected: u8, actual: u8 },

    /// Frame passed its integrity check but does not answer the request.
    ///
    /// # Examples
    /// - Unexpected transaction id on a TCP connection
    /// - Function code that is neither the request's nor its exception form
    /// - Byte count field that disagrees with the payload
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// Well-formed exception response from the peer
    #[error("Modbus exception: function={function:02X}, code={code}")]
    Exception { function: u8, code: ExceptionCode },

    /// Request arguments rejected before any I/O happened
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Address range outside the data store
    #[error("Invalid address: start={start}, count={count}")]
    InvalidAddress { start: u16, count: u16 },

    /// Client, server or serial configuration problem
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Library internal errors (poisoned lock, task failure)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a CRC mismatch error
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create an LRC mismatch error
    pub fn lrc_mismatch(expected: u8, actual: u8) -> Self {
        Self::LrcMismatch { expected, actual }
    }

    /// Create an invalid response error
    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create a Modbus exception error for the given request function code
    pub fn exception(function: u8, code: ExceptionCode) -> Self {
        Self::Exception { function, code }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create an invalid address error
    pub fn invalid_address(start: u16, count: u16) -> Self {
        Self::InvalidAddress { start, count }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if the error condition might clear up on a later attempt.
    ///
    /// ```rust
    /// use modbus_link::{ExceptionCode, ModbusError};
    ///
    /// assert!(ModbusError::timeout("read", 1000).is_recoverable());
    /// assert!(ModbusError::exception(0x03, ExceptionCode::ServerDeviceBusy).is_recoverable());
    /// assert!(!ModbusError::exception(0x03, ExceptionCode::IllegalDataAddress).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::CrcMismatch { .. } | Self::LrcMismatch { .. } => true,
            Self::Exception { code, .. } => matches!(
                code,
                ExceptionCode::Acknowledge | ExceptionCode::ServerDeviceBusy
            ),
            _ => false,
        }
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Check if a frame arrived but failed its checksum
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, Self::CrcMismatch { .. } | Self::LrcMismatch { .. })
    }

    /// Check if the error is a Modbus protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidResponse { .. } | Self::Exception { .. }
        ) || self.is_integrity_error()
    }

    /// The exception code carried by an exception response, if any
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            Self::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// I/O failures on a socket or serial line surface as connection errors.
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = ModbusError::timeout("read_registers", 5000);
        assert!(err.is_recoverable());
        assert!(err.is_transport_error());
        assert!(!err.is_protocol_error());

        let err = ModbusError::exception(0x03, ExceptionCode::IllegalDataAddress);
        assert!(!err.is_recoverable());
        assert!(err.is_protocol_error());
        assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalDataAddress));

        let err = ModbusError::lrc_mismatch(0x10, 0x20);
        assert!(err.is_integrity_error());
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_error_display() {
        let msg = ModbusError::crc_mismatch(0x1234, 0x5678).to_string();
        assert!(msg.contains("CRC validation failed"));
        assert!(msg.contains("1234"));
        assert!(msg.contains("5678"));

        let msg = ModbusError::exception(0x03, ExceptionCode::IllegalDataAddress).to_string();
        assert!(msg.contains("Illegal Data Address"));
    }

    #[test]
    fn test_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: ModbusError = io.into();
        assert!(matches!(err, ModbusError::Connection { .. }));
    }
}
