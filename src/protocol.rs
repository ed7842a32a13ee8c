//! Modbus protocol definitions
//!
//! Function codes, exception codes, and the tagged request/response types
//! that the codec turns into PDUs. Every supported operation is one variant,
//! so building or dispatching a request is an exhaustive `match`.

use std::fmt;

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};

/// Modbus slave/unit identifier (1-247, 0 = broadcast on serial lines)
pub type SlaveId = u8;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = FC_READ_COILS,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = FC_READ_DISCRETE_INPUTS,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = FC_READ_HOLDING_REGISTERS,
    /// Read Input Registers (0x04)
    ReadInputRegisters = FC_READ_INPUT_REGISTERS,
    /// Write Single Coil (0x05)
    WriteSingleCoil = FC_WRITE_SINGLE_COIL,
    /// Write Single Register (0x06)
    WriteSingleRegister = FC_WRITE_SINGLE_REGISTER,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = FC_WRITE_MULTIPLE_COILS,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = FC_WRITE_MULTIPLE_REGISTERS,
}

impl ModbusFunction {
    /// Convert from u8, `None` for unsupported codes
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            FC_READ_COILS => Some(Self::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Some(Self::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Some(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Some(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Some(Self::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Some(Self::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Some(Self::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a write function
    pub fn is_write_function(self) -> bool {
        matches!(
            self,
            Self::WriteSingleCoil
                | Self::WriteSingleRegister
                | Self::WriteMultipleCoils
                | Self::WriteMultipleRegisters
        )
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = EXCEPTION_ILLEGAL_FUNCTION,
    IllegalDataAddress = EXCEPTION_ILLEGAL_DATA_ADDRESS,
    IllegalDataValue = EXCEPTION_ILLEGAL_DATA_VALUE,
    ServerDeviceFailure = EXCEPTION_SERVER_DEVICE_FAILURE,
    Acknowledge = EXCEPTION_ACKNOWLEDGE,
    ServerDeviceBusy = EXCEPTION_SERVER_DEVICE_BUSY,
    MemoryParityError = EXCEPTION_MEMORY_PARITY_ERROR,
    GatewayPathUnavailable = EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
    GatewayTargetFailed = EXCEPTION_GATEWAY_TARGET_FAILED,
}

impl ExceptionCode {
    /// Convert from u8, `None` for codes outside the standard set
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            EXCEPTION_ILLEGAL_FUNCTION => Some(Self::IllegalFunction),
            EXCEPTION_ILLEGAL_DATA_ADDRESS => Some(Self::IllegalDataAddress),
            EXCEPTION_ILLEGAL_DATA_VALUE => Some(Self::IllegalDataValue),
            EXCEPTION_SERVER_DEVICE_FAILURE => Some(Self::ServerDeviceFailure),
            EXCEPTION_ACKNOWLEDGE => Some(Self::Acknowledge),
            EXCEPTION_SERVER_DEVICE_BUSY => Some(Self::ServerDeviceBusy),
            EXCEPTION_MEMORY_PARITY_ERROR => Some(Self::MemoryParityError),
            EXCEPTION_GATEWAY_PATH_UNAVAILABLE => Some(Self::GatewayPathUnavailable),
            EXCEPTION_GATEWAY_TARGET_FAILED => Some(Self::GatewayTargetFailed),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal Function",
            Self::IllegalDataAddress => "Illegal Data Address",
            Self::IllegalDataValue => "Illegal Data Value",
            Self::ServerDeviceFailure => "Slave Device Failure",
            Self::Acknowledge => "Acknowledge",
            Self::ServerDeviceBusy => "Slave Device Busy",
            Self::MemoryParityError => "Memory Parity Error",
            Self::GatewayPathUnavailable => "Gateway Path Unavailable",
            Self::GatewayTargetFailed => "Gateway Target Device Failed to Respond",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} ({})", *self as u8, self.description())
    }
}

/// A Modbus request, one variant per supported function code.
///
/// | Variant | Code | Quantity |
/// |---------|------|----------|
/// | `ReadCoils` | 0x01 | 1-2000 |
/// | `ReadDiscreteInputs` | 0x02 | 1-2000 |
/// | `ReadHoldingRegisters` | 0x03 | 1-125 |
/// | `ReadInputRegisters` | 0x04 | 1-125 |
/// | `WriteSingleCoil` | 0x05 | 1 |
/// | `WriteSingleRegister` | 0x06 | 1 |
/// | `WriteMultipleCoils` | 0x0F | 1-1968 |
/// | `WriteMultipleRegisters` | 0x10 | 1-123 |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl Request {
    /// Function code of this request
    pub fn function(&self) -> ModbusFunction {
        match self {
            Self::ReadCoils { .. } => ModbusFunction::ReadCoils,
            Self::ReadDiscreteInputs { .. } => ModbusFunction::ReadDiscreteInputs,
            Self::ReadHoldingRegisters { .. } => ModbusFunction::ReadHoldingRegisters,
            Self::ReadInputRegisters { .. } => ModbusFunction::ReadInputRegisters,
            Self::WriteSingleCoil { .. } => ModbusFunction::WriteSingleCoil,
            Self::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
            Self::WriteMultipleCoils { .. } => ModbusFunction::WriteMultipleCoils,
            Self::WriteMultipleRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
        }
    }

    /// Starting address
    pub fn address(&self) -> u16 {
        match self {
            Self::ReadCoils { address, .. }
            | Self::ReadDiscreteInputs { address, .. }
            | Self::ReadHoldingRegisters { address, .. }
            | Self::ReadInputRegisters { address, .. }
            | Self::WriteSingleCoil { address, .. }
            | Self::WriteSingleRegister { address, .. }
            | Self::WriteMultipleCoils { address, .. }
            | Self::WriteMultipleRegisters { address, .. } => *address,
        }
    }

    /// Number of coils or registers addressed.
    ///
    /// Saturates at `u16::MAX` for oversized write vectors; `validate`
    /// rejects those anyway.
    pub fn quantity(&self) -> u16 {
        match self {
            Self::ReadCoils { quantity, .. }
            | Self::ReadDiscreteInputs { quantity, .. }
            | Self::ReadHoldingRegisters { quantity, .. }
            | Self::ReadInputRegisters { quantity, .. } => *quantity,
            Self::WriteSingleCoil { .. } | Self::WriteSingleRegister { .. } => 1,
            Self::WriteMultipleCoils { values, .. } => {
                u16::try_from(values.len()).unwrap_or(u16::MAX)
            }
            Self::WriteMultipleRegisters { values, .. } => {
                u16::try_from(values.len()).unwrap_or(u16::MAX)
            }
        }
    }

    /// Check if this request modifies the device
    pub fn is_write(&self) -> bool {
        self.function().is_write_function()
    }

    /// Check quantity limits and address overflow before any I/O.
    pub fn validate(&self) -> ModbusResult<()> {
        let (quantity, max) = match self {
            Self::ReadCoils { quantity, .. } | Self::ReadDiscreteInputs { quantity, .. } => {
                (*quantity as usize, MAX_READ_COILS)
            }
            Self::ReadHoldingRegisters { quantity, .. }
            | Self::ReadInputRegisters { quantity, .. } => (*quantity as usize, MAX_READ_REGISTERS),
            Self::WriteSingleCoil { .. } | Self::WriteSingleRegister { .. } => return Ok(()),
            Self::WriteMultipleCoils { values, .. } => (values.len(), MAX_WRITE_COILS),
            Self::WriteMultipleRegisters { values, .. } => (values.len(), MAX_WRITE_REGISTERS),
        };

        if quantity == 0 || quantity > max {
            return Err(ModbusError::invalid_data(format!(
                "{}: quantity {} outside 1..={}",
                self.function().name(),
                quantity,
                max
            )));
        }

        if self.address() as usize + quantity > DEFAULT_TABLE_SIZE {
            return Err(ModbusError::invalid_data(format!(
                "{}: address {} + quantity {} exceeds 65535",
                self.function().name(),
                self.address(),
                quantity
            )));
        }

        Ok(())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteSingleCoil { address, value } => {
                write!(f, "{} address={} value={}", self.function(), address, value)
            }
            Self::WriteSingleRegister { address, value } => {
                write!(f, "{} address={} value={}", self.function(), address, value)
            }
            _ => write!(
                f,
                "{} address={} quantity={}",
                self.function(),
                self.address(),
                self.quantity()
            ),
        }
    }
}

/// A decoded Modbus response.
///
/// Write responses carry the echo the device sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
}

impl Response {
    /// Function code of this response
    pub fn function(&self) -> ModbusFunction {
        match self {
            Self::ReadCoils(_) => ModbusFunction::ReadCoils,
            Self::ReadDiscreteInputs(_) => ModbusFunction::ReadDiscreteInputs,
            Self::ReadHoldingRegisters(_) => ModbusFunction::ReadHoldingRegisters,
            Self::ReadInputRegisters(_) => ModbusFunction::ReadInputRegisters,
            Self::WriteSingleCoil { .. } => ModbusFunction::WriteSingleCoil,
            Self::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
            Self::WriteMultipleCoils { .. } => ModbusFunction::WriteMultipleCoils,
            Self::WriteMultipleRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
        }
    }

    /// The response a device sends back for a successful write.
    ///
    /// Returns `None` for read requests, whose response carries data.
    pub fn write_echo(request: &Request) -> Option<Self> {
        match request {
            Request::WriteSingleCoil { address, value } => Some(Self::WriteSingleCoil {
                address: *address,
                value: *value,
            }),
            Request::WriteSingleRegister { address, value } => Some(Self::WriteSingleRegister {
                address: *address,
                value: *value,
            }),
            Request::WriteMultipleCoils { address, .. } => Some(Self::WriteMultipleCoils {
                address: *address,
                quantity: request.quantity(),
            }),
            Request::WriteMultipleRegisters { address, .. } => {
                Some(Self::WriteMultipleRegisters {
                    address: *address,
                    quantity: request.quantity(),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadCoils(bits) | Self::ReadDiscreteInputs(bits) => {
                write!(f, "{} {} bits {:?}", self.function(), bits.len(), bits)
            }
            Self::ReadHoldingRegisters(regs) | Self::ReadInputRegisters(regs) => {
                write!(f, "{} {} registers {:?}", self.function(), regs.len(), regs)
            }
            Self::WriteSingleCoil { address, value } => {
                write!(f, "{} address={} value={}", self.function(), address, value)
            }
            Self::WriteSingleRegister { address, value } => {
                write!(f, "{} address={} value={}", self.function(), address, value)
            }
            Self::WriteMultipleCoils { address, quantity }
            | Self::WriteMultipleRegisters { address, quantity } => write!(
                f,
                "{} address={} quantity={}",
                self.function(),
                address,
                quantity
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_conversion() {
        for code in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0F, 0x10] {
            let function = ModbusFunction::from_u8(code).unwrap();
            assert_eq!(function.to_u8(), code);
        }
        assert_eq!(ModbusFunction::from_u8(0x17), None);
        assert_eq!(ModbusFunction::from_u8(0x83), None);
    }

    #[test]
    fn test_exception_code_conversion() {
        for code in [1u8, 2, 3, 4, 5, 6, 8, 10, 11] {
            assert_eq!(ExceptionCode::from_u8(code).unwrap().to_u8(), code);
        }
        assert_eq!(ExceptionCode::from_u8(0x07), None);
        assert_eq!(ExceptionCode::from_u8(0x09), None);
        assert_eq!(
            ExceptionCode::from_u8(2),
            Some(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn test_validate_quantity_limits() {
        assert!(Request::ReadCoils { address: 0, quantity: 2000 }.validate().is_ok());
        assert!(Request::ReadCoils { address: 0, quantity: 2001 }.validate().is_err());
        assert!(Request::ReadHoldingRegisters { address: 0, quantity: 0 }.validate().is_err());
        assert!(Request::ReadHoldingRegisters { address: 0, quantity: 125 }.validate().is_ok());
        assert!(Request::ReadInputRegisters { address: 0, quantity: 126 }.validate().is_err());

        let coils = Request::WriteMultipleCoils { address: 0, values: vec![true; 1969] };
        assert!(matches!(coils.validate(), Err(ModbusError::InvalidData { .. })));

        let regs = Request::WriteMultipleRegisters { address: 0, values: vec![0; 123] };
        assert!(regs.validate().is_ok());
        let regs = Request::WriteMultipleRegisters { address: 0, values: vec![] };
        assert!(regs.validate().is_err());
    }

    #[test]
    fn test_validate_address_overflow() {
        let last = Request::ReadHoldingRegisters { address: 65535, quantity: 1 };
        assert!(last.validate().is_ok());

        let past_end = Request::ReadHoldingRegisters { address: 65535, quantity: 2 };
        assert!(past_end.validate().is_err());
    }

    #[test]
    fn test_write_echo() {
        let request = Request::WriteMultipleRegisters { address: 10, values: vec![1, 2, 3] };
        assert_eq!(
            Response::write_echo(&request),
            Some(Response::WriteMultipleRegisters { address: 10, quantity: 3 })
        );
        let read = Request::ReadCoils { address: 0, quantity: 1 };
        assert_eq!(Response::write_echo(&read), None);
    }
}
