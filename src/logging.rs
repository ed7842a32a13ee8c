//! Injected logging sink
//!
//! Library internals emit `tracing` events. Applications that want packet
//! traces without installing a subscriber can hand a [`CallbackLogger`] to a
//! transport or client; it is disabled unless configured.

use std::fmt;
use std::sync::Arc;

use crate::protocol::{Request, Response, SlaveId};

/// Log levels for the callback sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// How requests and responses are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Hex dump of the PDU only
    Raw,
    /// Decoded fields only
    Interpreted,
    /// Decoded fields at info, hex dump at debug
    Both,
}

/// Callback invoked for every emitted line
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Cloneable logger that forwards to a user callback
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    pub fn with_mode(
        callback: Option<LogCallback>,
        min_level: LogLevel,
        mode: LoggingMode,
    ) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Timestamped output on stdout/stderr
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => {
                    eprintln!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
                LogLevel::Info | LogLevel::Debug => {
                    println!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// A logger that drops everything
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level <= self.min_level
    }

    /// Log a wire frame as a hex dump
    pub fn log_packet(&self, level: LogLevel, direction: &str, data: &[u8]) {
        if !self.should_log(level) {
            return;
        }
        let message = format!(
            "{} packet ({} bytes): {}",
            direction,
            data.len(),
            format_hex(data)
        );
        self.log(level, &message);
    }

    /// Log an outgoing request and its encoded PDU
    pub fn log_request(&self, slave_id: SlaveId, request: &Request, pdu: &[u8]) {
        self.log_exchange("Request ->", slave_id, request, pdu);
    }

    /// Log a decoded response and the PDU it came from
    pub fn log_response(&self, slave_id: SlaveId, response: &Response, pdu: &[u8]) {
        self.log_exchange("Response <-", slave_id, response, pdu);
    }

    fn log_exchange(
        &self,
        prefix: &str,
        slave_id: SlaveId,
        message: &dyn fmt::Display,
        pdu: &[u8],
    ) {
        if !self.is_enabled() {
            return;
        }
        match self.mode {
            LoggingMode::Raw => {
                self.info(&format!(
                    "Modbus {} Slave: {}, Raw: {}",
                    prefix,
                    slave_id,
                    format_hex(pdu)
                ));
            }
            LoggingMode::Interpreted => {
                self.info(&format!("Modbus {} Slave: {}, {}", prefix, slave_id, message));
            }
            LoggingMode::Both => {
                self.info(&format!("Modbus {} Slave: {}, {}", prefix, slave_id, message));
                self.debug(&format!("Modbus {} Raw: {}", prefix, format_hex(pdu)));
            }
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("enabled", &self.is_enabled())
            .field("min_level", &self.min_level)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Space separated uppercase hex, e.g. `01 03 00 00`
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
