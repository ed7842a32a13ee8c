//! Shared machinery for the serial-line transports
//!
//! RTU and ASCII differ only in how a frame is delimited and checked, so the
//! transport is written once over a [`SerialFramer`]. The byte stream is any
//! [`SerialLink`]: a real port with the `rtu` feature, or an in-memory pipe.
//!
//! Serial lines are half duplex. One `tokio::sync::Mutex` per connection
//! serializes whole request/response exchanges; it is released when the
//! holding future completes or is dropped.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::constants::{
    BITS_PER_CHAR, BROADCAST_ADDRESS, DEFAULT_SERIAL_TIMEOUT_MS, RTU_FIXED_FRAME_GAP_US,
    RTU_FIXED_TIMING_BAUD,
};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::{format_hex, CallbackLogger, LogLevel};
use crate::pdu::ModbusPdu;
use crate::protocol::SlaveId;
use crate::transport::{ModbusTransport, StatsCounter, TransportStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

#[cfg(feature = "rtu")]
impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

#[cfg(feature = "rtu")]
impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

#[cfg(feature = "rtu")]
impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Serial port settings and line timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Bound on one whole request/response exchange
    pub timeout: Duration,
    /// Silence that ends a frame; derived from the baud rate when `None`
    pub inter_char_timeout: Option<Duration>,
    /// Quiet time enforced between frames; derived from the baud rate when `None`
    pub frame_gap: Option<Duration>,
}

impl SerialConfig {
    /// RTU defaults: 8 data bits, no parity, one stop bit
    pub fn rtu(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_millis(DEFAULT_SERIAL_TIMEOUT_MS),
            inter_char_timeout: None,
            frame_gap: None,
        }
    }

    /// ASCII defaults: 7 data bits, even parity, one stop bit, 1 s between characters
    pub fn ascii(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: DataBits::Seven,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            timeout: Duration::from_millis(DEFAULT_SERIAL_TIMEOUT_MS),
            inter_char_timeout: Some(Duration::from_secs(1)),
            frame_gap: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_inter_char_timeout(mut self, inter_char_timeout: Duration) -> Self {
        self.inter_char_timeout = Some(inter_char_timeout);
        self
    }

    pub fn with_frame_gap(mut self, frame_gap: Duration) -> Self {
        self.frame_gap = Some(frame_gap);
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration("baud rate must be non-zero"));
        }
        if self.timeout.is_zero() {
            return Err(ModbusError::configuration("timeout must be non-zero"));
        }
        Ok(())
    }

    /// Time to transmit one character (11 bits)
    pub fn char_time(&self) -> Duration {
        Duration::from_nanos(BITS_PER_CHAR * 1_000_000_000 / self.baud_rate.max(1) as u64)
    }

    /// 3.5 character times, or a fixed 1.75 ms above 19200 baud
    fn t3_5(&self) -> Duration {
        if self.baud_rate > RTU_FIXED_TIMING_BAUD {
            Duration::from_micros(RTU_FIXED_FRAME_GAP_US)
        } else {
            self.char_time() * 7 / 2
        }
    }

    pub fn effective_frame_gap(&self) -> Duration {
        self.frame_gap.unwrap_or_else(|| self.t3_5())
    }

    pub fn effective_inter_char_timeout(&self) -> Duration {
        self.inter_char_timeout.unwrap_or_else(|| self.t3_5())
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::rtu("/dev/ttyUSB0", 9600)
    }
}

/// A byte stream that can stand in for a serial port
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send + Sized + 'static {
    /// Open the port described by `config`
    fn open(config: &SerialConfig) -> ModbusResult<Self>;
}

#[cfg(feature = "rtu")]
impl SerialLink for tokio_serial::SerialStream {
    fn open(config: &SerialConfig) -> ModbusResult<Self> {
        config.validate()?;
        let builder = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .timeout(config.timeout);
        tokio_serial::SerialStream::open(&builder).map_err(|e| {
            ModbusError::connection(format!("Failed to open serial port {}: {}", config.port, e))
        })
    }
}

impl SerialLink for tokio::io::DuplexStream {
    fn open(config: &SerialConfig) -> ModbusResult<Self> {
        Err(ModbusError::configuration(format!(
            "in-memory link {} cannot be opened, attach it instead",
            config.port
        )))
    }
}

#[cfg(test)]
impl SerialLink for tokio_test::io::Mock {
    fn open(config: &SerialConfig) -> ModbusResult<Self> {
        Err(ModbusError::configuration(format!(
            "mock link {} cannot be opened",
            config.port
        )))
    }
}

/// Which side of the exchange a frame comes from; RTU lengths depend on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Delimiting and integrity rules of one serial framing
pub trait SerialFramer: Send + Sync + 'static {
    const PROTOCOL: &'static str;

    fn encode(address: u8, pdu: &[u8], dst: &mut BytesMut) -> ModbusResult<()>;

    /// Check integrity of a complete frame and split off the address
    fn decode(frame: &[u8]) -> ModbusResult<(u8, ModbusPdu)>;

    /// Read one complete frame. The first byte may take arbitrarily long;
    /// after that, `inter_char_timeout` of silence ends or aborts the frame.
    fn read_frame<R: AsyncRead + Unpin + Send>(
        reader: &mut R,
        inter_char_timeout: Duration,
        direction: Direction,
    ) -> impl Future<Output = ModbusResult<Vec<u8>>> + Send;
}

struct LinkState<S> {
    stream: Option<S>,
    last_activity: Option<Instant>,
    /// Set while an exchange is in progress; still set if it was abandoned
    dirty: bool,
}

/// Serial transport over link `S` with framing `F`
pub struct SerialTransport<S, F> {
    config: SerialConfig,
    link: AsyncMutex<LinkState<S>>,
    connected: AtomicBool,
    stats: StatsCounter,
    logger: CallbackLogger,
    _framer: PhantomData<fn() -> F>,
}

impl<S: SerialLink, F: SerialFramer> SerialTransport<S, F> {
    /// Create a closed transport; [`ModbusTransport::connect`] opens the port
    pub fn new(config: SerialConfig) -> Self {
        Self::build(None, config, CallbackLogger::disabled())
    }

    pub fn with_logger(config: SerialConfig, logger: CallbackLogger) -> Self {
        Self::build(None, config, logger)
    }

    /// Wrap an already open link
    pub fn attach(stream: S, config: SerialConfig) -> Self {
        Self::build(Some(stream), config, CallbackLogger::disabled())
    }

    /// Open the port and return a connected transport
    pub fn open(config: SerialConfig) -> ModbusResult<Self> {
        config.validate()?;
        let stream = S::open(&config)?;
        Ok(Self::attach(stream, config))
    }

    fn build(stream: Option<S>, config: SerialConfig, logger: CallbackLogger) -> Self {
        let connected = stream.is_some();
        Self {
            config,
            link: AsyncMutex::new(LinkState {
                stream,
                last_activity: None,
                dirty: false,
            }),
            connected: AtomicBool::new(connected),
            stats: StatsCounter::default(),
            logger,
            _framer: PhantomData,
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    async fn exchange(
        &self,
        slave_id: SlaveId,
        pdu: &ModbusPdu,
        expect_reply: bool,
    ) -> ModbusResult<Option<ModbusPdu>> {
        let mut frame = BytesMut::new();
        F::encode(slave_id, pdu.as_slice(), &mut frame)?;

        let locked = async {
            let mut link = self.link.lock().await;
            let state = &mut *link;
            let stream = state.stream.as_mut().ok_or_else(|| {
                ModbusError::connection(format!(
                    "{} port {} is not open",
                    F::PROTOCOL,
                    self.config.port
                ))
            })?;

            if let Some(last) = state.last_activity {
                sleep_until(last + self.config.effective_frame_gap()).await;
            }
            if state.dirty {
                discard_input(stream).await;
            }

            state.dirty = true;
            let result = self.round_trip(stream, &frame, slave_id, expect_reply).await;
            state.last_activity = Some(Instant::now());
            state.dirty = result.is_err();
            if let Err(ModbusError::Connection { ref message }) = result {
                warn!("{} link {} lost: {}", F::PROTOCOL, self.config.port, message);
                state.stream = None;
                self.connected.store(false, Ordering::Release);
            }
            result
        };

        let result = match timeout(self.config.timeout, locked).await {
            Ok(result) => result,
            Err(_) => Err(ModbusError::timeout(
                format!("{} request to slave {}", F::PROTOCOL, slave_id),
                self.config.timeout.as_millis() as u64,
            )),
        };
        if let Err(ref e) = result {
            self.stats.record_error(e);
        }
        result
    }

    async fn round_trip(
        &self,
        stream: &mut S,
        frame: &[u8],
        slave_id: SlaveId,
        expect_reply: bool,
    ) -> ModbusResult<Option<ModbusPdu>> {
        stream.write_all(frame).await?;
        stream.flush().await?;
        self.stats.record_sent(frame.len());
        debug!("{} TX: {}", F::PROTOCOL, format_hex(frame));
        self.logger.log_packet(LogLevel::Debug, "TX", frame);

        if !expect_reply {
            return Ok(None);
        }

        let raw = F::read_frame(
            stream,
            self.config.effective_inter_char_timeout(),
            Direction::Response,
        )
        .await?;
        self.stats.record_received(raw.len());
        debug!("{} RX: {}", F::PROTOCOL, format_hex(&raw));
        self.logger.log_packet(LogLevel::Debug, "RX", &raw);

        let (address, response) = F::decode(&raw)?;
        if address != slave_id {
            return Err(ModbusError::invalid_response(format!(
                "slave address mismatch: sent {}, received {}",
                slave_id, address
            )));
        }
        Ok(Some(response))
    }
}

/// Drop bytes left over from an abandoned exchange
async fn discard_input<S: AsyncRead + Unpin>(stream: &mut S) {
    let mut scratch = [0u8; 64];
    let mut discarded = 0usize;
    while let Ok(Ok(n)) = timeout(Duration::ZERO, stream.read(&mut scratch)).await {
        if n == 0 {
            break;
        }
        discarded += n;
    }
    if discarded > 0 {
        warn!("Discarded {} stale bytes from serial link", discarded);
    }
}

impl<S: SerialLink, F: SerialFramer> ModbusTransport for SerialTransport<S, F> {
    const SUPPORTS_BROADCAST: bool = true;

    async fn connect(&self) -> ModbusResult<()> {
        let mut link = self.link.lock().await;
        if link.stream.is_none() {
            self.config.validate()?;
            link.stream = Some(S::open(&self.config)?);
            link.last_activity = None;
            link.dirty = false;
            info!("Opened {} port {}", F::PROTOCOL, self.config.port);
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> ModbusResult<()> {
        let mut link = self.link.lock().await;
        if let Some(mut stream) = link.stream.take() {
            let _ = stream.shutdown().await;
            info!("Closed {} port {}", F::PROTOCOL, self.config.port);
        }
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send_and_receive(
        &self,
        slave_id: SlaveId,
        pdu: &ModbusPdu,
    ) -> ModbusResult<ModbusPdu> {
        self.exchange(slave_id, pdu, true)
            .await?
            .ok_or_else(|| ModbusError::internal("exchange completed without a response"))
    }

    async fn broadcast(&self, pdu: &ModbusPdu) -> ModbusResult<()> {
        self.exchange(BROADCAST_ADDRESS, pdu, false)
            .await
            .map(|_| ())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}
