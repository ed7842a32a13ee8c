//! Modbus TCP transport
//!
//! One socket, many requests in flight. The write half sits behind an async
//! mutex so frames never interleave; a background task owns the read half
//! and routes each response to its waiting caller by transaction id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS, MBAP_HEADER_LEN,
};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::tcp::{self as mbap, MbapHeader};
use crate::logging::{format_hex, CallbackLogger, LogLevel};
use crate::pdu::ModbusPdu;
use crate::protocol::SlaveId;
use crate::transport::{ModbusTransport, StatsCounter, TransportStats};

/// TCP connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// `host:port`, resolved on connect
    pub address: String,
    pub connect_timeout: Duration,
    /// Bound on one whole request/response exchange
    pub timeout: Duration,
}

impl TcpConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_TCP_PORT),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

type Reply = ModbusResult<(u8, ModbusPdu)>;
type PendingMap = Arc<Mutex<HashMap<u16, oneshot::Sender<Reply>>>>;
type Activity = Arc<Mutex<Option<Instant>>>;

fn touch(activity: &Activity) {
    if let Ok(mut last) = activity.lock() {
        *last = Some(Instant::now());
    }
}

struct Connection {
    writer: AsyncMutex<OwnedWriteHalf>,
    reader: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Removes a pending slot when its caller finishes or is cancelled
struct PendingSlot<'a> {
    pending: &'a PendingMap,
    transaction_id: u16,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.transaction_id);
        }
    }
}

/// Modbus TCP client transport with transaction-id pipelining
pub struct TcpTransport {
    config: TcpConfig,
    connection: Mutex<Option<Arc<Connection>>>,
    pending: PendingMap,
    next_transaction_id: AtomicU16,
    last_activity: Activity,
    stats: Arc<StatsCounter>,
    logger: CallbackLogger,
}

impl TcpTransport {
    /// Create a disconnected transport; call [`ModbusTransport::connect`]
    pub fn new(config: TcpConfig) -> Self {
        Self::with_logger(config, CallbackLogger::disabled())
    }

    pub fn with_logger(config: TcpConfig, logger: CallbackLogger) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_transaction_id: AtomicU16::new(1),
            last_activity: Arc::new(Mutex::new(None)),
            stats: Arc::new(StatsCounter::default()),
            logger,
        }
    }

    /// Create and connect in one step
    pub async fn connect_to(config: TcpConfig) -> ModbusResult<Self> {
        let transport = Self::new(config);
        transport.connect().await?;
        Ok(transport)
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// When a frame last went out or came in, `None` before the first one
    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity.lock().ok().and_then(|last| *last)
    }

    /// Number of requests waiting for a response
    pub fn in_flight(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Send with a caller-chosen transaction id instead of the internal counter
    pub async fn send_with_transaction_id(
        &self,
        transaction_id: u16,
        slave_id: SlaveId,
        pdu: &ModbusPdu,
    ) -> ModbusResult<ModbusPdu> {
        let result = self.exchange(transaction_id, slave_id, pdu).await;
        if let Err(ref e) = result {
            self.stats.record_error(e);
        }
        result
    }

    fn next_transaction_id(&self) -> u16 {
        loop {
            let id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn current(&self) -> ModbusResult<Arc<Connection>> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ModbusError::internal("Failed to lock TCP connection"))?;
        match connection.as_ref() {
            Some(c) if c.alive.load(Ordering::Acquire) => Ok(Arc::clone(c)),
            _ => Err(ModbusError::connection(format!(
                "not connected to {}",
                self.config.address
            ))),
        }
    }

    fn register(&self, transaction_id: u16) -> ModbusResult<oneshot::Receiver<Reply>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| ModbusError::internal("Failed to lock pending transactions"))?;
        if pending.contains_key(&transaction_id) {
            return Err(ModbusError::invalid_data(format!(
                "transaction id {} already in flight",
                transaction_id
            )));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(transaction_id, tx);
        Ok(rx)
    }

    async fn exchange(
        &self,
        transaction_id: u16,
        slave_id: SlaveId,
        pdu: &ModbusPdu,
    ) -> ModbusResult<ModbusPdu> {
        let connection = self.current()?;

        let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
        mbap::encode_frame(transaction_id, slave_id, pdu.as_slice(), &mut frame)?;

        let rx = self.register(transaction_id)?;
        let _slot = PendingSlot {
            pending: &self.pending,
            transaction_id,
        };

        let round_trip = async {
            {
                let mut writer = connection.writer.lock().await;
                writer
                    .write_all(&frame)
                    .await
                    .map_err(|e| ModbusError::connection(format!("TCP write failed: {}", e)))?;
            }
            self.stats.record_sent(frame.len());
            touch(&self.last_activity);
            debug!(transaction_id, "TX: {}", format_hex(&frame));
            self.logger.log_packet(LogLevel::Debug, "TX", &frame);

            rx.await
                .map_err(|_| ModbusError::connection("connection closed before response"))?
        };

        let (unit_id, response) = match timeout(self.config.timeout, round_trip).await {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(ModbusError::timeout(
                    format!("transaction {}", transaction_id),
                    self.config.timeout.as_millis() as u64,
                ))
            }
        };

        if unit_id != slave_id {
            return Err(ModbusError::invalid_response(format!(
                "unit id mismatch: sent {}, received {}",
                slave_id, unit_id
            )));
        }
        Ok(response)
    }
}

impl ModbusTransport for TcpTransport {
    async fn connect(&self) -> ModbusResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let address = tokio::net::lookup_host(self.config.address.as_str())
            .await
            .map_err(|e| {
                ModbusError::configuration(format!(
                    "Invalid address {}: {}",
                    self.config.address, e
                ))
            })?
            .next()
            .ok_or_else(|| {
                ModbusError::configuration(format!(
                    "Address {} did not resolve",
                    self.config.address
                ))
            })?;

        let connect_ms = self.config.connect_timeout.as_millis() as u64;
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ModbusError::connection(format!(
                    "Failed to connect to {}: {}",
                    address, e
                )))
            }
            Err(_) => {
                return Err(ModbusError::timeout(
                    format!("connect to {}", address),
                    connect_ms,
                ))
            }
        };
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&self.pending),
            Arc::clone(&alive),
            Arc::clone(&self.last_activity),
            Arc::clone(&self.stats),
            self.logger.clone(),
        ));

        let connection = Arc::new(Connection {
            writer: AsyncMutex::new(write_half),
            reader,
            alive,
        });
        *self
            .connection
            .lock()
            .map_err(|_| ModbusError::internal("Failed to lock TCP connection"))? =
            Some(connection);

        info!("Connected to Modbus TCP server {}", address);
        self.logger.info(&format!("Connected to {}", address));
        Ok(())
    }

    async fn disconnect(&self) -> ModbusResult<()> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ModbusError::internal("Failed to lock TCP connection"))?
            .take();

        if let Some(connection) = connection {
            connection.alive.store(false, Ordering::Release);
            connection.reader.abort();
            let _ = connection.writer.lock().await.shutdown().await;
            fail_all(&self.pending, ModbusError::connection("transport disconnected"));
            info!("Disconnected from {}", self.config.address);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        match self.connection.lock() {
            Ok(connection) => connection
                .as_ref()
                .map(|c| c.alive.load(Ordering::Acquire))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn send_and_receive(
        &self,
        slave_id: SlaveId,
        pdu: &ModbusPdu,
    ) -> ModbusResult<ModbusPdu> {
        let transaction_id = self.next_transaction_id();
        self.send_with_transaction_id(transaction_id, slave_id, pdu).await
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}

/// Fail every waiting request with `error`
fn fail_all(pending: &PendingMap, error: ModbusError) {
    let drained: Vec<_> = match pending.lock() {
        Ok(mut pending) => pending.drain().map(|(_, tx)| tx).collect(),
        Err(_) => return,
    };
    for tx in drained {
        let _ = tx.send(Err(error.clone()));
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> ModbusResult<(MbapHeader, ModbusPdu, Vec<u8>)> {
    let mut raw = vec![0u8; MBAP_HEADER_LEN];
    reader.read_exact(&mut raw).await.map_err(read_error)?;
    let header = MbapHeader::parse(&raw)?;
    header.validate()?;

    raw.resize(MBAP_HEADER_LEN + header.pdu_len(), 0);
    reader
        .read_exact(&mut raw[MBAP_HEADER_LEN..])
        .await
        .map_err(read_error)?;
    let pdu = ModbusPdu::from_slice(&raw[MBAP_HEADER_LEN..])?;
    Ok((header, pdu, raw))
}

fn read_error(e: std::io::Error) -> ModbusError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ModbusError::connection("connection closed by peer")
    } else {
        ModbusError::connection(format!("TCP read failed: {}", e))
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    last_activity: Activity,
    stats: Arc<StatsCounter>,
    logger: CallbackLogger,
) {
    let error = loop {
        let (header, pdu, raw) = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(e) => break e,
        };
        stats.record_received(raw.len());
        touch(&last_activity);
        debug!(transaction_id = header.transaction_id, "RX: {}", format_hex(&raw));
        logger.log_packet(LogLevel::Debug, "RX", &raw);

        let slot = pending
            .lock()
            .ok()
            .and_then(|mut p| p.remove(&header.transaction_id));
        match slot {
            Some(tx) => {
                let _ = tx.send(Ok((header.unit_id, pdu)));
            }
            None => {
                warn!(
                    "Response with unknown transaction id {}, failing pending requests",
                    header.transaction_id
                );
                fail_all(
                    &pending,
                    ModbusError::invalid_response(format!(
                        "unexpected transaction id {}",
                        header.transaction_id
                    )),
                );
            }
        }
    };

    alive.store(false, Ordering::Release);
    warn!("TCP reader stopped: {}", error);
    fail_all(&pending, error);
}
