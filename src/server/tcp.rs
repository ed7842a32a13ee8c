//! Modbus TCP server
//!
//! One task accepts connections; each connection gets its own task running
//! read frame, process, write reply until the peer leaves, the frame is
//! unusable, the idle timeout fires or the server shuts down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_TCP_PORT, MBAP_HEADER_LEN};
use crate::data_store::DataStore;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::tcp::{self as mbap, MbapHeader};
use crate::logging::format_hex;
use crate::protocol::SlaveId;
use crate::server::{process_request, ServerHandle, ServerState, ServerStats, Shutdown};

/// TCP server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpServerConfig {
    pub bind_address: String,
    /// Unit id to answer; `None` answers every unit id
    pub slave_id: Option<SlaveId>,
    pub max_connections: usize,
    /// Close connections that send nothing for this long
    pub idle_timeout: Option<Duration>,
}

impl TcpServerConfig {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            ..Default::default()
        }
    }

    pub fn with_slave_id(mut self, slave_id: Option<SlaveId>) -> Self {
        self.slave_id = slave_id;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_TCP_PORT),
            slave_id: Some(1),
            max_connections: 32,
            idle_timeout: None,
        }
    }
}

/// Modbus TCP slave serving a [`DataStore`]
pub struct ModbusTcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: TcpServerConfig,
    store: Arc<DataStore>,
    state: Arc<ServerState>,
    shutdown: Shutdown,
}

impl ModbusTcpServer {
    /// Bind the listening socket; use port 0 for an ephemeral port
    pub async fn bind(config: TcpServerConfig, store: Arc<DataStore>) -> ModbusResult<Self> {
        let listener = TcpListener::bind(config.bind_address.as_str())
            .await
            .map_err(|e| {
                ModbusError::connection(format!("Failed to bind to {}: {}", config.bind_address, e))
            })?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(ServerState::default());
        let shutdown = Shutdown::new(Arc::clone(&state));

        info!("Modbus TCP server bound to {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            config,
            store,
            state,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
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

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called
    pub async fn serve(&self) -> ModbusResult<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        info!(
            "Modbus TCP server listening on {} (max {} connections)",
            self.local_addr, self.config.max_connections
        );

        while !self.state.is_stopping() {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    if self.state.active() >= self.config.max_connections {
                        warn!(
                            "Rejecting {}: {} connections already open",
                            peer, self.config.max_connections
                        );
                        drop(stream);
                        continue;
                    }

                    let session = Session {
                        peer,
                        store: Arc::clone(&self.store),
                        state: Arc::clone(&self.state),
                        slave_id: self.config.slave_id,
                        idle_timeout: self.config.idle_timeout,
                    };
                    let active = self.state.open_connection();
                    let shutdown_rx = self.shutdown.subscribe();
                    tokio::spawn(async move {
                        let _active = active;
                        session.run(stream, shutdown_rx).await;
                    });
                }
            }
        }

        info!("Modbus TCP server on {} stopped accepting", self.local_addr);
        Ok(())
    }

    /// Run [`serve`](Self::serve) on a background task
    pub fn spawn(self) -> ServerHandle {
        let local_addr = Some(self.local_addr);
        let state = Arc::clone(&self.state);
        let store = Arc::clone(&self.store);
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move { self.serve().await });
        ServerHandle::new(local_addr, state, store, shutdown, task)
    }
}

struct Session {
    peer: SocketAddr,
    store: Arc<DataStore>,
    state: Arc<ServerState>,
    slave_id: Option<SlaveId>,
    idle_timeout: Option<Duration>,
}

impl Session {
    async fn run(self, mut stream: TcpStream, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Client {} connected", self.peer);
        let _ = stream.set_nodelay(true);

        loop {
            if self.state.is_stopping() {
                break;
            }
            let frame = tokio::select! {
                _ = shutdown_rx.recv() => break,
                frame = self.next_frame(&mut stream) => frame,
            };
            let (header, pdu) = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!("Closing {}: {}", self.peer, e);
                    break;
                }
            };

            let received = MBAP_HEADER_LEN + pdu.len();
            if let Some(slave_id) = self.slave_id {
                if header.unit_id != slave_id {
                    debug!("Dropping request for unit {} from {}", header.unit_id, self.peer);
                    self.state.record_dropped(received);
                    continue;
                }
            }
            self.state.record_request(received);

            let response = process_request(&self.store, &pdu);
            let mut reply = BytesMut::with_capacity(MBAP_HEADER_LEN + response.len());
            if let Err(e) = mbap::encode_frame(
                header.transaction_id,
                header.unit_id,
                response.as_slice(),
                &mut reply,
            ) {
                warn!("Failed to encode reply for {}: {}", self.peer, e);
                continue;
            }

            debug!("TX to {}: {}", self.peer, format_hex(&reply));
            if let Err(e) = stream.write_all(&reply).await {
                warn!("Failed to send reply to {}: {}", self.peer, e);
                break;
            }
            self.state.record_reply(&response, reply.len());
        }

        debug!("Client {} disconnected", self.peer);
    }

    /// Next request frame, or `None` when the peer closed or went idle
    async fn next_frame(
        &self,
        stream: &mut TcpStream,
    ) -> ModbusResult<Option<(MbapHeader, Vec<u8>)>> {
        match self.idle_timeout {
            Some(limit) => match timeout(limit, read_request(stream)).await {
                Ok(frame) => frame,
                Err(_) => {
                    debug!("Client {} idle for {:?}", self.peer, limit);
                    Ok(None)
                }
            },
            None => read_request(stream).await,
        }
    }
}

async fn read_request(stream: &mut TcpStream) -> ModbusResult<Option<(MbapHeader, Vec<u8>)>> {
    let mut raw = [0u8; MBAP_HEADER_LEN];
    match stream.read_exact(&mut raw).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header = MbapHeader::parse(&raw)?;
    header.validate()?;

    let mut pdu = vec![0u8; header.pdu_len()];
    stream.read_exact(&mut pdu).await?;
    debug!("RX: {} {}", format_hex(&raw), format_hex(&pdu));
    Ok(Some((header, pdu)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start(config: TcpServerConfig) -> (ServerHandle, TcpStream) {
        let store = Arc::new(DataStore::with_sizes(100, 100, 100, 100));
        let server = ModbusTcpServer::bind(config, store).await.unwrap();
        let handle = server.spawn();
        let stream = TcpStream::connect(handle.local_addr().unwrap()).await.unwrap();
        (handle, stream)
    }

    async fn exchange(stream: &mut TcpStream, frame: &[u8], reply_len: usize) -> Vec<u8> {
        stream.write_all(frame).await.unwrap();
        let mut reply = vec![0u8; reply_len];
        stream.read_exact(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_read_holding_registers() {
        let (handle, mut stream) = start(TcpServerConfig::new("127.0.0.1:0")).await;
        handle.data_store().write_holding_registers(0, &[1000, 2000]).unwrap();

        let reply = exchange(
            &mut stream,
            &[0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02],
            13,
        )
        .await;
        assert_eq!(
            reply,
            vec![0x00, 0x07, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x03, 0xE8, 0x07, 0xD0]
        );

        let stats = handle.stats();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.connections, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_range_exception() {
        let (handle, mut stream) = start(TcpServerConfig::new("127.0.0.1:0")).await;

        let reply = exchange(
            &mut stream,
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x63, 0x00, 0x02],
            9,
        )
        .await;
        assert_eq!(reply, vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);
        assert_eq!(handle.stats().exceptions, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_unit_id_is_dropped() {
        let (handle, mut stream) = start(TcpServerConfig::new("127.0.0.1:0")).await;

        // unit 9 gets no answer; the following unit 1 request does
        stream
            .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x09, 0x03, 0x00, 0x00, 0x00, 0x01])
            .await
            .unwrap();
        let reply = exchange(
            &mut stream,
            &[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01],
            11,
        )
        .await;
        assert_eq!(&reply[..2], &[0x00, 0x02]);
        assert_eq!(handle.stats().dropped_frames, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_protocol_id_closes_connection() {
        let (handle, mut stream) = start(TcpServerConfig::new("127.0.0.1:0")).await;

        // header only, so the server closes with nothing left unread
        stream
            .write_all(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01])
            .await
            .unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_max_connections() {
        let config = TcpServerConfig::new("127.0.0.1:0").with_max_connections(1);
        let (handle, mut first) = start(config).await;

        // make sure the first connection is registered
        exchange(
            &mut first,
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01],
            10,
        )
        .await;
        assert_eq!(handle.connected_clients(), 1);

        let mut second = TcpStream::connect(handle.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(second.read(&mut buf).await.unwrap(), 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let config =
            TcpServerConfig::new("127.0.0.1:0").with_idle_timeout(Duration::from_millis(100));
        let (handle, mut stream) = start(config).await;

        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(2), stream.read(&mut buf)).await;
        assert_eq!(read.unwrap().unwrap(), 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_any_unit_id() {
        let config = TcpServerConfig::new("127.0.0.1:0").with_slave_id(None);
        let (handle, mut stream) = start(config).await;

        let reply = exchange(
            &mut stream,
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x2A, 0x06, 0x00, 0x05, 0x12, 0x34],
            12,
        )
        .await;
        assert_eq!(reply[6], 0x2A);
        assert_eq!(handle.data_store().read_holding_registers(5, 1).unwrap(), vec![0x1234]);
        handle.shutdown().await.unwrap();
    }
}
