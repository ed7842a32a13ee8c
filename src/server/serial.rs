//! RTU and ASCII slave
//!
//! A serial slave owns the line. It reads request frames, stays silent on
//! anything it cannot trust or that is addressed elsewhere, executes
//! broadcasts without answering and replies to everything else after the
//! inter-frame gap.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::constants::{BROADCAST_ADDRESS, MAX_SLAVE_ID};
use crate::data_store::DataStore;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::format_hex;
use crate::protocol::{ModbusFunction, SlaveId};
use crate::server::{process_request, ServerHandle, ServerState, ServerStats, Shutdown};
use crate::transport::serial::Direction;
use crate::transport::{Ascii, Rtu, SerialConfig, SerialFramer, SerialLink};

/// Serial slave settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialServerConfig {
    /// Address this slave answers to
    pub slave_id: SlaveId,
    pub serial: SerialConfig,
}

impl SerialServerConfig {
    pub fn new(slave_id: SlaveId, serial: SerialConfig) -> Self {
        Self { slave_id, serial }
    }

    /// A slave needs an individual address in 1..=247
    pub fn validate(&self) -> ModbusResult<()> {
        if self.slave_id == BROADCAST_ADDRESS || self.slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::configuration(format!(
                "slave address {} outside 1..={}",
                self.slave_id, MAX_SLAVE_ID
            )));
        }
        Ok(())
    }
}

/// Serial slave over link `S` with framing `F`
pub struct SerialServer<S, F> {
    stream: S,
    config: SerialServerConfig,
    store: Arc<DataStore>,
    state: Arc<ServerState>,
    shutdown: Shutdown,
    _framer: PhantomData<fn() -> F>,
}

pub type ModbusRtuServer<S> = SerialServer<S, Rtu>;
pub type ModbusAsciiServer<S> = SerialServer<S, Ascii>;

impl<S: SerialLink, F: SerialFramer> SerialServer<S, F> {
    /// Serve on an already open link
    pub fn attach(
        stream: S,
        config: SerialServerConfig,
        store: Arc<DataStore>,
    ) -> ModbusResult<Self> {
        config.validate()?;
        let state = Arc::new(ServerState::default());
        let shutdown = Shutdown::new(Arc::clone(&state));
        Ok(Self {
            stream,
            config,
            store,
            state,
            shutdown,
            _framer: PhantomData,
        })
    }

    /// Open the configured port
    pub fn open(config: SerialServerConfig, store: Arc<DataStore>) -> ModbusResult<Self> {
        config.validate()?;
        config.serial.validate()?;
        let stream = S::open(&config.serial)?;
        Self::attach(stream, config, store)
    }

    pub fn stats(&self) -> ServerStats {
        self.state.snapshot()
    }

    pub fn data_store(&self) -> &Arc<DataStore> {
        &self.store
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Answer requests until shutdown or until the link closes
    pub async fn serve(&mut self) -> ModbusResult<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let _active = self.state.open_connection();
        let inter_char = self.config.serial.effective_inter_char_timeout();
        info!(
            "Modbus {} slave {} serving on {}",
            F::PROTOCOL,
            self.config.slave_id,
            self.config.serial.port
        );

        while !self.state.is_stopping() {
            let read = tokio::select! {
                _ = shutdown_rx.recv() => break,
                read = F::read_frame(&mut self.stream, inter_char, Direction::Request) => read,
            };

            let raw = match read {
                Ok(raw) => raw,
                Err(ModbusError::Connection { message }) => {
                    info!("{} link {} closed: {}", F::PROTOCOL, self.config.serial.port, message);
                    break;
                }
                Err(e) => {
                    debug!("Dropping unreadable {} frame: {}", F::PROTOCOL, e);
                    self.state.record_dropped(0);
                    continue;
                }
            };
            debug!("{} RX: {}", F::PROTOCOL, format_hex(&raw));

            let (address, pdu) = match F::decode(&raw) {
                Ok(decoded) => decoded,
                Err(e) => {
                    debug!("Dropping {} frame: {}", F::PROTOCOL, e);
                    self.state.record_dropped(raw.len());
                    continue;
                }
            };

            if address == BROADCAST_ADDRESS {
                self.state.record_request(raw.len());
                let is_write = pdu
                    .function_code()
                    .and_then(ModbusFunction::from_u8)
                    .is_some_and(ModbusFunction::is_write_function);
                if is_write {
                    let _ = process_request(&self.store, pdu.as_slice());
                } else {
                    debug!("Ignoring broadcast of non-write function");
                }
                continue;
            }
            if address != self.config.slave_id {
                debug!("Ignoring frame for slave {}", address);
                self.state.record_dropped(raw.len());
                continue;
            }
            self.state.record_request(raw.len());

            let response = process_request(&self.store, pdu.as_slice());
            let mut reply = BytesMut::new();
            if let Err(e) = F::encode(address, response.as_slice(), &mut reply) {
                warn!("Failed to encode {} reply: {}", F::PROTOCOL, e);
                continue;
            }

            sleep(self.config.serial.effective_frame_gap()).await;
            debug!("{} TX: {}", F::PROTOCOL, format_hex(&reply));
            if let Err(e) = self.write_reply(&reply).await {
                info!("{} link {} closed: {}", F::PROTOCOL, self.config.serial.port, e);
                break;
            }
            self.state.record_reply(&response, reply.len());
        }

        info!("Modbus {} slave {} stopped", F::PROTOCOL, self.config.slave_id);
        Ok(())
    }

    async fn write_reply(&mut self, reply: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(reply).await?;
        self.stream.flush().await
    }

    /// Run [`serve`](Self::serve) on a background task
    pub fn spawn(mut self) -> ServerHandle {
        let state = Arc::clone(&self.state);
        let store = Arc::clone(&self.store);
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move { self.serve().await });
        ServerHandle::new(None, state, store, shutdown, task)
    }
}
