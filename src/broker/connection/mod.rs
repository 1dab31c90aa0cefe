//! Per-connection handler
//!
//! Drives one client from CONNECT to disconnect as an explicit state
//! machine: `Connecting` (only CONNECT is legal) then `Connected` (packet
//! loop). The loop multiplexes three events: bytes from the socket,
//! deliveries queued by other connections' fan-outs, and the keep-alive
//! deadline.

mod connect;
mod disconnect;
mod publish;
mod qos;
mod subscribe;

pub(crate) use publish::{route_publish, store_retained};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::auth::UserStore;
use crate::broker::client::{Client, ClientKey, Outbound};
use crate::broker::registry::ClientRegistry;
use crate::broker::BrokerConfig;
use crate::buffer_pool;
use crate::codec::{Decoder, Encoder};
use crate::metrics::Metrics;
use crate::protocol::{Packet, ProtocolError, PubAck, PubComp, PubRec, PubRel};
use crate::topic::TopicTree;

/// Connection error types
#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    Protocol(ProtocolError),
    Decode(crate::protocol::DecodeError),
    Timeout,
    Shutdown,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "IO error: {}", e),
            ConnectionError::Protocol(e) => write!(f, "Protocol error: {}", e),
            ConnectionError::Decode(e) => write!(f, "Decode error: {}", e),
            ConnectionError::Timeout => write!(f, "Connection timeout"),
            ConnectionError::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<crate::protocol::DecodeError> for ConnectionError {
    fn from(e: crate::protocol::DecodeError) -> Self {
        ConnectionError::Decode(e)
    }
}

impl From<crate::protocol::EncodeError> for ConnectionError {
    fn from(e: crate::protocol::EncodeError) -> Self {
        ConnectionError::Protocol(e.into())
    }
}

/// Connection state machine
pub(crate) enum State {
    /// Waiting for the CONNECT packet
    Connecting,
    /// Handshake accepted, packet loop running
    Connected { client: Arc<Client> },
}

/// Connection handler, generic over the stream type so TCP and TLS share
/// one code path
pub struct Connection<S> {
    pub(crate) stream: S,
    pub(crate) addr: SocketAddr,
    pub(crate) state: State,
    pub(crate) decoder: Decoder,
    pub(crate) encoder: Encoder,
    pub(crate) read_buf: BytesMut,
    pub(crate) write_buf: BytesMut,
    /// Receiver half of the client's outbound channel, claimed at CONNECT
    pub(crate) outbound_rx: Option<mpsc::Receiver<Outbound>>,
    pub(crate) topics: Arc<TopicTree<ClientKey>>,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) users: Arc<UserStore>,
    pub(crate) config: BrokerConfig,
    pub(crate) metrics: Arc<Metrics>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        topics: Arc<TopicTree<ClientKey>>,
        registry: Arc<ClientRegistry>,
        users: Arc<UserStore>,
        config: BrokerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            stream,
            addr,
            state: State::Connecting,
            decoder: Decoder::new().with_max_packet_size(config.max_packet_size),
            encoder: Encoder::new(),
            read_buf: buffer_pool::get_buffer(),
            write_buf: buffer_pool::get_buffer(),
            outbound_rx: None,
            topics,
            registry,
            users,
            config,
            metrics,
        }
    }

    /// Run the connection to completion
    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        // The peer gets a bounded window to send CONNECT
        let result = match timeout(self.config.connect_timeout, self.read_connect()).await {
            Ok(Ok(())) => self.run_connected().await,
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!("Connect timeout from {}", self.addr);
                Err(ConnectionError::Timeout)
            }
        };
        self.return_buffers();
        result
    }

    /// Main packet loop after a successful CONNECT
    async fn run_connected(&mut self) -> Result<(), ConnectionError> {
        let client = match &self.state {
            State::Connected { client } => client.clone(),
            State::Connecting => {
                return Err(ConnectionError::Protocol(ProtocolError::ProtocolViolation(
                    "not connected",
                )))
            }
        };

        let mut outbound_rx = self.outbound_rx.take().ok_or(ConnectionError::Protocol(
            ProtocolError::ProtocolViolation("outbound channel missing"),
        ))?;

        // Read deadline is 1.5x the keep alive interval; 0 disables it
        // (a far-future deadline, kept small enough not to overflow Instant)
        let keep_alive = if client.keep_alive() > 0 {
            Duration::from_millis(client.keep_alive() as u64 * 1500)
        } else {
            Duration::from_secs(86_400 * 365)
        };
        let mut deadline = tokio::time::Instant::now() + keep_alive;

        loop {
            tokio::select! {
                result = self.stream.read_buf(&mut self.read_buf) => {
                    match result {
                        Ok(0) => {
                            // Peer vanished without DISCONNECT: abnormal
                            debug!("Connection closed by {}", self.addr);
                            self.handle_disconnect(&client, true).await;
                            return Ok(());
                        }
                        Ok(_) => {
                            // Refreshed on every inbound packet [MQTT-3.1.2-23]
                            deadline = tokio::time::Instant::now() + keep_alive;

                            loop {
                                let decoded = match self.decoder.decode(&self.read_buf) {
                                    Ok(Some(decoded)) => decoded,
                                    Ok(None) => break,
                                    Err(e) => {
                                        // Framing corruption: close without
                                        // any acknowledgment
                                        warn!("Decode error from {}: {}", client.id(), e);
                                        self.handle_disconnect(&client, true).await;
                                        return Err(e.into());
                                    }
                                };

                                let (packet, consumed) = decoded;
                                self.read_buf.advance(consumed);
                                self.metrics.packet_received(consumed);

                                if let Err(e) = self.handle_packet(&client, packet).await {
                                    match &e {
                                        ConnectionError::Shutdown => {
                                            // Graceful DISCONNECT, cleanup done
                                            return Err(e);
                                        }
                                        _ => {
                                            debug!("Error handling packet from {}: {}", client.id(), e);
                                            self.handle_disconnect(&client, true).await;
                                            return Err(e);
                                        }
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            debug!("Read error from {}: {}", client.id(), e);
                            self.handle_disconnect(&client, true).await;
                            return Err(e.into());
                        }
                    }
                }

                delivery = outbound_rx.recv() => {
                    match delivery {
                        Some(Outbound::Packet(packet)) => {
                            if let Err(e) = self.send_packet(&packet).await {
                                self.handle_disconnect(&client, true).await;
                                return Err(e);
                            }
                        }
                        Some(Outbound::Shutdown) | None => {
                            info!("Session for {} taken over, closing old connection", client.id());
                            self.handle_disconnect(&client, true).await;
                            return Err(ConnectionError::Shutdown);
                        }
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    info!("Keep alive timeout for {}, disconnecting", client.id());
                    self.handle_disconnect(&client, true).await;
                    return Err(ConnectionError::Timeout);
                }
            }
        }
    }

    /// Dispatch one inbound packet
    async fn handle_packet(
        &mut self,
        client: &Arc<Client>,
        packet: Packet,
    ) -> Result<(), ConnectionError> {
        match packet {
            Packet::Connect(_) => {
                // [MQTT-3.1.0-2] a second CONNECT is a protocol violation;
                // close without sending anything further
                debug!("Duplicate CONNECT from {}", client.id());
                Err(ConnectionError::Protocol(ProtocolError::ProtocolViolation(
                    "duplicate CONNECT",
                )))
            }
            Packet::Publish(publish) => self.handle_publish(client, publish).await,
            Packet::PubAck(PubAck { packet_id }) => self.handle_puback(client, packet_id).await,
            Packet::PubRec(PubRec { packet_id }) => self.handle_pubrec(client, packet_id).await,
            Packet::PubRel(PubRel { packet_id }) => self.handle_pubrel(client, packet_id).await,
            Packet::PubComp(PubComp { packet_id }) => self.handle_pubcomp(client, packet_id).await,
            Packet::Subscribe(subscribe) => self.handle_subscribe(client, subscribe).await,
            Packet::Unsubscribe(unsubscribe) => {
                self.handle_unsubscribe(client, unsubscribe).await
            }
            Packet::PingReq => self.send_packet(&Packet::PingResp).await,
            Packet::Disconnect => {
                debug!("DISCONNECT from {}", client.id());
                // Graceful close: the will is discarded, not published
                self.handle_disconnect(client, false).await;
                Err(ConnectionError::Shutdown)
            }
            other => {
                // Server-to-client packets arriving from a client
                warn!(
                    "Unexpected packet type {} from {}",
                    other.packet_type(),
                    client.id()
                );
                Ok(())
            }
        }
    }

    /// Encode and write one packet
    pub(crate) async fn send_packet(&mut self, packet: &Packet) -> Result<(), ConnectionError> {
        self.write_buf.clear();
        self.encoder.encode(packet, &mut self.write_buf)?;
        let bytes = self.write_buf.len();
        self.stream.write_all(&self.write_buf).await?;
        self.metrics.packet_sent(bytes);
        Ok(())
    }

    /// Return buffers to the pool for reuse by other connections
    fn return_buffers(&mut self) {
        let read_buf = std::mem::take(&mut self.read_buf);
        let write_buf = std::mem::take(&mut self.write_buf);
        buffer_pool::put_buffer(read_buf);
        buffer_pool::put_buffer(write_buf);
    }
}

/// Generate an identifier for clients that connected with an empty one
pub(crate) fn generate_client_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    format!("cedar-{:016x}", hasher.finish())
}
