//! CONNECT handshake
//!
//! Validation order per the protocol: protocol name/level first, then the
//! client identifier, then credentials. A failed check answers with the
//! specific negative CONNACK return code and closes; on success the session
//! is inherited, CONNACK carries the session-present flag, the client is
//! registered and any inherited pending packets are retransmitted before
//! the packet loop starts.

use std::sync::Arc;

use bytes::Buf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info};

use super::{generate_client_id, Connection, ConnectionError, State};
use crate::broker::client::{Client, Outbound};
use crate::protocol::{ConnAck, Connect, ConnectCode, Packet, ProtocolError, PROTOCOL_LEVEL};
use crate::topic::validate_topic_name;

/// Capacity of the per-connection outbound delivery channel
const OUTBOUND_QUEUE: usize = 1024;

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read packets until CONNECT arrives; anything else first is a
    /// protocol violation
    pub(crate) async fn read_connect(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.decoder.decode(&self.read_buf) {
                Ok(Some((packet, consumed))) => {
                    self.read_buf.advance(consumed);
                    self.metrics.packet_received(consumed);

                    return match packet {
                        Packet::Connect(connect) => self.handle_connect(*connect).await,
                        _ => {
                            debug!("First packet from {} was not CONNECT", self.addr);
                            Err(ConnectionError::Protocol(ProtocolError::ProtocolViolation(
                                "first packet must be CONNECT",
                            )))
                        }
                    };
                }
                Ok(None) => {
                    // Need more data
                }
                Err(e) => {
                    // Framing already broken before the handshake: close
                    // without a CONNACK
                    return Err(e.into());
                }
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ConnectionError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before CONNECT",
                )));
            }
        }
    }

    /// Validate CONNECT and bring the connection up
    async fn handle_connect(&mut self, connect: Connect) -> Result<(), ConnectionError> {
        if connect.protocol_name != "MQTT" || connect.protocol_level != PROTOCOL_LEVEL {
            debug!(
                "Unsupported protocol {}/{} from {}",
                connect.protocol_name, connect.protocol_level, self.addr
            );
            return self
                .reject(ConnectCode::UnacceptableProtocolVersion, "unsupported protocol")
                .await;
        }

        // The will is published later as a regular topic, so it must obey
        // topic-name syntax now
        if let Some(ref will) = connect.will {
            if let Err(e) = validate_topic_name(&will.topic) {
                debug!("Invalid will topic from {}: {}", self.addr, e);
                return Err(ConnectionError::Protocol(ProtocolError::ProtocolViolation(
                    "invalid will topic",
                )));
            }
        }

        // [MQTT-3.1.3-8] a zero-byte identifier requires a clean session
        if connect.client_id.is_empty() && !connect.clean_session {
            debug!(
                "Empty client id with clean_session=0 from {}",
                self.addr
            );
            return self
                .reject(ConnectCode::IdentifierRejected, "empty client id")
                .await;
        }

        let client_id: Arc<str> = if connect.client_id.is_empty() {
            generate_client_id().into()
        } else {
            connect.client_id.as_str().into()
        };

        if client_id.len() > self.config.max_client_id_len {
            debug!("Client id too long from {}", self.addr);
            return self
                .reject(ConnectCode::IdentifierRejected, "client id too long")
                .await;
        }

        if !self
            .users
            .verify(connect.username.as_deref(), connect.password.as_deref())
        {
            debug!("Authentication failed for {} from {}", client_id, self.addr);
            return self
                .reject(ConnectCode::BadUsernameOrPassword, "authentication failed")
                .await;
        }

        // Takeover of an existing identifier does not count against the limit
        let is_takeover = self.registry.get(&client_id).is_some();
        if !is_takeover && self.registry.connected_count() >= self.config.max_connections {
            debug!(
                "Connection limit ({}) reached, rejecting {}",
                self.config.max_connections, client_id
            );
            return self
                .reject(ConnectCode::ServerUnavailable, "connection limit reached")
                .await;
        }

        let keep_alive = connect.keep_alive.min(self.config.max_keep_alive);

        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
        let client = Arc::new(Client::new(
            client_id.clone(),
            connect.clean_session,
            keep_alive,
            connect.username.clone(),
            connect.will,
            outbound_tx,
        ));

        let session_present = self.registry.inherit_session(&client, &self.topics);

        // A concurrent CONNECT with the same identifier may have slipped in
        // between inheritance and registration; the loser gets shut down so
        // at most one handle stays registered
        if let Some(displaced) = self.registry.add(client.clone()) {
            if !Arc::ptr_eq(&displaced, &client) {
                displaced.shutdown();
            }
        }

        self.send_packet(&Packet::ConnAck(ConnAck::new(
            ConnectCode::Accepted,
            session_present,
        )))
        .await?;

        info!(
            "Client {} connected from {} (clean_session={}, keep_alive={}s, session_present={})",
            client_id, self.addr, connect.clean_session, keep_alive, session_present
        );

        self.state = State::Connected {
            client: client.clone(),
        };
        self.outbound_rx = Some(outbound_rx);

        // [MQTT-4.4.0-1] retransmit inherited pending packets, original
        // identifiers intact, before any new traffic is processed
        if session_present {
            self.resend_pending(&client).await?;
        }

        Ok(())
    }

    /// Send a negative CONNACK and fail the handshake
    async fn reject(
        &mut self,
        code: ConnectCode,
        reason: &'static str,
    ) -> Result<(), ConnectionError> {
        self.send_packet(&Packet::ConnAck(ConnAck::new(code, false))).await?;
        Err(ConnectionError::Protocol(ProtocolError::ProtocolViolation(
            reason,
        )))
    }

    /// Retransmit every pending packet of an inherited session
    async fn resend_pending(&mut self, client: &Arc<Client>) -> Result<(), ConnectionError> {
        for packet in client.session.pending_packets() {
            let packet = match packet {
                Packet::Publish(mut publish) => {
                    // [MQTT-3.3.1-1] redelivery carries the DUP flag
                    publish.dup = true;
                    Packet::Publish(publish)
                }
                other => other,
            };
            self.send_packet(&packet).await?;
        }
        Ok(())
    }
}
