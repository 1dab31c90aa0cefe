//! QoS acknowledgment handling (PUBACK, PUBREC, PUBREL, PUBCOMP)

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use super::{Connection, ConnectionError};
use crate::broker::client::Client;
use crate::protocol::{Packet, PubComp, PubRel};

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// PUBACK: the subscriber acknowledged a QoS 1 delivery
    pub(crate) async fn handle_puback(
        &mut self,
        client: &Arc<Client>,
        packet_id: u16,
    ) -> Result<(), ConnectionError> {
        client.session.remove_pending(packet_id);
        Ok(())
    }

    /// PUBREC: the subscriber received a QoS 2 delivery; replace the pending
    /// PUBLISH with a pending PUBREL and send it
    pub(crate) async fn handle_pubrec(
        &mut self,
        client: &Arc<Client>,
        packet_id: u16,
    ) -> Result<(), ConnectionError> {
        client.session.remove_pending(packet_id);
        let pubrel = PubRel { packet_id };
        client.session.add_pending(packet_id, Packet::PubRel(pubrel));
        self.send_packet(&Packet::PubRel(pubrel)).await
    }

    /// PUBREL: the publisher released a QoS 2 message we hold PUBREC state
    /// for. Without a matching pending entry this is logged and ignored -
    /// the connection stays open.
    pub(crate) async fn handle_pubrel(
        &mut self,
        client: &Arc<Client>,
        packet_id: u16,
    ) -> Result<(), ConnectionError> {
        if client.session.remove_pending(packet_id).is_none() {
            warn!(
                "PUBREL {} from {} without matching pending entry, ignoring",
                packet_id,
                client.id()
            );
            return Ok(());
        }

        self.send_packet(&Packet::PubComp(PubComp { packet_id })).await
    }

    /// PUBCOMP: the subscriber completed the QoS 2 handshake
    pub(crate) async fn handle_pubcomp(
        &mut self,
        client: &Arc<Client>,
        packet_id: u16,
    ) -> Result<(), ConnectionError> {
        client.session.remove_pending(packet_id);
        Ok(())
    }
}
