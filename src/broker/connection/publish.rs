//! PUBLISH handling and fan-out

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use super::{Connection, ConnectionError};
use crate::broker::client::{Client, ClientKey};
use crate::metrics::Metrics;
use crate::protocol::{Packet, ProtocolError, PubAck, PubRec, Publish, QoS};
use crate::topic::TopicTree;

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Handle an inbound PUBLISH
    pub(crate) async fn handle_publish(
        &mut self,
        client: &Arc<Client>,
        publish: Publish,
    ) -> Result<(), ConnectionError> {
        trace!(
            "PUBLISH from {} to {} (QoS {:?}, retain={})",
            client.id(),
            publish.topic,
            publish.qos,
            publish.retain
        );

        match publish.qos {
            QoS::AtMostOnce => {
                // Best effort, nothing to acknowledge
            }
            QoS::AtLeastOnce => {
                let packet_id = required_packet_id(&publish)?;
                self.send_packet(&Packet::PubAck(PubAck { packet_id })).await?;
            }
            QoS::ExactlyOnce => {
                let packet_id = required_packet_id(&publish)?;

                // A pending entry for this identifier means the PUBLISH is a
                // retransmit: answer PUBREC again but do not re-deliver the
                // payload (the exactly-once boundary)
                if client.session.contains_pending(packet_id) {
                    debug!(
                        "Duplicate QoS 2 PUBLISH {} from {}, suppressing re-delivery",
                        packet_id,
                        client.id()
                    );
                    self.send_packet(&Packet::PubRec(PubRec { packet_id })).await?;
                    return Ok(());
                }

                client
                    .session
                    .add_pending(packet_id, Packet::PubRec(PubRec { packet_id }));
                self.send_packet(&Packet::PubRec(PubRec { packet_id })).await?;
            }
        }

        if publish.retain {
            store_retained(&self.topics, &self.metrics, &publish);
        }

        route_publish(&self.topics, &publish);

        Ok(())
    }
}

fn required_packet_id(publish: &Publish) -> Result<u16, ConnectionError> {
    publish.packet_id.ok_or(ConnectionError::Protocol(
        ProtocolError::ProtocolViolation("QoS > 0 publish without packet identifier"),
    ))
}

/// Update the retained-message slot for a publish carrying the retain flag
pub(crate) fn store_retained(topics: &TopicTree<ClientKey>, metrics: &Metrics, publish: &Publish) {
    let had_retained = topics.retained_message(&publish.topic).is_some();
    topics.retain(publish);

    if publish.payload.is_empty() {
        if had_retained {
            metrics.retained_removed();
        }
    } else if !had_retained {
        metrics.retained_stored();
    }
}

/// Fan a publish out to every matching subscriber.
///
/// Effective delivery QoS is min(publish QoS, granted QoS). QoS 0 copies
/// carry no packet identifier; QoS > 0 copies get an identifier from the
/// subscriber's own session and are recorded pending *before* the send, so
/// an identifier is never in flight untracked. Copies are delivered with
/// the retain flag cleared (retain only survives on subscribe-time
/// delivery). Deliveries to a currently disconnected persistent session
/// leave the pending entry in place for retransmission on resumption.
pub(crate) fn route_publish(topics: &TopicTree<ClientKey>, publish: &Publish) {
    let subscribers = topics.collect_subscribers(&publish.topic);

    for (key, granted) in subscribers {
        let subscriber = key.client();
        let effective_qos = publish.qos.min(granted);

        let mut outgoing = publish.clone();
        outgoing.dup = false;
        outgoing.retain = false;
        outgoing.qos = effective_qos;
        outgoing.packet_id = None;

        if effective_qos != QoS::AtMostOnce {
            let packet_id = subscriber.session.next_packet_id();
            outgoing.packet_id = Some(packet_id);
            subscriber
                .session
                .add_pending(packet_id, Packet::Publish(outgoing.clone()));
        }

        if !subscriber.deliver(Packet::Publish(outgoing)) {
            trace!(
                "Subscriber {} unreachable for {}, pending state kept for resume",
                subscriber.id(),
                publish.topic
            );
        }
    }
}
