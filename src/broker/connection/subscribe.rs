//! SUBSCRIBE and UNSUBSCRIBE handling

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::{Connection, ConnectionError};
use crate::broker::client::{Client, ClientKey};
use crate::protocol::{
    Packet, Publish, QoS, SubAck, Subscribe, UnsubAck, Unsubscribe, SUBACK_FAILURE,
};
use crate::topic::validate_topic_filter;

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Handle SUBSCRIBE: grant each valid filter, reject invalid ones
    /// individually with 0x80, then deliver matching retained messages
    pub(crate) async fn handle_subscribe(
        &mut self,
        client: &Arc<Client>,
        subscribe: Subscribe,
    ) -> Result<(), ConnectionError> {
        let key = ClientKey::new(client);
        let mut return_codes = Vec::with_capacity(subscribe.filters.len());
        let mut retained: Vec<(Publish, QoS)> = Vec::new();

        for request in &subscribe.filters {
            if let Err(e) = validate_topic_filter(&request.filter) {
                // One bad filter fails only its own slot in the batch
                warn!(
                    "Invalid filter {:?} from {}: {}",
                    request.filter,
                    client.id(),
                    e
                );
                return_codes.push(SUBACK_FAILURE);
                continue;
            }

            let granted = request.qos;
            let newly_subscribed = client
                .session
                .add_subscription(request.filter.clone(), granted);
            let stored = self
                .topics
                .subscribe(&request.filter, granted, key.clone());

            if newly_subscribed {
                self.metrics.subscription_added();
            }

            // An exact filter gets its node's retained message straight from
            // the subscribe walk; a wildcard filter can cover many retained
            // topics and needs the matching scan
            if request.filter.contains('+') || request.filter.contains('#') {
                for message in self.topics.retained_matching(&request.filter) {
                    retained.push((message, granted));
                }
            } else if let Some(message) = stored {
                retained.push((message, granted));
            }

            return_codes.push(granted as u8);
            debug!(
                "SUBSCRIBE {} to {} (QoS {:?})",
                client.id(),
                request.filter,
                granted
            );
        }

        self.send_packet(&Packet::SubAck(SubAck {
            packet_id: subscribe.packet_id,
            return_codes,
        }))
        .await?;

        // Retained messages go out after SUBACK, as fresh copies downgraded
        // to the subscriber's grant; the stored instance is never mutated
        for (message, granted) in retained {
            self.send_retained(client, message, granted).await?;
        }

        Ok(())
    }

    /// Deliver one retained message for a new subscription
    async fn send_retained(
        &mut self,
        client: &Arc<Client>,
        stored: Publish,
        granted: QoS,
    ) -> Result<(), ConnectionError> {
        let effective_qos = stored.qos.min(granted);

        let mut outgoing = stored;
        outgoing.dup = false;
        outgoing.retain = true;
        outgoing.qos = effective_qos;
        outgoing.packet_id = None;

        if effective_qos != QoS::AtMostOnce {
            let packet_id = client.session.next_packet_id();
            outgoing.packet_id = Some(packet_id);
            client
                .session
                .add_pending(packet_id, Packet::Publish(outgoing.clone()));
        }

        self.send_packet(&Packet::Publish(outgoing)).await
    }

    /// Handle UNSUBSCRIBE: unknown topics are ignored, UNSUBACK always sent
    pub(crate) async fn handle_unsubscribe(
        &mut self,
        client: &Arc<Client>,
        unsubscribe: Unsubscribe,
    ) -> Result<(), ConnectionError> {
        let key = ClientKey::new(client);

        for filter in &unsubscribe.filters {
            let removed = self.topics.unsubscribe(filter, &key);
            client.session.remove_subscription(filter);

            if removed {
                self.metrics.subscription_removed();
            }

            debug!("UNSUBSCRIBE {} from {}", client.id(), filter);
        }

        self.send_packet(&Packet::UnsubAck(UnsubAck {
            packet_id: unsubscribe.packet_id,
        }))
        .await
    }
}
