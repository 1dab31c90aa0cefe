//! Disconnect cleanup and will-message publishing

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::publish::{route_publish, store_retained};
use super::Connection;
use crate::broker::client::{Client, ClientKey};
use crate::protocol::Publish;

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Terminal cleanup for this connection.
    ///
    /// `publish_will` is true for every abnormal termination (read/write
    /// error, keep-alive expiry, protocol violation, takeover) and false
    /// for a clean DISCONNECT, which discards the will instead.
    ///
    /// The will goes out before session cleanup so a retained will still
    /// updates the tree. Clean sessions are then fully torn down; a
    /// persistent session keeps its registry entry, subscriptions and
    /// pending packets so an immediate reconnect can inherit them.
    pub(crate) async fn handle_disconnect(&mut self, client: &Arc<Client>, publish_will: bool) {
        client.mark_closed();

        match client.take_will() {
            Some(will) if publish_will => {
                debug!("Publishing will for {} to {}", client.id(), will.topic);
                let publish = Publish {
                    dup: false,
                    qos: will.qos,
                    retain: will.retain,
                    topic: Arc::from(will.topic.as_str()),
                    packet_id: None,
                    payload: will.payload,
                };

                if publish.retain {
                    store_retained(&self.topics, &self.metrics, &publish);
                }
                route_publish(&self.topics, &publish);
            }
            _ => {}
        }

        if client.clean_session() {
            let key = ClientKey::new(client);
            let subscriptions = client.session.take_subscriptions();
            self.topics
                .remove_client_subscriptions(&key, subscriptions.iter().map(|(f, _)| f.as_str()));
            for _ in &subscriptions {
                self.metrics.subscription_removed();
            }
            client.session.clear();
            // No-op when this handle was already superseded by a takeover
            self.registry.remove(client);
        }

        self.metrics.client_disconnected();
        debug!("Client {} disconnected", client.id());
    }
}
