//! Client registry and session inheritance
//!
//! Maps each client identifier to its single currently-active handle and
//! implements takeover: a new CONNECT with an identifier that is already
//! registered either inherits the prior session (clean session = 0) or
//! starts fresh after tearing the prior one down (clean session = 1).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::client::{Client, ClientKey};
use crate::metrics::Metrics;
use crate::topic::TopicTree;

/// Registry of client handles, at most one per identifier
pub struct ClientRegistry {
    clients: DashMap<Arc<str>, Arc<Client>>,
    metrics: Arc<Metrics>,
}

impl ClientRegistry {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            clients: DashMap::new(),
            metrics,
        }
    }

    /// Register a handle as the active one for its identifier.
    /// Returns the handle it displaced, if any; the caller is responsible
    /// for shutting a displaced handle down (concurrent CONNECT race).
    pub fn add(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        debug_assert!(!client.id().is_empty());
        self.metrics.client_connected();
        self.clients.insert(client.id().clone(), client)
    }

    /// Look up the active handle for an identifier
    pub fn get(&self, client_id: &str) -> Option<Arc<Client>> {
        self.clients.get(client_id).map(|entry| entry.clone())
    }

    /// Unregister a handle. A no-op unless `client` is still the currently
    /// registered handle for its identifier, so removing a stale handle
    /// after it was superseded does nothing.
    pub fn remove(&self, client: &Arc<Client>) {
        self.clients
            .remove_if(client.id(), |_, current| Arc::ptr_eq(current, client));
    }

    /// Number of registered handles, including disconnected persistent
    /// sessions awaiting a reconnect
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of handles with a live connection
    pub fn connected_count(&self) -> usize {
        self.clients
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .count()
    }

    /// Identifiers of all registered handles
    pub fn client_ids(&self) -> Vec<Arc<str>> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Apply takeover semantics for a new handle whose identifier may
    /// already be registered. Returns whether a prior session was inherited
    /// (the CONNACK session-present flag).
    ///
    /// - No prior handle: nothing happens, returns false.
    /// - Prior handle, new connection wants a clean session: the old
    ///   handle's subscriptions are removed from the tree, its session is
    ///   discarded and it is deregistered and shut down; returns false.
    /// - Prior handle, persistent session: the new session receives a copy
    ///   of the old pending packets, every subscribed topic is moved in the
    ///   tree from the old handle to the new one (remove-then-add per
    ///   topic), then the old handle is deregistered and shut down;
    ///   returns true.
    pub fn inherit_session(&self, new_client: &Arc<Client>, topics: &TopicTree<ClientKey>) -> bool {
        let Some(old) = self.get(new_client.id()) else {
            return false;
        };

        if Arc::ptr_eq(&old, new_client) {
            return false;
        }

        let old_key = ClientKey::new(&old);

        let inherited = if new_client.clean_session() {
            debug!("Clean takeover of client {}", new_client.id());
            let old_subs = old.session.take_subscriptions();
            topics
                .remove_client_subscriptions(&old_key, old_subs.iter().map(|(f, _)| f.as_str()));
            for _ in &old_subs {
                self.metrics.subscription_removed();
            }
            old.session.clear();
            false
        } else {
            debug!("Session inheritance for client {}", new_client.id());
            new_client.session.inherit_pending(&old.session);

            // Move each topic atomically: the per-node lock makes the
            // remove-then-add invisible to concurrent lookups of other
            // branches, and the old handle never shares an entry with the
            // new one.
            let new_key = ClientKey::new(new_client);
            for (filter, qos) in old.session.take_subscriptions() {
                topics.unsubscribe(&filter, &old_key);
                topics.subscribe(&filter, qos, new_key.clone());
                new_client.session.add_subscription(filter, qos);
            }
            true
        };

        old.shutdown();
        self.remove(&old);

        inherited
    }
}
