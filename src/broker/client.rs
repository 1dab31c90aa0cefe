//! Client handle
//!
//! One `Client` represents one accepted connection: its identifier, the
//! properties negotiated at CONNECT, its session, and the outbound delivery
//! channel drained by the owning connection task. The broker owns handles
//! through the registry; everything else holds non-owning `Arc` clones.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::protocol::{Packet, Will};
use crate::session::Session;

/// Messages pushed to a connection task from other tasks
#[derive(Debug)]
pub enum Outbound {
    /// Deliver a packet to the peer
    Packet(Packet),
    /// Close the connection (session takeover)
    Shutdown,
}

/// One live (or recently live, for persistent sessions) client connection
pub struct Client {
    /// Client identifier, peer-assigned or generated
    id: Arc<str>,
    /// Clean session flag from CONNECT
    clean_session: bool,
    /// Negotiated keep alive in seconds (0 = disabled)
    keep_alive: u16,
    /// Username presented at CONNECT
    username: Option<String>,
    /// Will message, taken exactly once when published or discarded
    will: Mutex<Option<Will>>,
    /// Session state (pending packets + subscription record)
    pub session: Session,
    /// Outbound channel into the owning connection task
    outbound: mpsc::Sender<Outbound>,
    /// Set once the connection is gone; deliveries become no-ops
    closed: AtomicBool,
}

impl Client {
    pub fn new(
        id: Arc<str>,
        clean_session: bool,
        keep_alive: u16,
        username: Option<String>,
        will: Option<Will>,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            id,
            clean_session,
            keep_alive,
            username,
            will: Mutex::new(will),
            session: Session::new(),
            outbound,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Take the will message out of the handle. Returns `None` on second
    /// call, so the will is published or discarded at most once.
    pub fn take_will(&self) -> Option<Will> {
        self.will.lock().take()
    }

    /// Queue a packet for delivery. Returns false when the connection is
    /// gone or its queue is full; QoS > 0 state was already recorded in the
    /// session by the caller, so nothing is lost for persistent sessions.
    pub fn deliver(&self, packet: Packet) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.try_send(Outbound::Packet(packet)).is_ok()
    }

    /// Ask the owning connection task to close (session takeover)
    pub fn shutdown(&self) {
        let _ = self.outbound.try_send(Outbound::Shutdown);
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Identity of one client handle.
///
/// Compares by handle (pointer) identity, not by client-id string: during a
/// takeover the old and new handle share an identifier but must be distinct
/// subscribers in the topic tree so the move leaves no topic pointing at
/// both or neither.
#[derive(Clone)]
pub struct ClientKey(Arc<Client>);

impl ClientKey {
    pub fn new(client: &Arc<Client>) -> Self {
        Self(client.clone())
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.0
    }
}

impl PartialEq for ClientKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ClientKey {}

impl Hash for ClientKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Arc::as_ptr(&self.0) as usize);
    }
}

impl std::fmt::Debug for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientKey({})", self.0.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str) -> (Arc<Client>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Arc::new(Client::new(Arc::from(id), true, 60, None, None, tx)),
            rx,
        )
    }

    #[test]
    fn test_key_identity_is_per_handle() {
        let (a, _rx_a) = client("same-id");
        let (b, _rx_b) = client("same-id");

        assert_eq!(ClientKey::new(&a), ClientKey::new(&a));
        assert_ne!(ClientKey::new(&a), ClientKey::new(&b));
    }

    #[test]
    fn test_take_will_is_one_shot() {
        let (tx, _rx) = mpsc::channel(8);
        let c = Client::new(
            Arc::from("c1"),
            true,
            60,
            None,
            Some(Will {
                topic: "last/will".to_string(),
                payload: bytes::Bytes::from_static(b"gone"),
                qos: crate::protocol::QoS::AtMostOnce,
                retain: false,
            }),
            tx,
        );

        assert!(c.take_will().is_some());
        assert!(c.take_will().is_none());
    }

    #[test]
    fn test_deliver_after_close_is_noop() {
        let (c, _rx) = client("c1");
        assert!(c.deliver(Packet::PingResp));

        c.mark_closed();
        assert!(!c.deliver(Packet::PingResp));
    }
}
