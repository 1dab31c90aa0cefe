//! Per-client session state
//!
//! A session tracks the packets still in flight for the QoS 1/2 handshakes
//! and the client's subscription record. It is owned by one connection at a
//! time but survives the connection when the client did not request a clean
//! session, and is transferred to the next connection with the same client
//! identifier (session inheritance).
//!
//! Both maps carry their own reader-writer lock; the session is normally
//! touched only by its owning connection task, plus briefly by the new
//! connection's task during inheritance.

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::protocol::{Packet, QoS};

/// Session state: pending handshake packets and the subscription record
pub struct Session {
    /// Packets awaiting an acknowledgment step, keyed by packet identifier.
    /// Insertion with an existing identifier overwrites.
    pending: RwLock<AHashMap<u16, Packet>>,
    /// Topic filter -> granted maximum QoS. Must stay consistent with the
    /// topic tree: every entry here has a tree entry leading to this client.
    subscriptions: RwLock<AHashMap<String, QoS>>,
    /// Next candidate identifier for broker-originated QoS > 0 deliveries
    next_packet_id: Mutex<u16>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(AHashMap::new()),
            subscriptions: RwLock::new(AHashMap::new()),
            next_packet_id: Mutex::new(1),
        }
    }

    /// Record a packet as awaiting a handshake step
    pub fn add_pending(&self, packet_id: u16, packet: Packet) {
        self.pending.write().insert(packet_id, packet);
    }

    /// Clear a pending entry once its handshake step completed
    pub fn remove_pending(&self, packet_id: u16) -> Option<Packet> {
        self.pending.write().remove(&packet_id)
    }

    pub fn contains_pending(&self, packet_id: u16) -> bool {
        self.pending.read().contains_key(&packet_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.read().len()
    }

    /// Snapshot of all pending packets, for retransmission on session resume.
    /// Enumeration order is unspecified.
    pub fn pending_packets(&self) -> Vec<Packet> {
        self.pending.read().values().cloned().collect()
    }

    /// Copy every pending packet from `other` into this session.
    /// The copy is independent: the two sessions never alias backing storage.
    pub fn inherit_pending(&self, other: &Session) {
        let source = other.pending.read();
        let mut dest = self.pending.write();
        for (id, packet) in source.iter() {
            dest.insert(*id, packet.clone());
        }
    }

    /// Allocate a packet identifier for a broker-originated delivery,
    /// skipping identifiers that are still pending. Wraps within 1..=65535.
    pub fn next_packet_id(&self) -> u16 {
        let mut next = self.next_packet_id.lock();
        let pending = self.pending.read();
        loop {
            let id = *next;
            *next = next.wrapping_add(1);
            if *next == 0 {
                *next = 1;
            }
            if !pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Record a granted subscription. Returns true when the filter was not
    /// subscribed before (re-subscribing just updates the granted QoS).
    pub fn add_subscription(&self, filter: String, max_qos: QoS) -> bool {
        self.subscriptions.write().insert(filter, max_qos).is_none()
    }

    /// Drop a subscription from the record
    pub fn remove_subscription(&self, filter: &str) -> bool {
        self.subscriptions.write().remove(filter).is_some()
    }

    /// Snapshot of the subscription record
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions
            .read()
            .iter()
            .map(|(f, q)| (f.clone(), *q))
            .collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Drain the subscription record, returning what it held.
    /// Used during inheritance and clean-session teardown.
    pub fn take_subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.write().drain().collect()
    }

    /// Discard all session state (clean-session cleanup)
    pub fn clear(&self) {
        self.pending.write().clear();
        self.subscriptions.write().clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PubRec, Publish};

    #[test]
    fn test_pending_insert_remove() {
        let session = Session::new();
        session.add_pending(1, Packet::PubRec(PubRec { packet_id: 1 }));

        assert!(session.contains_pending(1));
        assert_eq!(session.pending_len(), 1);

        // duplicate insertion overwrites
        session.add_pending(1, Packet::PubRec(PubRec { packet_id: 1 }));
        assert_eq!(session.pending_len(), 1);

        assert!(session.remove_pending(1).is_some());
        assert!(session.remove_pending(1).is_none());
        assert!(!session.contains_pending(1));
    }

    #[test]
    fn test_inherit_pending_is_independent() {
        let old = Session::new();
        old.add_pending(3, Packet::PubRec(PubRec { packet_id: 3 }));
        old.add_pending(4, Packet::PubRec(PubRec { packet_id: 4 }));

        let new = Session::new();
        new.inherit_pending(&old);
        assert_eq!(new.pending_len(), 2);

        // mutating one side must not affect the other
        old.remove_pending(3);
        assert!(new.contains_pending(3));

        new.remove_pending(4);
        assert!(old.contains_pending(4));
    }

    #[test]
    fn test_next_packet_id_skips_pending() {
        let session = Session::new();
        assert_eq!(session.next_packet_id(), 1);

        session.add_pending(2, Packet::Publish(Publish::default()));
        assert_eq!(session.next_packet_id(), 3);
    }

    #[test]
    fn test_next_packet_id_wraps_past_zero() {
        let session = Session::new();
        *session.next_packet_id.lock() = 65535;

        assert_eq!(session.next_packet_id(), 65535);
        // zero is never a valid identifier
        assert_eq!(session.next_packet_id(), 1);
    }

    #[test]
    fn test_subscription_record() {
        let session = Session::new();
        session.add_subscription("a/b".to_string(), QoS::AtLeastOnce);
        session.add_subscription("c/#".to_string(), QoS::AtMostOnce);

        assert_eq!(session.subscription_count(), 2);
        assert!(session.remove_subscription("a/b"));
        assert!(!session.remove_subscription("a/b"));

        let taken = session.take_subscriptions();
        assert_eq!(taken, vec![("c/#".to_string(), QoS::AtMostOnce)]);
        assert_eq!(session.subscription_count(), 0);
    }

    #[test]
    fn test_clear_discards_everything() {
        let session = Session::new();
        session.add_pending(1, Packet::PubRec(PubRec { packet_id: 1 }));
        session.add_subscription("a".to_string(), QoS::AtMostOnce);

        session.clear();
        assert_eq!(session.pending_len(), 0);
        assert_eq!(session.subscription_count(), 0);
    }
}
