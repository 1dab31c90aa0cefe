//! Prometheus metrics
//!
//! Aggregate counters for the operator console: connections, packets, bytes,
//! subscriptions, and retained messages. Exposed over HTTP by
//! [`MetricsServer`]. These are observational only and never feed back into
//! broker behaviour.

use prometheus::{IntCounter, IntGauge, Opts, Registry};

mod server;

pub use server::MetricsServer;

/// All broker metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Connection metrics
    pub connections_total: IntCounter,
    pub connections_current: IntGauge,

    // Packet/byte counters
    pub packets_received: IntCounter,
    pub packets_sent: IntCounter,
    pub bytes_received: IntCounter,
    pub bytes_sent: IntCounter,

    // Subscription metrics
    pub subscriptions_current: IntGauge,
    pub subscriptions_total: IntCounter,

    // Retained messages
    pub retained_current: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::with_opts(Opts::new(
            "cedarmq_connections_total",
            "Total client connections accepted since startup",
        ))
        .unwrap();

        let connections_current = IntGauge::with_opts(Opts::new(
            "cedarmq_connections_current",
            "Current number of connected clients",
        ))
        .unwrap();

        let packets_received = IntCounter::with_opts(Opts::new(
            "cedarmq_packets_received_total",
            "Total control packets received",
        ))
        .unwrap();

        let packets_sent = IntCounter::with_opts(Opts::new(
            "cedarmq_packets_sent_total",
            "Total control packets sent",
        ))
        .unwrap();

        let bytes_received = IntCounter::with_opts(Opts::new(
            "cedarmq_bytes_received_total",
            "Total bytes received from clients",
        ))
        .unwrap();

        let bytes_sent = IntCounter::with_opts(Opts::new(
            "cedarmq_bytes_sent_total",
            "Total bytes sent to clients",
        ))
        .unwrap();

        let subscriptions_current = IntGauge::with_opts(Opts::new(
            "cedarmq_subscriptions_current",
            "Current number of active subscriptions",
        ))
        .unwrap();

        let subscriptions_total = IntCounter::with_opts(Opts::new(
            "cedarmq_subscriptions_total",
            "Total subscriptions created since startup",
        ))
        .unwrap();

        let retained_current = IntGauge::with_opts(Opts::new(
            "cedarmq_retained_messages_current",
            "Current number of retained messages",
        ))
        .unwrap();

        registry
            .register(Box::new(connections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_current.clone()))
            .unwrap();
        registry.register(Box::new(packets_received.clone())).unwrap();
        registry.register(Box::new(packets_sent.clone())).unwrap();
        registry.register(Box::new(bytes_received.clone())).unwrap();
        registry.register(Box::new(bytes_sent.clone())).unwrap();
        registry
            .register(Box::new(subscriptions_current.clone()))
            .unwrap();
        registry
            .register(Box::new(subscriptions_total.clone()))
            .unwrap();
        registry
            .register(Box::new(retained_current.clone()))
            .unwrap();

        Metrics {
            registry,
            connections_total,
            connections_current,
            packets_received,
            packets_sent,
            bytes_received,
            bytes_sent,
            subscriptions_current,
            subscriptions_total,
            retained_current,
        }
    }

    pub fn client_connected(&self) {
        self.connections_total.inc();
        self.connections_current.inc();
    }

    pub fn client_disconnected(&self) {
        self.connections_current.dec();
    }

    pub fn packet_received(&self, bytes: usize) {
        self.packets_received.inc();
        self.bytes_received.inc_by(bytes as u64);
    }

    pub fn packet_sent(&self, bytes: usize) {
        self.packets_sent.inc();
        self.bytes_sent.inc_by(bytes as u64);
    }

    pub fn subscription_added(&self) {
        self.subscriptions_current.inc();
        self.subscriptions_total.inc();
    }

    pub fn subscription_removed(&self) {
        self.subscriptions_current.dec();
    }

    pub fn retained_stored(&self) {
        self.retained_current.inc();
    }

    pub fn retained_removed(&self) {
        self.retained_current.dec();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let metrics = Metrics::new();

        metrics.client_connected();
        metrics.client_connected();
        metrics.client_disconnected();

        assert_eq!(metrics.connections_total.get(), 2);
        assert_eq!(metrics.connections_current.get(), 1);
    }

    #[test]
    fn test_packet_counters() {
        let metrics = Metrics::new();

        metrics.packet_received(100);
        metrics.packet_sent(40);
        metrics.packet_sent(60);

        assert_eq!(metrics.packets_received.get(), 1);
        assert_eq!(metrics.bytes_received.get(), 100);
        assert_eq!(metrics.packets_sent.get(), 2);
        assert_eq!(metrics.bytes_sent.get(), 100);
    }
}
