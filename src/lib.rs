//! CedarMQ - lightweight MQTT v3.1.1 broker
//!
//! A publish/subscribe broker built around a concurrent topic tree with
//! per-node locking, per-client sessions implementing the QoS 1/2
//! handshakes, and session inheritance across reconnects.

pub mod auth;
pub mod broker;
pub mod buffer_pool;
pub mod codec;
pub mod config;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod topic;

pub use auth::UserStore;
pub use broker::{Broker, BrokerConfig};
pub use config::Config;
pub use metrics::{Metrics, MetricsServer};
pub use protocol::{Packet, QoS};
pub use session::Session;
pub use topic::TopicTree;
