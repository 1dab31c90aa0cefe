//! Broker core
//!
//! Owns the shared state every connection task works against (topic tree,
//! client registry, credential store, metrics), accepts TCP/TLS
//! connections, and exposes the read-only reporting queries used by an
//! operator console.

mod client;
mod connection;
mod registry;
mod tls;

pub use client::{Client, ClientKey, Outbound};
pub use connection::{Connection, ConnectionError};
pub use registry::ClientRegistry;
pub use tls::{build_acceptor, TlsError};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::auth::UserStore;
use crate::metrics::Metrics;
use crate::protocol::{Publish, QoS};
use crate::topic::TopicTree;

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// TCP bind address
    pub bind_addr: SocketAddr,
    /// TLS bind address (optional)
    pub tls_bind_addr: Option<SocketAddr>,
    /// TLS certificate configuration (required when tls_bind_addr is set)
    pub tls_config: Option<TlsConfig>,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum packet size in bytes
    pub max_packet_size: usize,
    /// Maximum accepted client identifier length
    pub max_client_id_len: usize,
    /// Cap on the keep alive interval a client may request
    pub max_keep_alive: u16,
    /// How long a fresh connection may take to send CONNECT
    pub connect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:1883".parse().unwrap(),
            tls_bind_addr: None,
            tls_config: None,
            max_connections: 100_000,
            max_packet_size: 1024 * 1024,
            max_client_id_len: 64,
            max_keep_alive: 65535,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// TLS certificate paths
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
    pub ca_cert_path: Option<String>,
    pub require_client_cert: bool,
}

/// The MQTT broker
pub struct Broker {
    config: BrokerConfig,
    topics: Arc<TopicTree<ClientKey>>,
    registry: Arc<ClientRegistry>,
    users: Arc<UserStore>,
    metrics: Arc<Metrics>,
    shutdown: broadcast::Sender<()>,
}

impl Broker {
    /// Create a broker that accepts every connection (no credential checks)
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_users(config, UserStore::open())
    }

    /// Create a broker with a credential store
    pub fn with_users(config: BrokerConfig, users: UserStore) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let metrics = Arc::new(Metrics::new());

        Self {
            config,
            topics: Arc::new(TopicTree::new()),
            registry: Arc::new(ClientRegistry::new(metrics.clone())),
            users: Arc::new(users),
            metrics,
            shutdown,
        }
    }

    /// Run the accept loops until shutdown
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("MQTT/TCP listening on {}", self.config.bind_addr);

        // Optional TLS listener alongside plain TCP
        if let Some(tls_addr) = self.config.tls_bind_addr {
            let tls_config = self.config.tls_config.as_ref().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "tls_bind_addr set without tls_config",
                )
            })?;
            let acceptor = build_acceptor(tls_config)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

            let tls_listener = TcpListener::bind(tls_addr).await?;
            info!("MQTT/TLS listening on {}", tls_addr);

            let topics = self.topics.clone();
            let registry = self.registry.clone();
            let users = self.users.clone();
            let config = self.config.clone();
            let metrics = self.metrics.clone();
            let shutdown = self.shutdown.clone();

            tokio::spawn(async move {
                loop {
                    match tls_listener.accept().await {
                        Ok((stream, addr)) => {
                            debug!("New TLS connection from {}", addr);
                            let acceptor = acceptor.clone();
                            let topics = topics.clone();
                            let registry = registry.clone();
                            let users = users.clone();
                            let config = config.clone();
                            let metrics = metrics.clone();
                            let shutdown_rx = shutdown.subscribe();

                            tokio::spawn(async move {
                                match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        let conn = Connection::new(
                                            tls_stream, addr, topics, registry, users, config,
                                            metrics,
                                        );
                                        drive_connection(conn, addr, shutdown_rx).await;
                                    }
                                    Err(e) => {
                                        debug!("TLS handshake failed for {}: {}", addr, e);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept TLS connection: {}", e);
                        }
                    }
                }
            });
        }

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("New TCP connection from {}", addr);

                    let conn = Connection::new(
                        stream,
                        addr,
                        self.topics.clone(),
                        self.registry.clone(),
                        self.users.clone(),
                        self.config.clone(),
                        self.metrics.clone(),
                    );
                    let shutdown_rx = self.shutdown.subscribe();

                    tokio::spawn(async move {
                        drive_connection(conn, addr, shutdown_rx).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept TCP connection: {}", e);
                }
            }
        }
    }

    /// Signal every connection task to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Publish a message originated by the server itself
    pub fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) {
        let publish = Publish {
            dup: false,
            qos,
            retain,
            topic: Arc::from(topic),
            packet_id: None,
            payload,
        };

        if retain {
            connection::store_retained(&self.topics, &self.metrics, &publish);
        }

        connection::route_publish(&self.topics, &publish);
    }

    // Read-only reporting queries; observational, never mutate core state

    /// Number of clients with a live connection
    pub fn client_count(&self) -> usize {
        self.registry.connected_count()
    }

    /// Identifiers of every registered client, including disconnected
    /// persistent sessions
    pub fn client_ids(&self) -> Vec<Arc<str>> {
        self.registry.client_ids()
    }

    /// Every topic path that currently has at least one subscriber
    pub fn topics(&self) -> Vec<String> {
        self.topics.all_topics()
    }

    /// Aggregate counters for the operator console
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

/// Poll a connection to completion, aborting on broker shutdown
async fn drive_connection<S>(
    mut conn: Connection<S>,
    addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let conn_fut = conn.run();
    tokio::pin!(conn_fut);

    loop {
        tokio::select! {
            biased;

            result = &mut conn_fut => {
                if let Err(e) = result {
                    debug!("Connection from {} ended: {}", addr, e);
                }
                break;
            }
            result = shutdown_rx.recv() => {
                match result {
                    Ok(()) => {
                        debug!("Connection {} shutting down", addr);
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }
}
