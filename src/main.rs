//! CedarMQ - lightweight MQTT v3.1.1 broker
//!
//! Usage:
//!   cedarmq [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path (TOML)
//!   -b, --bind <ADDR>      Bind address (default: 0.0.0.0:1883)
//!   --max-connections <N>  Maximum connections
//!   --max-packet-size <N>  Maximum packet size in bytes
//!   -l, --log-level        Log level (error, warn, info, debug, trace)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cedarmq::auth::UserStore;
use cedarmq::broker::{Broker, BrokerConfig, TlsConfig};
use cedarmq::config::Config;
use cedarmq::metrics::MetricsServer;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// CedarMQ - lightweight MQTT broker
#[derive(Parser, Debug)]
#[command(name = "cedarmq")]
#[command(author = "CedarMQ Contributors")]
#[command(version)]
#[command(about = "Lightweight MQTT v3.1.1 broker")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Maximum connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Maximum packet size in bytes
    #[arg(long)]
    max_packet_size: Option<usize>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise use defaults
    let file_config = if let Some(config_path) = &args.config {
        match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // CLI overrides config, config overrides the default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match file_config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let bind_addr = args.bind.unwrap_or(file_config.server.bind);
    let tls_config = file_config.server.tls.as_ref().map(|tls| TlsConfig {
        cert_path: tls.cert.clone(),
        key_path: tls.key.clone(),
        ca_cert_path: tls.ca_cert.clone(),
        require_client_cert: tls.require_client_cert,
    });

    let broker_config = BrokerConfig {
        bind_addr,
        tls_bind_addr: file_config.server.tls_bind,
        tls_config,
        max_connections: args
            .max_connections
            .unwrap_or(file_config.limits.max_connections),
        max_packet_size: args
            .max_packet_size
            .unwrap_or(file_config.limits.max_packet_size),
        max_client_id_len: file_config.limits.max_client_id_len,
        max_keep_alive: file_config.session.max_keep_alive,
        connect_timeout: file_config.limits.connect_timeout,
    };

    info!("Starting CedarMQ");
    info!("  Bind address: {}", broker_config.bind_addr);
    if let Some(tls_addr) = &broker_config.tls_bind_addr {
        info!("  TLS address: {}", tls_addr);
    }
    info!("  Max connections: {}", broker_config.max_connections);
    info!("  Max packet size: {} bytes", broker_config.max_packet_size);

    if file_config.auth.enabled {
        info!(
            "  Authentication: enabled ({} users configured)",
            file_config.auth.users.len()
        );
    } else {
        info!("  Authentication: disabled");
    }

    let users = UserStore::new(&file_config.auth);
    let broker = Arc::new(Broker::with_users(broker_config, users));

    if file_config.metrics.enabled {
        info!("  Metrics: enabled (http://{})", file_config.metrics.bind);
        let metrics_server = MetricsServer::new(broker.metrics(), file_config.metrics.bind);
        tokio::spawn(async move {
            if let Err(e) = metrics_server.run().await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    } else {
        info!("  Metrics: disabled");
    }

    // Stop cleanly on Ctrl+C
    let shutdown_broker = broker.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown_broker.shutdown();
            std::process::exit(0);
        }
    });

    broker.run().await?;

    Ok(())
}
