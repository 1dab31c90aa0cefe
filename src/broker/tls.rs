//! TLS listener setup
//!
//! Loads PEM certificates/keys and builds the acceptor used by the optional
//! TLS listener. Client-certificate verification is enabled when a CA
//! bundle is configured.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

use super::TlsConfig;

/// Error type for TLS setup
#[derive(Debug)]
pub enum TlsError {
    /// IO error reading PEM files
    Io(std::io::Error),
    /// Certificate or key parsing problem
    Pem(String),
    /// rustls configuration problem
    Config(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Io(e) => write!(f, "IO error: {}", e),
            TlsError::Pem(msg) => write!(f, "PEM error: {}", msg),
            TlsError::Config(msg) => write!(f, "TLS config error: {}", msg),
        }
    }
}

impl std::error::Error for TlsError {}

impl From<std::io::Error> for TlsError {
    fn from(e: std::io::Error) -> Self {
        TlsError::Io(e)
    }
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path)?;
    let certs: Vec<CertificateDer<'static>> =
        CertificateDer::pem_reader_iter(BufReader::new(file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Pem(format!("failed to parse certificates in {}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(TlsError::Pem(format!("no certificates found in {}", path)));
    }

    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path)?;
    PrivateKeyDer::from_pem_reader(BufReader::new(file))
        .map_err(|e| TlsError::Pem(format!("failed to parse private key in {}: {}", path, e)))
}

/// Build a TLS acceptor from the broker TLS configuration
pub fn build_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(&config.cert_path)?;
    let key = load_private_key(&config.key_path)?;

    let server_config = match &config.ca_cert_path {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| TlsError::Pem(format!("bad CA certificate: {}", e)))?;
            }

            let builder = WebPkiClientVerifier::builder(Arc::new(roots));
            let verifier = if config.require_client_cert {
                builder.build()
            } else {
                builder.allow_unauthenticated().build()
            }
            .map_err(|e| TlsError::Config(format!("failed to build client verifier: {}", e)))?;

            ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
        }
        None => {
            if config.require_client_cert {
                return Err(TlsError::Config(
                    "ca_cert is required when require_client_cert is set".to_string(),
                ));
            }
            ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)
        }
    }
    .map_err(|e| TlsError::Config(format!("failed to build TLS config: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_cert_file_is_io_error() {
        let config = TlsConfig {
            cert_path: "/no/such/cert.pem".to_string(),
            key_path: "/no/such/key.pem".to_string(),
            ca_cert_path: None,
            require_client_cert: false,
        };
        assert!(matches!(build_acceptor(&config), Err(TlsError::Io(_))));
    }

    #[test]
    fn test_client_cert_requires_ca() {
        let config = TlsConfig {
            cert_path: "/no/such/cert.pem".to_string(),
            key_path: "/no/such/key.pem".to_string(),
            ca_cert_path: None,
            require_client_cert: true,
        };
        // cert loading fails first on the missing file; the CA check is
        // exercised with an existing cert in integration environments
        assert!(build_acceptor(&config).is_err());
    }
}
