//! Configuration parsing tests

use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn load_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(content.as_bytes()).expect("write config");
    Config::load(file.path())
}

#[test]
fn test_defaults() {
    let config = Config::default();

    assert_eq!(config.log.level, "info");
    assert_eq!(config.server.bind, "0.0.0.0:1883".parse().unwrap());
    assert!(config.server.tls_bind.is_none());
    assert_eq!(config.limits.max_connections, 100_000);
    assert_eq!(config.limits.max_packet_size, 1024 * 1024);
    assert_eq!(config.limits.max_client_id_len, 64);
    assert_eq!(config.limits.connect_timeout, Duration::from_secs(30));
    assert_eq!(config.session.max_keep_alive, 65535);
    assert!(!config.auth.enabled);
    assert!(!config.metrics.enabled);
}

#[test]
fn test_empty_file_gives_defaults() {
    let config = load_from_str("").expect("load empty config");
    assert_eq!(config.server.bind, "0.0.0.0:1883".parse().unwrap());
    assert_eq!(config.limits.max_connections, 100_000);
}

#[test]
fn test_full_config() {
    let config = load_from_str(
        r#"
[log]
level = "debug"

[server]
bind = "127.0.0.1:2883"

[limits]
max_connections = 500
max_packet_size = 65536
max_client_id_len = 23
connect_timeout = "10s"

[session]
max_keep_alive = 300

[auth]
enabled = true

[[auth.users]]
username = "admin"
password = "admin"

[metrics]
enabled = true
bind = "127.0.0.1:9100"
"#,
    )
    .expect("load full config");

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.server.bind, "127.0.0.1:2883".parse().unwrap());
    assert_eq!(config.limits.max_connections, 500);
    assert_eq!(config.limits.max_packet_size, 65536);
    assert_eq!(config.limits.max_client_id_len, 23);
    assert_eq!(config.limits.connect_timeout, Duration::from_secs(10));
    assert_eq!(config.session.max_keep_alive, 300);
    assert!(config.auth.enabled);
    assert_eq!(config.auth.users.len(), 1);
    assert_eq!(config.auth.users[0].username, "admin");
    assert!(config.metrics.enabled);
    assert_eq!(config.metrics.bind, "127.0.0.1:9100".parse().unwrap());
}

#[test]
fn test_env_substitution_default_value() {
    // The variable is unset, so the fallback applies
    let config = load_from_str(
        r#"
[server]
bind = "${CEDARMQ_TEST_UNSET_BIND:-127.0.0.1:3883}"
"#,
    )
    .expect("load config with substitution");

    assert_eq!(config.server.bind, "127.0.0.1:3883".parse().unwrap());
}

#[test]
fn test_tls_bind_without_tls_section_rejected() {
    let result = load_from_str(
        r#"
[server]
tls_bind = "0.0.0.0:8883"
"#,
    );

    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_tls_config_accepted() {
    let config = load_from_str(
        r#"
[server]
tls_bind = "0.0.0.0:8883"

[server.tls]
cert = "certs/server.pem"
key = "certs/server.key"
"#,
    )
    .expect("load TLS config");

    let tls = config.server.tls.expect("tls section");
    assert_eq!(tls.cert, "certs/server.pem");
    assert_eq!(tls.key, "certs/server.key");
    assert!(!tls.require_client_cert);
}

#[test]
fn test_auth_enabled_without_users_rejected() {
    let result = load_from_str(
        r#"
[auth]
enabled = true
"#,
    );

    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_zero_packet_size_rejected() {
    let result = load_from_str(
        r#"
[limits]
max_packet_size = 0
"#,
    );

    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let result = Config::load("/no/such/cedarmq.toml");
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
