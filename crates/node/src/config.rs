//! Configuration management for the LoComm node.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/locomm/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use protocol::crypto::{DEFAULT_PBKDF2_ITERATIONS, MIN_PBKDF2_ITERATIONS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("pbkdf2_iterations must be at least {min}, got {got}")]
    InvalidIterations { min: u32, got: u32 },

    #[error("max_password_len must be between 1 and 255, got {0}")]
    InvalidMaxPasswordLen(usize),

    #[error("default_password must be 1..=max_password_len bytes, got {0} bytes")]
    InvalidDefaultPassword(usize),

    #[error("queue_capacity must be between 1 and 1024, got {0}")]
    InvalidQueueCapacity(usize),

    #[error("poll_interval_ms must be between 1 and 10000, got {0}")]
    InvalidPollInterval(u64),

    #[error("node_id {0} is reserved for broadcast")]
    ReservedNodeId(u8),

    #[error("invalid socket address for {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the LoComm node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General node configuration.
    pub node: NodeConfig,

    /// Computer-facing link.
    pub computer: ComputerConfig,

    /// Device-facing (radio) link.
    pub radio: RadioConfig,

    /// Security settings.
    pub security: SecurityConfig,
}

/// General node configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory for the persistent key-value store.
    pub data_dir: PathBuf,

    /// Identifier prefixed to relayed payloads.
    pub node_id: u8,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Transport used for the computer link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComputerTransport {
    /// Frames over stdin/stdout.
    Stdio,
    /// Frames over a TCP connection, one client at a time.
    Tcp,
}

/// Computer link configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComputerConfig {
    /// Which transport to use.
    pub transport: ComputerTransport,

    /// Listen address when `transport = "tcp"`.
    pub listen_addr: String,

    /// Peer messages held for the computer while it is not reading.
    pub queue_capacity: usize,

    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

/// Radio link configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RadioConfig {
    /// UDP bind address.
    pub bind_addr: String,

    /// Peer addresses every relayed frame is sent to.
    pub peers: Vec<String>,

    /// Depth of the outbound relay queue.
    pub queue_capacity: usize,

    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

/// Security settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Password provisioned on first boot.
    pub default_password: String,

    /// PBKDF2 iteration count for the wrapping key.
    pub pbkdf2_iterations: u32,

    /// Longest password accepted over the wire.
    pub max_password_len: usize,

    /// Seal relayed payloads with the group key.
    pub encrypt_relay: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            node_id: 1,
            log_level: "info".to_string(),
        }
    }
}

impl Default for ComputerConfig {
    fn default() -> Self {
        Self {
            transport: ComputerTransport::Stdio,
            listen_addr: "127.0.0.1:7070".to_string(),
            queue_capacity: 5,
            poll_interval_ms: 10,
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7171".to_string(),
            peers: Vec::new(),
            queue_capacity: 5,
            poll_interval_ms: 10,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            default_password: "password".to_string(),
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            max_password_len: 64,
            encrypt_relay: true,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("locomm")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("locomm")
}

fn check_addr(field: &'static str, value: &str) -> Result<(), ConfigError> {
    value
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidAddress {
            field,
            value: value.to_string(),
        })
}

/// Peers may name a host; it is resolved when the radio link binds.
fn check_peer(value: &str) -> Result<(), ConfigError> {
    if value.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }
    match value.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok() =>
        {
            Ok(())
        }
        _ => Err(ConfigError::InvalidAddress {
            field: "radio.peers",
            value: value.to_string(),
        }),
    }
}

fn check_queue_capacity(capacity: usize) -> Result<(), ConfigError> {
    if capacity == 0 || capacity > 1024 {
        return Err(ConfigError::InvalidQueueCapacity(capacity));
    }
    Ok(())
}

fn check_poll_interval(ms: u64) -> Result<(), ConfigError> {
    if ms == 0 || ms > 10_000 {
        return Err(ConfigError::InvalidPollInterval(ms));
    }
    Ok(())
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - LOCOMM_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - LOCOMM_NODE_ID: Override the node identifier
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("LOCOMM_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.node.log_level = level;
            }
        }

        if let Ok(raw) = std::env::var("LOCOMM_NODE_ID") {
            match raw.parse::<u8>() {
                Ok(id) => {
                    tracing::info!("Overriding node_id from environment: {}", id);
                    self.node.node_id = id;
                }
                Err(_) if raw.is_empty() => {}
                Err(_) => tracing::warn!("Ignoring invalid LOCOMM_NODE_ID: {:?}", raw),
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.node_id == protocol::messages::BROADCAST_NODE_ID {
            return Err(ConfigError::ReservedNodeId(self.node.node_id));
        }

        let level = self.node.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.node.log_level.clone()));
        }

        if self.computer.transport == ComputerTransport::Tcp {
            check_addr("computer.listen_addr", &self.computer.listen_addr)?;
        }
        check_queue_capacity(self.computer.queue_capacity)?;
        check_poll_interval(self.computer.poll_interval_ms)?;

        check_addr("radio.bind_addr", &self.radio.bind_addr)?;
        for peer in &self.radio.peers {
            check_peer(peer)?;
        }
        check_queue_capacity(self.radio.queue_capacity)?;
        check_poll_interval(self.radio.poll_interval_ms)?;

        if self.security.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(ConfigError::InvalidIterations {
                min: MIN_PBKDF2_ITERATIONS,
                got: self.security.pbkdf2_iterations,
            });
        }
        if self.security.max_password_len == 0 || self.security.max_password_len > 255 {
            return Err(ConfigError::InvalidMaxPasswordLen(
                self.security.max_password_len,
            ));
        }
        let default_len = self.security.default_password.len();
        if default_len == 0 || default_len > self.security.max_password_len {
            return Err(ConfigError::InvalidDefaultPassword(default_len));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.node.node_id, 1);
        assert_eq!(config.node.log_level, "info");
        assert_eq!(config.computer.transport, ComputerTransport::Stdio);
        assert_eq!(config.computer.listen_addr, "127.0.0.1:7070");
        assert_eq!(config.computer.queue_capacity, 5);
        assert_eq!(config.radio.bind_addr, "0.0.0.0:7171");
        assert!(config.radio.peers.is_empty());
        assert_eq!(config.radio.queue_capacity, 5);
        assert_eq!(config.security.default_password, "password");
        assert_eq!(config.security.pbkdf2_iterations, 10_000);
        assert_eq!(config.security.max_password_len, 64);
        assert!(config.security.encrypt_relay);
    }

    #[test]
    fn test_default_data_dir() {
        let config = NodeConfig::default();
        assert!(config.data_dir.to_string_lossy().contains("locomm"));
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[node]
node_id = 7

[radio]
peers = ["10.0.0.2:7171"]
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.node.node_id, 7);
        assert_eq!(config.radio.peers, vec!["10.0.0.2:7171"]);
        // Other values should be defaults
        assert_eq!(config.radio.queue_capacity, 5);
        assert_eq!(config.security.default_password, "password");
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[node]
data_dir = "/var/lib/locomm"
node_id = 3
log_level = "debug"

[computer]
transport = "tcp"
listen_addr = "127.0.0.1:9000"
poll_interval_ms = 5

[radio]
bind_addr = "0.0.0.0:9100"
peers = ["192.168.1.20:9100", "192.168.1.21:9100"]
queue_capacity = 8
poll_interval_ms = 20

[security]
default_password = "changeme"
pbkdf2_iterations = 20000
max_password_len = 32
encrypt_relay = false
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.node.data_dir, PathBuf::from("/var/lib/locomm"));
        assert_eq!(config.node.node_id, 3);
        assert_eq!(config.computer.transport, ComputerTransport::Tcp);
        assert_eq!(config.computer.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.radio.peers.len(), 2);
        assert_eq!(config.radio.queue_capacity, 8);
        assert_eq!(config.security.default_password, "changeme");
        assert_eq!(config.security.pbkdf2_iterations, 20_000);
        assert!(!config.security.encrypt_relay);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[node
log_level = "debug"
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[node]
node_id = "seven"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_from_toml_unknown_transport() {
        let toml = r#"
[computer]
transport = "bluetooth"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_to_toml_contains_sections() {
        let toml = Config::default().to_toml().unwrap();
        assert!(toml.contains("[node]"));
        assert!(toml.contains("[computer]"));
        assert!(toml.contains("[radio]"));
        assert!(toml.contains("[security]"));
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.node.node_id = 42;
        original.computer.transport = ComputerTransport::Tcp;
        original.radio.peers = vec!["127.0.0.1:7272".to_string()];
        original.security.encrypt_relay = false;

        let toml = original.to_toml().unwrap();
        assert_eq!(Config::from_toml(&toml).unwrap(), original);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.node.log_level = "debug".to_string();
        original.radio.queue_capacity = 16;

        original.save(&config_path).unwrap();
        assert!(config_path.exists());
        assert_eq!(Config::load(&config_path).unwrap(), original);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "not [valid toml").unwrap();

        let err = Config::load(&config_path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("locomm/config.toml"));
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_iterations_floor() {
        let mut config = Config::default();
        config.security.pbkdf2_iterations = 9_999;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidIterations {
                min: 10_000,
                got: 9_999
            })
        );
    }

    #[test]
    fn test_validate_password_lengths() {
        let mut config = Config::default();
        config.security.max_password_len = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxPasswordLen(0)));

        config.security.max_password_len = 4;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidDefaultPassword(8))
        );

        config.security.max_password_len = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_queue_capacity() {
        let mut config = Config::default();
        config.radio.queue_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidQueueCapacity(0)));

        let mut config = Config::default();
        config.computer.queue_capacity = 2048;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidQueueCapacity(2048))
        );
    }

    #[test]
    fn test_validate_poll_interval() {
        let mut config = Config::default();
        config.radio.poll_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPollInterval(0)));
    }

    #[test]
    fn test_validate_broadcast_node_id() {
        let mut config = Config::default();
        config.node.node_id = 0xff;
        assert_eq!(config.validate(), Err(ConfigError::ReservedNodeId(0xff)));
    }

    #[test]
    fn test_validate_bad_peer_address() {
        let mut config = Config::default();
        config.radio.peers = vec!["not-an-address".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress {
                field: "radio.peers",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_peer_hostnames() {
        let mut config = Config::default();
        config.radio.peers = vec![
            "relay-2.local:7171".to_string(),
            "localhost:7272".to_string(),
            "[::1]:7171".to_string(),
        ];
        assert!(config.validate().is_ok());

        for bad in ["relay-2.local", ":7171", "relay:port", "relay:70000", "fe80::1:7171"] {
            config.radio.peers = vec![bad.to_string()];
            assert!(config.validate().is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_validate_listen_addr_only_checked_for_tcp() {
        let mut config = Config::default();
        config.computer.listen_addr = "bogus".to_string();
        assert!(config.validate().is_ok());

        config.computer.transport = ComputerTransport::Tcp;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.node.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );

        config.node.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::remove_var("LOCOMM_NODE_ID");
        std::env::set_var("LOCOMM_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.node.log_level, "trace");

        std::env::remove_var("LOCOMM_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("LOCOMM_LOG_LEVEL", "");
        std::env::set_var("LOCOMM_NODE_ID", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.node.log_level, "info");
        assert_eq!(config.node.node_id, 1);

        std::env::remove_var("LOCOMM_LOG_LEVEL");
        std::env::remove_var("LOCOMM_NODE_ID");
    }

    #[test]
    #[serial]
    fn test_env_override_node_id() {
        std::env::remove_var("LOCOMM_LOG_LEVEL");
        std::env::set_var("LOCOMM_NODE_ID", "12");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.node.node_id, 12);

        std::env::set_var("LOCOMM_NODE_ID", "300");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.node.node_id, 1);

        std::env::remove_var("LOCOMM_NODE_ID");
    }
}
