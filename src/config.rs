//! Server and client configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::keys::{MAX_KEY_BITS, MIN_KEY_BITS};
use crate::crypto::{DEFAULT_CLIENT_KEY_BITS, DEFAULT_SERVER_KEY_BITS};
use crate::error::{ChatError, ChatResult};

/// Default TCP port
pub const DEFAULT_PORT: u16 = 27101;

/// Default deadline for reaching the active state, in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_addr: String,

    /// Modulus size of a freshly generated server key
    pub key_bits: usize,

    /// Seconds a connection may spend in handshake, auth and registration
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            key_bits: DEFAULT_SERVER_KEY_BITS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> ChatResult<Self> {
        load_json(path)
    }

    /// Pre-active deadline as a `Duration`
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> ChatResult<()> {
        validate_key_bits(self.key_bits)?;
        if self.handshake_timeout_secs == 0 {
            return Err(ChatError::Config(
                "handshake_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, `host:port`
    pub server_addr: String,

    /// Display name to register with
    pub username: String,

    /// Modulus size of a freshly generated client key
    pub key_bits: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            username: String::new(),
            key_bits: DEFAULT_CLIENT_KEY_BITS,
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> ChatResult<Self> {
        load_json(path)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> ChatResult<()> {
        validate_key_bits(self.key_bits)?;
        if self.server_addr.trim().is_empty() {
            return Err(ChatError::Config("server_addr is empty".to_string()));
        }
        Ok(())
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> ChatResult<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ChatError::Config(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| ChatError::Config(format!("{}: {}", path.display(), e)))
}

fn validate_key_bits(bits: usize) -> ChatResult<()> {
    if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) || bits % 8 != 0 {
        return Err(ChatError::Config(format!(
            "key_bits must be a multiple of 8 between {} and {}, got {}",
            MIN_KEY_BITS, MAX_KEY_BITS, bits
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:27101");
        assert_eq!(config.key_bits, 2048);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr, "127.0.0.1:27101");
        assert_eq!(config.key_bits, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"bind_addr": "127.0.0.1:9000"}"#).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.key_bits, DEFAULT_SERVER_KEY_BITS);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{"username": "dana", "key_bits": 2048}"#).unwrap();

        let config = ClientConfig::from_json_file(&path).unwrap();
        assert_eq!(config.username, "dana");
        assert_eq!(config.key_bits, 2048);
        assert_eq!(config.server_addr, "127.0.0.1:27101");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = ServerConfig {
            key_bits: 1000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ChatError::Config(_))));

        let config = ServerConfig {
            handshake_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();

        assert!(matches!(
            ServerConfig::from_json_file(&path),
            Err(ChatError::Config(_))
        ));
    }
}
