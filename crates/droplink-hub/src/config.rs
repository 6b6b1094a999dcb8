//! Hub configuration
//!
//! TOML file where every field has a serde default, so a partial (or absent)
//! config file works. The default location is `~/.droplink/config.toml`; an
//! explicit `--config` path wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub turn: TurnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Hostname to advertise in ICE server URLs (e.g. behind a reverse proxy)
    #[serde(default)]
    pub public_host: Option<String>,
    /// Public IP to advertise when no hostname is configured
    #[serde(default)]
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Port of the co-hosted TURN relay (0 = disabled)
    #[serde(default = "default_turn_port")]
    pub port: u16,
    #[serde(default = "default_turn_realm")]
    pub realm: String,
    /// Shared secret for ephemeral relay credentials. Credentials are only
    /// issued when both realm and secret are set.
    #[serde(default)]
    pub secret: String,
    /// Relay port range the co-hosted TURN server allocates from
    #[serde(default = "default_relay_port_min")]
    pub relay_port_min: u16,
    #[serde(default = "default_relay_port_max")]
    pub relay_port_max: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_turn_port() -> u16 {
    3478 // standard STUN/TURN port
}

fn default_turn_realm() -> String {
    "droplink".to_string()
}

fn default_relay_port_min() -> u16 {
    49152
}

fn default_relay_port_max() -> u16 {
    65535
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_host: None,
            public_ip: None,
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            port: default_turn_port(),
            realm: default_turn_realm(),
            secret: String::new(),
            relay_port_min: default_relay_port_min(),
            relay_port_max: default_relay_port_max(),
        }
    }
}

impl HubConfig {
    /// Load from an explicit path, or from the default location if one
    /// exists, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = default_config_path();
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Save to the default location, creating the directory if needed.
    pub fn save(&self) -> Result<()> {
        let path = default_config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }
}

/// `~/.droplink/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".droplink")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HubConfig::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.turn.port, 3478);
        assert_eq!(config.turn.realm, "droplink");
        assert!(config.turn.secret.is_empty());
        assert_eq!(config.turn.relay_port_min, 49152);
        assert_eq!(config.turn.relay_port_max, 65535);
    }

    #[test]
    fn partial_file_keeps_defaults_elsewhere() {
        let config: HubConfig = toml::from_str(
            r#"
[server]
bind_address = "127.0.0.1:9100"

[turn]
secret = "swordfish"
"#,
        )
        .unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9100");
        assert_eq!(config.turn.secret, "swordfish");
        assert_eq!(config.turn.port, 3478);
        assert_eq!(config.turn.realm, "droplink");
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: HubConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert!(config.server.public_host.is_none());
    }
}
