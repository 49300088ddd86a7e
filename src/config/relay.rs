//! Relay configuration
//!
//! Settings are read from a TOML file; command line flags override them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::server::{RouterOptions, ServerConfig};

/// Default bind address
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Default listening port
pub const DEFAULT_PORT: u16 = 5003;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Answer rejected messages with an error message instead of dropping them
    pub reply_errors: bool,
    /// Route negotiation messages without a room to the sender's room
    pub infer_room: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            reply_errors: false,
            infer_room: false,
        }
    }
}

impl RelayConfig {
    /// Load configuration from a file, falling back to defaults if it doesn't exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Listener settings for the WebSocket server
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.bind.clone(), self.port)
    }

    /// Routing behaviour switches
    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            reply_errors: self.reply_errors,
            infer_room: self.infer_room,
        }
    }
}
