// Application configuration.
// Debug builds log the crate at debug level, release builds only warnings.

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use crate::signaling::TransferEncoding;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the log filter.
pub const LOG_ENV: &str = "PASTELINK_LOG";

#[cfg(debug_assertions)]
pub const LOGGING_FILTER: &str = "pastelink=debug,pastelink_lib=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const LOGGING_FILTER: &str = "pastelink=warn,pastelink_lib=warn,webrtc=error";

pub fn default_log_filter() -> &'static str {
    LOGGING_FILTER
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PeerConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub data_channel_label: String,
    /// Upper bound on ICE gathering before a description is handed out.
    pub gather_timeout_ms: u64,
    /// Upper bound on waiting for the data channel after both descriptions are set.
    pub connect_timeout_ms: u64,
    pub encoding: TransferEncoding,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
                ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
            ],
            data_channel_label: "pastelink-data".into(),
            gather_timeout_ms: 5_000,
            connect_timeout_ms: 30_000,
            encoding: TransferEncoding::Plain,
        }
    }
}

impl PeerConfig {
    /// Reads a JSON config file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: PeerConfig = serde_json::from_str(&raw)
            .map_err(|err| Error::config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(Error::config(format!("ICE server {} has an empty URL", server.id)));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::config(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        if self.data_channel_label.is_empty() {
            return Err(Error::config("data channel label cannot be empty"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::config("connect timeout must be positive"));
        }
        Ok(())
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
