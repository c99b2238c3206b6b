//! Runtime configuration.
//!
//! Layered as: defaults, then an optional TOML file, then environment
//! variables. The CLI applies its flags on top.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3030
//!
//! [broker]
//! url = "redis://127.0.0.1:6379"
//! channel_prefix = "pulse:events"
//! schema_version = 1
//!
//! [stream]
//! max_buffered = 1024
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{PulseError, PulseResult};
use crate::stream::StreamOptions;

/// Default bind host.
const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port.
const DEFAULT_PORT: u16 = 3030;

/// Default broker channel prefix.
const DEFAULT_CHANNEL_PREFIX: &str = "pulse:events";

/// Version of the event wire schema. Bump on incompatible changes so old and
/// new processes never share a channel.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub server: ServerConfig,
    pub broker: BrokerSettings,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Broker connection settings. No `url` means single-process mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub url: Option<String>,
    pub channel_prefix: String,
    pub schema_version: u32,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: None,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl BrokerSettings {
    /// Versioned channel name, e.g. `pulse:events:v1`.
    pub fn channel(&self) -> String {
        format!("{}:v{}", self.channel_prefix, self.schema_version)
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub max_buffered: Option<usize>,
}

impl StreamSettings {
    pub fn options(&self) -> StreamOptions {
        StreamOptions {
            max_buffered: self.max_buffered,
        }
    }
}

impl PulseConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> PulseResult<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                debug!(path = %path.display(), "Loaded configuration file");
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> PulseResult<Self> {
        toml::from_str(text).map_err(|e| PulseError::config(e.to_string()))
    }

    /// Apply `PULSE_*` overrides read through `lookup`.
    ///
    /// `PULSE_REDIS_URL` falls back to `REDIS_URL`; an empty value disables
    /// the broker.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> PulseResult<()> {
        if let Some(host) = lookup("PULSE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PULSE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| PulseError::config(format!("PULSE_PORT is not a port: {}", port)))?;
        }
        if let Some(url) = lookup("PULSE_REDIS_URL").or_else(|| lookup("REDIS_URL")) {
            self.broker.url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(prefix) = lookup("PULSE_CHANNEL") {
            self.broker.channel_prefix = prefix;
        }
        Ok(())
    }

    /// `host:port` to bind the server on.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
