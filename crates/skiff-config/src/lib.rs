//! Skiff configuration
//!
//! TOML-based configuration loading with sensible defaults. A missing or
//! empty config file yields a working agent shipping to `localhost:5043`
//! over plain TCP; only specify what you need to change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use skiff_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[network]\nservers = [\"logs.example.com:5043\"]").unwrap();
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [general]
//! persist_dir = "/var/lib/skiff"
//!
//! [spool]
//! size = 1024
//! idle_flush = "5s"
//!
//! [network]
//! servers = ["logs.example.com:5043"]
//! transport = "tls"
//! ssl_ca = "/etc/skiff/ca.crt"
//! timeout = "15s"
//! reconnect = "1s"
//! ```

mod error;
mod general;
mod logging;
mod network;
mod spool;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use general::GeneralConfig;
pub use logging::{LogConfig, LogLevel};
pub use network::{NetworkConfig, TransportKind};
pub use spool::SpoolConfig;

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings (persist directory)
    pub general: GeneralConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// Event spooling (batch size, idle flush)
    pub spool: SpoolConfig,

    /// Network section (servers, transport, timeouts)
    pub network: NetworkConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    /// Validate the configuration
    ///
    /// Called automatically by `from_file`/`from_str`.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.spool.validate()?;
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
