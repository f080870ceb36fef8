//! Network section configuration
//!
//! Controls where events are shipped and how the connection behaves:
//! server list, transport selection (plain TCP or TLS), the ack timeout
//! and the reconnect delay.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Which transport carries the protocol
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP, no encryption (default - TLS needs a CA to verify against)
    #[default]
    Tcp,
    /// TLS over TCP
    Tls,
}

impl TransportKind {
    /// Name as it appears in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tls => "tls",
        }
    }
}

/// Network configuration
///
/// # Example
///
/// ```toml
/// [network]
/// servers = ["logs.example.com:5043"]
/// transport = "tls"
/// ssl_ca = "/etc/skiff/ca.crt"
/// timeout = "15s"
/// reconnect = "1s"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Servers to ship to, as `host:port`. Connection attempts rotate
    /// through this list.
    pub servers: Vec<String>,

    /// Transport: "tcp" or "tls"
    /// Default: tls
    pub transport: TransportKind,

    /// How long an acknowledgement may be outstanding before the
    /// connection is considered dead
    /// Default: 15s
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Delay before a reconnection attempt
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub reconnect: Duration,

    /// CA certificate bundle used to verify the server (required for tls)
    pub ssl_ca: Option<String>,

    /// Client certificate presented to the server (optional, tls only)
    pub ssl_certificate: Option<String>,

    /// Private key matching `ssl_certificate` (tls only)
    pub ssl_key: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            servers: vec!["localhost:5043".into()],
            transport: TransportKind::Tcp,
            timeout: Duration::from_secs(15),
            reconnect: Duration::from_secs(1),
            ssl_ca: None,
            ssl_certificate: None,
            ssl_key: None,
        }
    }
}

impl NetworkConfig {
    /// Validate the network section
    ///
    /// TLS requires `ssl_ca`, and a client certificate must come with its
    /// key (and vice versa). Plain TCP rejects all ssl options.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }

        for server in &self.servers {
            if !is_host_port(server) {
                return Err(ConfigError::invalid_server(server));
            }
        }

        match self.transport {
            TransportKind::Tls => {
                if self.ssl_ca.is_none() {
                    return Err(ConfigError::MissingField {
                        transport: "tls",
                        field: "ssl_ca",
                    });
                }
                if self.ssl_certificate.is_some() && self.ssl_key.is_none() {
                    return Err(ConfigError::MissingField {
                        transport: "tls",
                        field: "ssl_key",
                    });
                }
                if self.ssl_key.is_some() && self.ssl_certificate.is_none() {
                    return Err(ConfigError::MissingField {
                        transport: "tls",
                        field: "ssl_certificate",
                    });
                }
            }
            TransportKind::Tcp => {
                if self.ssl_ca.is_some() {
                    return Err(ConfigError::UnsupportedField {
                        transport: "tcp",
                        field: "ssl_ca",
                    });
                }
                if self.ssl_certificate.is_some() || self.ssl_key.is_some() {
                    return Err(ConfigError::UnsupportedField {
                        transport: "tcp",
                        field: "ssl_certificate",
                    });
                }
            }
        }

        Ok(())
    }
}

/// Accept `host:port` and `[v6addr]:port` forms with a numeric port
fn is_host_port(s: &str) -> bool {
    let Some((host, port)) = s.rsplit_once(':') else {
        return false;
    };
    if host.is_empty() {
        return false;
    }
    port.parse::<u16>().is_ok()
}
