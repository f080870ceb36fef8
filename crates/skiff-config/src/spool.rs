//! Event spooling configuration

use serde::Deserialize;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Spooler configuration
///
/// The spooler accumulates individual events into batches before handing
/// them to the publisher. A batch is flushed when it reaches `size` events
/// or when `idle_flush` elapses with a non-empty partial batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Maximum number of events per batch
    /// Default: 1024
    pub size: usize,

    /// Maximum time to hold a partial batch before flushing anyway
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub idle_flush: Duration,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            size: 1024,
            idle_flush: Duration::from_secs(5),
        }
    }
}

impl SpoolConfig {
    /// Validate the spool section
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(ConfigError::invalid_value(
                "spool.size",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}
