//! General agent settings

use serde::Deserialize;

/// Top-level settings that don't belong to a single component
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory where the registrar persists acknowledged offsets
    /// Default: "." (current working directory)
    pub persist_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            persist_dir: ".".into(),
        }
    }
}
