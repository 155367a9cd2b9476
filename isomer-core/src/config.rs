use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// How strictly peer schemas must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    /// Both peers declare identical record layouts; fields are written
    /// positionally behind a schema fingerprint.
    #[default]
    Strict,
    /// Peers may add or remove fields independently; fields are written
    /// by name and unknown ones are skipped.
    Evolving,
}

impl fmt::Display for SchemaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaMode::Strict => f.write_str("strict"),
            SchemaMode::Evolving => f.write_str("evolving"),
        }
    }
}

fn default_max_depth() -> usize {
    256
}

/// Session settings.
///
/// ```toml
/// schema_mode = "evolving"
/// max_depth = 64
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schema_mode: SchemaMode,
    /// Maximum nesting of values in one pass.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_mode: SchemaMode::default(),
            max_depth: default_max_depth(),
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn with_schema_mode(mut self, mode: SchemaMode) -> Self {
        self.schema_mode = mode;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Toml(#[from] toml::de::Error),
}
