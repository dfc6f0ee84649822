//! Service configuration, loaded from TOML.
//!
//! The default file lives at `$XDG_CONFIG_HOME/opencenter/opencenter.toml`.
//! Every field is optional:
//!
//! ```toml
//! data_dir = "/var/lib/opencenter"
//! log_filter = "opencenter=debug"
//!
//! [[fact_types]]
//! name = "chef_server_uri"
//! inheritance = "parent_clobber"
//! ```

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiConfig;
use crate::facts::{FactType, FactTypeRegistry};

const APP_DIR: &str = "opencenter";
const CONFIG_FILE: &str = "opencenter.toml";

/// Errors from configuration loading.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(opencenter::config::read),
        help("Ensure the config file is readable, or omit it to run with defaults.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {message}")]
    #[diagnostic(
        code(opencenter::config::parse),
        help(
            "Check the TOML syntax. Fact types take a `name` and an `inheritance` of \
             union, parent_clobber, child_clobber or none."
        )
    )]
    Parse { message: String },
}

/// Top-level service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory for the persistent store; unset keeps every entity in memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Merge policies registered on top of the builtins.
    #[serde(default)]
    pub fact_types: Vec<FactType>,
}

fn default_log_filter() -> String {
    "info".into()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_filter: default_log_filter(),
            fact_types: Vec::new(),
        }
    }
}

fn xdg_dir(var: &str, fallback: &str) -> Option<PathBuf> {
    std::env::var(var)
        .map(PathBuf::from)
        .ok()
        .or_else(|| std::env::var("HOME").ok().map(|home| Path::new(&home).join(fallback)))
        .map(|dir| dir.join(APP_DIR))
}

impl ServiceConfig {
    /// `$XDG_CONFIG_HOME/opencenter/opencenter.toml`, if a home can be found.
    pub fn default_path() -> Option<PathBuf> {
        xdg_dir("XDG_CONFIG_HOME", ".config").map(|dir| dir.join(CONFIG_FILE))
    }

    /// `$XDG_DATA_HOME/opencenter`.
    pub fn default_data_dir() -> Option<PathBuf> {
        xdg_dir("XDG_DATA_HOME", ".local/share")
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Load from `path`, or fall back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Builtin fact types plus the configured ones.
    pub fn fact_registry(&self) -> FactTypeRegistry {
        let registry = FactTypeRegistry::builtin();
        registry.extend(self.fact_types.iter().cloned());
        registry
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            data_dir: self.data_dir.clone(),
            fact_types: self.fact_registry(),
        }
    }
}
