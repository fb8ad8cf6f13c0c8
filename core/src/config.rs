//! Bridge configuration
//!
//! The only configuration a host must supply is the filesystem root passed to
//! `start`. Everything else has a default and can be overridden, lowest to
//! highest precedence, by:
//!
//! 1. a TOML file: an explicit path, else `PYBRIDGE_CONFIG_PATH`, else an
//!    optional `pybridge.toml` inside the search root
//! 2. environment variables such as `PYBRIDGE_INPUT__POLL_INTERVAL_MS=100`
//!
//! # Example
//!
//! ```rust,no_run
//! use pybridge_core::config::BridgeConfig;
//!
//! let config = BridgeConfig::builder()
//!     .search_root(Some("/data/app/py".into()))
//!     .build()?;
//! assert_eq!(config.interpreter.stdlib_archive, "stdlib.zip");
//! # Ok::<(), pybridge_core::BridgeError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BridgeError;

/// Name of the optional config file looked up inside the search root
pub const ROOT_CONFIG_FILE: &str = "pybridge.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "PYBRIDGE_CONFIG_PATH";

const ENV_PREFIX: &str = "PYBRIDGE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub interpreter: InterpreterConfig,
    pub input: InputConfig,
    pub host: HostConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Standard-library archive, relative to the search root
    pub stdlib_archive: String,

    /// Module imported right after the stdio shim is installed
    pub bootstrap_module: String,

    /// Appended to the module search path after the root and the archive
    pub extra_search_paths: Vec<PathBuf>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            stdlib_archive: "stdlib.zip".to_string(),
            bootstrap_module: "bootstrap".to_string(),
            extra_search_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Suffix the host appends to a response once a real line is ready
    pub completion_marker: String,

    /// Backoff between input polls
    pub poll_interval_ms: u64,
}

impl InputConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            completion_marker: ":ok".to_string(),
            poll_interval_ms: 300,
        }
    }
}

/// Names of the callback methods on the host object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub emit_method: String,
    pub request_method: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            emit_method: "emit".to_string(),
            request_method: "requestLine".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration for a search root using process environment
    pub fn load(search_root: &Path) -> Result<Self, BridgeError> {
        Self::builder()
            .search_root(Some(search_root.to_path_buf()))
            .build()
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        let archive = &self.interpreter.stdlib_archive;
        if archive.trim().is_empty() {
            return Err(BridgeError::InvalidArgument(
                "interpreter.stdlib_archive must not be empty".to_string(),
            ));
        }
        if Path::new(archive).is_absolute() {
            return Err(BridgeError::InvalidArgument(format!(
                "interpreter.stdlib_archive must be relative to the search root, got {}",
                archive
            )));
        }
        if !is_module_name(&self.interpreter.bootstrap_module) {
            return Err(BridgeError::InvalidArgument(format!(
                "interpreter.bootstrap_module must be a dotted module name, got {:?}",
                self.interpreter.bootstrap_module
            )));
        }
        if self.input.completion_marker.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "input.completion_marker must not be empty".to_string(),
            ));
        }
        if self.input.poll_interval_ms == 0 {
            return Err(BridgeError::InvalidArgument(
                "input.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the effective configuration
    pub fn to_toml(&self) -> Result<String, BridgeError> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::InvalidArgument(e.to_string()))
    }
}

/// `name` or `package.name`, each part a Python identifier
fn is_module_name(name: &str) -> bool {
    name.split('.').all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
            && chars.all(|c| c == '_' || c.is_alphanumeric())
    })
}

/// Builder for [`BridgeConfig`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    search_root: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
}

impl ConfigBuilder {
    /// Explicit config file (must exist)
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Root passed to `start`; its `pybridge.toml` is read if present
    pub fn search_root(mut self, root: Option<PathBuf>) -> Self {
        self.search_root = root;
        self
    }

    /// Read overrides from this map instead of the process environment
    pub fn env_source(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    fn env_var(&self, key: &str) -> Option<String> {
        match &self.env {
            Some(map) => map.get(key).cloned(),
            None => std::env::var(key).ok(),
        }
    }

    pub fn build(self) -> Result<BridgeConfig, BridgeError> {
        let mut builder = config::Config::builder();

        let explicit = self
            .config_path
            .clone()
            .or_else(|| self.env_var(CONFIG_PATH_ENV).map(PathBuf::from));

        if let Some(path) = explicit {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        } else if let Some(root) = &self.search_root {
            builder = builder.add_source(
                config::File::from(root.join(ROOT_CONFIG_FILE))
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("interpreter.extra_search_paths")
                .source(self.env.clone()),
        );

        let config: BridgeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
