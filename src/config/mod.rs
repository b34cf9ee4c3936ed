//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod backends;
mod messaging;
mod server;

pub use backends::{BackendConfig, TimeoutConfig};
pub use messaging::{AmqpConfig, ConsumerConfig, MessagingConfig, MessagingType, ReconnectConfig};
pub use server::ServerConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SWITCHYARD_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SWITCHYARD";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "SWITCHYARD_LOG";
/// Environment variable selecting the log output format (`json` or `text`).
pub const LOG_FORMAT_ENV_VAR: &str = "SWITCHYARD_LOG_FORMAT";

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inbound HTTP server configuration.
    pub server: ServerConfig,
    /// Downstream capability addresses.
    pub backends: BackendConfig,
    /// Per-call and connect timeouts.
    pub timeouts: TimeoutConfig,
    /// Broker and consumer configuration.
    pub messaging: MessagingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("messaging.consumer.bindings")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
