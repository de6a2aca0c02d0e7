//! Configuration for the `ride-dap` adapter.
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

mod error;

pub use error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub interpreter: InterpreterConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Where the interpreter listens and how to greet it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub host: String,
    pub port: u16,
    pub protocol_version: u32,
    pub connect_attempts: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4502,
            protocol_version: 2,
            connect_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-subscriber buffer of inbound interpreter messages.
    pub subscriber_capacity: usize,
    pub evaluate_timeout_ms: u64,
    /// Upper bound on names listed by a `variables` request.
    pub max_variables: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 256,
            evaluate_timeout_ms: 5000,
            max_variables: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Record interpreter traffic as JSON lines to this file.
    pub traffic_log: Option<PathBuf>,
}

/// `<config dir>/ride-dap/config.toml`, if the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ride-dap").join("config.toml"))
}

/// Load `path`, or the default location when `path` is `None`.
///
/// A missing file at the default location yields the defaults; a missing
/// explicit file is an error.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            path.to_path_buf()
        }
        None => match default_path() {
            Some(path) if path.exists() => path,
            _ => {
                tracing::debug!("no config file, using defaults");
                return Ok(Config::default());
            }
        },
    };

    tracing::debug!(path = %path.display(), "reading config file");
    let content = std::fs::read_to_string(&path)?;
    load_from_str(&content)
}

/// Parse and validate a TOML document.
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let checks = [
        ("interpreter.port", config.interpreter.port == 0),
        (
            "interpreter.protocol_version",
            config.interpreter.protocol_version == 0,
        ),
        (
            "interpreter.connect_attempts",
            config.interpreter.connect_attempts == 0,
        ),
        (
            "session.subscriber_capacity",
            config.session.subscriber_capacity == 0,
        ),
        (
            "session.evaluate_timeout_ms",
            config.session.evaluate_timeout_ms == 0,
        ),
        ("session.max_variables", config.session.max_variables == 0),
    ];
    match checks.into_iter().find(|(_, zero)| *zero) {
        Some((field, _)) => Err(ConfigError::Validation {
            field: field.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        None => Ok(()),
    }
}
