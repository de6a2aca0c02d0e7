use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("TOML parse error: {0}")]
    Parse(String),

    #[error("validation error: {field}: {message}")]
    Validation {
        /// Dotted path, e.g. `interpreter.port`.
        field: String,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
