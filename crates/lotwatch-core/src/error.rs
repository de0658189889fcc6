//! Error types shared by the lotwatch crates.

use thiserror::Error;

/// Errors raised by the core crate itself.
#[derive(Error, Debug)]
pub enum LotwatchError {
    /// The configuration could not be loaded or is out of range
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A value failed validation (item ids, stored enum names)
    #[error("validation error: {0}")]
    Validation(String),
}

/// Problems with the configuration file or its values.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No home or XDG directory to put `config.toml` and the database in
    #[error("no config or data directory for this user")]
    NoConfigDir,

    /// The file is not valid TOML for `AppConfig`
    #[error("config.toml is not valid: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The config could not be written back
    #[error("could not write config as TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Reading or writing the file failed
    #[error("config file I/O: {0}")]
    Io(#[from] std::io::Error),

    /// A value is out of its allowed range
    #[error("{field} {reason}")]
    InvalidValue {
        /// Dotted field path, e.g. `search.page_limit`
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Result over [`LotwatchError`].
pub type Result<T> = std::result::Result<T, LotwatchError>;

/// Result over [`ConfigError`].
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
