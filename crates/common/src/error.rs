//! Common error types for appdaemon components.

use std::fmt;

/// A specialized Result type for appdaemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for appdaemon operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Application list error: {0}")]
    AppList(String),

    #[error("Healthcheck error: {0}")]
    Healthcheck(String),

    #[error("Launcher error: {0}")]
    Launcher(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new application list error.
    pub fn app_list(msg: impl fmt::Display) -> Self {
        Error::AppList(msg.to_string())
    }

    /// Create a new healthcheck error.
    pub fn healthcheck(msg: impl fmt::Display) -> Self {
        Error::Healthcheck(msg.to_string())
    }

    /// Create a new launcher error.
    pub fn launcher(msg: impl fmt::Display) -> Self {
        Error::Launcher(msg.to_string())
    }

    /// Create a new telemetry error.
    pub fn telemetry(msg: impl fmt::Display) -> Self {
        Error::Telemetry(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    /// Process exit code for an error that aborts daemon startup.
    ///
    /// Configuration failures exit with 2, application list failures with 3
    /// and everything else with 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 2,
            Error::AppList(_) => 3,
            _ => 1,
        }
    }
}
