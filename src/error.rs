use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for cpuprobe
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Topology source could not be opened or read
    #[error("Topology unavailable: {reason}")]
    TopologyUnavailable { reason: String },

    /// Topology source returned data that cannot be aggregated
    #[error("Invalid topology: {reason}")]
    InvalidTopology { reason: String },

    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration parsing failed
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Configuration file is invalid
    #[error("Invalid configuration file {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    /// Invalid argument provided
    #[error("Invalid argument: {argument}")]
    InvalidArgument { argument: String },

    /// Path name not defined on this target
    #[error("Unknown path: {name}")]
    UnknownPath { name: String },
}

impl ProbeError {
    /// Create a topology unavailable error
    pub fn topology_unavailable(reason: impl Into<String>) -> Self {
        ProbeError::TopologyUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid topology error
    pub fn invalid_topology(reason: impl Into<String>) -> Self {
        ProbeError::InvalidTopology {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        ProbeError::Config {
            message: message.into(),
        }
    }

    /// Create a config invalid error
    pub fn config_invalid(path: PathBuf, reason: impl Into<String>) -> Self {
        ProbeError::ConfigInvalid {
            path,
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(argument: impl Into<String>) -> Self {
        ProbeError::InvalidArgument {
            argument: argument.into(),
        }
    }

    /// Create an unknown path error
    pub fn unknown_path(name: impl Into<String>) -> Self {
        ProbeError::UnknownPath { name: name.into() }
    }
}

/// Result type alias for cpuprobe operations
pub type Result<T> = std::result::Result<T, ProbeError>;

impl From<toml::de::Error> for ProbeError {
    fn from(err: toml::de::Error) -> Self {
        ProbeError::Config {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::Config {
            message: err.to_string(),
        }
    }
}
