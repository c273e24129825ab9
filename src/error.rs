//! Error types shared by the stream and forward pipelines.

use std::path::PathBuf;

/// Errors reported by a [`PodApi`](crate::pod::PodApi) implementation.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// The requested object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was rejected or could not be completed.
    #[error("Request failed: {0}")]
    Request(String),

    /// The underlying connection went away.
    #[error("Connection closed")]
    Closed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// No label selector was supplied.
    #[error("Label selector is required")]
    MissingSelector,

    /// The label selector could not be parsed.
    #[error("Invalid label selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// No port pairs were supplied for forwarding.
    #[error("No ports specified")]
    NoPorts,

    /// A port pair had a zero remote port.
    #[error("Remote port is required")]
    ZeroRemotePort,

    /// A port pair string could not be parsed.
    #[error("Invalid port pair: {0:?}")]
    InvalidPort(String),

    /// The log filter pattern is not a valid regular expression.
    #[error("Invalid log filter pattern: {0}")]
    InvalidFilter(#[from] regex::Error),

    /// A timeout or interval was set to zero.
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
