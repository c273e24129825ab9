//! Forwarding error types.

use std::time::Duration;

use crate::error::{ApiError, ConfigError};

/// Errors that prevent a forward from being established.
#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
    /// The forward configuration was rejected.
    #[error("Invalid forward configuration: {0}")]
    Config(#[from] ConfigError),

    /// Listing pods or opening the tunnel failed.
    #[error("Cluster request failed: {0}")]
    Api(#[from] ApiError),

    /// Nothing schedulable matched the selector.
    #[error("No pods found in namespace {namespace} matching {selector}")]
    NoPods { namespace: String, selector: String },

    /// The tunnel did not become ready in time.
    #[error("Tunnel not ready after {0:?}")]
    Timeout(Duration),
}
