//! Local/remote port pairs for forwarding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Port value meaning "not set".
///
/// As a local port it asks for an ephemeral port; as a lookup result it means
/// the remote port was never forwarded.
pub const PORT_UNSPECIFIED: u16 = 0;

/// A remote port to forward and the local port to expose it on.
///
/// Parses from `"local:remote"`, `":remote"` (ephemeral local port) or a bare
/// `"port"` (same number on both sides).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortPair {
    local: u16,
    remote: u16,
}

impl PortPair {
    /// Forward `remote` to `local`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroRemotePort`] if `remote` is zero.
    pub fn new(local: u16, remote: u16) -> Result<Self, ConfigError> {
        if remote == PORT_UNSPECIFIED {
            return Err(ConfigError::ZeroRemotePort);
        }
        Ok(Self { local, remote })
    }

    /// Forward `remote` to an ephemeral local port.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroRemotePort`] if `remote` is zero.
    pub fn ephemeral(remote: u16) -> Result<Self, ConfigError> {
        Self::new(PORT_UNSPECIFIED, remote)
    }

    /// The requested local port, [`PORT_UNSPECIFIED`] for ephemeral.
    #[must_use]
    pub fn local(&self) -> u16 {
        self.local
    }

    #[must_use]
    pub fn remote(&self) -> u16 {
        self.remote
    }
}

fn parse_port(raw: &str, input: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidPort(input.to_string()))
}

impl FromStr for PortPair {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((local, remote)) => {
                if remote.trim().is_empty() {
                    return Err(ConfigError::InvalidPort(s.to_string()));
                }
                let local = if local.trim().is_empty() {
                    PORT_UNSPECIFIED
                } else {
                    parse_port(local, s)?
                };
                Self::new(local, parse_port(remote, s)?)
            }
            None => {
                let port = parse_port(s, s)?;
                Self::new(port, port)
            }
        }
    }
}

impl TryFrom<String> for PortPair {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortPair> for String {
    fn from(pair: PortPair) -> Self {
        pair.to_string()
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}
