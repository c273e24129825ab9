//! Equality-based label selectors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// One clause of a label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// `key=value` or `key==value`.
    Equals(String, String),
    /// `key!=value`. Also matches pods without the key.
    NotEquals(String, String),
    /// `key`.
    Exists(String),
    /// `!key`.
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(key, value) => labels.get(key) == Some(value),
            Self::NotEquals(key, value) => labels.get(key) != Some(value),
            Self::Exists(key) => labels.contains_key(key),
            Self::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

/// Parsed label selector, e.g. `app=web,tier!=cache`.
///
/// All requirements must hold for a pod to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    raw: String,
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Parse a selector string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSelector`] for an empty string and
    /// [`ConfigError::InvalidSelector`] when a clause is malformed.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::MissingSelector);
        }

        let invalid = |reason: &str| ConfigError::InvalidSelector {
            selector: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut requirements = Vec::new();
        for clause in trimmed.split(',') {
            let clause = clause.trim();
            if clause.is_empty() {
                return Err(invalid("empty clause"));
            }

            let requirement = if let Some((key, value)) = clause.split_once("!=") {
                Requirement::NotEquals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = clause.split_once("==") {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = clause.split_once('=') {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some(key) = clause.strip_prefix('!') {
                Requirement::DoesNotExist(key.trim().to_string())
            } else {
                Requirement::Exists(clause.to_string())
            };

            let key = match &requirement {
                Requirement::Equals(key, _)
                | Requirement::NotEquals(key, _)
                | Requirement::Exists(key)
                | Requirement::DoesNotExist(key) => key,
            };
            if key.is_empty() {
                return Err(invalid("empty label key"));
            }
            if key.contains(char::is_whitespace) {
                return Err(invalid("label key contains whitespace"));
            }

            requirements.push(requirement);
        }

        Ok(Self {
            raw: trimmed.to_string(),
            requirements,
        })
    }

    /// The selector in its textual form, suitable for a server-side query.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed requirements.
    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Whether `labels` satisfy every requirement.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
