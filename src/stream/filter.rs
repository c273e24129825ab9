//! Log line filters.

use regex::Regex;

use crate::error::ConfigError;

/// Decides whether a log line is delivered.
pub trait LogFilter: Send + Sync {
    /// Return `true` to keep `content`.
    fn keep(&self, content: &str) -> bool;
}

/// Keeps lines matching a regular expression anywhere in their content.
#[derive(Debug, Clone)]
pub struct RegexFilter {
    pattern: Regex,
}

impl RegexFilter {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFilter`] if the pattern does not compile.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl LogFilter for RegexFilter {
    fn keep(&self, content: &str) -> bool {
        self.pattern.is_match(content)
    }
}

/// Adapts a predicate closure into a [`LogFilter`].
pub struct FilterFn<F>(F);

impl<F> FilterFn<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> LogFilter for FilterFn<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn keep(&self, content: &str) -> bool {
        (self.0)(content)
    }
}
