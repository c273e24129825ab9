//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::error::ConfigError;
use crate::pod::LabelSelector;

use super::PortPair;

fn default_namespace() -> String {
    "default".to_string()
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_forward_timeout_ms() -> u64 {
    30_000
}

fn default_backoff_interval_ms() -> u64 {
    5_000
}

/// Configuration for a log aggregation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Namespace to list pods in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Label selector matching the pods to stream.
    #[serde(default)]
    pub label_selector: String,
    /// Keep watching for new pods and streaming until stopped.
    #[serde(default)]
    pub follow: bool,
    /// Container to read logs from; the pod default when unset.
    #[serde(default)]
    pub container: Option<String>,
    /// Only deliver lines whose content matches this regular expression.
    #[serde(default)]
    pub log_filter_pattern: Option<String>,
    /// How often buffered entries are sorted and delivered.
    /// Zero falls back to the default.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            label_selector: String::new(),
            follow: false,
            container: None,
            log_filter_pattern: None,
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl StreamConfig {
    /// Stream every pod matching `label_selector` once, then stop.
    #[must_use]
    pub fn from_selected_pods(label_selector: impl Into<String>) -> Self {
        Self {
            label_selector: label_selector.into(),
            ..Self::default()
        }
    }

    /// Follow pods matching `label_selector` until the caller stops the run.
    #[must_use]
    pub fn follow_selected_pods(label_selector: impl Into<String>) -> Self {
        Self {
            label_selector: label_selector.into(),
            follow: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    #[must_use]
    pub fn with_filter_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.log_filter_pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Effective flush interval.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        if self.flush_interval_ms == 0 {
            Duration::from_millis(default_flush_interval_ms())
        } else {
            Duration::from_millis(self.flush_interval_ms)
        }
    }

    /// Parse the label selector.
    ///
    /// # Errors
    ///
    /// Returns an error if the selector is missing or malformed.
    pub fn selector(&self) -> Result<LabelSelector, ConfigError> {
        LabelSelector::parse(&self.label_selector)
    }

    /// Check the configuration before a run starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the selector is missing or malformed, or the
    /// filter pattern is not a valid regular expression.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.selector()?;
        if let Some(pattern) = &self.log_filter_pattern {
            regex::Regex::new(pattern)?;
        }
        Ok(())
    }
}

/// Configuration for forwarding ports to a pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Namespace to look for the target pod in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Label selector matching candidate pods.
    #[serde(default)]
    pub label_selector: String,
    /// Ports to forward, e.g. `"8080"`, `":8080"`, `"9000:8080"`.
    #[serde(default)]
    pub ports: Vec<PortPair>,
    /// Deadline for a tunnel to become ready.
    #[serde(default = "default_forward_timeout_ms")]
    pub timeout_ms: u64,
    /// Interval between reconnect attempts.
    #[serde(default = "default_backoff_interval_ms")]
    pub backoff_interval_ms: u64,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            label_selector: String::new(),
            ports: Vec::new(),
            timeout_ms: default_forward_timeout_ms(),
            backoff_interval_ms: default_backoff_interval_ms(),
        }
    }
}

impl ForwardConfig {
    /// Forward to the first pod matching `label_selector` in `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>, label_selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            label_selector: label_selector.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_port(mut self, pair: PortPair) -> Self {
        self.ports.push(pair);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_backoff_interval(mut self, interval: Duration) -> Self {
        self.backoff_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Effective backoff interval. Zero means the default.
    #[must_use]
    pub fn backoff_interval(&self) -> Duration {
        if self.backoff_interval_ms == 0 {
            Duration::from_millis(default_backoff_interval_ms())
        } else {
            Duration::from_millis(self.backoff_interval_ms)
        }
    }

    /// Reconnect pacing that first fires one backoff interval from now.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn backoff(&self) -> Interval {
        let period = self.backoff_interval();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Parse the label selector.
    ///
    /// # Errors
    ///
    /// Returns an error if the selector is missing or malformed.
    pub fn selector(&self) -> Result<LabelSelector, ConfigError> {
        LabelSelector::parse(&self.label_selector)
    }

    /// Check the configuration before establishing a tunnel.
    ///
    /// # Errors
    ///
    /// Returns an error if the selector is missing or malformed, no ports
    /// are given, a remote port is zero, or the timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.selector()?;
        if self.ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        if self.ports.iter().any(|p| p.remote() == 0) {
            return Err(ConfigError::ZeroRemotePort);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval("timeout_ms"));
        }
        Ok(())
    }
}
