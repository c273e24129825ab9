//! Diagnostic sink used by the stream and forward pipelines.
//!
//! Components report caller-relevant progress ("streaming pod", "reconnecting")
//! through a [`Logger`]. The default sink forwards to `tracing`, so callers
//! who already install a subscriber get these messages for free.

use std::fmt;
use std::sync::Arc;

/// Fire-and-forget diagnostic sink.
///
/// Implementations must not block for long and must never panic; a logger
/// failure is never surfaced to the component that called it.
pub trait Logger: Send + Sync {
    /// Record one diagnostic message.
    fn log(&self, message: &str);
}

/// Logger that forwards every message to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!(target: "podkit", "{message}");
    }
}

/// Logger that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _message: &str) {}
}

/// Adapts a plain function or closure into a [`Logger`].
///
/// # Examples
///
/// ```
/// use podkit::log::{LogFn, Logger};
///
/// let logger = LogFn::new(|msg: &str| println!("{msg}"));
/// logger.log("listing pods");
/// ```
pub struct LogFn<F>(F);

impl<F> LogFn<F>
where
    F: Fn(&str) + Send + Sync,
{
    /// Wrap `f` as a logger.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Logger for LogFn<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        (self.0)(message);
    }
}

impl<F> fmt::Debug for LogFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogFn")
    }
}

/// Shared logger handle passed to spawned tasks.
pub type SharedLogger = Arc<dyn Logger>;

/// The logger used when the caller does not supply one.
#[must_use]
pub fn default_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}
