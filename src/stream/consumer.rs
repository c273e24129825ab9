//! Consumers of sorted log batches.

use std::io::Write;

use super::LogEntry;

/// Receives each flushed batch of log entries, sorted by time.
///
/// Consumers run on the aggregator task; a slow consumer delays the next flush.
pub trait LogConsumer: Send {
    /// Handle one batch.
    fn on_logs(&mut self, logs: &[LogEntry]);
}

/// Ordered list of consumers, each called with the same batch.
#[derive(Default)]
pub struct ConsumerChain {
    consumers: Vec<Box<dyn LogConsumer>>,
}

impl ConsumerChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a consumer; it runs after those already added.
    pub fn push(&mut self, consumer: impl LogConsumer + 'static) {
        self.consumers.push(Box::new(consumer));
    }

    /// Builder form of [`ConsumerChain::push`].
    #[must_use]
    pub fn with(mut self, consumer: impl LogConsumer + 'static) -> Self {
        self.push(consumer);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

impl LogConsumer for ConsumerChain {
    fn on_logs(&mut self, logs: &[LogEntry]) {
        for consumer in &mut self.consumers {
            consumer.on_logs(logs);
        }
    }
}

/// Adapts a closure into a [`LogConsumer`].
pub struct ConsumerFn<F>(F);

impl<F> ConsumerFn<F>
where
    F: FnMut(&[LogEntry]) + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> LogConsumer for ConsumerFn<F>
where
    F: FnMut(&[LogEntry]) + Send,
{
    fn on_logs(&mut self, logs: &[LogEntry]) {
        (self.0)(logs);
    }
}

/// Writes each entry as one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesConsumer<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesConsumer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_batch(&mut self, logs: &[LogEntry]) -> std::io::Result<()> {
        for entry in logs {
            serde_json::to_writer(&mut self.writer, entry)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

impl<W: Write + Send> LogConsumer for JsonLinesConsumer<W> {
    fn on_logs(&mut self, logs: &[LogEntry]) {
        if let Err(e) = self.write_batch(logs) {
            tracing::warn!(error = %e, entries = logs.len(), "Failed to write JSON log batch");
        }
    }
}

/// Writes the text of each entry, one per line.
#[derive(Debug)]
pub struct TextConsumer<W> {
    writer: W,
}

impl<W: Write + Send> TextConsumer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_batch(&mut self, logs: &[LogEntry]) -> std::io::Result<()> {
        for entry in logs {
            writeln!(self.writer, "{}", entry.text)?;
        }
        self.writer.flush()
    }
}

impl<W: Write + Send> LogConsumer for TextConsumer<W> {
    fn on_logs(&mut self, logs: &[LogEntry]) {
        if let Err(e) = self.write_batch(logs) {
            tracing::warn!(error = %e, entries = logs.len(), "Failed to write log batch");
        }
    }
}
