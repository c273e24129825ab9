//! Buffers entries from all readers and flushes them in time order.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::{sort_entries, ConsumerChain, LogConsumer, LogEntry};

/// Counters reported when an aggregator finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Non-empty batches delivered.
    pub batches: usize,
    /// Entries delivered across all batches.
    pub entries: usize,
}

/// Collects entries and periodically delivers them, sorted, to consumers.
///
/// Ordering holds within a batch only. An entry arriving after a flush is
/// never merged into an earlier batch, even if its timestamp is older.
pub struct LogAggregator {
    consumers: ConsumerChain,
    interval: Duration,
    buffer: Vec<LogEntry>,
    stats: AggregatorStats,
}

impl LogAggregator {
    #[must_use]
    pub fn new(consumers: ConsumerChain, interval: Duration) -> Self {
        Self {
            consumers,
            interval,
            buffer: Vec::new(),
            stats: AggregatorStats::default(),
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.buffer.push(entry);
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Sort the buffer, hand it to every consumer and clear it.
    ///
    /// Does nothing when the buffer is empty. Returns the batch size.
    pub fn flush(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }

        sort_entries(&mut self.buffer);
        self.consumers.on_logs(&self.buffer);

        let delivered = self.buffer.len();
        self.buffer.clear();
        self.stats.batches += 1;
        self.stats.entries += delivered;
        tracing::trace!(entries = delivered, "Flushed log batch");
        delivered
    }

    /// Receive entries until every sender is dropped, flushing on each tick.
    ///
    /// Whatever is buffered when the channel closes is flushed before returning.
    pub async fn run(mut self, mut rx: mpsc::Receiver<LogEntry>) -> AggregatorStats {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                entry = rx.recv() => match entry {
                    Some(entry) => self.push(entry),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.flush();
                }
            }
        }

        self.flush();
        tracing::debug!(
            batches = self.stats.batches,
            entries = self.stats.entries,
            "Log aggregator stopped"
        );
        self.stats
    }
}
