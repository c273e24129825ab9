//! Log aggregation across every pod matching a selector.
//!
//! [`PodDiscovery`] finds pods, one [`PodLogReader`] per pod parses lines into
//! [`LogEntry`] values, and the [`LogAggregator`] sorts and delivers them in
//! batches. [`LogStreamer`] wires these together for one run.

mod aggregator;
mod consumer;
mod discovery;
mod entry;
mod filter;
mod reader;
mod runner;
mod state;

pub use aggregator::{AggregatorStats, LogAggregator};
pub use consumer::{ConsumerChain, ConsumerFn, JsonLinesConsumer, LogConsumer, TextConsumer};
pub use discovery::{PodDiscovery, TrackedSet};
pub use entry::{sort_entries, LogEntry, ParseError};
pub use filter::{FilterFn, LogFilter, RegexFilter};
pub use reader::{PodLogReader, MAX_LINE_BYTES};
pub use runner::{stream_logs, LogStreamer, StreamError, StreamSummary, DEFAULT_BUFFER_CAPACITY};
pub use state::{RunState, RunStateMachine};
