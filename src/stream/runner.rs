//! Log stream orchestration: discovery, one reader per pod and the aggregator.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{
    ConsumerChain, ConsumerFn, LogAggregator, LogConsumer, LogEntry, LogFilter, PodDiscovery,
    PodLogReader, RegexFilter, RunState, RunStateMachine,
};
use crate::config::StreamConfig;
use crate::error::{ApiError, ConfigError};
use crate::log::{default_logger, SharedLogger};
use crate::pod::{LabelSelector, LogOptions, PodApi, PodDescriptor};

/// Capacity of the channel between readers and the aggregator.
///
/// Readers wait when it is full, which bounds memory if consumers fall behind.
pub const DEFAULT_BUFFER_CAPACITY: usize = 128;

/// Errors that end a log stream run.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("Invalid stream configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Pod discovery failed: {0}")]
    Api(#[from] ApiError),

    #[error("Log aggregator task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Pods a reader was started for.
    pub pods_tracked: usize,
    /// Batches delivered to consumers.
    pub batches: usize,
    /// Entries delivered to consumers.
    pub entries: usize,
}

/// Streams the logs of every pod matching a selector to a chain of consumers.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use podkit::config::StreamConfig;
/// use podkit::pod::memory::MemoryCluster;
/// use podkit::stream::{LogStreamer, TextConsumer};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), podkit::stream::StreamError> {
/// let cluster = Arc::new(MemoryCluster::new());
/// let summary = LogStreamer::new(cluster, StreamConfig::from_selected_pods("app=web"))?
///     .with_consumer(TextConsumer::new(std::io::stdout()))
///     .run(CancellationToken::new())
///     .await?;
/// println!("delivered {} entries", summary.entries);
/// # Ok(())
/// # }
/// ```
pub struct LogStreamer {
    api: Arc<dyn PodApi>,
    config: StreamConfig,
    selector: LabelSelector,
    consumers: ConsumerChain,
    filter: Option<Arc<dyn LogFilter>>,
    logger: SharedLogger,
    state: RunStateMachine,
}

impl LogStreamer {
    /// Validate `config` and prepare a run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing or malformed selector or an
    /// invalid filter pattern.
    pub fn new(api: Arc<dyn PodApi>, config: StreamConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let selector = config.selector()?;
        let filter = match &config.log_filter_pattern {
            Some(pattern) => Some(Arc::new(RegexFilter::new(pattern)?) as Arc<dyn LogFilter>),
            None => None,
        };

        Ok(Self {
            api,
            config,
            selector,
            consumers: ConsumerChain::new(),
            filter,
            logger: default_logger(),
            state: RunStateMachine::new(),
        })
    }

    /// Append a consumer. Consumers receive each batch in the order added.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl LogConsumer + 'static) -> Self {
        self.consumers.push(consumer);
        self
    }

    /// Append a closure consumer.
    #[must_use]
    pub fn with_consumer_fn<F>(self, f: F) -> Self
    where
        F: FnMut(&[LogEntry]) + Send + 'static,
    {
        self.with_consumer(ConsumerFn::new(f))
    }

    /// Replace the filter built from the configured pattern.
    #[must_use]
    pub fn with_filter(mut self, filter: impl LogFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Observe run state transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Run on a background task and return immediately.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<StreamSummary, StreamError>> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until done.
    ///
    /// Without follow the run ends once every pod in the initial listing has
    /// been read to the end. With follow it ends when `cancel` fires. Either
    /// way the last buffered entries are flushed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Api`] if the initial listing fails (no reader
    /// is started) or if a follow-mode watch cannot be opened (after
    /// draining what was read so far).
    pub async fn run(self, cancel: CancellationToken) -> Result<StreamSummary, StreamError> {
        let Self {
            api,
            config,
            selector,
            consumers,
            filter,
            logger,
            state,
        } = self;

        state.transition(RunState::Listing);
        let mut discovery = PodDiscovery::new(
            Arc::clone(&api),
            config.namespace.clone(),
            selector,
            Arc::clone(&logger),
        );
        let tracked = discovery.tracked().clone();
        let snapshot = match discovery.snapshot().await {
            Ok(pods) => pods,
            Err(e) => {
                logger.log(&format!("failed to list pods: {e}"));
                state.transition(RunState::Stopped);
                return Err(e.into());
            }
        };

        let run_cancel = cancel.child_token();
        let (tx, rx) = mpsc::channel(DEFAULT_BUFFER_CAPACITY);
        let aggregator =
            tokio::spawn(LogAggregator::new(consumers, config.flush_interval()).run(rx));
        let readers = TaskTracker::new();
        let options = LogOptions {
            follow: config.follow,
            container: config.container.clone(),
            timestamps: true,
        };
        let spawn_reader = |pod: PodDescriptor| {
            tracing::debug!(pod = %pod.name, uid = %pod.uid, "Starting log reader");
            let reader = PodLogReader::new(Arc::clone(&api), pod, options.clone())
                .with_filter(filter.clone())
                .with_logger(Arc::clone(&logger));
            readers.spawn(reader.run(tx.clone(), run_cancel.clone()));
        };

        if !snapshot.is_empty() || config.follow {
            state.transition(RunState::Tracking);
        }
        for pod in snapshot {
            spawn_reader(pod);
        }

        let mut outcome = Ok(());
        if config.follow {
            state.transition(RunState::Following);
            let pods = discovery.follow(run_cancel.clone());
            tokio::pin!(pods);
            while let Some(next) = pods.next().await {
                match next {
                    Ok(pod) => spawn_reader(pod),
                    Err(e) => {
                        logger.log(&format!("failed to watch pods: {e}"));
                        outcome = Err(StreamError::Api(e));
                        break;
                    }
                }
            }
            if outcome.is_ok() {
                logger.log("caller has cancelled the stream");
            }
        } else {
            readers.close();
            tokio::select! {
                () = readers.wait() => logger.log("pod workers have stopped"),
                () = cancel.cancelled() => logger.log("caller has cancelled the stream"),
            }
        }

        state.transition(RunState::Draining);
        run_cancel.cancel();
        readers.close();
        readers.wait().await;
        drop(tx);

        let stats = aggregator.await;
        state.transition(RunState::Stopped);
        let stats = stats?;
        logger.log("consume worker has stopped");

        outcome.map(|()| StreamSummary {
            pods_tracked: tracked.len(),
            batches: stats.batches,
            entries: stats.entries,
        })
    }
}

/// Stream logs described by `config` into `consumer` until done.
///
/// Shorthand for [`LogStreamer::new`] followed by [`LogStreamer::run`].
///
/// # Errors
///
/// See [`LogStreamer::new`] and [`LogStreamer::run`].
pub async fn stream_logs(
    api: Arc<dyn PodApi>,
    config: StreamConfig,
    consumer: impl LogConsumer + 'static,
    cancel: CancellationToken,
) -> Result<StreamSummary, StreamError> {
    LogStreamer::new(api, config)?
        .with_consumer(consumer)
        .run(cancel)
        .await
}
