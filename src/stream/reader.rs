//! Per-pod log reader.

use std::io;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{LogEntry, LogFilter};
use crate::log::{default_logger, SharedLogger};
use crate::pod::{LogOptions, PodApi, PodDescriptor};

/// Longest line read in one piece. Longer lines arrive as several entries.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Read the next line into `buf`, without its line ending.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = reader
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// Reads one pod's log line by line and forwards parsed entries.
pub struct PodLogReader {
    api: Arc<dyn PodApi>,
    pod: PodDescriptor,
    options: LogOptions,
    filter: Option<Arc<dyn LogFilter>>,
    logger: SharedLogger,
}

impl PodLogReader {
    /// Reader for `pod`. Timestamps are always requested so entries can be
    /// ordered.
    pub fn new(api: Arc<dyn PodApi>, pod: PodDescriptor, options: LogOptions) -> Self {
        Self {
            api,
            pod,
            options: LogOptions {
                timestamps: true,
                ..options
            },
            filter: None,
            logger: default_logger(),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Option<Arc<dyn LogFilter>>) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn pod(&self) -> &PodDescriptor {
        &self.pod
    }

    /// Read until the log ends, `cancel` fires or `tx` is closed.
    ///
    /// Failing to open the log is reported through the logger and ends the
    /// reader without affecting others. Returns the number of entries sent.
    pub async fn run(self, tx: mpsc::Sender<LogEntry>, cancel: CancellationToken) -> usize {
        let name = self.pod.name.as_str();
        self.logger.log(&format!("streaming pod: {name}"));

        let opened = tokio::select! {
            biased;

            () = cancel.cancelled() => return 0,
            opened = self.api.open_log_stream(&self.pod, &self.options) => opened,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(pod = %name, error = %e, "Failed to open log stream");
                self.logger
                    .log(&format!("failed to open log stream for pod {name}: {e}"));
                return 0;
            }
        };

        let mut stream = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut sent = 0;
        loop {
            let line = tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                line = next_line(&mut stream, &mut buf) => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(pod = %name, error = %e, "Log stream read failed");
                    break;
                }
            };

            let (entry, parse_error) = LogEntry::parse_or_now(&line, Utc::now());
            if let Some(e) = parse_error {
                self.logger
                    .log(&format!("unable to decode log timestamp for pod {name}: {e}"));
            }

            if let Some(filter) = &self.filter {
                if !filter.keep(&entry.text) {
                    continue;
                }
            }

            if tx.send(entry).await.is_err() {
                break;
            }
            sent += 1;
        }

        tracing::debug!(pod = %name, entries = sent, "Log reader finished");
        self.logger.log(&format!("pod stream has stopped: {name}"));
        sent
    }
}
