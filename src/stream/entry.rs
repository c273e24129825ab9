//! Timestamped log entries and line parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single log line with the time used to order it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Time the line was written, or ingestion time if it carried none.
    pub time: DateTime<Utc>,
    /// Line content without the timestamp prefix.
    #[serde(rename = "log")]
    pub text: String,
}

/// Why a log line did not start with a usable timestamp.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    /// The line was empty.
    #[error("Empty log line")]
    Empty,

    /// The leading field is not an RFC 3339 timestamp.
    #[error("Invalid log timestamp {raw:?}: {source}")]
    InvalidTimestamp {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}

impl LogEntry {
    #[must_use]
    pub fn new(time: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            time,
            text: text.into(),
        }
    }

    /// Parse a `"<RFC 3339 timestamp> <content>"` line.
    ///
    /// A trailing carriage return is ignored. A line consisting only of a
    /// timestamp yields empty content.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the line does not start with a timestamp.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let (raw, content) = line.split_once(' ').unwrap_or((line, ""));
        let time = DateTime::parse_from_rfc3339(raw).map_err(|source| {
            ParseError::InvalidTimestamp {
                raw: raw.to_string(),
                source,
            }
        })?;

        Ok(Self::new(time.with_timezone(&Utc), content))
    }

    /// Parse a line, falling back to `now` and the whole raw line when it
    /// has no usable timestamp.
    ///
    /// The parse error, if any, is returned alongside so callers can log it.
    #[must_use]
    pub fn parse_or_now(line: &str, now: DateTime<Utc>) -> (Self, Option<ParseError>) {
        match Self::parse(line) {
            Ok(entry) => (entry, None),
            Err(e) => {
                let raw = line.strip_suffix('\r').unwrap_or(line);
                (Self::new(now, raw), Some(e))
            }
        }
    }
}

/// Sort entries by time, keeping arrival order for equal times.
pub fn sort_entries(entries: &mut [LogEntry]) {
    entries.sort_by_key(|entry| entry.time);
}
