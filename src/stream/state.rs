//! Run state of a log stream.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Phase of a [`LogStreamer`](super::LogStreamer) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    /// Taking the initial pod snapshot.
    Listing,
    /// Readers started for the snapshot.
    Tracking,
    /// Watching for pods created after the snapshot.
    Following,
    /// Readers are stopping and the last batch is being flushed.
    Draining,
    Stopped,
}

impl RunState {
    /// Whether the run has finished.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }
}

/// Publishes state transitions to any number of observers.
#[derive(Debug)]
pub struct RunStateMachine {
    tx: watch::Sender<RunState>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunState::Idle);
        Self { tx }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    pub fn transition(&self, new_state: RunState) {
        let old = self.tx.send_replace(new_state);
        tracing::debug!(from = ?old, to = ?new_state, "Stream state transition");
    }
}
