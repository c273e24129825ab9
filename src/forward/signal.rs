//! One-shot termination signal shared by any number of observers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::ApiError;

/// How a forward ended.
#[derive(Debug, Clone)]
pub enum Termination {
    /// Stopped on request.
    Stopped,
    /// The tunnel failed.
    Failed(Arc<ApiError>),
}

impl Termination {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The failure cause, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Self::Stopped => None,
            Self::Failed(e) => Some(e),
        }
    }
}

/// Sending side of a termination signal. Only the first value fired is kept.
#[derive(Debug, Clone)]
pub struct TerminationSignal {
    tx: Arc<watch::Sender<Option<Termination>>>,
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record `termination` unless one was already recorded.
    ///
    /// Returns `true` if this call fired the signal.
    pub fn fire(&self, termination: Termination) -> bool {
        let mut pending = Some(termination);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = pending.take();
            true
        })
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    #[must_use]
    pub fn subscribe(&self) -> TerminationReceiver {
        TerminationReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes a [`TerminationSignal`].
#[derive(Debug, Clone)]
pub struct TerminationReceiver {
    rx: watch::Receiver<Option<Termination>>,
}

impl TerminationReceiver {
    /// Wait for the termination value.
    ///
    /// Resolves immediately if the signal already fired. If every sender is
    /// dropped without firing, resolves to a [`ApiError::Closed`] failure.
    pub async fn wait(&mut self) -> Termination {
        match self.rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone().unwrap_or(Termination::Stopped),
            Err(_) => Termination::Failed(Arc::new(ApiError::Closed)),
        }
    }

    /// The termination value, if already fired.
    #[must_use]
    pub fn get(&self) -> Option<Termination> {
        self.rx.borrow().clone()
    }
}
