//! Forward that replaces its tunnel whenever the current one ends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use super::{
    BackoffSignal, ForwardError, ForwardHandle, ForwardSession, Termination, TerminationReceiver,
    TerminationSignal,
};
use crate::config::{ForwardConfig, PORT_UNSPECIFIED};
use crate::log::{default_logger, SharedLogger};
use crate::pod::{PodApi, PodDescriptor};

struct Shared {
    current: Mutex<Option<ForwardSession>>,
    cancel: CancellationToken,
    signal: TerminationSignal,
    reconnects: AtomicUsize,
}

impl Shared {
    fn current(&self) -> MutexGuard<'_, Option<ForwardSession>> {
        self.current.lock().expect("forward session lock poisoned")
    }

    /// Make `session` current, stopping the one it replaces.
    ///
    /// Returns `false`, stopping `session` instead, if the handle was stopped.
    fn install(&self, session: ForwardSession) -> bool {
        let mut current = self.current();
        if self.cancel.is_cancelled() {
            drop(current);
            session.stop();
            return false;
        }
        if let Some(previous) = current.replace(session) {
            previous.stop();
        }
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drop the ended session once no replacement will follow.
    fn clear(&self) {
        if let Some(session) = self.current().take() {
            session.stop();
        }
    }
}

/// Port forward with a stable identity across tunnel replacements.
///
/// After the first tunnel is up, a background task watches it and, once it
/// ends for any reason, establishes a new one on each backoff tick until one
/// succeeds. Reconnect failures are only logged. The termination signal of
/// the handle itself fires once, when [`ReconnectingForward::stop`] is called.
pub struct ReconnectingForward {
    shared: Arc<Shared>,
}

impl ReconnectingForward {
    /// Establish the first tunnel and start supervising it.
    ///
    /// # Errors
    ///
    /// Any failure to establish the first tunnel is returned as is; no retry
    /// is attempted.
    pub async fn establish<B>(
        api: Arc<dyn PodApi>,
        config: ForwardConfig,
        backoff: B,
    ) -> Result<Self, ForwardError>
    where
        B: BackoffSignal + 'static,
    {
        Self::establish_with_logger(api, config, backoff, default_logger()).await
    }

    /// [`ReconnectingForward::establish`] reporting reconnects to `logger`.
    ///
    /// # Errors
    ///
    /// See [`ReconnectingForward::establish`].
    pub async fn establish_with_logger<B>(
        api: Arc<dyn PodApi>,
        config: ForwardConfig,
        backoff: B,
        logger: SharedLogger,
    ) -> Result<Self, ForwardError>
    where
        B: BackoffSignal + 'static,
    {
        let session = ForwardSession::establish(Arc::clone(&api), &config).await?;
        let termination = session.termination();

        let shared = Arc::new(Shared {
            current: Mutex::new(Some(session)),
            cancel: CancellationToken::new(),
            signal: TerminationSignal::new(),
            reconnects: AtomicUsize::new(0),
        });

        let supervisor = Supervisor {
            api,
            config,
            backoff,
            shared: Arc::clone(&shared),
            logger,
        };
        tokio::spawn(supervisor.run(termination));

        Ok(Self { shared })
    }

    /// Local port bound for `remote` by the current tunnel, or
    /// [`PORT_UNSPECIFIED`].
    ///
    /// Between a tunnel ending and its replacement the ended tunnel's port
    /// is still reported. Once reconnecting has given up there is no current
    /// tunnel.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    #[must_use]
    pub fn local_port(&self, remote: u16) -> u16 {
        self.shared
            .current()
            .as_ref()
            .map_or(PORT_UNSPECIFIED, |session| session.local_port(remote))
    }

    /// Pod targeted by the current tunnel.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    #[must_use]
    pub fn pod(&self) -> Option<PodDescriptor> {
        self.shared
            .current()
            .as_ref()
            .map(|session| session.pod().clone())
    }

    /// Number of replacement tunnels installed so far.
    #[must_use]
    pub fn reconnects(&self) -> usize {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    /// Stop reconnecting and close the current tunnel. Calling it again has
    /// no effect.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    pub fn stop(&self) {
        let mut current = self.shared.current();
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();
        if let Some(session) = current.take() {
            session.stop();
        }
        drop(current);

        self.shared.signal.fire(Termination::Stopped);
        tracing::debug!("Reconnecting port forward stopped");
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Observe the handle's own termination, which only a stop triggers.
    #[must_use]
    pub fn termination(&self) -> TerminationReceiver {
        self.shared.signal.subscribe()
    }
}

impl ForwardHandle for ReconnectingForward {
    fn local_port(&self, remote: u16) -> u16 {
        ReconnectingForward::local_port(self, remote)
    }

    fn stop(&self) {
        ReconnectingForward::stop(self);
    }

    fn termination(&self) -> TerminationReceiver {
        ReconnectingForward::termination(self)
    }

    fn pod(&self) -> Option<PodDescriptor> {
        ReconnectingForward::pod(self)
    }
}

struct Supervisor<B> {
    api: Arc<dyn PodApi>,
    config: ForwardConfig,
    backoff: B,
    shared: Arc<Shared>,
    logger: SharedLogger,
}

impl<B: BackoffSignal> Supervisor<B> {
    async fn run(mut self, mut termination: TerminationReceiver) {
        loop {
            let ended = tokio::select! {
                biased;

                () = self.shared.cancel.cancelled() => return,
                ended = termination.wait() => ended,
            };
            match ended.error() {
                Some(e) => self.logger.log(&format!("port forward terminated: {e}")),
                None => self.logger.log("port forward closed"),
            }

            match self.reconnect().await {
                Some(next) => termination = next,
                None => return,
            }
        }
    }

    /// Retry on each backoff tick until a session is installed.
    ///
    /// Returns `None` once the handle is stopped or the backoff signal ends.
    async fn reconnect(&mut self) -> Option<TerminationReceiver> {
        loop {
            let permitted = tokio::select! {
                biased;

                () = self.shared.cancel.cancelled() => return None,
                permitted = self.backoff.tick() => permitted,
            };
            if !permitted {
                self.logger
                    .log("backoff signal closed, port forward will not reconnect");
                self.shared.clear();
                return None;
            }

            self.logger.log("reconnecting port forward");
            let attempt = tokio::select! {
                biased;

                () = self.shared.cancel.cancelled() => return None,
                attempt = ForwardSession::establish(Arc::clone(&self.api), &self.config) => attempt,
            };

            match attempt {
                Ok(session) => {
                    let termination = session.termination();
                    if !self.shared.install(session) {
                        return None;
                    }
                    tracing::info!(
                        reconnects = self.shared.reconnects.load(Ordering::Relaxed),
                        "Port forward reconnected"
                    );
                    return Some(termination);
                }
                Err(e) => self
                    .logger
                    .log(&format!("failed to reconnect port forward: {e}")),
            }
        }
    }
}
