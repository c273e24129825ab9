//! A single tunnel to one pod.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{ForwardError, ForwardHandle, Termination, TerminationReceiver, TerminationSignal};
use crate::config::{ForwardConfig, PortPair, PORT_UNSPECIFIED};
use crate::error::ApiError;
use crate::pod::{ForwardedPort, LabelSelector, PodApi, PodDescriptor, Tunnel};

/// One established tunnel.
///
/// The session ends on the first tunnel failure or on [`ForwardSession::stop`];
/// either way its termination signal fires exactly once.
#[derive(Debug)]
pub struct ForwardSession {
    pod: PodDescriptor,
    ports: HashMap<u16, u16>,
    stop: CancellationToken,
    signal: TerminationSignal,
}

impl ForwardSession {
    /// Forward the configured ports to the first running pod matching the
    /// selector.
    ///
    /// Listing and tunnel readiness together must finish within the
    /// configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::Config`] for an invalid configuration,
    /// [`ForwardError::NoPods`] if nothing matches, [`ForwardError::Timeout`]
    /// if the tunnel is not ready in time, and [`ForwardError::Api`] if the
    /// cluster rejects a request.
    pub async fn establish(
        api: Arc<dyn PodApi>,
        config: &ForwardConfig,
    ) -> Result<Self, ForwardError> {
        config.validate()?;
        let selector = config.selector()?;
        let timeout = config.timeout();

        tokio::time::timeout(
            timeout,
            connect(api.as_ref(), &config.namespace, &selector, &config.ports),
        )
        .await
        .map_err(|_| ForwardError::Timeout(timeout))?
    }

    /// Local port bound for `remote`, or [`PORT_UNSPECIFIED`] if `remote`
    /// was not forwarded.
    #[must_use]
    pub fn local_port(&self, remote: u16) -> u16 {
        self.ports.get(&remote).copied().unwrap_or(PORT_UNSPECIFIED)
    }

    /// All forwarded ports.
    pub fn ports(&self) -> impl Iterator<Item = ForwardedPort> + '_ {
        self.ports
            .iter()
            .map(|(&remote, &local)| ForwardedPort { local, remote })
    }

    #[must_use]
    pub fn pod(&self) -> &PodDescriptor {
        &self.pod
    }

    /// Close the tunnel. Calling it again has no effect.
    pub fn stop(&self) {
        if self.signal.fire(Termination::Stopped) {
            tracing::debug!(pod = %self.pod.name, "Stopping port forward");
        }
        self.stop.cancel();
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.signal.is_fired()
    }

    /// Observe how the session ends.
    #[must_use]
    pub fn termination(&self) -> TerminationReceiver {
        self.signal.subscribe()
    }
}

impl ForwardHandle for ForwardSession {
    fn local_port(&self, remote: u16) -> u16 {
        ForwardSession::local_port(self, remote)
    }

    fn stop(&self) {
        ForwardSession::stop(self);
    }

    fn termination(&self) -> TerminationReceiver {
        ForwardSession::termination(self)
    }

    fn pod(&self) -> Option<PodDescriptor> {
        Some(self.pod.clone())
    }
}

async fn connect(
    api: &dyn PodApi,
    namespace: &str,
    selector: &LabelSelector,
    ports: &[PortPair],
) -> Result<ForwardSession, ForwardError> {
    let pod = api
        .list(namespace, selector)
        .await?
        .items
        .into_iter()
        .find(|pod| !pod.is_pending())
        .ok_or_else(|| ForwardError::NoPods {
            namespace: namespace.to_string(),
            selector: selector.to_string(),
        })?;

    let Tunnel {
        ready,
        mut done,
        stop,
    } = api.open_tunnel(&pod, ports).await?;
    // Tear the tunnel down if we give up before it is ready.
    let guard = stop.clone().drop_guard();

    let forwarded = tokio::select! {
        biased;

        ready = ready => ready.ok(),
        result = &mut done => return Err(tunnel_error(result).into()),
    };
    let Some(forwarded) = forwarded else {
        return Err(tunnel_error(done.await).into());
    };
    guard.disarm();

    let signal = TerminationSignal::new();
    let watcher = signal.clone();
    let name = pod.name.clone();
    tokio::spawn(async move {
        let termination = match done.await {
            Ok(Ok(())) => Termination::Stopped,
            result => Termination::Failed(Arc::new(tunnel_error(result))),
        };
        if let Some(e) = termination.error() {
            tracing::warn!(pod = %name, error = %e, "Port forward terminated");
        }
        watcher.fire(termination);
    });

    tracing::info!(
        pod = %pod.name,
        namespace = %pod.namespace,
        ports = forwarded.len(),
        "Port forward established"
    );
    Ok(ForwardSession {
        pod,
        ports: forwarded.into_iter().map(|p| (p.remote, p.local)).collect(),
        stop,
        signal,
    })
}

/// Error for a tunnel that ended before or after becoming ready.
fn tunnel_error<E>(result: Result<Result<(), ApiError>, E>) -> ApiError {
    match result {
        Ok(Err(e)) => e,
        Ok(Ok(())) | Err(_) => ApiError::Closed,
    }
}
