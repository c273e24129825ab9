//! In-process [`PodApi`] implementation.
//!
//! [`MemoryCluster`] keeps pods, their logs and open watches in memory. It is
//! meant for tests and demos: failures can be injected, watches can be cut,
//! and tunnels bind real loopback listeners so forwarded ports are usable.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    ForwardedPort, LabelSelector, LogOptions, LogStream, PodApi, PodDescriptor, PodList,
    PodPhase, PodUid, Tunnel, WatchEvent, WatchStream,
};
use crate::config::PortPair;
use crate::error::ApiError;

/// Size of the in-memory pipe backing each log stream.
const LOG_PIPE_CAPACITY: usize = 64 * 1024;

/// Blueprint for a pod added to a [`MemoryCluster`].
#[derive(Debug, Clone)]
pub struct PodTemplate {
    name: String,
    labels: BTreeMap<String, String>,
    phase: PodPhase,
    start_time: Option<DateTime<Utc>>,
    containers: Vec<String>,
    upstreams: HashMap<u16, SocketAddr>,
}

impl PodTemplate {
    /// A running pod named `name`, started now, with one container `main`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            phase: PodPhase::Running,
            start_time: Some(Utc::now()),
            containers: vec!["main".to_string()],
            upstreams: HashMap::new(),
        }
    }

    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the phase. A pending pod has no start time.
    #[must_use]
    pub fn phase(mut self, phase: PodPhase) -> Self {
        self.phase = phase;
        if phase == PodPhase::Pending {
            self.start_time = None;
        }
        self
    }

    #[must_use]
    pub fn started_at(mut self, time: DateTime<Utc>) -> Self {
        self.start_time = Some(time);
        self
    }

    /// Add a container name accepted by [`LogOptions::container`].
    #[must_use]
    pub fn container(mut self, name: impl Into<String>) -> Self {
        self.containers.push(name.into());
        self
    }

    /// Proxy tunnel connections for `remote_port` to `addr`.
    #[must_use]
    pub fn upstream(mut self, remote_port: u16, addr: SocketAddr) -> Self {
        self.upstreams.insert(remote_port, addr);
        self
    }
}

#[derive(Debug, Clone)]
struct LogLine {
    time: Option<DateTime<Utc>>,
    text: String,
}

impl LogLine {
    fn render(&self, timestamps: bool) -> String {
        match (timestamps, self.time) {
            (true, Some(time)) => format!(
                "{} {}",
                time.to_rfc3339_opts(SecondsFormat::Nanos, true),
                self.text
            ),
            _ => self.text.clone(),
        }
    }
}

struct Follower {
    timestamps: bool,
    tx: mpsc::UnboundedSender<String>,
}

struct StoredPod {
    descriptor: PodDescriptor,
    containers: Vec<String>,
    upstreams: HashMap<u16, SocketAddr>,
    logs: Vec<LogLine>,
    followers: Vec<Follower>,
}

struct Watcher {
    namespace: String,
    selector: LabelSelector,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl Watcher {
    fn wants(&self, namespace: &str, pod: &PodDescriptor) -> bool {
        self.namespace == namespace && self.selector.matches(&pod.labels)
    }
}

fn event_pod(event: &WatchEvent) -> Option<&PodDescriptor> {
    match event {
        WatchEvent::Added(pod) | WatchEvent::Modified(pod) | WatchEvent::Deleted(pod) => Some(pod),
        WatchEvent::Bookmark { .. } => None,
    }
}

#[derive(Default)]
struct State {
    version: u64,
    pods: Vec<StoredPod>,
    history: Vec<WatchEvent>,
    watchers: Vec<Watcher>,
    tunnels: Vec<oneshot::Sender<ApiError>>,
    watch_requests: Vec<Option<String>>,
    log_opens: usize,
    list_failure: Option<String>,
    watch_failure: Option<String>,
    tunnel_failures: usize,
    tunnel_delay: Duration,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn pod_mut(&mut self, uid: &PodUid) -> Option<&mut StoredPod> {
        self.pods.iter_mut().find(|p| &p.descriptor.uid == uid)
    }

    fn publish(&mut self, event: WatchEvent) {
        if let Some(pod) = event_pod(&event) {
            self.watchers
                .retain(|w| !w.wants(&pod.namespace, pod) || w.tx.send(event.clone()).is_ok());
        }
        self.history.push(event);
    }
}

/// In-memory cluster implementing [`PodApi`].
///
/// Cloning yields another handle to the same cluster.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<State>>,
}

impl MemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("cluster state poisoned")
    }

    /// Add a pod to `namespace` and notify matching watches.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn add_pod(&self, namespace: &str, template: PodTemplate) -> PodDescriptor {
        let mut state = self.lock();
        let descriptor = PodDescriptor {
            uid: PodUid::new(Uuid::new_v4().to_string()),
            name: template.name,
            namespace: namespace.to_string(),
            phase: template.phase,
            start_time: template.start_time,
            resource_version: state.next_version(),
            labels: template.labels,
        };
        state.pods.push(StoredPod {
            descriptor: descriptor.clone(),
            containers: template.containers,
            upstreams: template.upstreams,
            logs: Vec::new(),
            followers: Vec::new(),
        });
        state.publish(WatchEvent::Added(descriptor.clone()));
        descriptor
    }

    /// Move a pod to `phase`, stamping a start time when it leaves pending.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn set_phase(&self, uid: &PodUid, phase: PodPhase) -> Option<PodDescriptor> {
        let mut state = self.lock();
        let version = state.next_version();
        let pod = state.pod_mut(uid)?;
        pod.descriptor.phase = phase;
        if phase != PodPhase::Pending && pod.descriptor.start_time.is_none() {
            pod.descriptor.start_time = Some(Utc::now());
        }
        pod.descriptor.resource_version = version;
        let descriptor = pod.descriptor.clone();
        state.publish(WatchEvent::Modified(descriptor.clone()));
        Some(descriptor)
    }

    /// Remove a pod. Its follow-mode log streams end.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn delete_pod(&self, uid: &PodUid) -> Option<PodDescriptor> {
        let mut state = self.lock();
        let index = state.pods.iter().position(|p| &p.descriptor.uid == uid)?;
        let version = state.next_version();
        let mut removed = state.pods.remove(index);
        removed.descriptor.resource_version = version;
        state.publish(WatchEvent::Deleted(removed.descriptor.clone()));
        Some(removed.descriptor)
    }

    /// Append a timestamped line to a pod's log.
    ///
    /// Returns `false` if the pod does not exist.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn push_log(&self, uid: &PodUid, time: DateTime<Utc>, text: impl Into<String>) -> bool {
        self.append(
            uid,
            LogLine {
                time: Some(time),
                text: text.into(),
            },
        )
    }

    /// Append a line that is delivered verbatim, without a timestamp prefix.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn push_raw_log(&self, uid: &PodUid, line: impl Into<String>) -> bool {
        self.append(
            uid,
            LogLine {
                time: None,
                text: line.into(),
            },
        )
    }

    fn append(&self, uid: &PodUid, line: LogLine) -> bool {
        let mut state = self.lock();
        let Some(pod) = state.pod_mut(uid) else {
            return false;
        };
        pod.followers
            .retain(|f| f.tx.send(line.render(f.timestamps)).is_ok());
        pod.logs.push(line);
        true
    }

    /// End every open watch stream, as a server-side timeout would.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn close_watches(&self) {
        self.lock().watchers.clear();
    }

    /// Make every `list` call fail with `message`, or succeed again with `None`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn fail_list(&self, message: Option<&str>) {
        self.lock().list_failure = message.map(str::to_string);
    }

    /// Make every `watch` call fail with `message`, or succeed again with `None`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn fail_watch(&self, message: Option<&str>) {
        self.lock().watch_failure = message.map(str::to_string);
    }

    /// Refuse the next `count` tunnel requests.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn fail_tunnels(&self, count: usize) {
        self.lock().tunnel_failures = count;
    }

    /// Delay tunnel readiness by `delay`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn set_tunnel_delay(&self, delay: Duration) {
        self.lock().tunnel_delay = delay;
    }

    /// Terminate every live tunnel with [`ApiError::Closed`].
    ///
    /// Returns how many tunnels were broken.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn break_tunnels(&self) -> usize {
        let tunnels = std::mem::take(&mut self.lock().tunnels);
        tunnels
            .into_iter()
            .filter_map(|tx| tx.send(ApiError::Closed).ok())
            .count()
    }

    /// The `from_version` of every watch opened so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn watch_requests(&self) -> Vec<Option<String>> {
        self.lock().watch_requests.clone()
    }

    /// Number of log streams opened so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn log_opens(&self) -> usize {
        self.lock().log_opens
    }
}

#[async_trait]
impl PodApi for MemoryCluster {
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<PodList, ApiError> {
        let state = self.lock();
        if let Some(message) = &state.list_failure {
            return Err(ApiError::Request(message.clone()));
        }
        let items = state
            .pods
            .iter()
            .map(|p| &p.descriptor)
            .filter(|p| p.namespace == namespace && selector.matches(&p.labels))
            .cloned()
            .collect();
        Ok(PodList {
            items,
            resource_version: state.version.to_string(),
        })
    }

    async fn watch(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        from_version: Option<&str>,
    ) -> Result<WatchStream, ApiError> {
        let mut state = self.lock();
        state.watch_requests.push(from_version.map(str::to_string));
        if let Some(message) = &state.watch_failure {
            return Err(ApiError::Request(message.clone()));
        }

        // Without a version only live events are delivered.
        let since = from_version
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(u64::MAX);
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Watcher {
            namespace: namespace.to_string(),
            selector: selector.clone(),
            tx,
        };

        for event in &state.history {
            let version = event.resource_version().parse::<u64>().unwrap_or(0);
            let replay = event_pod(event).is_some_and(|pod| watcher.wants(namespace, pod));
            if replay && version > since {
                let _ = watcher.tx.send(event.clone());
            }
        }
        state.watchers.push(watcher);

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn open_log_stream(
        &self,
        pod: &PodDescriptor,
        options: &LogOptions,
    ) -> Result<LogStream, ApiError> {
        let mut state = self.lock();
        state.log_opens += 1;
        let stored = state
            .pod_mut(&pod.uid)
            .ok_or_else(|| ApiError::NotFound(format!("pod {}", pod.name)))?;
        if let Some(container) = &options.container {
            if !stored.containers.contains(container) {
                return Err(ApiError::NotFound(format!(
                    "container {container} in pod {}",
                    pod.name
                )));
            }
        }

        let backlog: Vec<String> = stored
            .logs
            .iter()
            .map(|line| line.render(options.timestamps))
            .collect();
        let live = if options.follow {
            let (tx, rx) = mpsc::unbounded_channel();
            stored.followers.push(Follower {
                timestamps: options.timestamps,
                tx,
            });
            Some(rx)
        } else {
            None
        };

        let (reader, mut writer) = tokio::io::duplex(LOG_PIPE_CAPACITY);
        tokio::spawn(async move {
            for line in backlog {
                if writer.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                    return;
                }
            }
            if let Some(mut rx) = live {
                while let Some(line) = rx.recv().await {
                    if writer.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
            let _ = writer.shutdown().await;
        });

        Ok(Box::pin(reader))
    }

    async fn open_tunnel(
        &self,
        pod: &PodDescriptor,
        ports: &[PortPair],
    ) -> Result<Tunnel, ApiError> {
        let (upstreams, delay, fail_rx) = {
            let mut state = self.lock();
            if state.tunnel_failures > 0 {
                state.tunnel_failures -= 1;
                return Err(ApiError::Request(format!(
                    "tunnel to pod {} refused",
                    pod.name
                )));
            }
            let delay = state.tunnel_delay;
            let stored = state
                .pod_mut(&pod.uid)
                .ok_or_else(|| ApiError::NotFound(format!("pod {}", pod.name)))?;
            let upstreams = stored.upstreams.clone();
            let (fail_tx, fail_rx) = oneshot::channel();
            state.tunnels.push(fail_tx);
            (upstreams, delay, fail_rx)
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let stop = CancellationToken::new();

        tokio::spawn(serve_tunnel(
            ports.to_vec(),
            upstreams,
            delay,
            stop.clone(),
            ready_tx,
            done_tx,
            fail_rx,
        ));

        Ok(Tunnel {
            ready: ready_rx,
            done: done_rx,
            stop,
        })
    }
}

async fn serve_tunnel(
    ports: Vec<PortPair>,
    upstreams: HashMap<u16, SocketAddr>,
    delay: Duration,
    stop: CancellationToken,
    ready_tx: oneshot::Sender<Vec<ForwardedPort>>,
    done_tx: oneshot::Sender<Result<(), ApiError>>,
    mut fail_rx: oneshot::Receiver<ApiError>,
) {
    if !delay.is_zero() {
        tokio::select! {
            () = stop.cancelled() => {
                let _ = done_tx.send(Ok(()));
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }

    let mut listeners = Vec::with_capacity(ports.len());
    for pair in &ports {
        match TcpListener::bind(("127.0.0.1", pair.local())).await {
            Ok(listener) => listeners.push((pair.remote(), listener)),
            Err(e) => {
                let _ = done_tx.send(Err(ApiError::Io(e)));
                return;
            }
        }
    }

    let mut forwarded = Vec::with_capacity(listeners.len());
    for (remote, listener) in &listeners {
        let local = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                let _ = done_tx.send(Err(ApiError::Io(e)));
                return;
            }
        };
        forwarded.push(ForwardedPort {
            local,
            remote: *remote,
        });
    }

    let accept_stop = stop.child_token();
    for (remote, listener) in listeners {
        let upstream = upstreams.get(&remote).copied();
        tokio::spawn(accept_loop(listener, upstream, accept_stop.clone()));
    }

    if ready_tx.send(forwarded).is_err() {
        accept_stop.cancel();
        let _ = done_tx.send(Ok(()));
        return;
    }

    let result = tokio::select! {
        () = stop.cancelled() => Ok(()),
        failure = &mut fail_rx => match failure {
            Ok(err) => Err(err),
            // The cluster handle was dropped; treat like a lost connection.
            Err(_) => Err(ApiError::Closed),
        },
    };
    accept_stop.cancel();
    let _ = done_tx.send(result);
}

async fn accept_loop(listener: TcpListener, upstream: Option<SocketAddr>, stop: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            () = stop.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        let mut inbound = match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::debug!(error = %e, "Tunnel accept failed");
                continue;
            }
        };
        let Some(addr) = upstream else {
            continue;
        };
        let stop = stop.clone();
        tokio::spawn(async move {
            let Ok(mut outbound) = TcpStream::connect(addr).await else {
                return;
            };
            tokio::select! {
                () = stop.cancelled() => {}
                _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => {}
            }
        });
    }
}
