//! Pod discovery: initial listing plus a self-resuming watch.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::log::SharedLogger;
use crate::pod::{LabelSelector, PodApi, PodDescriptor, PodUid, WatchEvent, WatchStream};

/// Set of pods already handed to a log reader.
///
/// Entries are never removed, so a pod is tracked at most once per run even
/// if it disappears and a new event for it arrives later.
#[derive(Debug, Clone, Default)]
pub struct TrackedSet {
    seen: Arc<Mutex<HashSet<PodUid>>>,
}

impl TrackedSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `pod` if it is scheduled and not yet tracked.
    ///
    /// Returns `true` when the caller should start reading the pod.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn track(&self, pod: &PodDescriptor) -> bool {
        if pod.is_pending() {
            return false;
        }
        self.seen
            .lock()
            .expect("tracked set poisoned")
            .insert(pod.uid.clone())
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn contains(&self, uid: &PodUid) -> bool {
        self.seen.lock().expect("tracked set poisoned").contains(uid)
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().expect("tracked set poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Finds pods matching a selector and reports each schedulable one once.
pub struct PodDiscovery {
    api: Arc<dyn PodApi>,
    namespace: String,
    selector: LabelSelector,
    tracked: TrackedSet,
    resource_version: Option<String>,
    logger: SharedLogger,
}

impl PodDiscovery {
    pub fn new(
        api: Arc<dyn PodApi>,
        namespace: impl Into<String>,
        selector: LabelSelector,
        logger: SharedLogger,
    ) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            selector,
            tracked: TrackedSet::new(),
            resource_version: None,
            logger,
        }
    }

    /// Pods reported so far.
    #[must_use]
    pub fn tracked(&self) -> &TrackedSet {
        &self.tracked
    }

    /// Last resource version observed by a list or watch.
    #[must_use]
    pub fn resource_version(&self) -> Option<&str> {
        self.resource_version.as_deref()
    }

    /// List matching pods, oldest first, and return those newly tracked.
    ///
    /// Pods without a start time sort last; equal start times keep listing order.
    ///
    /// # Errors
    ///
    /// Returns the listing error unchanged.
    pub async fn snapshot(&mut self) -> Result<Vec<PodDescriptor>, ApiError> {
        self.logger.log("listing pods");
        let mut list = self.api.list(&self.namespace, &self.selector).await?;

        list.items
            .sort_by_key(|pod| (pod.start_time.is_none(), pod.start_time));
        if !list.resource_version.is_empty() {
            self.resource_version = Some(list.resource_version);
        }

        let pods: Vec<_> = list
            .items
            .into_iter()
            .filter(|pod| self.tracked.track(pod))
            .collect();
        tracing::debug!(
            namespace = %self.namespace,
            selector = %self.selector,
            pods = pods.len(),
            "Pod snapshot taken"
        );
        Ok(pods)
    }

    async fn open_watch(&self) -> Result<WatchStream, ApiError> {
        self.logger.log("watching pods");
        self.api
            .watch(
                &self.namespace,
                &self.selector,
                self.resource_version.as_deref(),
            )
            .await
    }

    /// Record `event` and return its pod if it should be read.
    fn observe(&mut self, event: &WatchEvent) -> Option<PodDescriptor> {
        let version = event.resource_version();
        if !version.is_empty() {
            self.resource_version = Some(version.to_string());
        }
        event
            .upserted()
            .filter(|pod| self.tracked.track(pod))
            .cloned()
    }

    /// Watch for new pods until `cancel` fires.
    ///
    /// The watch resumes from the last observed resource version whenever
    /// the server closes it. Failing to open a watch yields one error and
    /// ends the stream.
    pub fn follow(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<PodDescriptor, ApiError>> + Send + 'static {
        let state = FollowState {
            discovery: self,
            watch: None,
            cancel,
            finished: false,
        };

        futures_util::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }

            loop {
                if state.watch.is_none() {
                    let opened = tokio::select! {
                        biased;

                        () = state.cancel.cancelled() => return None,
                        opened = state.discovery.open_watch() => opened,
                    };
                    match opened {
                        Ok(watch) => state.watch = Some(watch),
                        Err(e) => {
                            state.finished = true;
                            return Some((Err(e), state));
                        }
                    }
                }
                let Some(watch) = state.watch.as_mut() else {
                    continue;
                };

                let event = tokio::select! {
                    biased;

                    () = state.cancel.cancelled() => return None,
                    event = watch.next() => event,
                };

                match event {
                    Some(event) => {
                        if let Some(pod) = state.discovery.observe(&event) {
                            return Some((Ok(pod), state));
                        }
                    }
                    None => {
                        tracing::debug!(
                            resource_version = ?state.discovery.resource_version(),
                            "Watch closed, resuming"
                        );
                        state.discovery.logger.log("reconnecting pods watcher");
                        state.watch = None;
                    }
                }
            }
        })
    }
}

struct FollowState {
    discovery: PodDiscovery,
    watch: Option<WatchStream>,
    cancel: CancellationToken,
    finished: bool,
}
