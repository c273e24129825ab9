//! Pod model and the cluster capability consumed by the pipelines.
//!
//! The [`PodApi`] trait is the only way the stream and forward pipelines
//! talk to a cluster. [`memory::MemoryCluster`] implements it in-process.

pub mod memory;
mod selector;

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::PortPair;
use crate::error::ApiError;

pub use selector::{LabelSelector, Requirement};

/// Unique identity of a pod. Names may be reused; uids are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodUid(String);

impl PodUid {
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted but not yet scheduled and started.
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// Snapshot of a pod as returned by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodDescriptor {
    pub uid: PodUid,
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    /// When the pod started; unset while pending.
    pub start_time: Option<DateTime<Utc>>,
    /// Version of this object, used to resume watches.
    pub resource_version: String,
    pub labels: BTreeMap<String, String>,
}

impl PodDescriptor {
    /// Whether the pod is still waiting to be scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.phase == PodPhase::Pending
    }
}

/// Result of listing pods.
#[derive(Debug, Clone, Default)]
pub struct PodList {
    pub items: Vec<PodDescriptor>,
    /// Collection version at the time of the list.
    pub resource_version: String,
}

/// A change observed by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(PodDescriptor),
    Modified(PodDescriptor),
    Deleted(PodDescriptor),
    /// Progress marker carrying only a resource version.
    Bookmark { resource_version: String },
}

impl WatchEvent {
    /// The resource version this event moves the watch to.
    #[must_use]
    pub fn resource_version(&self) -> &str {
        match self {
            Self::Added(pod) | Self::Modified(pod) | Self::Deleted(pod) => &pod.resource_version,
            Self::Bookmark { resource_version } => resource_version,
        }
    }

    /// The pod, if this event creates or updates one.
    #[must_use]
    pub fn upserted(&self) -> Option<&PodDescriptor> {
        match self {
            Self::Added(pod) | Self::Modified(pod) => Some(pod),
            Self::Deleted(_) | Self::Bookmark { .. } => None,
        }
    }
}

/// Options for opening a pod log stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Keep the stream open and deliver new lines as they are written.
    pub follow: bool,
    /// Container to read; the pod default when unset.
    pub container: Option<String>,
    /// Prefix each line with an RFC 3339 timestamp and a space.
    pub timestamps: bool,
}

/// A port the tunnel actually bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardedPort {
    pub local: u16,
    pub remote: u16,
}

/// One physical forwarding connection to a pod.
///
/// `ready` fires once with the bound ports. `done` fires once when the
/// tunnel ends: `Ok(())` after a requested stop, `Err` on failure.
/// Cancelling `stop` asks the tunnel to shut down.
#[derive(Debug)]
pub struct Tunnel {
    pub ready: oneshot::Receiver<Vec<ForwardedPort>>,
    pub done: oneshot::Receiver<Result<(), ApiError>>,
    pub stop: CancellationToken,
}

/// Stream of watch events. It may end without error; callers resume it.
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// Raw bytes of a pod log.
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// Cluster operations consumed by discovery, log readers and forwarders.
#[async_trait]
pub trait PodApi: Send + Sync {
    /// List pods in `namespace` matching `selector`.
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<PodList, ApiError>;

    /// Watch pods in `namespace` matching `selector`, starting after
    /// `from_version` when given.
    async fn watch(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        from_version: Option<&str>,
    ) -> Result<WatchStream, ApiError>;

    /// Open the log of `pod`.
    async fn open_log_stream(
        &self,
        pod: &PodDescriptor,
        options: &LogOptions,
    ) -> Result<LogStream, ApiError>;

    /// Open a tunnel forwarding `ports` to `pod`.
    async fn open_tunnel(&self, pod: &PodDescriptor, ports: &[PortPair])
        -> Result<Tunnel, ApiError>;
}
