use std::sync::Arc;
use std::time::Duration;

use podkit::config::{ForwardConfig, PortPair, PORT_UNSPECIFIED};
use podkit::error::ApiError;
use podkit::forward::{ForwardError, ForwardHandle, ForwardSession, Termination};
use podkit::pod::memory::{MemoryCluster, PodTemplate};
use podkit::pod::PodApi;

use super::{echo_server, round_trip, WAIT};

fn config() -> ForwardConfig {
    ForwardConfig::new("default", "app=web")
        .with_port(PortPair::ephemeral(8080).unwrap())
        .with_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_ephemeral_port_forwards_traffic() {
    let upstream = echo_server().await;
    let cluster = MemoryCluster::new();
    cluster.add_pod(
        "default",
        PodTemplate::new("web-0")
            .label("app", "web")
            .upstream(8080, upstream),
    );

    let session = ForwardSession::establish(Arc::new(cluster), &config())
        .await
        .unwrap();
    let local = session.local_port(8080);
    assert_ne!(local, PORT_UNSPECIFIED);
    assert_eq!(session.local_port(443), PORT_UNSPECIFIED);

    assert_eq!(round_trip(local, b"ping").await, b"ping");
    session.stop();
}

#[tokio::test]
async fn test_parsed_port_pairs() {
    let cluster = MemoryCluster::new();
    cluster.add_pod("default", PodTemplate::new("web-0").label("app", "web"));

    let config = ForwardConfig::new("default", "app=web")
        .with_port(":8080".parse().unwrap())
        .with_port(":9090".parse().unwrap());
    let session = ForwardSession::establish(Arc::new(cluster), &config)
        .await
        .unwrap();

    let first = session.local_port(8080);
    let second = session.local_port(9090);
    assert_ne!(first, PORT_UNSPECIFIED);
    assert_ne!(second, PORT_UNSPECIFIED);
    assert_ne!(first, second);
    session.stop();
}

#[tokio::test]
async fn test_session_as_handle() {
    let cluster = MemoryCluster::new();
    cluster.add_pod("default", PodTemplate::new("web-0").label("app", "web"));

    let handle: Box<dyn ForwardHandle> = Box::new(
        ForwardSession::establish(Arc::new(cluster), &config())
            .await
            .unwrap(),
    );
    let mut termination = handle.termination();
    assert_eq!(handle.pod().unwrap().name, "web-0");

    handle.stop();
    handle.stop();
    let ended = tokio::time::timeout(WAIT, termination.wait()).await.unwrap();
    assert!(matches!(ended, Termination::Stopped));
}

#[tokio::test]
async fn test_tunnel_failure_reported_once() {
    let cluster = MemoryCluster::new();
    cluster.add_pod("default", PodTemplate::new("web-0").label("app", "web"));
    let session = ForwardSession::establish(Arc::new(cluster.clone()), &config())
        .await
        .unwrap();

    let mut first = session.termination();
    let mut second = session.termination();
    cluster.break_tunnels();

    let a = tokio::time::timeout(WAIT, first.wait()).await.unwrap();
    let b = tokio::time::timeout(WAIT, second.wait()).await.unwrap();
    assert!(matches!(a.error(), Some(ApiError::Closed)));
    assert!(matches!(b.error(), Some(ApiError::Closed)));
}

#[tokio::test]
async fn test_establish_deadline() {
    let cluster = MemoryCluster::new();
    cluster.add_pod("default", PodTemplate::new("web-0").label("app", "web"));
    cluster.set_tunnel_delay(Duration::from_secs(30));

    let started = tokio::time::Instant::now();
    let result = ForwardSession::establish(
        Arc::new(cluster),
        &config().with_timeout(Duration::from_millis(100)),
    )
    .await;

    assert!(matches!(result, Err(ForwardError::Timeout(d)) if d == Duration::from_millis(100)));
    assert!(started.elapsed() < WAIT);
}

#[tokio::test]
async fn test_missing_pods_and_ports() {
    let cluster: Arc<dyn PodApi> = Arc::new(MemoryCluster::new());

    let result = ForwardSession::establish(Arc::clone(&cluster), &config()).await;
    assert!(matches!(result, Err(ForwardError::NoPods { .. })));

    let no_ports = ForwardConfig::new("default", "app=web");
    let result = ForwardSession::establish(cluster, &no_ports).await;
    assert!(matches!(result, Err(ForwardError::Config(_))));
}
