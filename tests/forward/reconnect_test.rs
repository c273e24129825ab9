use std::sync::{Arc, Mutex};
use std::time::Duration;

use podkit::config::{ForwardConfig, PortPair, PORT_UNSPECIFIED};
use podkit::forward::{ForwardError, ForwardHandle, ReconnectingForward, Termination};
use podkit::log::LogFn;
use podkit::pod::memory::{MemoryCluster, PodTemplate};
use tokio::sync::mpsc;

use super::{echo_server, round_trip, WAIT};

fn config() -> ForwardConfig {
    ForwardConfig::new("default", "app=web")
        .with_port(PortPair::ephemeral(8080).unwrap())
        .with_timeout(Duration::from_secs(2))
        .with_backoff_interval(Duration::from_millis(50))
}

async fn wait_for_reconnects(forward: &ReconnectingForward, count: usize) {
    tokio::time::timeout(WAIT, async {
        while forward.reconnects() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no replacement session installed in time");
}

#[tokio::test]
async fn test_reconnects_after_every_failure() {
    let upstream = echo_server().await;
    let cluster = MemoryCluster::new();
    cluster.add_pod(
        "default",
        PodTemplate::new("web-0")
            .label("app", "web")
            .upstream(8080, upstream),
    );

    let config = config();
    let backoff = config.backoff();
    let forward = ReconnectingForward::establish(Arc::new(cluster.clone()), config, backoff)
        .await
        .unwrap();
    let mut termination = forward.termination();

    for round in 1..=3 {
        assert_eq!(cluster.break_tunnels(), 1);
        wait_for_reconnects(&forward, round).await;

        let local = forward.local_port(8080);
        assert_ne!(local, PORT_UNSPECIFIED);
        assert_eq!(round_trip(local, b"still up").await, b"still up");
    }
    assert!(termination.get().is_none());

    forward.stop();
    let ended = tokio::time::timeout(WAIT, termination.wait()).await.unwrap();
    assert!(matches!(ended, Termination::Stopped));
}

#[tokio::test]
async fn test_initial_failure_is_not_retried() {
    let cluster = MemoryCluster::new();
    let (tx, rx) = mpsc::channel(4);
    tx.send(()).await.unwrap();

    let result = ReconnectingForward::establish(Arc::new(cluster.clone()), config(), rx).await;
    assert!(matches!(result, Err(ForwardError::NoPods { .. })));
    assert!(cluster.watch_requests().is_empty());
}

#[tokio::test]
async fn test_reconnect_errors_only_reach_logger() {
    let cluster = MemoryCluster::new();
    let pod = cluster.add_pod("default", PodTemplate::new("web-0").label("app", "web"));

    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let logger = Arc::new(LogFn::new(move |msg: &str| {
        sink.lock().unwrap().push(msg.to_string());
    }));

    let (tx, rx) = mpsc::channel(4);
    let forward =
        ReconnectingForward::establish_with_logger(Arc::new(cluster.clone()), config(), rx, logger)
            .await
            .unwrap();

    // With the only pod gone, each attempt finds nothing to forward to.
    cluster.delete_pod(&pod.uid);
    cluster.break_tunnels();
    tx.send(()).await.unwrap();
    tx.send(()).await.unwrap();

    tokio::time::timeout(WAIT, async {
        loop {
            let failures = messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.starts_with("failed to reconnect"))
                .count();
            if failures >= 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(forward.reconnects(), 0);
    assert!(forward.termination().get().is_none());
    assert!(!forward.is_stopped());

    cluster.add_pod("default", PodTemplate::new("web-1").label("app", "web"));
    tx.send(()).await.unwrap();
    wait_for_reconnects(&forward, 1).await;
    assert_eq!(forward.pod().unwrap().name, "web-1");
    forward.stop();
}

#[tokio::test]
async fn test_closed_backoff_stops_reconnecting() {
    let cluster = MemoryCluster::new();
    cluster.add_pod("default", PodTemplate::new("web-0").label("app", "web"));

    let (tx, rx) = mpsc::channel::<()>(1);
    let forward = ReconnectingForward::establish(Arc::new(cluster.clone()), config(), rx)
        .await
        .unwrap();

    cluster.break_tunnels();
    drop(tx);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(forward.reconnects(), 0);
    assert_eq!(forward.local_port(8080), PORT_UNSPECIFIED);
    assert!(forward.termination().get().is_none());

    let handle: &dyn ForwardHandle = &forward;
    handle.stop();
    handle.stop();
    assert!(matches!(handle.termination().get(), Some(Termination::Stopped)));
}
