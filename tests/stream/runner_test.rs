use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use podkit::config::StreamConfig;
use podkit::error::ApiError;
use podkit::log::NoopLogger;
use podkit::pod::memory::{MemoryCluster, PodTemplate};
use podkit::stream::{LogStreamer, RunState, StreamError};
use tokio_util::sync::CancellationToken;

use super::{wait_for_entries, Deliveries, Recorder, WAIT};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn web(name: &str) -> PodTemplate {
    PodTemplate::new(name).label("app", "web")
}

fn streamer(cluster: &MemoryCluster, config: StreamConfig) -> LogStreamer {
    LogStreamer::new(Arc::new(cluster.clone()), config)
        .unwrap()
        .with_logger(Arc::new(NoopLogger))
}

#[tokio::test]
async fn test_no_matches_delivers_nothing() {
    let cluster = MemoryCluster::new();
    cluster.add_pod("default", PodTemplate::new("db-0").label("app", "db"));
    let deliveries = Deliveries::default();

    let summary = tokio::time::timeout(
        WAIT,
        streamer(&cluster, StreamConfig::from_selected_pods("app=web"))
            .with_consumer(Recorder::new("only", &deliveries))
            .run(CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.pods_tracked, 0);
    assert_eq!(summary.batches, 0);
    assert!(deliveries.lock().unwrap().is_empty());
    assert_eq!(cluster.log_opens(), 0);
}

#[tokio::test]
async fn test_single_ordered_batch_to_each_consumer_in_order() {
    let cluster = MemoryCluster::new();
    let pods: Vec<_> = (0..3)
        .map(|i| cluster.add_pod("default", web(&format!("web-{i}")).started_at(at(i * 60))))
        .collect();
    // Lines are written in the order t2, t0, t1.
    cluster.push_log(&pods[2].uid, at(2), "t2");
    cluster.push_log(&pods[0].uid, at(0), "t0");
    cluster.push_log(&pods[1].uid, at(1), "t1");

    let deliveries = Deliveries::default();
    let summary = tokio::time::timeout(
        WAIT,
        streamer(&cluster, StreamConfig::from_selected_pods("app=web"))
            .with_consumer(Recorder::new("first", &deliveries))
            .with_consumer(Recorder::new("second", &deliveries))
            .run(CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.pods_tracked, 3);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.entries, 3);

    let deliveries = deliveries.lock().unwrap();
    let names: Vec<_> = deliveries.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["first", "second"]);
    for (_, batch) in deliveries.iter() {
        let texts: Vec<_> = batch.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, ["t0", "t1", "t2"]);
    }
}

#[tokio::test]
async fn test_line_without_timestamp_is_delivered_raw() {
    let cluster = MemoryCluster::new();
    let pod = cluster.add_pod("default", web("web-0"));
    cluster.push_raw_log(&pod.uid, "goroutine 1 [running]:");

    let deliveries = Deliveries::default();
    let before = Utc::now();
    streamer(&cluster, StreamConfig::from_selected_pods("app=web"))
        .with_consumer(Recorder::new("only", &deliveries))
        .run(CancellationToken::new())
        .await
        .unwrap();
    let after = Utc::now();

    let deliveries = deliveries.lock().unwrap();
    let entry = &deliveries[0].1[0];
    assert_eq!(entry.text, "goroutine 1 [running]:");
    assert!(entry.time >= before && entry.time <= after);
}

#[tokio::test]
async fn test_filter_pattern_applies_to_content() {
    let cluster = MemoryCluster::new();
    let pod = cluster.add_pod("default", web("web-0"));
    cluster.push_log(&pod.uid, at(0), "INFO started");
    cluster.push_log(&pod.uid, at(1), "ERROR failed to bind");
    cluster.push_log(&pod.uid, at(2), "INFO retrying");

    let deliveries = Deliveries::default();
    let config = StreamConfig::from_selected_pods("app=web").with_filter_pattern("^ERROR");
    let summary = streamer(&cluster, config)
        .with_consumer(Recorder::new("only", &deliveries))
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.entries, 1);
    assert_eq!(deliveries.lock().unwrap()[0].1[0].text, "ERROR failed to bind");
}

#[tokio::test]
async fn test_list_failure_aborts_before_readers() {
    let cluster = MemoryCluster::new();
    cluster.add_pod("default", web("web-0"));
    cluster.fail_list(Some("forbidden"));

    let streamer = streamer(&cluster, StreamConfig::from_selected_pods("app=web"));
    let state = streamer.state();
    let result = streamer.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(StreamError::Api(ApiError::Request(_)))));
    assert_eq!(cluster.log_opens(), 0);
    assert_eq!(*state.borrow(), RunState::Stopped);
}

#[tokio::test]
async fn test_follow_picks_up_new_pods_across_watch_restarts() {
    let cluster = MemoryCluster::new();
    let first = cluster.add_pod("default", web("web-0"));
    cluster.push_log(&first.uid, at(0), "from web-0");

    let deliveries = Deliveries::default();
    let cancel = CancellationToken::new();
    let config = StreamConfig::follow_selected_pods("app=web")
        .with_flush_interval(Duration::from_millis(20));
    let handle = streamer(&cluster, config)
        .with_consumer(Recorder::new("only", &deliveries))
        .spawn(cancel.clone());

    wait_for_entries(&deliveries, 1).await;
    let second = cluster.add_pod("default", web("web-1"));
    cluster.push_log(&second.uid, at(1), "from web-1");
    wait_for_entries(&deliveries, 2).await;

    cluster.close_watches();
    let third = cluster.add_pod("default", web("web-2"));
    cluster.push_log(&third.uid, at(2), "from web-2");
    wait_for_entries(&deliveries, 3).await;

    // A later line from an already tracked pod arrives through its reader.
    cluster.push_log(&first.uid, at(3), "web-0 again");
    wait_for_entries(&deliveries, 4).await;

    cancel.cancel();
    let summary = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
    assert_eq!(summary.pods_tracked, 3);
    assert_eq!(summary.entries, 4);
    assert_eq!(cluster.log_opens(), 3);
    assert!(cluster.watch_requests().len() >= 2);
}

#[tokio::test]
async fn test_follow_skips_pending_until_running() {
    let cluster = MemoryCluster::new();
    let deliveries = Deliveries::default();
    let cancel = CancellationToken::new();
    let config = StreamConfig::follow_selected_pods("app=web")
        .with_flush_interval(Duration::from_millis(20));
    let handle = streamer(&cluster, config)
        .with_consumer(Recorder::new("only", &deliveries))
        .spawn(cancel.clone());

    let pod = cluster.add_pod("default", web("web-0").phase(podkit::pod::PodPhase::Pending));
    cluster.push_log(&pod.uid, at(0), "scheduled");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cluster.log_opens(), 0);

    cluster.set_phase(&pod.uid, podkit::pod::PodPhase::Running);
    wait_for_entries(&deliveries, 1).await;

    cancel.cancel();
    let summary = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
    assert_eq!(summary.pods_tracked, 1);
}

#[tokio::test]
async fn test_follow_watch_failure_ends_run_with_error() {
    let cluster = MemoryCluster::new();
    cluster.add_pod("default", web("web-0"));
    cluster.fail_watch(Some("watch denied"));

    let config = StreamConfig::follow_selected_pods("app=web");
    let run = streamer(&cluster, config).run(CancellationToken::new());
    let result = tokio::time::timeout(WAIT, run).await.unwrap();

    assert!(matches!(result, Err(StreamError::Api(ApiError::Request(_)))));
}

#[tokio::test]
async fn test_late_entry_is_not_merged_into_earlier_batch() {
    let cluster = MemoryCluster::new();
    let pod = cluster.add_pod("default", web("web-0"));
    cluster.push_log(&pod.uid, at(10), "newer, read first");

    let deliveries = Deliveries::default();
    let cancel = CancellationToken::new();
    let config = StreamConfig::follow_selected_pods("app=web")
        .with_flush_interval(Duration::from_millis(20));
    let handle = streamer(&cluster, config)
        .with_consumer(Recorder::new("only", &deliveries))
        .spawn(cancel.clone());

    wait_for_entries(&deliveries, 1).await;
    cluster.push_log(&pod.uid, at(0), "older, read later");
    wait_for_entries(&deliveries, 2).await;

    cancel.cancel();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap().unwrap();

    let deliveries = deliveries.lock().unwrap();
    let flattened: Vec<_> = deliveries
        .iter()
        .flat_map(|(_, batch)| batch.iter().map(|e| e.text.as_str()))
        .collect();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(flattened, ["newer, read first", "older, read later"]);
}

#[tokio::test]
async fn test_caller_cancel_stops_non_follow_run() {
    let cluster = MemoryCluster::new();
    cluster.add_pod("default", web("web-0"));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = tokio::time::timeout(
        WAIT,
        streamer(&cluster, StreamConfig::from_selected_pods("app=web")).run(cancel),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.entries, 0);
}
