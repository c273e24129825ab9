use std::sync::Arc;

use chrono::{TimeZone, Utc};
use podkit::config::StreamConfig;
use podkit::pod::memory::{MemoryCluster, PodTemplate};
use podkit::stream::{stream_logs, FilterFn, JsonLinesConsumer, LogEntry, LogStreamer, TextConsumer};
use tokio_util::sync::CancellationToken;

use super::{SharedBuffer, WAIT};

fn cluster_with_logs() -> MemoryCluster {
    let cluster = MemoryCluster::new();
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let a = cluster.add_pod("default", PodTemplate::new("api-0").label("app", "api"));
    let b = cluster.add_pod("default", PodTemplate::new("api-1").label("app", "api"));
    cluster.push_log(&b.uid, base + chrono::Duration::seconds(1), "second");
    cluster.push_log(&a.uid, base, "first");
    cluster
}

#[tokio::test]
async fn test_json_lines_output() {
    let cluster = cluster_with_logs();
    let buffer = SharedBuffer::default();

    let summary = tokio::time::timeout(
        WAIT,
        stream_logs(
            Arc::new(cluster),
            StreamConfig::from_selected_pods("app=api"),
            JsonLinesConsumer::new(buffer.clone()),
            CancellationToken::new(),
        ),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(summary.entries, 2);

    let entries: Vec<LogEntry> = buffer
        .contents()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let texts: Vec<_> = entries.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(texts, ["first", "second"]);
}

#[tokio::test]
async fn test_text_output_with_custom_filter() {
    let cluster = cluster_with_logs();
    let buffer = SharedBuffer::default();

    LogStreamer::new(Arc::new(cluster), StreamConfig::from_selected_pods("app=api"))
        .unwrap()
        .with_filter(FilterFn::new(|line: &str| line.starts_with('s')))
        .with_consumer(TextConsumer::new(buffer.clone()))
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(buffer.contents(), "second\n");
}

#[tokio::test]
async fn test_closure_consumer() {
    let cluster = cluster_with_logs();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    LogStreamer::new(Arc::new(cluster), StreamConfig::from_selected_pods("app=api"))
        .unwrap()
        .with_consumer_fn(move |logs: &[LogEntry]| {
            let _ = tx.send(logs.len());
        })
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(rx.recv().await, Some(2));
    assert_eq!(rx.recv().await, None);
}
