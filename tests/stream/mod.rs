//! Log stream tests against the in-memory cluster.

mod consumer_test;
mod runner_test;

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use podkit::stream::{LogConsumer, LogEntry};

pub const WAIT: Duration = Duration::from_secs(5);

/// Batches received by every [`Recorder`] sharing a log, tagged by name.
pub type Deliveries = Arc<Mutex<Vec<(String, Vec<LogEntry>)>>>;

/// Consumer that records each batch it receives.
pub struct Recorder {
    name: String,
    deliveries: Deliveries,
}

impl Recorder {
    pub fn new(name: &str, deliveries: &Deliveries) -> Self {
        Self {
            name: name.to_string(),
            deliveries: Arc::clone(deliveries),
        }
    }
}

impl LogConsumer for Recorder {
    fn on_logs(&mut self, logs: &[LogEntry]) {
        self.deliveries
            .lock()
            .unwrap()
            .push((self.name.clone(), logs.to_vec()));
    }
}

/// Writer whose contents stay readable after it is moved into a consumer.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Wait until the recorded entries reach `count`.
pub async fn wait_for_entries(deliveries: &Deliveries, count: usize) {
    tokio::time::timeout(WAIT, async {
        loop {
            let seen: usize = deliveries.lock().unwrap().iter().map(|(_, b)| b.len()).sum();
            if seen >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("entries not delivered in time");
}

/// Verify the stream types are exported from the library.
#[test]
fn test_stream_types_exported() {
    use podkit::stream::{
        ConsumerChain, FilterFn, LogAggregator, RegexFilter, RunState, StreamSummary,
        DEFAULT_BUFFER_CAPACITY,
    };

    assert_eq!(DEFAULT_BUFFER_CAPACITY, 128);
    assert_eq!(RunState::default(), RunState::Idle);
    assert_eq!(StreamSummary::default().batches, 0);

    let _ = LogAggregator::new(ConsumerChain::new(), Duration::from_secs(1));
    let _ = FilterFn::new(|_: &str| true);
    assert!(RegexFilter::new("ok").is_ok());
}
