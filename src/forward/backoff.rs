//! Signals that pace reconnect attempts.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Interval;

/// Paces reconnect attempts.
///
/// Each completed `tick` permits one attempt. Returning `false` means no
/// further attempts will be permitted.
#[async_trait]
pub trait BackoffSignal: Send {
    async fn tick(&mut self) -> bool;
}

#[async_trait]
impl BackoffSignal for Interval {
    async fn tick(&mut self) -> bool {
        Interval::tick(self).await;
        true
    }
}

/// Caller-driven pacing: one attempt per message, none once the sender is gone.
#[async_trait]
impl BackoffSignal for mpsc::Receiver<()> {
    async fn tick(&mut self) -> bool {
        self.recv().await.is_some()
    }
}
