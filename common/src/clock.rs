//! Injectable sleep used by the lock-retry loop.

use async_trait::async_trait;

#[async_trait]
pub trait Sleep: Send + Sync {
    async fn sleep(&self, duration: std::time::Duration);
}

/// Wall-clock sleep backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleep;

#[async_trait]
impl Sleep for TokioSleep {
    async fn sleep(&self, duration: std::time::Duration) {
        tokio::time::sleep(duration).await;
    }
}
