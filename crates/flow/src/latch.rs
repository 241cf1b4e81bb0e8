//! One-shot barriers.

use tokio_util::sync::CancellationToken;

/// A latch-once signal with a broadcast read side.
///
/// Once [`fall`](Latch::fall) has been called, every
/// [`wait_fallen`](Latch::wait_fallen) returns immediately, forever.
/// Clones observe the same latch.
#[derive(Clone, Debug, Default)]
pub struct Latch {
    token: CancellationToken,
}

impl Latch {
    /// A latch that has not fallen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fall. Idempotent.
    pub fn fall(&self) {
        self.token.cancel();
    }

    /// True once the latch has fallen.
    pub fn has_fallen(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the latch has fallen.
    pub async fn wait_fallen(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fall_wakes_waiters() {
        let latch = Latch::new();
        assert!(!latch.has_fallen());

        let observer = latch.clone();
        let waiter = tokio::spawn(async move { observer.wait_fallen().await });

        latch.fall();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(latch.has_fallen());
    }

    #[tokio::test]
    async fn test_late_waiters_return_immediately() {
        let latch = Latch::new();
        latch.fall();
        latch.fall(); // idempotent

        tokio::time::timeout(Duration::from_millis(100), latch.wait_fallen())
            .await
            .expect("a fallen latch reads immediately");
    }
}
