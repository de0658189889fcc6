use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Lets an operator report that a bot challenge has been dealt with.
///
/// Clones share one signal. Workers that hit a challenge note the current generation, then wait
/// for a newer one before retrying.
#[derive(Debug, Clone)]
pub struct RemediationHandle {
    generation: Arc<watch::Sender<u64>>,
}

impl RemediationHandle {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self {
            generation: Arc::new(sender),
        }
    }

    /// Signal that the challenge was solved.
    pub fn signal(&self) {
        self.generation.send_modify(|g| *g += 1);
        tracing::info!("Challenge remediation signalled");
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Wait up to `limit` for a signal newer than `since`. Returns whether one arrived.
    pub async fn wait_for_signal(&self, since: u64, limit: Duration) -> bool {
        let mut receiver = self.generation.subscribe();
        let arrived = matches!(
            tokio::time::timeout(limit, receiver.wait_for(|g| *g > since)).await,
            Ok(Ok(_))
        );
        arrived
    }
}

impl Default for RemediationHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_after_wait_starts() {
        let handle = RemediationHandle::new();
        let since = handle.generation();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_for_signal(since, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        handle.signal();

        assert!(waiter.await.expect("waiter task"));
    }

    #[tokio::test]
    async fn test_signal_before_wait_is_not_lost() {
        let handle = RemediationHandle::new();
        let since = handle.generation();
        handle.signal();
        assert!(handle.wait_for_signal(since, Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let handle = RemediationHandle::new();
        let since = handle.generation();
        assert!(!handle.wait_for_signal(since, Duration::from_secs(300)).await);
    }

    #[tokio::test]
    async fn test_clones_share_generation() {
        let operator = RemediationHandle::new();
        let worker = operator.clone();
        let since = worker.generation();

        let waiter = tokio::spawn(async move {
            worker.wait_for_signal(since, Duration::from_secs(5)).await
        });
        tokio::task::yield_now().await;
        operator.signal();
        operator.signal();

        assert!(waiter.await.expect("waiter task"));
        assert_eq!(operator.generation(), since + 2);
        assert!(!operator.wait_for_signal(since + 2, Duration::from_millis(10)).await);
    }
}
