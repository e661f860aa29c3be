use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::error::StateError;
use crate::options::DEFAULT_RETRY_TIMEOUT_MS;

/// A mutual exclusion lock arbitrated by a shared store.
///
/// Every lock instance carries an owner token. A lock entry written by one
/// instance can only be released by that same instance.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Make a single attempt to take the lock for `ttl`.
    ///
    /// Returns `false` if another owner currently holds `key`. Never waits.
    async fn try_acquire_lock(
        &self,
        trace_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, StateError>;

    /// Release the lock if, and only if, this instance holds it.
    ///
    /// Releasing a lock held by someone else, or one that already expired, is
    /// a no-op.
    async fn release_lock(&self, trace_id: &str, key: &str) -> Result<(), StateError>;

    /// Delay between attempts in [`acquire_lock`](Lock::acquire_lock).
    fn retry_interval(&self) -> Duration {
        Duration::from_millis(DEFAULT_RETRY_TIMEOUT_MS)
    }

    /// Acquire a lock, polling until it is granted or `timeout` elapses.
    async fn acquire_lock(
        &self,
        trace_id: &str,
        key: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<(), StateError> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.try_acquire_lock(trace_id, key, ttl).await? {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(trace_id, key, "lock acquisition timed out");
                return Err(StateError::Timeout(timeout));
            }

            let sleep_dur = self.retry_interval().min(deadline - now);
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    // Verify object safety.
    fn _assert_dyn_lock(_: &dyn Lock) {}

    /// Grants the lock on the n-th attempt.
    struct GrantOnAttempt {
        grant_on: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Lock for GrantOnAttempt {
        async fn try_acquire_lock(
            &self,
            _trace_id: &str,
            _key: &str,
            _ttl: Duration,
        ) -> Result<bool, StateError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n >= self.grant_on)
        }

        async fn release_lock(&self, _trace_id: &str, _key: &str) -> Result<(), StateError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_polls_until_granted() {
        let lock = GrantOnAttempt {
            grant_on: 3,
            attempts: AtomicU32::new(0),
        };
        lock.acquire_lock("t", "k", Duration::from_secs(1), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(lock.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out() {
        let lock = GrantOnAttempt {
            grant_on: u32::MAX,
            attempts: AtomicU32::new(0),
        };
        let err = lock
            .acquire_lock("t", "k", Duration::from_secs(1), Duration::from_millis(350))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Timeout(d) if d == Duration::from_millis(350)));
        // Attempts at 0, 100, 200, 300 and a final one at the deadline.
        assert_eq!(lock.attempts.load(Ordering::SeqCst), 5);
    }
}
