use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use latchkey_state::cache::validate_ttl;
use latchkey_state::error::StateError;
use latchkey_state::lock::Lock;

use crate::store::MemoryStore;

/// In-memory [`Lock`] backed by a [`MemoryStore`].
///
/// Each instance owns a token generated at construction. Instances created
/// over the same store compete for the same keys.
#[derive(Debug, Clone)]
pub struct MemoryLock {
    store: MemoryStore,
    token: String,
    retry_interval: Duration,
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::with_store(MemoryStore::new())
    }
}

impl MemoryLock {
    /// Create a lock over its own private store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lock over a shared store.
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            token: Uuid::new_v4().to_string(),
            retry_interval: Duration::from_millis(latchkey_state::options::DEFAULT_RETRY_TIMEOUT_MS),
        }
    }

    /// Override the delay used by blocking acquisition.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// The owner token written into entries held by this instance.
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[async_trait]
impl Lock for MemoryLock {
    async fn try_acquire_lock(
        &self,
        trace_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, StateError> {
        validate_ttl(ttl)?;
        let granted = self.store.set_if_absent(key, &self.token, ttl);
        debug!(trace_id, key, granted, "memory lock acquire attempt");
        Ok(granted)
    }

    async fn release_lock(&self, trace_id: &str, key: &str) -> Result<(), StateError> {
        let released = self.store.delete_if_equals(key, &self.token);
        debug!(trace_id, key, released, "memory lock release");
        Ok(())
    }

    fn retry_interval(&self) -> Duration {
        self.retry_interval
    }
}
