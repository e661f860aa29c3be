use std::time::Duration;

use async_trait::async_trait;

use latchkey_state::cache::{Cache, validate_ttl};
use latchkey_state::error::StateError;

use crate::store::MemoryStore;

/// In-memory [`Cache`] backed by a [`MemoryStore`].
///
/// Always open; there is no session to manage.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    store: MemoryStore,
}

impl MemoryCache {
    /// Create a cache over its own private store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache over a shared store.
    pub fn with_store(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn retrieve(&self, _trace_id: &str, key: &str) -> Result<Option<String>, StateError> {
        Ok(self.store.get(key))
    }

    async fn store(
        &self,
        _trace_id: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StateError> {
        validate_ttl(ttl)?;
        self.store.set(key, value, ttl);
        Ok(())
    }

    async fn remove(&self, _trace_id: &str, key: &str) -> Result<(), StateError> {
        self.store.delete(key);
        Ok(())
    }
}
