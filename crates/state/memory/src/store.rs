use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// A single entry in the in-memory store.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    /// Returns `true` if this entry has passed its TTL deadline.
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Shared in-process key/value map with per-entry expiry.
///
/// Cloning is cheap and every clone sees the same data, so several cache and
/// lock instances can arbitrate through one store the way separate processes
/// do through a shared server. Expiry is lazy: expired entries are evicted by
/// the next operation touching the same key.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &str) -> Option<String> {
        // Lazy TTL eviction.
        self.data.remove_if(key, |_, entry| entry.is_expired());
        self.data.get(key).map(|entry| entry.value.clone())
    }

    pub(crate) fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.data.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Insert only if no live entry exists. Returns `true` if inserted.
    pub(crate) fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        self.data.remove_if(key, |_, entry| entry.is_expired());

        // Use `entry` API for atomicity: only insert if vacant.
        match self.data.entry(key.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: value.to_owned(),
                    expires_at: Instant::now() + ttl,
                });
                true
            }
        }
    }

    pub(crate) fn delete(&self, key: &str) {
        self.data.remove(key);
    }

    /// Delete only if the live value equals `expected`. Returns `true` if
    /// deleted.
    pub(crate) fn delete_if_equals(&self, key: &str, expected: &str) -> bool {
        self.data
            .remove_if(key, |_, entry| !entry.is_expired() && entry.value == expected)
            .is_some()
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
