use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StateError;

/// A TTL-bounded key/value cache.
///
/// Expiry and capacity are the backing store's business; the client keeps no
/// entries of its own. Implementations must be `Send + Sync` and safe for
/// concurrent access.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get the value for a key. Returns `None` if not found or expired.
    ///
    /// Values are UTF-8 strings. A stored value that does not decode fails
    /// with [`StateError::Serialization`].
    async fn retrieve(&self, trace_id: &str, key: &str) -> Result<Option<String>, StateError>;

    /// Store a value that expires after `ttl`, overwriting any previous value
    /// and replacing its TTL.
    async fn store(
        &self,
        trace_id: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StateError>;

    /// Remove a key. Removing a missing key succeeds.
    async fn remove(&self, trace_id: &str, key: &str) -> Result<(), StateError>;
}

/// JSON helpers available on every [`Cache`].
#[async_trait]
pub trait CacheExt: Cache {
    /// Retrieve and decode a JSON value.
    async fn retrieve_json<T: DeserializeOwned>(
        &self,
        trace_id: &str,
        key: &str,
    ) -> Result<Option<T>, StateError> {
        match self.retrieve(trace_id, key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StateError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Encode a value as JSON and store it.
    async fn store_json<T: Serialize + Sync>(
        &self,
        trace_id: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StateError> {
        let raw =
            serde_json::to_string(value).map_err(|e| StateError::Serialization(e.to_string()))?;
        self.store(trace_id, key, &raw, ttl).await
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

/// Reject TTLs the store cannot express.
pub fn validate_ttl(ttl: Duration) -> Result<u64, StateError> {
    let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 {
        return Err(StateError::InvalidArgument(
            "ttl must be at least one millisecond".to_owned(),
        ));
    }
    Ok(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify object safety.
    fn _assert_dyn_cache(_: &dyn Cache) {}

    #[test]
    fn ttl_in_millis() {
        assert_eq!(validate_ttl(Duration::from_secs(2)).unwrap(), 2000);
        assert_eq!(validate_ttl(Duration::from_micros(1500)).unwrap(), 1);
    }

    #[test]
    fn zero_ttl_rejected() {
        assert!(matches!(
            validate_ttl(Duration::ZERO),
            Err(StateError::InvalidArgument(_))
        ));
        assert!(validate_ttl(Duration::from_micros(999)).is_err());
    }
}
