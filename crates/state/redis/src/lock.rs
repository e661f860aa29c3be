//! Redis-backed distributed locking.
//!
//! This module provides a [`RedisLock`] that arbitrates mutual exclusion
//! through a single Redis endpoint.
//!
//! # How It Works
//!
//! Every `RedisLock` instance generates a UUID owner token when it is
//! constructed. That token is the value written into lock entries.
//!
//! - **Acquire** is one `SET key token NX PX ttl`. **NX** makes the write
//!   succeed only if the key is absent, so Redis's serial command processing
//!   lets at most one caller create the entry. **PX** makes the entry expire
//!   after the TTL so a crashed holder cannot block others forever.
//! - **Release** is an optimistic transaction: `WATCH key`, `GET key`, and if
//!   the value is this instance's token, `MULTI DEL key EXEC`; otherwise
//!   `UNWATCH`. If another client touches the key between `WATCH` and `EXEC`,
//!   Redis discards the transaction and the key stays as it is.
//!
//! Releasing a lock held by another owner, or one that already expired, is a
//! silent no-op. A late release from a holder whose TTL ran out therefore
//! cannot delete the entry of whoever acquired the key next.
//!
//! # Guarantees
//!
//! Mutual exclusion holds for a single Redis instance, assuming the lock TTL
//! is longer than the critical section. With Redis Cluster or Sentinel,
//! asynchronous replication means a failover right after an acquire can lose
//! the entry and let a second owner in.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use latchkey_state::{Lock, Openable};
//! use latchkey_state_redis::{RedisConfig, RedisLock};
//!
//! let lock = RedisLock::from_config(RedisConfig::new("redis://localhost:6379"));
//! lock.open("trace-1").await?;
//!
//! if lock.try_acquire_lock("trace-1", "job-42", Duration::from_secs(30)).await? {
//!     // Critical section...
//!     lock.release_lock("trace-1", "job-42").await?;
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use latchkey_state::cache::validate_ttl;
use latchkey_state::connection::Dependencies;
use latchkey_state::error::StateError;
use latchkey_state::lock::Lock;
use latchkey_state::openable::Openable;

use crate::config::RedisConfig;
use crate::session::{ConditionalDelete, SessionSlot};

/// Redis-backed implementation of [`Lock`].
///
/// Each call to [`try_acquire_lock`](Lock::try_acquire_lock) is exactly one
/// attempt. See the [module-level documentation](self) for the protocol.
#[derive(Debug)]
pub struct RedisLock {
    config: RedisConfig,
    dependencies: Option<Dependencies>,
    token: String,
    session: SessionSlot,
}

impl RedisLock {
    /// Create a closed lock using the given resolvers.
    pub fn new(config: RedisConfig, dependencies: Dependencies) -> Self {
        Self::build(config, Some(dependencies))
    }

    /// Create a closed lock that connects to the `connection` and
    /// `credential` sections of its own configuration.
    pub fn from_config(config: RedisConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: RedisConfig, dependencies: Option<Dependencies>) -> Self {
        Self {
            config,
            dependencies,
            token: uuid::Uuid::new_v4().to_string(),
            session: SessionSlot::default(),
        }
    }

    /// Replace the configuration. Connection settings take effect on the
    /// next `open`; the retry interval applies immediately.
    pub fn configure(&mut self, config: RedisConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// The owner token written into lock entries held by this instance.
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[async_trait]
impl Openable for RedisLock {
    #[instrument(skip(self))]
    async fn open(&self, trace_id: &str) -> Result<(), StateError> {
        let dependencies = self
            .dependencies
            .clone()
            .unwrap_or_else(|| self.config.dependencies());
        self.session
            .open(trace_id, &self.config, &dependencies)
            .await
    }

    #[instrument(skip(self))]
    async fn close(&self, trace_id: &str) -> Result<(), StateError> {
        self.session.close(trace_id).await
    }

    async fn is_open(&self) -> bool {
        self.session.is_open().await
    }
}

#[async_trait]
impl Lock for RedisLock {
    #[instrument(skip(self))]
    async fn try_acquire_lock(
        &self,
        trace_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, StateError> {
        let session = self.session.get(trace_id).await?;
        let ttl_ms = validate_ttl(ttl)?;

        // "OK" when written, nil when NX found the key taken.
        let result: Result<Option<String>, StateError> = session
            .query(
                trace_id,
                redis::cmd("SET")
                    .arg(key)
                    .arg(&self.token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms),
            )
            .await;
        let reply = self.session.settle(trace_id, &session, result).await?;

        let granted = reply.is_some();
        debug!(granted, "lock acquire attempt");
        Ok(granted)
    }

    #[instrument(skip(self))]
    async fn release_lock(&self, trace_id: &str, key: &str) -> Result<(), StateError> {
        let session = self.session.get(trace_id).await?;
        let result = session.delete_if_equals(trace_id, key, &self.token).await;
        let outcome = self.session.settle(trace_id, &session, result).await?;

        match outcome {
            ConditionalDelete::Deleted => debug!("lock released"),
            ConditionalDelete::Mismatch => debug!("lock not held by this owner, nothing released"),
            ConditionalDelete::Conflict => {
                debug!("lock changed during release, transaction discarded");
            }
        }
        Ok(())
    }

    fn retry_interval(&self) -> Duration {
        self.config.options.retry_interval()
    }
}
