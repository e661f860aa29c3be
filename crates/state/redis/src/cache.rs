use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use latchkey_state::cache::{Cache, validate_ttl};
use latchkey_state::connection::Dependencies;
use latchkey_state::error::StateError;
use latchkey_state::openable::Openable;

use crate::config::RedisConfig;
use crate::session::SessionSlot;

/// Redis-backed implementation of [`Cache`].
///
/// Values are plain Redis strings written with `SET key value PX ttl`; expiry
/// is left entirely to Redis. A stored value that is not UTF-8 is reported as
/// [`StateError::Serialization`]. Data operations fail with
/// [`StateError::NotOpened`] until [`open`](Openable::open) succeeds.
#[derive(Debug)]
pub struct RedisCache {
    config: RedisConfig,
    dependencies: Option<Dependencies>,
    session: SessionSlot,
}

impl RedisCache {
    /// Create a closed cache using the given resolvers.
    pub fn new(config: RedisConfig, dependencies: Dependencies) -> Self {
        Self {
            config,
            dependencies: Some(dependencies),
            session: SessionSlot::default(),
        }
    }

    /// Create a closed cache that connects to the `connection` and
    /// `credential` sections of its own configuration.
    pub fn from_config(config: RedisConfig) -> Self {
        Self {
            config,
            dependencies: None,
            session: SessionSlot::default(),
        }
    }

    /// Replace the configuration. Takes effect on the next `open`.
    pub fn configure(&mut self, config: RedisConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

#[async_trait]
impl Openable for RedisCache {
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
impl Cache for RedisCache {
    #[instrument(skip(self))]
    async fn retrieve(&self, trace_id: &str, key: &str) -> Result<Option<String>, StateError> {
        let session = self.session.get(trace_id).await?;
        let result: Result<Option<Vec<u8>>, StateError> =
            session.query(trace_id, redis::cmd("GET").arg(key)).await;
        let raw = self.session.settle(trace_id, &session, result).await?;

        raw.map(String::from_utf8)
            .transpose()
            .map_err(|e| StateError::Serialization(format!("value is not UTF-8: {e}")))
    }

    #[instrument(skip(self, value))]
    async fn store(
        &self,
        trace_id: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StateError> {
        let session = self.session.get(trace_id).await?;
        let ttl_ms = validate_ttl(ttl)?;

        let result: Result<(), StateError> = session
            .query(trace_id, redis::cmd("SET").arg(key).arg(value).arg("PX").arg(ttl_ms))
            .await;
        self.session.settle(trace_id, &session, result).await
    }

    #[instrument(skip(self))]
    async fn remove(&self, trace_id: &str, key: &str) -> Result<(), StateError> {
        let session = self.session.get(trace_id).await?;
        let result: Result<(), StateError> =
            session.query(trace_id, redis::cmd("DEL").arg(key)).await;
        self.session.settle(trace_id, &session, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted_server::{Reply, ScriptedServer};

    fn closed_cache() -> RedisCache {
        RedisCache::from_config(RedisConfig::new("redis://127.0.0.1:6379"))
    }

    #[tokio::test]
    async fn operations_require_open() {
        let cache = closed_cache();
        assert!(!cache.is_open().await);

        let err = cache.retrieve("t-1", "k").await.unwrap_err();
        assert!(matches!(err, StateError::NotOpened { ref trace_id } if trace_id == "t-1"));

        let err = cache
            .store("t-2", "k", "v", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::NotOpened { .. }));

        let err = cache.remove("t-3", "k").await.unwrap_err();
        assert!(matches!(err, StateError::NotOpened { .. }));
    }

    #[tokio::test]
    async fn not_opened_wins_over_bad_ttl() {
        let cache = closed_cache();
        let err = cache.store("t", "k", "v", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, StateError::NotOpened { .. }));
    }

    #[tokio::test]
    async fn close_when_closed_is_noop() {
        let cache = closed_cache();
        cache.close("t").await.unwrap();
        cache.close("t").await.unwrap();
    }

    #[tokio::test]
    async fn open_uses_injected_resolvers() {
        // The configuration names a server, but the resolvers know none.
        let cache = RedisCache::new(
            RedisConfig::new("redis://127.0.0.1:6379"),
            Dependencies::fixed(None, None),
        );
        let err = cache.open("t").await.unwrap_err();
        assert!(matches!(err, StateError::NoConnection { .. }));
    }

    #[tokio::test]
    async fn open_without_connection_fails() {
        let cache = RedisCache::from_config(RedisConfig::default());
        let err = cache.open("t-open").await.unwrap_err();
        assert!(matches!(err, StateError::NoConnection { ref trace_id } if trace_id == "t-open"));
        assert!(!cache.is_open().await);
    }

    #[tokio::test]
    async fn open_refused_stays_closed() {
        let mut cache = closed_cache();
        cache.configure(RedisConfig::new("redis://127.0.0.1:1"));

        let err = cache.open("t").await.unwrap_err();
        assert!(matches!(err, StateError::ConnectionRefused(_)), "got {err:?}");
        assert!(!cache.is_open().await);
        assert!(matches!(
            cache.retrieve("t", "k").await,
            Err(StateError::NotOpened { .. })
        ));
    }

    #[tokio::test]
    async fn non_utf8_value_is_a_serialization_error() {
        let server = ScriptedServer::start(|_, args| {
            if args[0].eq_ignore_ascii_case(b"GET") {
                if args[1] == b"binary" {
                    Reply::bulk(&[0xc3, 0x28])
                } else {
                    Reply::bulk(b"plain")
                }
            } else {
                Reply::ok()
            }
        })
        .await;
        let cache = RedisCache::from_config(RedisConfig::new(server.url()));
        cache.open("t").await.unwrap();

        assert_eq!(cache.retrieve("t", "text").await.unwrap().as_deref(), Some("plain"));
        let err = cache.retrieve("t", "binary").await.unwrap_err();
        assert!(matches!(err, StateError::Serialization(_)), "got {err:?}");
        assert!(cache.is_open().await);
    }

    #[tokio::test]
    async fn exhausted_reconnect_closes_the_cache() {
        let server = ScriptedServer::start(|index, args| {
            if index > 0 || args[0].eq_ignore_ascii_case(b"GET") {
                Reply::HangUp
            } else {
                Reply::ok()
            }
        })
        .await;
        let cache = RedisCache::from_config(RedisConfig::new(server.url()));
        cache.open("t").await.unwrap();

        let err = cache.retrieve("t", "k").await.unwrap_err();
        assert!(matches!(err, StateError::Connection(_)), "got {err:?}");

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            match cache.retrieve("t", "k").await {
                Err(StateError::RetriesExhausted(_)) => break,
                Err(StateError::NotOpened { .. }) => {
                    assert!(std::time::Instant::now() < deadline, "reconnect never gave up");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                other => panic!("unexpected result {other:?}"),
            }
        }

        assert!(!cache.is_open().await);
        assert!(matches!(
            cache.retrieve("t", "k").await,
            Err(StateError::NotOpened { .. })
        ));
        assert_eq!(server.connections(), 1 + 4);
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use latchkey_state::testing::run_cache_conformance_tests;

    use super::*;

    fn test_config() -> RedisConfig {
        RedisConfig::new(
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        )
    }

    #[tokio::test]
    async fn cache_conformance() {
        let cache = RedisCache::from_config(test_config());
        cache.open("it").await.expect("open should succeed");
        let prefix = format!("latchkey-test-{}", uuid::Uuid::new_v4());
        run_cache_conformance_tests(&cache, &prefix)
            .await
            .expect("conformance tests should pass");
        cache.close("it").await.expect("close should succeed");
        assert!(!cache.is_open().await);
    }

    #[tokio::test]
    async fn reopen_after_close() {
        let cache = RedisCache::from_config(test_config());
        cache.open("it").await.unwrap();
        cache.close("it").await.unwrap();
        assert!(matches!(
            cache.retrieve("it", "k").await,
            Err(StateError::NotOpened { .. })
        ));
        cache.open("it").await.unwrap();
        assert!(cache.retrieve("it", "latchkey-missing").await.unwrap().is_none());
        cache.close("it").await.unwrap();
    }
}
