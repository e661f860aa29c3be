//! Store client session.
//!
//! A [`RedisSession`] owns one multiplexed connection to Redis. Connection
//! establishment, both on open and after the connection drops, runs through
//! the [`BackoffPolicy`]. Commands themselves are never retried: a command
//! that fails because the connection dropped returns its error to the caller
//! and starts one background reconnect. Commands issued while that reconnect
//! runs fail at once with [`StateError::NotOpened`]; if the policy gives up,
//! every later command fails with its error without dialing again.
//!
//! [`SessionSlot`] holds the optional session of a component and implements
//! the shared `Closed -> Open -> Closed` lifecycle.

use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::{
    Client, Cmd, ConnectionAddr, ConnectionInfo, FromRedisValue, IntoConnectionInfo, RedisError,
    RedisResult,
};
use secrecy::ExposeSecret;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use latchkey_state::backoff::{
    BackoffPolicy, ConnectFailure, ReconnectAttempt, ReconnectDecision,
};
use latchkey_state::connection::{ConnectionParams, CredentialParams, Dependencies, Endpoint};
use latchkey_state::error::StateError;

use crate::config::{DEFAULT_PORT, RedisConfig};

/// Result of an owner-checked delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalDelete {
    /// The key held the expected value and was deleted.
    Deleted,
    /// The key was missing or held another value; nothing was changed.
    Mismatch,
    /// The key changed between the read and the delete; the transaction was
    /// discarded by the server.
    Conflict,
}

/// State of the session's connection.
enum Link {
    Up(MultiplexedConnection),
    /// A background task is re-establishing the connection.
    Reconnecting,
    /// The backoff policy gave up. Every later command reports this error.
    Failed(StateError),
}

/// The current link and the generation it belongs to. The generation is
/// bumped on every reconnect so concurrent failures reconnect only once.
struct Live {
    generation: u64,
    link: Link,
    reconnect: Option<AbortHandle>,
}

/// A session with a single Redis endpoint.
pub struct RedisSession {
    client: Client,
    policy: BackoffPolicy,
    endpoint: String,
    live: Arc<RwLock<Live>>,
    /// Serializes WATCH sections. `EXEC` and `UNWATCH` clear every watch on a
    /// connection, so two sections must never overlap on the shared one.
    watch_gate: Mutex<()>,
}

impl RedisSession {
    /// Build a client from the resolved descriptors and connect under the
    /// backoff policy.
    pub async fn connect(
        connection: &ConnectionParams,
        credential: Option<&CredentialParams>,
        policy: BackoffPolicy,
        trace_id: &str,
    ) -> Result<Self, StateError> {
        let info = connection_info(connection, credential)?;
        let endpoint = info.addr.to_string();
        let client = Client::open(info).map_err(|e| StateError::Config(e.to_string()))?;

        let conn = establish(&client, &policy, &endpoint, trace_id).await?;
        info!(trace_id, endpoint = %endpoint, "redis session opened");

        Ok(Self {
            client,
            policy,
            endpoint,
            live: Arc::new(RwLock::new(Live {
                generation: 0,
                link: Link::Up(conn),
                reconnect: None,
            })),
            watch_gate: Mutex::new(()),
        })
    }

    /// The `host:port` (or socket path) this session talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The live connection. While a reconnect is in flight this fails at
    /// once with [`StateError::NotOpened`]; once the policy has given up it
    /// fails with the policy's error.
    async fn connection(&self, trace_id: &str) -> Result<(u64, MultiplexedConnection), StateError> {
        let live = self.live.read().await;
        match &live.link {
            Link::Up(conn) => Ok((live.generation, conn.clone())),
            Link::Reconnecting => {
                debug!(trace_id, endpoint = %self.endpoint, "redis session is reconnecting");
                Err(StateError::not_opened(trace_id))
            }
            Link::Failed(err) => Err(err.clone()),
        }
    }

    /// Run a single command.
    pub async fn query<T: FromRedisValue>(&self, trace_id: &str, cmd: &Cmd) -> Result<T, StateError> {
        let (generation, mut conn) = self.connection(trace_id).await?;
        let result: RedisResult<T> = cmd.query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.command_failed(trace_id, generation, e).await),
        }
    }

    /// Delete `key` only if it currently holds `expected`.
    ///
    /// Uses `WATCH key`, `GET key`, then either `MULTI DEL key EXEC` or
    /// `UNWATCH`. If another client writes `key` after the `WATCH`, the
    /// server discards the transaction and the key is left untouched. Values
    /// are compared as bytes, so a non-UTF-8 owner is just a mismatch.
    pub async fn delete_if_equals(
        &self,
        trace_id: &str,
        key: &str,
        expected: &str,
    ) -> Result<ConditionalDelete, StateError> {
        let _gate = self.watch_gate.lock().await;
        let (generation, mut conn) = self.connection(trace_id).await?;

        let watched: RedisResult<()> = redis::cmd("WATCH").arg(key).query_async(&mut conn).await;
        if let Err(e) = watched {
            return Err(self.command_failed(trace_id, generation, e).await);
        }

        match compare_and_delete(&mut conn, key, expected.as_bytes()).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if !e.is_connection_dropped() {
                    // The watch must not outlive this section on the shared connection.
                    let unwatched: RedisResult<()> =
                        redis::cmd("UNWATCH").query_async(&mut conn).await;
                    if let Err(unwatch_err) = unwatched {
                        debug!(trace_id, error = %unwatch_err, "UNWATCH after failed release did not complete");
                    }
                }
                Err(self.command_failed(trace_id, generation, e).await)
            }
        }
    }

    /// Say goodbye to the server. The connection is dropped with the session.
    pub async fn quit(&self, trace_id: &str) -> Result<(), StateError> {
        let conn = {
            let mut live = self.live.write().await;
            if let Some(task) = live.reconnect.take() {
                task.abort();
            }
            match &live.link {
                Link::Up(conn) => Some(conn.clone()),
                Link::Reconnecting | Link::Failed(_) => None,
            }
        };

        if let Some(mut conn) = conn {
            let result: RedisResult<()> = redis::cmd("QUIT").query_async(&mut conn).await;
            match result {
                Ok(()) => {}
                // The server may hang up before the reply is read.
                Err(e) if e.is_connection_dropped() => {}
                Err(e) => return Err(StateError::Connection(e.to_string())),
            }
        }
        info!(trace_id, endpoint = %self.endpoint, "redis session closed");
        Ok(())
    }

    /// Map a command failure. A lost connection starts a background
    /// reconnect and is reported to this caller as [`StateError::Connection`].
    async fn command_failed(&self, trace_id: &str, generation: u64, err: RedisError) -> StateError {
        if !(err.is_connection_dropped() || err.is_unrecoverable_error()) {
            return StateError::Backend(err.to_string());
        }

        warn!(trace_id, endpoint = %self.endpoint, error = %err, "redis connection lost");
        self.start_reconnect(trace_id, generation).await;
        StateError::Connection(err.to_string())
    }

    async fn start_reconnect(&self, trace_id: &str, failed_generation: u64) {
        let mut live = self.live.write().await;
        if live.generation != failed_generation || !matches!(live.link, Link::Up(_)) {
            // Someone else already replaced the connection.
            return;
        }
        live.generation += 1;
        live.link = Link::Reconnecting;

        let generation = live.generation;
        let shared = Arc::clone(&self.live);
        let client = self.client.clone();
        let policy = self.policy;
        let endpoint = self.endpoint.clone();
        let trace_id = trace_id.to_owned();

        let task = tokio::spawn(async move {
            let outcome = establish(&client, &policy, &endpoint, &trace_id).await;
            let mut live = shared.write().await;
            if live.generation != generation {
                return;
            }
            live.reconnect = None;
            live.link = match outcome {
                Ok(conn) => {
                    info!(trace_id = %trace_id, endpoint = %endpoint, "redis session reconnected");
                    Link::Up(conn)
                }
                Err(fatal) => Link::Failed(fatal),
            };
        });
        live.reconnect = Some(task.abort_handle());
    }
}

impl Drop for RedisSession {
    fn drop(&mut self) {
        if let Ok(live) = self.live.try_read() {
            if let Some(task) = &live.reconnect {
                task.abort();
            }
        }
    }
}

/// The read and conditional delete of a release, run after `WATCH key`.
async fn compare_and_delete(
    conn: &mut MultiplexedConnection,
    key: &str,
    expected: &[u8],
) -> RedisResult<ConditionalDelete> {
    let current: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;

    if current.as_deref() != Some(expected) {
        let () = redis::cmd("UNWATCH").query_async(&mut *conn).await?;
        return Ok(ConditionalDelete::Mismatch);
    }

    // A nil EXEC reply means the watched key changed.
    let exec: Option<(i64,)> = redis::pipe()
        .atomic()
        .del(key)
        .query_async(&mut *conn)
        .await?;
    Ok(match exec {
        Some(_) => ConditionalDelete::Deleted,
        None => ConditionalDelete::Conflict,
    })
}

impl std::fmt::Debug for RedisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSession")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Translate resolved descriptors into a `redis` connection target.
pub(crate) fn connection_info(
    connection: &ConnectionParams,
    credential: Option<&CredentialParams>,
) -> Result<ConnectionInfo, StateError> {
    let mut info = match connection.endpoint(DEFAULT_PORT) {
        Endpoint::Uri(uri) => uri
            .as_str()
            .into_connection_info()
            .map_err(|e| StateError::Config(e.to_string()))?,
        Endpoint::Tcp { host, port } => ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: redis::RedisConnectionInfo::default(),
        },
    };

    if let Some(credential) = credential {
        if let Some(username) = &credential.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &credential.password {
            info.redis.password = Some(password.expose_secret().clone());
        }
    }

    Ok(info)
}

/// Dial until connected or the policy gives up.
async fn establish(
    client: &Client,
    policy: &BackoffPolicy,
    endpoint: &str,
    trace_id: &str,
) -> Result<MultiplexedConnection, StateError> {
    let mut attempt: u32 = 0;
    let mut first_failure: Option<Instant> = None;

    loop {
        let err = match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => e,
        };

        attempt = attempt.saturating_add(1);
        let since = *first_failure.get_or_insert_with(Instant::now);
        let failure = if err.is_connection_refusal() {
            ConnectFailure::Refused
        } else {
            ConnectFailure::Other
        };

        let decision = policy.decide(&ReconnectAttempt {
            failure,
            total_retry_time: since.elapsed(),
            attempt,
        });

        match decision {
            ReconnectDecision::Wait(delay) => {
                warn!(
                    trace_id,
                    endpoint,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "redis connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            ReconnectDecision::Abort(reason) => {
                warn!(trace_id, endpoint, attempt, ?reason, error = %err, "giving up on redis connection");
                return Err(reason.into_error(format!("{endpoint}: {err}")));
            }
        }
    }
}

/// The optional session of one component.
///
/// Only `open` and `close` replace the session; data operations take a
/// snapshot of it. Running `open`/`close` concurrently with data operations
/// on the same component gives no ordering guarantee.
#[derive(Debug, Default)]
pub(crate) struct SessionSlot {
    session: RwLock<Option<Arc<RedisSession>>>,
}

impl SessionSlot {
    pub(crate) async fn open(
        &self,
        trace_id: &str,
        config: &RedisConfig,
        dependencies: &Dependencies,
    ) -> Result<(), StateError> {
        let result: Result<RedisSession, StateError> = async {
            let (connection, credential) = dependencies.resolve(trace_id).await?;
            RedisSession::connect(
                &connection,
                credential.as_ref(),
                config.backoff_policy(),
                trace_id,
            )
            .await
        }
        .await;

        let mut slot = self.session.write().await;
        if slot.is_some() {
            warn!(trace_id, "opening a component that is already open; replacing its session");
        }
        match result {
            Ok(session) => {
                *slot = Some(Arc::new(session));
                Ok(())
            }
            Err(e) => {
                *slot = None;
                Err(e)
            }
        }
    }

    pub(crate) async fn close(&self, trace_id: &str) -> Result<(), StateError> {
        let session = self.session.write().await.take();
        match session {
            Some(session) => session.quit(trace_id).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn is_open(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// The current session, or [`StateError::NotOpened`].
    pub(crate) async fn get(&self, trace_id: &str) -> Result<Arc<RedisSession>, StateError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| StateError::not_opened(trace_id))
    }

    /// Pass a result through, dropping the session if it reported that the
    /// connection is gone for good.
    pub(crate) async fn settle<T>(
        &self,
        trace_id: &str,
        session: &Arc<RedisSession>,
        result: Result<T, StateError>,
    ) -> Result<T, StateError> {
        if let Err(e) = &result {
            if e.is_fatal_connection() {
                let mut slot = self.session.write().await;
                if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, session)) {
                    warn!(trace_id, error = %e, "dropping redis session after fatal connection failure");
                    *slot = None;
                }
            } else {
                debug!(trace_id, error = %e, "redis command failed");
            }
        }
        result
    }
}
