//! Redis cache and lock backend for Latchkey.
//!
//! This crate provides Redis-backed implementations of the [`Cache`] and
//! [`Lock`] traits from `latchkey-state`.
//!
//! # Features
//!
//! - **Caching**: `GET`/`SET PX`/`DEL` with expiry delegated to Redis.
//! - **Distributed locking**: `SET NX PX` to acquire, an owner-checked
//!   `WATCH`/`MULTI`/`EXEC` transaction to release.
//! - **Sessions**: each component owns one connection, opened and re-opened
//!   under a bounded linear backoff.
//!
//! # Lock Consistency
//!
//! | Deployment | Mutual Exclusion | Notes |
//! |------------|------------------|-------|
//! | Single instance | Strong | Full mutual exclusion guaranteed |
//! | Sentinel | Weak | Lock may be lost during failover |
//! | Cluster | Weak | Lock may be lost during failover |
//!
//! See [`lock`] module documentation for detailed information.
//!
//! # Example
//!
//! ```ignore
//! use latchkey_state::Openable;
//! use latchkey_state_redis::{RedisCache, RedisConfig, RedisLock};
//!
//! let config = RedisConfig::new("redis://localhost:6379");
//! let cache = RedisCache::from_config(config.clone());
//! let lock = RedisLock::from_config(config);
//! cache.open("trace-1").await?;
//! lock.open("trace-1").await?;
//! ```
//!
//! [`Cache`]: latchkey_state::Cache
//! [`Lock`]: latchkey_state::Lock

mod cache;
mod config;
pub mod lock;
pub mod session;

#[cfg(test)]
mod scripted_server;

pub use cache::RedisCache;
pub use config::{DEFAULT_PORT, RedisConfig};
pub use lock::RedisLock;
pub use session::{ConditionalDelete, RedisSession};
