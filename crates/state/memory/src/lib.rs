//! In-memory cache and lock backend for Latchkey.
//!
//! Everything lives in a process-local [`MemoryStore`]; nothing survives a
//! restart and nothing is shared between processes. Use it for tests and
//! local development, and the Redis backend everywhere else.

pub mod cache;
pub mod lock;
pub mod store;

pub use cache::MemoryCache;
pub use lock::MemoryLock;
pub use store::MemoryStore;
