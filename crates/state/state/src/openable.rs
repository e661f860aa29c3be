use async_trait::async_trait;

use crate::error::StateError;

/// Components holding a session to the store.
#[async_trait]
pub trait Openable: Send + Sync {
    /// Resolve the connection and open a session.
    async fn open(&self, trace_id: &str) -> Result<(), StateError>;

    /// Close the session. Closing a closed component succeeds.
    async fn close(&self, trace_id: &str) -> Result<(), StateError>;

    /// Whether a session is currently held.
    async fn is_open(&self) -> bool;
}
