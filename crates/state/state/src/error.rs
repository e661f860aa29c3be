use thiserror::Error;

/// Errors from cache and distributed lock operations.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("connection is not configured (trace_id: {trace_id})")]
    NoConnection { trace_id: String },

    #[error("connection is not opened (trace_id: {trace_id})")]
    NotOpened { trace_id: String },

    #[error("the server refused the connection: {0}")]
    ConnectionRefused(String),

    #[error("retry time exhausted: {0}")]
    RetryTimeExhausted(String),

    #[error("connection failed after exhausting retries: {0}")]
    RetriesExhausted(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl StateError {
    /// Create a [`StateError::NotOpened`] for the given trace id.
    pub fn not_opened(trace_id: &str) -> Self {
        Self::NotOpened {
            trace_id: trace_id.to_owned(),
        }
    }

    /// Create a [`StateError::NoConnection`] for the given trace id.
    pub fn no_connection(trace_id: &str) -> Self {
        Self::NoConnection {
            trace_id: trace_id.to_owned(),
        }
    }

    /// Returns `true` if the reconnect policy gave up on the connection.
    ///
    /// A session reporting one of these errors is no longer usable and the
    /// owning component drops it.
    pub fn is_fatal_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused(_) | Self::RetryTimeExhausted(_) | Self::RetriesExhausted(_)
        )
    }
}
