pub mod backoff;
pub mod cache;
pub mod connection;
pub mod error;
pub mod lock;
pub mod openable;
pub mod options;
pub mod testing;

pub use backoff::{AbortReason, BackoffPolicy, ConnectFailure, ReconnectAttempt, ReconnectDecision};
pub use cache::{Cache, CacheExt};
pub use connection::{
    ConnectionParams, ConnectionResolver, CredentialParams, CredentialResolver, Dependencies,
    Endpoint, StaticConnectionResolver, StaticCredentialResolver,
};
pub use error::StateError;
pub use lock::Lock;
pub use openable::Openable;
pub use options::ComponentOptions;
