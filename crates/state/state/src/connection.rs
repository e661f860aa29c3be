//! Connection and credential descriptors and the resolvers that produce them.
//!
//! Discovery services and credential stores live outside this crate. A
//! component only sees them through [`ConnectionResolver`] and
//! [`CredentialResolver`]; the static resolvers here cover the common case of
//! a connection written directly into the component configuration.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::StateError;

/// Host used when a connection names neither a URI nor a host.
pub const DEFAULT_HOST: &str = "localhost";

/// Where to reach the store.
///
/// Either `uri` is set, or `host`/`port` are used with defaults applied by
/// [`ConnectionParams::endpoint`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub uri: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// A concrete endpoint after defaults have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Uri(String),
    Tcp { host: String, port: u16 },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri(uri) => f.write_str(uri),
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

impl ConnectionParams {
    /// Connection addressed by URI.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    /// Connection addressed by host and port.
    pub fn from_host(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            ..Self::default()
        }
    }

    /// Resolve the endpoint to dial. The URI wins when present; otherwise
    /// the host defaults to `localhost` and the port to `default_port`.
    pub fn endpoint(&self, default_port: u16) -> Endpoint {
        match self.uri.as_deref().filter(|u| !u.is_empty()) {
            Some(uri) => Endpoint::Uri(uri.to_owned()),
            None => Endpoint::Tcp {
                host: self
                    .host
                    .as_deref()
                    .filter(|h| !h.is_empty())
                    .unwrap_or(DEFAULT_HOST)
                    .to_owned(),
                port: self.port.filter(|p| *p != 0).unwrap_or(default_port),
            },
        }
    }
}

/// Credentials presented to the store. A missing password means no
/// authentication.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialParams {
    pub username: Option<String>,
    /// Wrapped in [`SecretString`] so it is redacted in logs.
    pub password: Option<SecretString>,
}

impl CredentialParams {
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            username: None,
            password: Some(SecretString::new(password.into())),
        }
    }
}

/// Resolves the connection a component should open.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    /// Returns `None` when no connection is configured; `open` turns that
    /// into [`StateError::NoConnection`].
    async fn resolve(&self, trace_id: &str) -> Result<Option<ConnectionParams>, StateError>;
}

/// Looks up the credentials for a connection, if any.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn lookup(&self, trace_id: &str) -> Result<Option<CredentialParams>, StateError>;
}

/// Resolver returning a fixed, configured connection.
#[derive(Debug, Clone, Default)]
pub struct StaticConnectionResolver {
    connection: Option<ConnectionParams>,
}

impl StaticConnectionResolver {
    pub fn new(connection: Option<ConnectionParams>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ConnectionResolver for StaticConnectionResolver {
    async fn resolve(&self, _trace_id: &str) -> Result<Option<ConnectionParams>, StateError> {
        Ok(self.connection.clone())
    }
}

/// Resolver returning fixed, configured credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    credential: Option<CredentialParams>,
}

impl StaticCredentialResolver {
    pub fn new(credential: Option<CredentialParams>) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn lookup(&self, _trace_id: &str) -> Result<Option<CredentialParams>, StateError> {
        Ok(self.credential.clone())
    }
}

/// Resolved collaborators a component needs to open a session.
///
/// Built once and handed to the component constructor together with its
/// configuration, so there is no ordering between separate setup calls.
#[derive(Clone)]
pub struct Dependencies {
    pub connection: Arc<dyn ConnectionResolver>,
    pub credential: Option<Arc<dyn CredentialResolver>>,
}

impl Dependencies {
    pub fn new(connection: Arc<dyn ConnectionResolver>) -> Self {
        Self {
            connection,
            credential: None,
        }
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Arc<dyn CredentialResolver>) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Dependencies that always resolve to the given descriptors.
    pub fn fixed(connection: Option<ConnectionParams>, credential: Option<CredentialParams>) -> Self {
        Self {
            connection: Arc::new(StaticConnectionResolver::new(connection)),
            credential: Some(Arc::new(StaticCredentialResolver::new(credential))),
        }
    }

    /// Run both resolvers. A missing connection is an error; missing
    /// credentials are not.
    pub async fn resolve(
        &self,
        trace_id: &str,
    ) -> Result<(ConnectionParams, Option<CredentialParams>), StateError> {
        let connection = self
            .connection
            .resolve(trace_id)
            .await?
            .ok_or_else(|| StateError::no_connection(trace_id))?;

        let credential = match &self.credential {
            Some(resolver) => resolver.lookup(trace_id).await?,
            None => None,
        };

        Ok((connection, credential))
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("credential", &self.credential.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn uri_takes_precedence() {
        let params = ConnectionParams {
            uri: Some("redis://cache:6380".into()),
            host: Some("ignored".into()),
            port: Some(1),
        };
        assert_eq!(params.endpoint(6379), Endpoint::Uri("redis://cache:6380".into()));
    }

    #[test]
    fn host_and_port_default() {
        let params = ConnectionParams::default();
        assert_eq!(
            params.endpoint(6379),
            Endpoint::Tcp {
                host: "localhost".into(),
                port: 6379
            }
        );

        let params = ConnectionParams::from_host("store.internal", 7000);
        assert_eq!(params.endpoint(6379).to_string(), "store.internal:7000");
    }

    #[test]
    fn empty_uri_falls_back_to_host() {
        let params = ConnectionParams {
            uri: Some(String::new()),
            host: Some("h".into()),
            port: None,
        };
        assert_eq!(params.endpoint(6379).to_string(), "h:6379");
    }

    #[test]
    fn password_is_redacted() {
        let cred = CredentialParams::with_password("hunter2");
        assert!(!format!("{cred:?}").contains("hunter2"));
        assert_eq!(
            cred.password.as_ref().map(|p| p.expose_secret().as_str()),
            Some("hunter2")
        );
    }

    #[tokio::test]
    async fn missing_connection_is_no_connection() {
        let deps = Dependencies::fixed(None, None);
        let err = deps.resolve("t-1").await.unwrap_err();
        assert!(matches!(err, StateError::NoConnection { ref trace_id } if trace_id == "t-1"));
    }

    #[tokio::test]
    async fn credential_is_optional() {
        let deps = Dependencies::new(Arc::new(StaticConnectionResolver::new(Some(
            ConnectionParams::from_uri("redis://x"),
        ))));
        let (conn, cred) = deps.resolve("t").await.unwrap();
        assert_eq!(conn.uri.as_deref(), Some("redis://x"));
        assert!(cred.is_none());
    }
}
