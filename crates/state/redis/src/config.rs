use serde::Deserialize;

use latchkey_state::backoff::BackoffPolicy;
use latchkey_state::connection::{ConnectionParams, CredentialParams, Dependencies};
use latchkey_state::error::StateError;
use latchkey_state::options::ComponentOptions;

/// Port used when a connection names a host but no port.
pub const DEFAULT_PORT: u16 = 6379;

/// Configuration for the Redis cache and lock components.
///
/// # Example
///
/// ```toml
/// [connection]
/// host = "localhost"
/// port = 6379
///
/// [credential]
/// password = "secret"
///
/// [options]
/// timeout = 30000
/// retries = 3
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection section, forwarded to the default connection resolver.
    pub connection: Option<ConnectionParams>,

    /// Credential section, forwarded to the default credential resolver.
    pub credential: Option<CredentialParams>,

    /// Reconnect bounds and lock retry interval.
    pub options: ComponentOptions,
}

impl RedisConfig {
    /// Configuration pointing at a single Redis URL with default options.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: Some(ConnectionParams::from_uri(url)),
            ..Self::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(document: &str) -> Result<Self, StateError> {
        toml::from_str(document).map_err(|e| StateError::Config(e.to_string()))
    }

    /// Resolvers answering with the `connection` and `credential` sections.
    pub fn dependencies(&self) -> Dependencies {
        Dependencies::fixed(self.connection.clone(), self.credential.clone())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::from_options(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn default_values() {
        let cfg = RedisConfig::default();
        assert!(cfg.connection.is_none());
        assert!(cfg.credential.is_none());
        assert_eq!(cfg.options, ComponentOptions::default());
        assert_eq!(cfg.backoff_policy().timeout(), Duration::from_secs(30));
        assert_eq!(cfg.backoff_policy().retries(), 3);
    }

    #[test]
    fn parses_full_document() {
        let cfg = RedisConfig::from_toml_str(
            r#"
            [connection]
            host = "cache.internal"
            port = 6380

            [credential]
            password = "pa55"

            [options]
            timeout = 5000
            retries = 5
            retry_timeout = 250
            "#,
        )
        .unwrap();

        let conn = cfg.connection.as_ref().unwrap();
        assert_eq!(conn.host.as_deref(), Some("cache.internal"));
        assert_eq!(conn.port, Some(6380));
        assert!(conn.uri.is_none());
        let password = cfg.credential.as_ref().and_then(|c| c.password.as_ref());
        assert_eq!(password.map(|p| p.expose_secret().as_str()), Some("pa55"));
        assert_eq!(cfg.options.timeout, 5000);
        assert_eq!(cfg.options.retries, 5);
        assert_eq!(cfg.options.retry_interval(), Duration::from_millis(250));
    }

    #[test]
    fn missing_sections_use_defaults() {
        let cfg = RedisConfig::from_toml_str("[connection]\nuri = \"redis://r:6379\"\n").unwrap();
        assert_eq!(
            cfg.connection.and_then(|c| c.uri).as_deref(),
            Some("redis://r:6379")
        );
        assert_eq!(cfg.options, ComponentOptions::default());
    }

    #[test]
    fn rejects_malformed_document() {
        let err = RedisConfig::from_toml_str("[options]\nretries = \"many\"\n").unwrap_err();
        assert!(matches!(err, StateError::Config(_)));
    }

    #[tokio::test]
    async fn dependencies_resolve_configured_sections() {
        let cfg = RedisConfig::new("redis://127.0.0.1:6379");
        let (conn, cred) = cfg.dependencies().resolve("t").await.unwrap();
        assert_eq!(conn.uri.as_deref(), Some("redis://127.0.0.1:6379"));
        assert!(cred.is_none());
    }
}
