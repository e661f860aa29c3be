use std::time::Duration;

use serde::Deserialize;

/// Default bound on cumulative reconnect time, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default bound on reconnect attempts.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default delay between blocking lock acquisition attempts, in milliseconds.
pub const DEFAULT_RETRY_TIMEOUT_MS: u64 = 100;

/// The `options` section shared by cache and lock components.
///
/// # Example
///
/// ```toml
/// [options]
/// timeout = 30000
/// retries = 3
/// retry_timeout = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ComponentOptions {
    /// Upper bound on the total time spent reconnecting, in milliseconds.
    pub timeout: u64,
    /// Upper bound on the number of reconnect attempts.
    pub retries: u32,
    /// Delay between attempts of a blocking lock acquisition, in milliseconds.
    /// Ignored by caches.
    pub retry_timeout: u64,
}

impl Default for ComponentOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
            retry_timeout: DEFAULT_RETRY_TIMEOUT_MS,
        }
    }
}

impl ComponentOptions {
    /// The reconnect timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// The lock retry interval as a [`Duration`].
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let opts = ComponentOptions::default();
        assert_eq!(opts.timeout(), Duration::from_secs(30));
        assert_eq!(opts.retries, 3);
        assert_eq!(opts.retry_interval(), Duration::from_millis(100));
    }

    #[test]
    fn partial_section_keeps_defaults() {
        let opts: ComponentOptions = serde_json::from_str(r#"{"retries": 7}"#).unwrap();
        assert_eq!(opts.retries, 7);
        assert_eq!(opts.timeout, DEFAULT_TIMEOUT_MS);
        assert_eq!(opts.retry_timeout, DEFAULT_RETRY_TIMEOUT_MS);
    }
}
