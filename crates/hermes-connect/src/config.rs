//! Connector configuration
//!
//! All settings carry working defaults so an integration can run against a
//! local broker and registry with no environment at all.

use std::time::Duration;
use tracing::warn;

/// Default broker URL when `HERMES_BROKER_URL` is unset.
pub const DEFAULT_BROKER_URL: &str = "nats://127.0.0.1:4222";

/// Default registry base URL when `HERMES_REGISTRY_URL` is unset.
pub const DEFAULT_REGISTRY_URL: &str = "http://127.0.0.1:8080";

/// Default interval between subscription refreshes.
pub const DEFAULT_SUBSCRIPTION_INTERVAL: Duration = Duration::from_secs(5);

/// Default timeout applied to every registry HTTP request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Connector configuration
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Broker connection URL
    pub broker_url: String,
    /// Registry base URL
    pub registry_url: String,
    /// Interval between subscription refreshes
    pub subscription_interval: Duration,
    /// Timeout for registry HTTP requests
    pub http_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            subscription_interval: DEFAULT_SUBSCRIPTION_INTERVAL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl ConnectConfig {
    /// Create from environment variables
    ///
    /// Reads `HERMES_BROKER_URL`, `HERMES_REGISTRY_URL`,
    /// `HERMES_SUBSCRIPTION_INTERVAL_SECS` and `HERMES_HTTP_TIMEOUT_SECS`,
    /// falling back to the documented defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("HERMES_BROKER_URL") {
            config.broker_url = url;
        }
        if let Ok(url) = std::env::var("HERMES_REGISTRY_URL") {
            config.registry_url = url;
        }
        if let Some(secs) = read_secs("HERMES_SUBSCRIPTION_INTERVAL_SECS") {
            config.subscription_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read_secs("HERMES_HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Set the broker URL
    #[must_use]
    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = url.into();
        self
    }

    /// Set the registry base URL
    #[must_use]
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    /// Set the subscription refresh interval
    #[must_use]
    pub fn with_subscription_interval(mut self, interval: Duration) -> Self {
        self.subscription_interval = interval;
        self
    }
}

fn read_secs(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!(key = key, value = %raw, "ignoring unparsable duration setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectConfig::default();
        assert_eq!(config.broker_url, DEFAULT_BROKER_URL);
        assert_eq!(config.registry_url, DEFAULT_REGISTRY_URL);
        assert_eq!(config.subscription_interval, Duration::from_secs(5));
        assert_eq!(config.http_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("HERMES_BROKER_URL", "nats://broker:4222");
        std::env::set_var("HERMES_SUBSCRIPTION_INTERVAL_SECS", "30");
        std::env::set_var("HERMES_HTTP_TIMEOUT_SECS", "not-a-number");

        let config = ConnectConfig::from_env();
        assert_eq!(config.broker_url, "nats://broker:4222");
        assert_eq!(config.subscription_interval, Duration::from_secs(30));
        // Unparsable values fall back to the default
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);

        std::env::remove_var("HERMES_BROKER_URL");
        std::env::remove_var("HERMES_SUBSCRIPTION_INTERVAL_SECS");
        std::env::remove_var("HERMES_HTTP_TIMEOUT_SECS");
    }

    #[test]
    fn test_builders() {
        let config = ConnectConfig::default()
            .with_broker_url("nats://other:4222")
            .with_registry_url("http://registry:9090")
            .with_subscription_interval(Duration::from_secs(1));
        assert_eq!(config.broker_url, "nats://other:4222");
        assert_eq!(config.registry_url, "http://registry:9090");
        assert_eq!(config.subscription_interval, Duration::from_secs(1));
    }
}
