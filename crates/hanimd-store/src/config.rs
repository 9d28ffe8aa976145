//! Store configuration.
//!
//! Deserialized from the `[store]` table of the host's TOML config; every
//! field has a default so a missing table yields a usable (if unavailable)
//! configuration.

use std::time::Duration;

use serde::Deserialize;

/// Environment variables consulted for the connection string, in order.
pub const URI_ENV_VARS: [&str; 3] = ["STORE_URI", "MONGODB_URI", "MONGO_URL"];

/// How long a stored message stays retrievable.
pub const DEFAULT_MESSAGE_TTL_SECS: u64 = 24 * 60 * 60;

/// Settings for [`Connection::connect`](crate::Connection::connect).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection string. Empty means "no store": every operation degrades.
    pub uri: String,
    /// Retention window for stored messages.
    pub message_ttl_secs: u64,
    /// How often the expiry sweep runs. `0` disables the background sweep.
    pub sweep_interval_secs: u64,
    /// Lifetime of cached group documents.
    pub cache_ttl_secs: u64,
    /// Maximum number of cached group documents.
    pub cache_capacity: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            message_ttl_secs: DEFAULT_MESSAGE_TTL_SECS,
            sweep_interval_secs: 600,
            cache_ttl_secs: 60,
            cache_capacity: 1_000,
        }
    }
}

impl StoreConfig {
    /// Defaults with the given connection string.
    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Replace `uri` with the first non-empty variable of [`URI_ENV_VARS`].
    pub fn apply_env(mut self) -> Self {
        if let Some(uri) = uri_from_env() {
            self.uri = uri;
        }
        self
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// First non-empty connection string found in the environment.
pub fn uri_from_env() -> Option<String> {
    URI_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unavailable_with_daily_retention() {
        let config = StoreConfig::default();
        assert!(config.uri.is_empty());
        assert_eq!(config.message_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn zero_interval_disables_sweep() {
        let config = StoreConfig {
            sweep_interval_secs: 0,
            ..StoreConfig::default()
        };
        assert_eq!(config.sweep_interval(), None);
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let config: StoreConfig =
            serde_json::from_value(serde_json::json!({ "uri": "memory://" })).unwrap();
        assert_eq!(config.uri, "memory://");
        assert_eq!(config.cache_capacity, 1_000);
    }
}
