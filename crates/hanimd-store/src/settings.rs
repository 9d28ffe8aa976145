//! Free-form key-value settings.
//!
//! Values are arbitrary JSON; the store never interprets them. Typed access
//! goes through serde, and the caller owns the schema of each key.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::connection::Connection;
use crate::connection::collections::SETTINGS;
use crate::document::{Filter, Update};

#[derive(Clone)]
pub struct SettingStore {
    conn: Connection,
}

impl SettingStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn filter(key: &str) -> Filter {
        Filter::eq("key", key)
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// Neutral value: `false`.
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => {
                warn!(key, %err, "setting value is not serializable");
                return false;
            }
        };
        let key = key.to_string();
        self.conn
            .run("settings.set", false, |db| async move {
                db.collection(SETTINGS)
                    .update_one(&Self::filter(&key), &Update::new().set("value", value), true)
                    .await?;
                debug!(key = %key, "setting stored");
                Ok(true)
            })
            .await
    }

    /// The raw stored value. Neutral value: `None`.
    #[instrument(skip(self))]
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        let key = key.to_string();
        self.conn
            .run("settings.get", None, |db| async move {
                let doc = db.collection(SETTINGS).find_one(&Self::filter(&key)).await?;
                Ok(doc
                    .and_then(|mut d| d.remove("value"))
                    .filter(|v| !v.is_null()))
            })
            .await
    }

    /// The value under `key` as `T`, or `default` when it is missing, null,
    /// not decodable as `T`, or the store is unavailable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let Some(value) = self.get_value(key).await else {
            return default;
        };
        match serde_json::from_value(value) {
            Ok(v) => v,
            Err(err) => {
                warn!(key, %err, "setting has unexpected shape, using default");
                default
            }
        }
    }

    /// Remove `key`. Returns `true` if it existed. Neutral value: `false`.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> bool {
        let key = key.to_string();
        self.conn
            .run("settings.delete", false, |db| async move {
                db.collection(SETTINGS).delete_one(&Self::filter(&key)).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use serde::Deserialize;
    use serde_json::json;

    async fn store() -> SettingStore {
        Connection::connect(StoreConfig::with_uri("memory://")).await.settings()
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Prefix {
        symbol: String,
        enabled: bool,
    }

    #[tokio::test]
    async fn missing_key_returns_default() {
        let settings = store().await;
        assert_eq!(settings.get("mode", "public".to_string()).await, "public");
        assert_eq!(settings.get_value("mode").await, None);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let settings = store().await;
        assert!(settings.set("mode", &"private").await);
        assert!(settings.set("mode", &"self").await);
        assert_eq!(settings.get("mode", String::new()).await, "self");
    }

    #[tokio::test]
    async fn structured_values_round_trip() {
        let settings = store().await;
        let prefix = Prefix {
            symbol: ".".into(),
            enabled: true,
        };
        settings.set("prefix", &prefix).await;
        let loaded: Prefix = settings
            .get(
                "prefix",
                Prefix {
                    symbol: "!".into(),
                    enabled: false,
                },
            )
            .await;
        assert_eq!(loaded, prefix);
    }

    #[tokio::test]
    async fn wrong_shape_and_null_fall_back_to_default() {
        let settings = store().await;
        settings.set("limit", &json!("not a number")).await;
        assert_eq!(settings.get("limit", 5_i64).await, 5);

        settings.set("nothing", &Value::Null).await;
        assert_eq!(settings.get("nothing", 3_i64).await, 3);
    }

    #[tokio::test]
    async fn delete_existing_and_missing() {
        let settings = store().await;
        settings.set("k", &1).await;
        assert!(settings.delete("k").await);
        assert!(!settings.delete("k").await);
    }
}
