//! Persistence of the messaging account's credential bundle.
//!
//! There is exactly one session document (id `"principale"`). Its `data`
//! field is opaque to the store and is always replaced as a whole, so a
//! reader sees either the previous bundle or the new one, never a mix.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::connection::Connection;
use crate::connection::collections::SESSIONS;
use crate::document::{Document, Filter, Update, from_document, now_ms};

/// Identifier of the singleton session document.
pub const SESSION_ID: &str = "principale";

/// The stored session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    /// Opaque credential material.
    pub data: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Accessors for the singleton session document.
#[derive(Clone)]
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn filter() -> Filter {
        Filter::eq("session_id", SESSION_ID)
    }

    /// Replace the stored session with `data`.
    ///
    /// Neutral value: `false`.
    #[instrument(skip(self, data))]
    pub async fn save(&self, data: &Value) -> bool {
        let data = data.clone();
        self.conn
            .run("session.save", false, |db| async move {
                let now = now_ms();
                let mut on_insert = Document::new();
                on_insert.insert("created_at".into(), now.into());
                let update = Update::new()
                    .set("data", data)
                    .set("updated_at", now)
                    .set_on_insert_all(on_insert);
                db.collection(SESSIONS)
                    .update_one(&Self::filter(), &update, true)
                    .await?;
                debug!("session saved");
                Ok(true)
            })
            .await
    }

    /// The stored session data.
    ///
    /// Neutral value: `None`.
    #[instrument(skip(self))]
    pub async fn get(&self) -> Option<Value> {
        self.record().await.map(|r| r.data)
    }

    /// The full session document including timestamps.
    ///
    /// Neutral value: `None`.
    pub async fn record(&self) -> Option<SessionRecord> {
        self.conn
            .run("session.get", None, |db| async move {
                match db.collection(SESSIONS).find_one(&Self::filter()).await? {
                    Some(doc) => Ok(Some(from_document::<SessionRecord>(doc)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// Remove the stored session.
    ///
    /// Returns `true` when the delete was carried out, even if there was no
    /// session to remove. Neutral value: `false`.
    #[instrument(skip(self))]
    pub async fn delete(&self) -> bool {
        self.conn
            .run("session.delete", false, |db| async move {
                let removed = db.collection(SESSIONS).delete_one(&Self::filter()).await?;
                debug!(removed, "session delete");
                Ok(true)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use serde_json::json;

    async fn connected() -> Connection {
        Connection::connect(StoreConfig::with_uri("memory://")).await
    }

    #[tokio::test]
    async fn save_get_replace_delete() {
        let store = connected().await.sessions();
        assert_eq!(store.get().await, None);

        assert!(store.save(&json!({ "creds.json": "e30=" })).await);
        assert!(store.save(&json!({ "creds.json": "YWJj" })).await);
        assert_eq!(store.get().await, Some(json!({ "creds.json": "YWJj" })));

        let record = store.record().await.unwrap();
        assert_eq!(record.session_id, SESSION_ID);
        assert!(record.updated_at >= record.created_at);

        assert!(store.delete().await);
        assert_eq!(store.get().await, None);
    }

    #[tokio::test]
    async fn replacing_drops_stale_keys() {
        let store = connected().await.sessions();
        store.save(&json!({ "a": "1", "b": "2" })).await;
        store.save(&json!({ "c": "3" })).await;
        assert_eq!(store.get().await, Some(json!({ "c": "3" })));
    }

    #[tokio::test]
    async fn unavailable_store_is_neutral() {
        let store = Connection::unavailable(StoreConfig::default(), "test").sessions();
        assert!(!store.save(&json!({})).await);
        assert_eq!(store.get().await, None);
        assert!(!store.delete().await);
    }
}
