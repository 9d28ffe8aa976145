//! Short-lived message cache used to recover deleted messages.
//!
//! Every message is upserted by its identifier and expires
//! [`StoreConfig::message_ttl`](crate::config::StoreConfig::message_ttl)
//! after its last write. MongoDB expires them itself through a TTL index;
//! other backends rely on the connection's background sweeper. Either way
//! [`MessageStore::sweep_expired`] runs a pass on demand, and a message past
//! its TTL may still be readable until the engine or the next sweep gets to it.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::connection::Connection;
use crate::connection::collections::STORED_MESSAGES;
use crate::document::{Filter, Update, from_document, to_document};
use crate::ttl;

/// A captured chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredMessage {
    pub message_id: String,
    /// Chat the message was sent in.
    pub from: String,
    pub sender: String,
    pub sender_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw media bytes, stored base64-encoded.
    #[serde(with = "media", skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<u8>>,
    pub timestamp: i64,
}

impl Default for StoredMessage {
    fn default() -> Self {
        Self {
            message_id: String::new(),
            from: String::new(),
            sender: String::new(),
            sender_name: String::new(),
            content: String::new(),
            kind: "text".to_string(),
            media: None,
            timestamp: 0,
        }
    }
}

mod media {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[derive(Clone)]
pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Upsert `message` under `message_id`.
    ///
    /// The stored identifier is always `message_id`, whatever the payload
    /// says. Neutral value: `false`.
    #[instrument(skip(self, message))]
    pub async fn store(&self, message_id: &str, message: &StoredMessage) -> bool {
        let message_id = message_id.to_string();
        let message = message.clone();
        self.conn
            .run("messages.store", false, |db| async move {
                let mut doc = to_document(&message)?;
                doc.insert("message_id".into(), message_id.as_str().into());
                db.collection(STORED_MESSAGES)
                    .update_one(
                        &Filter::eq("message_id", message_id.as_str()),
                        &Update::new().set_all(doc),
                        true,
                    )
                    .await?;
                debug!(message_id = %message_id, "message stored");
                Ok(true)
            })
            .await
    }

    /// Neutral value: `None`.
    #[instrument(skip(self))]
    pub async fn get(&self, message_id: &str) -> Option<StoredMessage> {
        let filter = Filter::eq("message_id", message_id);
        self.conn
            .run("messages.get", None, |db| async move {
                db.collection(STORED_MESSAGES)
                    .find_one(&filter)
                    .await?
                    .map(from_document)
                    .transpose()
            })
            .await
    }

    /// Run one expiry pass now and return the number of purged messages.
    ///
    /// Neutral value: `0`.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> u64 {
        let retention = self.conn.config().message_ttl();
        self.conn
            .run("messages.sweep_expired", 0, |db| async move {
                ttl::sweep_once(db.collection(STORED_MESSAGES).as_ref(), retention).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    fn sample(id: &str) -> StoredMessage {
        StoredMessage {
            message_id: id.to_string(),
            from: "123@g.us".into(),
            sender: "225@s.whatsapp.net".into(),
            sender_name: "Awa".into(),
            content: "bonjour".into(),
            ..StoredMessage::default()
        }
    }

    #[tokio::test]
    async fn store_then_get() {
        let conn = Connection::connect(StoreConfig::with_uri("memory://")).await;
        let messages = conn.messages();
        assert!(messages.store("ABC", &sample("ABC")).await);

        let got = messages.get("ABC").await.unwrap();
        assert_eq!(got, sample("ABC"));
        assert_eq!(got.kind, "text");
        assert!(messages.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn store_is_an_upsert_keyed_by_argument() {
        let conn = Connection::connect(StoreConfig::with_uri("memory://")).await;
        let messages = conn.messages();
        messages.store("ID", &sample("ignored")).await;

        let mut edited = sample("ID");
        edited.content = "edited".into();
        messages.store("ID", &edited).await;

        assert_eq!(messages.get("ID").await.unwrap().content, "edited");
        assert!(messages.get("ignored").await.is_none());
    }

    #[tokio::test]
    async fn media_round_trips_through_base64() {
        let conn = Connection::connect(StoreConfig::with_uri("sqlite::memory:")).await;
        let messages = conn.messages();
        let mut msg = sample("IMG");
        msg.kind = "image".into();
        msg.media = Some(vec![0, 159, 255, 10]);
        messages.store("IMG", &msg).await;

        assert_eq!(messages.get("IMG").await.unwrap(), msg);
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_and_drops_expired() {
        let fresh = Connection::connect(StoreConfig::with_uri("memory://")).await;
        fresh.messages().store("A", &sample("A")).await;
        assert_eq!(fresh.messages().sweep_expired().await, 0);
        assert!(fresh.messages().get("A").await.is_some());

        let config = StoreConfig {
            message_ttl_secs: 0,
            sweep_interval_secs: 0,
            ..StoreConfig::with_uri("memory://")
        };
        let short = Connection::connect(config).await;
        short.messages().store("B", &sample("B")).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(short.messages().sweep_expired().await, 1);
        assert!(short.messages().get("B").await.is_none());
    }
}
