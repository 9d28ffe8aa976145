//! Contact directory built from observed message senders.
//!
//! A contact is keyed by its identifier (`<number>@<domain>`). The phone
//! number is derived from the identifier: the part before `@`, reduced to
//! its digits. Lookups accept either form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, warn};

use crate::connection::Connection;
use crate::connection::collections::CONTACTS;
use crate::document::{Document, Filter, FindOptions, Update, from_document, now_ms};

/// Maximum number of results returned by [`ContactStore::search`].
pub const SEARCH_LIMIT: u32 = 20;

/// Fields callers may not override through the extra-fields map.
const PROTECTED_FIELDS: [&str; 4] = ["jid", "number", "messages_count", "first_seen"];

/// Typed [`Contact`] fields an extra may set, and the JSON type each needs.
const STRING_FIELDS: [&str; 2] = ["name", "last_activity"];
const INTEGER_FIELDS: [&str; 1] = ["last_seen"];

/// A known contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub jid: String,
    pub number: String,
    pub name: String,
    pub first_seen: i64,
    pub last_seen: i64,
    /// Free-text label such as "sent a sticker".
    pub last_activity: String,
    pub messages_count: i64,
}

impl Default for Contact {
    fn default() -> Self {
        Self {
            jid: String::new(),
            number: String::new(),
            name: String::new(),
            first_seen: 0,
            last_seen: 0,
            last_activity: String::new(),
            messages_count: 0,
        }
    }
}

/// Keep the extras that can be merged without breaking the typed record.
///
/// Protected fields are dropped, and so is any extra that targets a
/// [`Contact`] field with a value of the wrong JSON type. Unknown fields
/// pass through untouched.
fn sanitize_extra(extra: Document) -> Document {
    extra
        .into_iter()
        .filter(|(field, value)| {
            let field = field.as_str();
            let ok = if PROTECTED_FIELDS.contains(&field) {
                false
            } else if STRING_FIELDS.contains(&field) {
                value.is_string()
            } else if INTEGER_FIELDS.contains(&field) {
                value.is_i64()
            } else {
                true
            };
            if !ok {
                warn!(field, %value, "dropping contact extra field");
            }
            ok
        })
        .collect()
}

/// Decode every document, skipping (and logging) the ones that do not fit.
fn decode_all(op: &'static str, docs: Vec<Document>) -> Vec<Contact> {
    docs.into_iter()
        .filter_map(|doc| {
            let jid = doc.get("jid").cloned().unwrap_or(Value::Null);
            match from_document(doc) {
                Ok(contact) => Some(contact),
                Err(err) => {
                    warn!(op, %jid, %err, "skipping undecodable contact");
                    None
                }
            }
        })
        .collect()
}

/// Digits of the identifier's local part: `"225 07-00@s.whatsapp.net"` → `"2250700"`.
pub fn number_from_jid(jid_or_number: &str) -> String {
    jid_or_number
        .split('@')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect()
}

#[derive(Clone)]
pub struct ContactStore {
    conn: Connection,
}

impl ContactStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Record activity from `jid` in a single atomic upsert.
    ///
    /// Sets the number and `last_seen`, bumps `messages_count`, overwrites
    /// the name when one is given and merges `extra` (e.g. `last_activity`).
    /// Neutral value: `false`.
    #[instrument(skip(self, extra))]
    pub async fn upsert(&self, jid: &str, name: Option<&str>, extra: Document) -> bool {
        let jid = jid.to_string();
        let name = name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
        self.conn
            .run("contacts.upsert", false, |db| async move {
                let now = now_ms();
                let mut on_insert = Document::new();
                on_insert.insert("first_seen".into(), now.into());
                on_insert.insert("name".into(), "".into());
                on_insert.insert("last_activity".into(), "".into());

                let mut fields = sanitize_extra(extra);
                if let Some(name) = name {
                    fields.insert("name".into(), name.into());
                }
                fields.insert("number".into(), number_from_jid(&jid).into());
                fields.insert("last_seen".into(), now.into());

                let update = Update::new()
                    .set_on_insert_all(on_insert)
                    .set_all(fields)
                    .inc("messages_count", 1);
                db.collection(CONTACTS)
                    .update_one(&Filter::eq("jid", jid.as_str()), &update, true)
                    .await?;
                Ok(true)
            })
            .await
    }

    /// Find a contact by full identifier or by phone number.
    ///
    /// Neutral value: `None`.
    #[instrument(skip(self))]
    pub async fn get(&self, jid_or_number: &str) -> Option<Contact> {
        let raw = jid_or_number.trim().to_string();
        let number = number_from_jid(&raw);
        let mut terms = vec![Filter::eq("jid", raw.as_str())];
        if !number.is_empty() {
            terms.push(Filter::eq("number", number));
        }
        let filter = Filter::Or(terms);

        self.conn
            .run("contacts.get", None, |db| async move {
                db.collection(CONTACTS)
                    .find_one(&filter)
                    .await?
                    .map(from_document)
                    .transpose()
            })
            .await
    }

    /// Contacts whose name contains `query` (any case) or whose number
    /// contains it, at most [`SEARCH_LIMIT`]. Neutral value: empty.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Vec<Contact> {
        let filter = Filter::Or(vec![
            Filter::contains_ci("name", query),
            Filter::contains("number", query),
        ]);
        self.conn
            .run("contacts.search", Vec::new(), |db| async move {
                let docs = db
                    .collection(CONTACTS)
                    .find(&filter, FindOptions::default().limit(SEARCH_LIMIT))
                    .await?;
                Ok(decode_all("contacts.search", docs))
            })
            .await
    }

    /// Every contact, most recently seen first. Neutral value: empty.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Vec<Contact> {
        self.conn
            .run("contacts.list_all", Vec::new(), |db| async move {
                let docs = db
                    .collection(CONTACTS)
                    .find(&Filter::All, FindOptions::descending("last_seen"))
                    .await?;
                Ok(decode_all("contacts.list_all", docs))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::StoreConfig;
    use crate::document::to_document;
    use crate::driver::Driver;
    use crate::memory::MemoryDriver;
    use serde_json::json;

    async fn store() -> ContactStore {
        store_on("memory://").await
    }

    async fn store_on(uri: &str) -> ContactStore {
        Connection::connect(StoreConfig::with_uri(uri)).await.contacts()
    }

    #[test]
    fn number_is_digits_of_local_part() {
        assert_eq!(number_from_jid("2250700000000@s.whatsapp.net"), "2250700000000");
        assert_eq!(number_from_jid("+225 07-00"), "2250700");
        assert_eq!(number_from_jid("225:12@s.whatsapp.net"), "22512");
        assert_eq!(number_from_jid("@lid"), "");
    }

    #[tokio::test]
    async fn get_by_jid_or_number_finds_same_contact() {
        let contacts = store().await;
        assert!(contacts.upsert("2250700@s.whatsapp.net", Some("Awa"), Document::new()).await);

        let by_jid = contacts.get("2250700@s.whatsapp.net").await.unwrap();
        let by_number = contacts.get("2250700").await.unwrap();
        let by_formatted = contacts.get("+225 0700").await.unwrap();
        assert_eq!(by_jid, by_number);
        assert_eq!(by_jid, by_formatted);
        assert_eq!(by_jid.number, "2250700");
    }

    #[tokio::test]
    async fn upsert_counts_messages_and_keeps_name() {
        let contacts = store().await;
        contacts.upsert("1@s", Some("Koffi"), Document::new()).await;
        contacts.upsert("1@s", None, Document::new()).await;

        let mut extra = Document::new();
        extra.insert("last_activity".into(), json!("sent a sticker"));
        extra.insert("messages_count".into(), json!(9000));
        contacts.upsert("1@s", None, extra).await;

        let c = contacts.get("1@s").await.unwrap();
        assert_eq!(c.messages_count, 3);
        assert_eq!(c.name, "Koffi");
        assert_eq!(c.last_activity, "sent a sticker");
        assert!(c.last_seen >= c.first_seen);
    }

    #[tokio::test]
    async fn search_matches_name_case_insensitively_and_number() {
        for uri in ["memory://", "sqlite::memory:"] {
            let contacts = store_on(uri).await;
            contacts.upsert("111@s", Some("Marie"), Document::new()).await;
            contacts.upsert("222@s", Some("Jean"), Document::new()).await;
            contacts.upsert("333@s", Some("ÉLODIE"), Document::new()).await;

            let jids = |found: Vec<Contact>| found.into_iter().map(|c| c.jid).collect::<Vec<_>>();
            assert_eq!(jids(contacts.search("mar").await), vec!["111@s"], "{uri}");
            assert_eq!(jids(contacts.search("22").await), vec!["222@s"], "{uri}");
            assert_eq!(jids(contacts.search("élodie").await), vec!["333@s"], "{uri}");
            assert_eq!(jids(contacts.search("Élo").await), vec!["333@s"], "{uri}");
        }
    }

    #[tokio::test]
    async fn mistyped_extras_do_not_corrupt_the_contact() {
        let contacts = store().await;
        assert!(contacts.upsert("1@s", Some("Awa"), Document::new()).await);

        let mut extra = Document::new();
        extra.insert("last_activity".into(), Value::Null);
        extra.insert("name".into(), json!(42));
        extra.insert("last_seen".into(), json!("yesterday"));
        extra.insert("device".into(), json!("android"));
        assert!(contacts.upsert("2@s", None, extra).await);

        let c = contacts.get("2@s").await.unwrap();
        assert_eq!(c.last_activity, "");
        assert_eq!(c.name, "");
        assert!(c.last_seen > 0);
        assert_eq!(contacts.list_all().await.len(), 2);
    }

    #[tokio::test]
    async fn undecodable_documents_are_skipped_in_listings() {
        let driver = MemoryDriver::new();
        let conn = Connection::with_driver(
            Arc::new(driver.clone()),
            StoreConfig::with_uri("memory://"),
        )
        .await;
        let contacts = conn.contacts();
        contacts.upsert("1@s", Some("Awa"), Document::new()).await;
        let broken = json!({ "jid": "9@s", "number": "9", "name": 7, "last_seen": 1 });
        driver
            .collection(CONTACTS)
            .insert_one(to_document(&broken).unwrap())
            .await
            .unwrap();

        let listed: Vec<_> = contacts.list_all().await.into_iter().map(|c| c.jid).collect();
        assert_eq!(listed, vec!["1@s".to_string()]);
        assert_eq!(contacts.search("").await.len(), 1);
    }

    #[tokio::test]
    async fn search_is_capped() {
        let contacts = store().await;
        for i in 0..25 {
            contacts
                .upsert(&format!("{i}@s"), Some("Same Name"), Document::new())
                .await;
        }
        assert_eq!(contacts.search("same").await.len(), SEARCH_LIMIT as usize);
    }

    #[tokio::test]
    async fn list_all_orders_by_last_seen_desc() {
        let contacts = store().await;
        contacts.upsert("1@s", None, Document::new()).await;
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        contacts.upsert("2@s", None, Document::new()).await;
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        contacts.upsert("1@s", None, Document::new()).await;

        let order: Vec<_> = contacts.list_all().await.into_iter().map(|c| c.jid).collect();
        assert_eq!(order, vec!["1@s".to_string(), "2@s".to_string()]);
    }
}
