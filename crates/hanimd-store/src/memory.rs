//! In-process [`Driver`] used as a test double and for `memory://` stores.
//!
//! Documents live in a `HashMap<collection, Vec<Row>>` behind a std mutex;
//! the lock is never held across an `.await`. Insertion order is kept so
//! `delete_one` and unsorted `find` behave like the SQLite driver.
//!
//! [`MemoryDriver::set_failing`] turns every subsequent operation into a
//! [`StoreError::Driver`], which lets tests exercise the fault path of the
//! entity stores without a broken database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::document::{Document, Filter, FindOptions, Update};
use crate::driver::{Collection, Driver};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Row {
    seq: i64,
    doc: Document,
    updated_at: i64,
}

#[derive(Default)]
struct Shared {
    collections: Mutex<HashMap<String, Vec<Row>>>,
    next_seq: AtomicI64,
    failing: AtomicBool,
}

/// Volatile document store.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    shared: Arc<Shared>,
}

impl MemoryDriver {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following operation fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.shared.failing.store(failing, Ordering::SeqCst);
    }

    /// Total number of documents across every collection.
    pub fn total_documents(&self) -> usize {
        self.shared
            .collections
            .lock()
            .map(|c| c.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.shared.check()
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(MemoryCollection {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
        })
    }
}

impl Shared {
    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Driver("injected failure".into()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Vec<Row>>>> {
        self.check()?;
        self.collections
            .lock()
            .map_err(|e| StoreError::Driver(format!("memory store lock poisoned: {e}")))
    }

    fn row(&self, doc: Document) -> Row {
        Row {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            doc,
            updated_at: Utc::now().timestamp_millis(),
        }
    }
}

struct MemoryCollection {
    shared: Arc<Shared>,
    name: String,
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        filter.validate()?;
        let collections = self.shared.lock()?;
        Ok(collections
            .get(&self.name)
            .and_then(|rows| rows.iter().find(|r| filter.matches(&r.doc)))
            .map(|r| r.doc.clone()))
    }

    async fn find(&self, filter: &Filter, options: FindOptions) -> StoreResult<Vec<Document>> {
        filter.validate()?;
        let mut rows: Vec<Row> = {
            let collections = self.shared.lock()?;
            collections
                .get(&self.name)
                .map(|rows| rows.iter().filter(|r| filter.matches(&r.doc)).cloned().collect())
                .unwrap_or_default()
        };

        if let Some(sort) = &options.sort {
            rows.sort_by(|a, b| {
                let ord = compare(a.doc.get(&sort.field), b.doc.get(&sort.field))
                    .then(a.seq.cmp(&b.seq));
                if sort.descending { ord.reverse() } else { ord }
            });
        }
        let limit = options.limit.map_or(usize::MAX, |l| l as usize);
        Ok(rows.into_iter().take(limit).map(|r| r.doc).collect())
    }

    async fn insert_one(&self, doc: Document) -> StoreResult<()> {
        let row = self.shared.row(doc);
        let mut collections = self.shared.lock()?;
        collections.entry(self.name.clone()).or_default().push(row);
        Ok(())
    }

    async fn update_one(
        &self,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        filter.validate()?;
        update.validate()?;
        let mut collections = self.shared.lock()?;
        let rows = collections.entry(self.name.clone()).or_default();

        if let Some(row) = rows.iter_mut().find(|r| filter.matches(&r.doc)) {
            if !update.is_noop_for_existing() {
                update.apply(&mut row.doc, false);
                row.updated_at = Utc::now().timestamp_millis();
            }
            return Ok(Some(row.doc.clone()));
        }
        if !upsert {
            return Ok(None);
        }
        let doc = update.seed(filter);
        rows.push(self.shared.row(doc.clone()));
        Ok(Some(doc))
    }

    async fn delete_one(&self, filter: &Filter) -> StoreResult<bool> {
        filter.validate()?;
        let mut collections = self.shared.lock()?;
        let Some(rows) = collections.get_mut(&self.name) else {
            return Ok(false);
        };
        match rows.iter().position(|r| filter.matches(&r.doc)) {
            Some(idx) => {
                rows.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        filter.validate()?;
        let collections = self.shared.lock()?;
        Ok(collections
            .get(&self.name)
            .map_or(0, |rows| rows.iter().filter(|r| filter.matches(&r.doc)).count()) as u64)
    }

    async fn expire_before(&self, cutoff_ms: i64) -> StoreResult<u64> {
        let mut collections = self.shared.lock()?;
        let Some(rows) = collections.get_mut(&self.name) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| r.updated_at >= cutoff_ms);
        Ok((before - rows.len()) as u64)
    }
}

/// Ordering for sort keys: null < bool < number < string, like SQLite.
fn compare(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering::Equal;

    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) | Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Equal),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn upsert_then_find() {
        let driver = MemoryDriver::new();
        let users = driver.collection("users");
        users
            .update_one(&Filter::eq("jid", "a"), &Update::new().set("name", "A"), true)
            .await
            .unwrap();

        let found = users.find_one(&Filter::eq("jid", "a")).await.unwrap().unwrap();
        assert_eq!(found["name"], json!("A"));
        assert_eq!(driver.total_documents(), 1);
    }

    #[tokio::test]
    async fn failing_driver_rejects_everything() {
        let driver = MemoryDriver::new();
        let users = driver.collection("users");
        users.insert_one(doc(json!({ "jid": "a" }))).await.unwrap();

        driver.set_failing(true);
        assert!(driver.ping().await.is_err());
        assert!(users.find_one(&Filter::All).await.is_err());
        assert!(users.insert_one(doc(json!({ "jid": "b" }))).await.is_err());

        driver.set_failing(false);
        assert_eq!(users.count(&Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_one_is_fifo() {
        let driver = MemoryDriver::new();
        let warns = driver.collection("warns");
        for n in 1..=3 {
            warns.insert_one(doc(json!({ "jid": "a", "n": n }))).await.unwrap();
        }
        warns.delete_one(&Filter::eq("jid", "a")).await.unwrap();

        let rest = warns.find(&Filter::All, FindOptions::default()).await.unwrap();
        assert_eq!(rest[0]["n"], json!(2));
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn sort_descending_with_limit() {
        let driver = MemoryDriver::new();
        let contacts = driver.collection("contacts");
        for (jid, seen) in [("a", 1), ("b", 3), ("c", 2)] {
            contacts
                .insert_one(doc(json!({ "jid": jid, "last_seen": seen })))
                .await
                .unwrap();
        }
        let docs = contacts
            .find(&Filter::All, FindOptions::descending("last_seen").limit(2))
            .await
            .unwrap();
        assert_eq!(docs[0]["jid"], json!("b"));
        assert_eq!(docs[1]["jid"], json!("c"));
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn expire_before_uses_last_write_time() {
        let driver = MemoryDriver::new();
        let messages = driver.collection("stored_messages");
        messages.insert_one(doc(json!({ "message_id": "m" }))).await.unwrap();

        let now = Utc::now().timestamp_millis();
        assert_eq!(messages.expire_before(now - 1_000).await.unwrap(), 0);
        assert_eq!(messages.expire_before(now + 1_000).await.unwrap(), 1);
    }
}
