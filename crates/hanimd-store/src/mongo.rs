//! MongoDB-backed [`Driver`].
//!
//! Collections map one-to-one onto collections of the database named in the
//! connection string (`hanimd` when the string names none). Filters and
//! updates translate to native query and update operators, so each
//! `update_one` is a single `findOneAndUpdate` and each `delete_one` a single
//! `findOneAndDelete`.
//!
//! Two bookkeeping fields ride along with every document and are stripped on
//! read: the server-assigned `_id`, which gives insertion order, and
//! `_updated_at`, a BSON date refreshed on every write. `_updated_at` backs
//! both [`Collection::expire_before`] and the native TTL index created by
//! [`Driver::enable_native_ttl`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, Bson, DateTime, doc};
use mongodb::options::{ClientOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Database, IndexModel};
use serde_json::Value;
use tracing::{debug, info};

use crate::document::{Document, Filter, FindOptions, Update};
use crate::driver::{Collection, Driver};
use crate::error::{StoreError, StoreResult};

type BsonDocument = bson::Document;

/// Database used when the connection string does not name one.
pub const DEFAULT_DATABASE: &str = "hanimd";

/// Write timestamp kept on every document.
const UPDATED_AT: &str = "_updated_at";

/// Name of the expiry index on [`UPDATED_AT`].
const TTL_INDEX: &str = "hanimd_ttl";

/// Applied unless the connection string sets `serverSelectionTimeoutMS`.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Driver over one MongoDB database.
#[derive(Clone)]
pub struct MongoDriver {
    db: Database,
}

impl MongoDriver {
    /// Build a client for `uri` (`mongodb://` or `mongodb+srv://`).
    ///
    /// No server round-trip happens here apart from the SRV lookup; call
    /// [`Driver::ping`] to check reachability.
    pub async fn connect(uri: &str) -> StoreResult<Self> {
        let mut options = ClientOptions::parse(uri).await?;
        options
            .server_selection_timeout
            .get_or_insert(SERVER_SELECTION_TIMEOUT);
        options.app_name.get_or_insert_with(|| "hanimd".to_string());

        let client = Client::with_options(options)?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        info!(database = db.name(), "mongodb client created");
        Ok(Self { db })
    }

    /// The database every collection lives in.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Driver for MongoDriver {
    fn kind(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(MongoCollection {
            name: name.to_string(),
            inner: self.db.collection::<BsonDocument>(name),
        })
    }

    async fn enable_native_ttl(&self, collection: &str, retention: Duration) -> StoreResult<bool> {
        let mut keys = BsonDocument::new();
        keys.insert(UPDATED_AT, 1);
        let index = IndexModel::builder()
            .keys(keys)
            .options(
                IndexOptions::builder()
                    .name(TTL_INDEX.to_string())
                    .expire_after(retention)
                    .build(),
            )
            .build();
        self.db
            .collection::<BsonDocument>(collection)
            .create_index(index)
            .await?;
        info!(collection, ttl_secs = retention.as_secs(), "native ttl index ready");
        Ok(true)
    }
}

struct MongoCollection {
    name: String,
    inner: mongodb::Collection<BsonDocument>,
}

#[async_trait]
impl Collection for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        let found = self
            .inner
            .find_one(to_query(filter)?)
            .sort(sort_order(&FindOptions::default()))
            .await?;
        found.map(from_bson).transpose()
    }

    async fn find(&self, filter: &Filter, options: FindOptions) -> StoreResult<Vec<Document>> {
        let mut action = self.inner.find(to_query(filter)?).sort(sort_order(&options));
        if let Some(limit) = options.limit {
            action = action.limit(i64::from(limit));
        }
        let docs: Vec<BsonDocument> = action.await?.try_collect().await?;
        docs.into_iter().map(from_bson).collect()
    }

    async fn insert_one(&self, doc: Document) -> StoreResult<()> {
        let mut body = bson::to_document(&doc)?;
        body.insert(UPDATED_AT, DateTime::now());
        self.inner.insert_one(body).await?;
        Ok(())
    }

    async fn update_one(
        &self,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        update.validate()?;
        let stored = self
            .inner
            .find_one_and_update(to_query(filter)?, to_modifications(update)?)
            .sort(sort_order(&FindOptions::default()))
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .await?;
        if stored.is_some() && upsert {
            debug!(collection = %self.name, "upsert applied");
        }
        stored.map(from_bson).transpose()
    }

    async fn delete_one(&self, filter: &Filter) -> StoreResult<bool> {
        let removed = self
            .inner
            .find_one_and_delete(to_query(filter)?)
            .sort(sort_order(&FindOptions::default()))
            .await?;
        Ok(removed.is_some())
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        Ok(self.inner.count_documents(to_query(filter)?).await?)
    }

    async fn expire_before(&self, cutoff_ms: i64) -> StoreResult<u64> {
        let mut query = BsonDocument::new();
        query.insert(UPDATED_AT, doc! { "$lt": DateTime::from_millis(cutoff_ms) });
        Ok(self.inner.delete_many(query).await?.deleted_count)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Translation
// ═══════════════════════════════════════════════════════════════════════

/// Native query for `filter`, after field-name validation.
fn to_query(filter: &Filter) -> StoreResult<BsonDocument> {
    filter.validate()?;
    translate(filter)
}

fn translate(filter: &Filter) -> StoreResult<BsonDocument> {
    let mut query = BsonDocument::new();
    match filter {
        Filter::All => {}
        Filter::Eq(field, value) => {
            if value.is_array() || value.is_object() {
                return Err(StoreError::InvalidArgument(format!(
                    "equality on compound value for field {field:?}"
                )));
            }
            query.insert(field.as_str(), bson::to_bson(value)?);
        }
        Filter::Contains {
            field,
            needle,
            case_insensitive,
        } => {
            let mut pattern = doc! { "$regex": regex::escape(needle) };
            if *case_insensitive {
                pattern.insert("$options", "i");
            }
            query.insert(field.as_str(), pattern);
        }
        // Every stored document has an `_id`, so this matches nothing.
        Filter::Or(filters) if filters.is_empty() => {
            query.insert("_id", doc! { "$exists": false });
        }
        Filter::And(filters) if filters.is_empty() => {}
        Filter::Or(filters) => {
            query.insert("$or", clauses(filters)?);
        }
        Filter::And(filters) => {
            query.insert("$and", clauses(filters)?);
        }
    }
    Ok(query)
}

fn clauses(filters: &[Filter]) -> StoreResult<Vec<Bson>> {
    filters
        .iter()
        .map(|f| translate(f).map(Bson::Document))
        .collect()
}

/// `$set` / `$inc` / `$setOnInsert` document for `update`.
///
/// MongoDB rejects two operators on one path, so a field that is both set
/// and incremented gets its sum in `$set`, and `set_on_insert` entries
/// shadowed by `set` or `inc` are left out. An increment on a field that
/// `set_on_insert` seeds with a non-zero base starts from zero here.
fn to_modifications(update: &Update) -> StoreResult<BsonDocument> {
    let mut set = bson::to_document(&update.set)?;
    let mut inc = BsonDocument::new();
    for (field, delta) in &update.inc {
        match set.get(field).and_then(as_integer) {
            Some(base) => {
                set.insert(field.as_str(), base.saturating_add(*delta));
            }
            None => {
                inc.insert(field.as_str(), *delta);
            }
        }
    }

    let mut on_insert = BsonDocument::new();
    for (field, value) in &update.set_on_insert {
        if !update.set.contains_key(field) && !update.inc.contains_key(field) {
            on_insert.insert(field.as_str(), bson::to_bson(value)?);
        }
    }

    if update.is_noop_for_existing() {
        on_insert.insert(UPDATED_AT, DateTime::now());
    } else {
        set.insert(UPDATED_AT, DateTime::now());
    }

    let mut modifications = BsonDocument::new();
    for (op, body) in [("$set", set), ("$inc", inc), ("$setOnInsert", on_insert)] {
        if !body.is_empty() {
            modifications.insert(op, body);
        }
    }
    Ok(modifications)
}

fn as_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

/// Requested order with `_id` as tie-break; insertion order by default.
fn sort_order(options: &FindOptions) -> BsonDocument {
    let mut order = BsonDocument::new();
    let dir = match &options.sort {
        Some(sort) => {
            let dir = if sort.descending { -1 } else { 1 };
            order.insert(sort.field.as_str(), dir);
            dir
        }
        None => 1,
    };
    order.insert("_id", dir);
    order
}

/// Strip bookkeeping fields and convert to a JSON [`Document`].
fn from_bson(mut doc: BsonDocument) -> StoreResult<Document> {
    doc.remove("_id");
    doc.remove(UPDATED_AT);
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Driver("stored document is not an object".into())),
    }
}

// ── tests ────────────────────────────────────────────────────────────
