//! The storage driver contract.
//!
//! The entity stores never talk to SQLite (or anything else) directly. They
//! go through a [`Driver`], which hands out named [`Collection`]s. Three
//! drivers ship with the crate: [`MongoDriver`](crate::mongo::MongoDriver)
//! and [`SqliteDriver`](crate::sqlite::SqliteDriver) for durable storage,
//! and [`MemoryDriver`](crate::memory::MemoryDriver) as an in-process test
//! double.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::document::{Document, Filter, FindOptions, Update};
use crate::error::StoreResult;

/// A named set of documents.
///
/// Every method is a single, independent unit of work: implementations make
/// each call atomic on its own but provide nothing across calls.
#[async_trait]
pub trait Collection: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// First document matching `filter`, in insertion order.
    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>>;

    /// Every document matching `filter`, ordered and capped by `options`.
    async fn find(&self, filter: &Filter, options: FindOptions) -> StoreResult<Vec<Document>>;

    /// Insert a new document unconditionally.
    async fn insert_one(&self, doc: Document) -> StoreResult<()>;

    /// Modify the first document matching `filter`.
    ///
    /// When nothing matches and `upsert` is set, a document seeded by
    /// [`Update::seed`] is inserted. Returns the document as it is after the
    /// write, or `None` when nothing matched and `upsert` was not set.
    async fn update_one(
        &self,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StoreResult<Option<Document>>;

    /// Delete the oldest-inserted document matching `filter`.
    ///
    /// Returns `true` if a document was removed.
    async fn delete_one(&self, filter: &Filter) -> StoreResult<bool>;

    /// Number of documents matching `filter`.
    async fn count(&self, filter: &Filter) -> StoreResult<u64>;

    /// Remove every document last written before `cutoff_ms` (Unix millis).
    ///
    /// This is the expiry primitive the TTL sweeper drives.
    async fn expire_before(&self, cutoff_ms: i64) -> StoreResult<u64>;
}

/// A connected storage backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short backend name used in logs (`"mongodb"`, `"sqlite"`, `"memory"`).
    fn kind(&self) -> &'static str;

    /// Round-trip to the backend to prove it is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Handle to the collection called `name`. Collections exist implicitly.
    fn collection(&self, name: &str) -> Arc<dyn Collection>;

    /// Have the backend itself drop documents of `collection` once they are
    /// `retention` past their last write.
    ///
    /// Returns `false` when the backend has no such feature; the connection
    /// then runs the [`ttl`](crate::ttl) sweeper instead.
    async fn enable_native_ttl(&self, _collection: &str, _retention: Duration) -> StoreResult<bool> {
        Ok(false)
    }
}
