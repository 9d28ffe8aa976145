//! Global counters kept in a single `"global"` document.
//!
//! Counter names are chosen by the caller; the store validates only that
//! the name is a plain identifier. Counters move by atomic increments and
//! never decrease.

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::connection::Connection;
use crate::connection::collections::{GROUPS, STATS, USERS};
use crate::document::{Document, Filter, Update, from_document, now_ms};
use crate::driver::Driver;
use crate::error::{StoreError, StoreResult};

/// Key of the singleton stats document.
pub const GLOBAL_KEY: &str = "global";

/// The stats document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub key: String,
    pub commands: i64,
    pub messages: i64,
    pub start_time: i64,
    /// Cached by [`StatsStore::refresh_totals`].
    pub total_users: i64,
    /// Cached by [`StatsStore::refresh_totals`].
    pub total_groups: i64,
    /// Caller-defined counters.
    #[serde(flatten)]
    pub extra: Document,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            key: GLOBAL_KEY.to_string(),
            commands: 0,
            messages: 0,
            start_time: 0,
            total_users: 0,
            total_groups: 0,
            extra: Document::new(),
        }
    }
}

impl Stats {
    /// Value of any counter, built-in or caller-defined. Missing counters read as 0.
    pub fn counter(&self, name: &str) -> i64 {
        match name {
            "commands" => self.commands,
            "messages" => self.messages,
            "total_users" => self.total_users,
            "total_groups" => self.total_groups,
            other => self.extra.get(other).and_then(|v| v.as_i64()).unwrap_or(0),
        }
    }
}

fn filter() -> Filter {
    Filter::eq("key", GLOBAL_KEY)
}

/// Create the stats document if absent; existing counters are left alone.
pub(crate) async fn ensure_global(driver: &dyn Driver) -> StoreResult<()> {
    let mut seed = Document::new();
    seed.insert("commands".into(), 0.into());
    seed.insert("messages".into(), 0.into());
    seed.insert("start_time".into(), now_ms().into());
    seed.insert("total_users".into(), 0.into());
    seed.insert("total_groups".into(), 0.into());

    driver
        .collection(STATS)
        .update_one(&filter(), &Update::new().set_on_insert_all(seed), true)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct StatsStore {
    conn: Connection,
}

impl StatsStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Atomically add 1 to the counter `field`.
    ///
    /// Returns `true` when the increment was applied. Neutral value: `false`.
    #[instrument(skip(self))]
    pub async fn increment(&self, field: &str) -> bool {
        let field = field.to_string();
        self.conn
            .run("stats.increment", false, |db| async move {
                if field == "key" || field == "start_time" {
                    return Err(StoreError::InvalidArgument(format!(
                        "{field} is not a counter"
                    )));
                }
                let applied = db
                    .collection(STATS)
                    .update_one(&filter(), &Update::new().inc(field.as_str(), 1), false)
                    .await?
                    .is_some();
                debug!(field = %field, applied, "stats increment");
                Ok(applied)
            })
            .await
    }

    /// The stats document. Neutral value: `None`.
    #[instrument(skip(self))]
    pub async fn get(&self) -> Option<Stats> {
        self.conn
            .run("stats.get", None, |db| async move {
                db.collection(STATS)
                    .find_one(&filter())
                    .await?
                    .map(from_document)
                    .transpose()
            })
            .await
    }

    /// Recount users and groups into the cached totals and return the result.
    ///
    /// Neutral value: `None`.
    #[instrument(skip(self))]
    pub async fn refresh_totals(&self) -> Option<Stats> {
        self.conn
            .run("stats.refresh_totals", None, |db| async move {
                let users = db.collection(USERS).count(&Filter::All).await?;
                let groups = db.collection(GROUPS).count(&Filter::All).await?;
                let update = Update::new()
                    .set("total_users", users)
                    .set("total_groups", groups);
                db.collection(STATS)
                    .update_one(&filter(), &update, false)
                    .await?
                    .map(from_document)
                    .transpose()
            })
            .await
    }
}
