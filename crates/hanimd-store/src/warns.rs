//! Moderation warnings, many per (participant, group) pair.
//!
//! The warn count of a pair is the number of warn documents for it.
//! Removal is FIFO: [`WarnStore::remove`] deletes the oldest warn of the
//! pair, and only that one.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::connection::Connection;
use crate::connection::collections::WARNS;
use crate::document::{Filter, FindOptions, from_document, now_ms, to_document};

/// Reason recorded when the issuer gives none.
pub const DEFAULT_REASON: &str = "unspecified";

/// One warning issued to a participant in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warn {
    /// UUID v7, so ids sort by issue time.
    pub id: String,
    pub jid: String,
    pub group_jid: String,
    pub reason: String,
    pub warned_by: String,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct WarnStore {
    conn: Connection,
}

impl WarnStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn filter(jid: &str, group_jid: &str) -> Filter {
        Filter::And(vec![
            Filter::eq("jid", jid),
            Filter::eq("group_jid", group_jid),
        ])
    }

    /// Record a warning and return the pair's new warn count.
    ///
    /// An empty or missing `reason` is stored as [`DEFAULT_REASON`].
    /// Neutral value: `0`.
    #[instrument(skip(self, reason))]
    pub async fn add(
        &self,
        jid: &str,
        group_jid: &str,
        reason: Option<&str>,
        warned_by: &str,
    ) -> u64 {
        let warn = Warn {
            id: Uuid::now_v7().to_string(),
            jid: jid.to_string(),
            group_jid: group_jid.to_string(),
            reason: reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(DEFAULT_REASON)
                .to_string(),
            warned_by: warned_by.to_string(),
            created_at: now_ms(),
        };
        self.conn
            .run("warns.add", 0, |db| async move {
                let warns = db.collection(WARNS);
                warns.insert_one(to_document(&warn)?).await?;
                let count = warns.count(&Self::filter(&warn.jid, &warn.group_jid)).await?;
                debug!(warn_id = %warn.id, count, "warn added");
                Ok(count)
            })
            .await
    }

    /// Delete the oldest warning of the pair and return the new count.
    ///
    /// Neutral value: `0`.
    #[instrument(skip(self))]
    pub async fn remove(&self, jid: &str, group_jid: &str) -> u64 {
        let filter = Self::filter(jid, group_jid);
        self.conn
            .run("warns.remove", 0, |db| async move {
                let warns = db.collection(WARNS);
                let removed = warns.delete_one(&filter).await?;
                let count = warns.count(&filter).await?;
                debug!(removed, count, "warn removed");
                Ok(count)
            })
            .await
    }

    /// Every warning of the pair, oldest first. Neutral value: empty.
    #[instrument(skip(self))]
    pub async fn list(&self, jid: &str, group_jid: &str) -> Vec<Warn> {
        let filter = Self::filter(jid, group_jid);
        self.conn
            .run("warns.list", Vec::new(), |db| async move {
                db.collection(WARNS)
                    .find(&filter, FindOptions::ascending("created_at"))
                    .await?
                    .into_iter()
                    .map(from_document)
                    .collect()
            })
            .await
    }

    /// Number of warnings of the pair. Neutral value: `0`.
    #[instrument(skip(self))]
    pub async fn count(&self, jid: &str, group_jid: &str) -> u64 {
        let filter = Self::filter(jid, group_jid);
        self.conn
            .run("warns.count", 0, |db| async move {
                db.collection(WARNS).count(&filter).await
            })
            .await
    }
}
