//! Per-participant state: experience, coins, moderation flags.
//!
//! Reading a user creates it. Every other operation is an upsert, so
//! callers never need to check existence first.
//!
//! [`UserStore::add_experience`] and [`UserStore::claim_daily`] are
//! read-modify-write without optimistic locking: two concurrent calls for
//! the same user can lose one update. Losing a few experience points is
//! acceptable; nothing here guards against it.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::connection::Connection;
use crate::connection::collections::USERS;
use crate::document::{Filter, FindOptions, Update, from_document, now_ms, to_document};
use crate::leveling;

/// Cooldown between two daily claims.
pub const DAILY_COOLDOWN_MS: i64 = 24 * 60 * 60 * 1000;

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A chat participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub jid: String,
    pub name: String,
    pub xp: i64,
    /// Starts at 1 and only ever increases.
    pub level: i64,
    pub messages: i64,
    pub coins: i64,
    pub last_seen: i64,
    pub last_daily: Option<i64>,
    pub is_banned: bool,
    pub is_sudo: bool,
    pub created_at: i64,
}

impl Default for User {
    fn default() -> Self {
        Self {
            jid: String::new(),
            name: String::new(),
            xp: 0,
            level: 1,
            messages: 0,
            coins: 0,
            last_seen: 0,
            last_daily: None,
            is_banned: false,
            is_sudo: false,
            created_at: 0,
        }
    }
}

impl User {
    /// A fresh user first seen at `now`.
    pub fn new(jid: impl Into<String>, now: i64) -> Self {
        Self {
            jid: jid.into(),
            last_seen: now,
            created_at: now,
            ..Self::default()
        }
    }
}

/// Fields to overwrite in [`UserStore::update`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coins: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_daily: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_banned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_sudo: Option<bool>,
}

/// Result of [`UserStore::add_experience`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExperienceGain {
    pub leveled_up: bool,
    /// Level after the gain. `None` when the store could not be reached.
    pub new_level: Option<i64>,
}

/// Result of [`UserStore::claim_daily`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyClaim {
    /// Reward credited; the new balance.
    Claimed { balance: i64 },
    /// Claimed less than a day ago.
    TooSoon { retry_in_ms: i64 },
}

// ═══════════════════════════════════════════════════════════════════════
//  UserStore
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct UserStore {
    conn: Connection,
}

impl UserStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn filter(jid: &str) -> Filter {
        Filter::eq("jid", jid)
    }

    /// Update that inserts a default user when `jid` is unknown.
    fn create_if_missing(jid: &str) -> crate::error::StoreResult<Update> {
        Ok(Update::new().set_on_insert_all(to_document(&User::new(jid, now_ms()))?))
    }

    /// Fetch a user, creating the default document on first access.
    ///
    /// Repeated calls without writes in between return the same document and
    /// never create a second one. Neutral value: `None`.
    #[instrument(skip(self))]
    pub async fn get(&self, jid: &str) -> Option<User> {
        let jid = jid.to_string();
        self.conn
            .run("users.get", None, |db| async move {
                let users = db.collection(USERS);
                let filter = Self::filter(&jid);
                if let Some(doc) = users.find_one(&filter).await? {
                    return Ok(Some(from_document(doc)?));
                }
                let doc = users
                    .update_one(&filter, &Self::create_if_missing(&jid)?, true)
                    .await?;
                debug!(jid = %jid, "user created");
                doc.map(from_document::<User>).transpose()
            })
            .await
    }

    /// Overwrite the fields set in `patch`, creating the user if needed.
    ///
    /// Neutral value: `false`.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, jid: &str, patch: &UserPatch) -> bool {
        let jid = jid.to_string();
        let patch = patch.clone();
        self.conn
            .run("users.update", false, |db| async move {
                let update = Self::create_if_missing(&jid)?.set_all(to_document(&patch)?);
                db.collection(USERS)
                    .update_one(&Self::filter(&jid), &update, true)
                    .await?;
                Ok(true)
            })
            .await
    }

    /// Credit `amount` experience for one message and apply the level rule.
    ///
    /// Also bumps the message counter and `last_seen`. Neutral value:
    /// `ExperienceGain { leveled_up: false, new_level: None }`.
    #[instrument(skip(self))]
    pub async fn add_experience(&self, jid: &str, amount: i64) -> ExperienceGain {
        let Some(user) = self.get(jid).await else {
            return ExperienceGain::default();
        };
        let progress = leveling::accrue(user.level, user.xp, amount);
        let jid = jid.to_string();

        self.conn
            .run("users.add_experience", ExperienceGain::default(), |db| async move {
                let update = Update::new()
                    .set("xp", progress.xp)
                    .set("level", progress.level)
                    .set("last_seen", now_ms())
                    .inc("messages", 1);
                db.collection(USERS)
                    .update_one(&Self::filter(&jid), &update, true)
                    .await?;
                if progress.leveled_up {
                    debug!(jid = %jid, level = progress.level, "user leveled up");
                }
                Ok(ExperienceGain {
                    leveled_up: progress.leveled_up,
                    new_level: Some(progress.level),
                })
            })
            .await
    }

    /// [`UserStore::add_experience`] with [`leveling::DEFAULT_XP_GAIN`].
    pub async fn add_default_experience(&self, jid: &str) -> ExperienceGain {
        self.add_experience(jid, leveling::DEFAULT_XP_GAIN).await
    }

    /// Atomically add `delta` coins. Returns the new balance.
    ///
    /// Neutral value: `None`.
    #[instrument(skip(self))]
    pub async fn add_coins(&self, jid: &str, delta: i64) -> Option<i64> {
        let jid = jid.to_string();
        self.conn
            .run("users.add_coins", None, |db| async move {
                let update = Self::create_if_missing(&jid)?.inc("coins", delta);
                let doc = db
                    .collection(USERS)
                    .update_one(&Self::filter(&jid), &update, true)
                    .await?;
                Ok(doc.and_then(|d| d.get("coins").and_then(|c| c.as_i64())))
            })
            .await
    }

    /// Credit the daily `reward` if the last claim is at least a day old.
    ///
    /// Neutral value: `None`.
    #[instrument(skip(self))]
    pub async fn claim_daily(&self, jid: &str, reward: i64) -> Option<DailyClaim> {
        let user = self.get(jid).await?;
        let now = now_ms();
        if let Some(last) = user.last_daily {
            let elapsed = now.saturating_sub(last);
            if elapsed < DAILY_COOLDOWN_MS {
                return Some(DailyClaim::TooSoon {
                    retry_in_ms: DAILY_COOLDOWN_MS - elapsed,
                });
            }
        }

        let jid = jid.to_string();
        self.conn
            .run("users.claim_daily", None, |db| async move {
                let update = Update::new().set("last_daily", now).inc("coins", reward);
                let doc = db
                    .collection(USERS)
                    .update_one(&Self::filter(&jid), &update, true)
                    .await?;
                Ok(doc
                    .and_then(|d| d.get("coins").and_then(|c| c.as_i64()))
                    .map(|balance| DailyClaim::Claimed { balance }))
            })
            .await
    }

    // ── moderation flags ─────────────────────────────────────────────

    /// Neutral value: `false`.
    pub async fn ban(&self, jid: &str) -> bool {
        self.set_flag(jid, |p| p.is_banned = Some(true)).await
    }

    /// Neutral value: `false`.
    pub async fn unban(&self, jid: &str) -> bool {
        self.set_flag(jid, |p| p.is_banned = Some(false)).await
    }

    /// Neutral value: `false`.
    pub async fn is_banned(&self, jid: &str) -> bool {
        self.get(jid).await.is_some_and(|u| u.is_banned)
    }

    /// Neutral value: `false`.
    pub async fn add_sudo(&self, jid: &str) -> bool {
        self.set_flag(jid, |p| p.is_sudo = Some(true)).await
    }

    /// Neutral value: `false`.
    pub async fn remove_sudo(&self, jid: &str) -> bool {
        self.set_flag(jid, |p| p.is_sudo = Some(false)).await
    }

    /// Neutral value: `false`.
    pub async fn is_sudo(&self, jid: &str) -> bool {
        self.get(jid).await.is_some_and(|u| u.is_sudo)
    }

    /// Identifiers of every banned user. Neutral value: empty.
    pub async fn list_banned(&self) -> Vec<String> {
        self.list_flagged("users.list_banned", "is_banned").await
    }

    /// Identifiers of every sudo user. Neutral value: empty.
    pub async fn list_sudo(&self) -> Vec<String> {
        self.list_flagged("users.list_sudo", "is_sudo").await
    }

    async fn set_flag(&self, jid: &str, f: impl FnOnce(&mut UserPatch)) -> bool {
        let mut patch = UserPatch::default();
        f(&mut patch);
        self.update(jid, &patch).await
    }

    async fn list_flagged(&self, op: &'static str, flag: &'static str) -> Vec<String> {
        self.conn
            .run(op, Vec::new(), |db| async move {
                let docs = db
                    .collection(USERS)
                    .find(&Filter::eq(flag, true), FindOptions::default())
                    .await?;
                Ok(docs
                    .into_iter()
                    .filter_map(|d| d.get("jid").and_then(|j| j.as_str()).map(str::to_string))
                    .collect())
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    async fn store() -> UserStore {
        Connection::connect(StoreConfig::with_uri("memory://")).await.users()
    }

    #[tokio::test]
    async fn get_creates_default_user_once() {
        let users = store().await;
        let first = users.get("225@s.whatsapp.net").await.unwrap();
        assert_eq!(first.level, 1);
        assert_eq!(first.xp, 0);
        assert!(!first.is_banned);

        let second = users.get("225@s.whatsapp.net").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn update_is_partial_upsert() {
        let users = store().await;
        let patch = UserPatch {
            name: Some("Hani".into()),
            coins: Some(40),
            ..UserPatch::default()
        };
        assert!(users.update("new@s", &patch).await);

        let user = users.get("new@s").await.unwrap();
        assert_eq!(user.name, "Hani");
        assert_eq!(user.coins, 40);
        assert_eq!(user.level, 1);

        users
            .update("new@s", &UserPatch { xp: Some(7), ..UserPatch::default() })
            .await;
        let user = users.get("new@s").await.unwrap();
        assert_eq!(user.name, "Hani");
        assert_eq!(user.xp, 7);
    }

    #[tokio::test]
    async fn hundred_xp_levels_up_then_fifty_does_not() {
        let users = store().await;
        let gain = users.add_experience("u", 100).await;
        assert_eq!(
            gain,
            ExperienceGain {
                leveled_up: true,
                new_level: Some(2)
            }
        );
        let user = users.get("u").await.unwrap();
        assert_eq!((user.level, user.xp, user.messages), (2, 0, 1));

        let gain = users.add_experience("u", 50).await;
        assert!(!gain.leveled_up);
        assert_eq!(gain.new_level, Some(2));
        let user = users.get("u").await.unwrap();
        assert_eq!((user.level, user.xp, user.messages), (2, 50, 2));
    }

    #[tokio::test]
    async fn gain_at_max_level_saturates() {
        let users = store().await;
        let patch = UserPatch {
            level: Some(i64::MAX),
            xp: Some(i64::MAX - 1),
            ..UserPatch::default()
        };
        assert!(users.update("u", &patch).await);

        let gain = users.add_experience("u", 10).await;
        assert_eq!(gain.new_level, Some(i64::MAX));
        assert_eq!(users.get("u").await.unwrap().level, i64::MAX);
    }

    #[tokio::test]
    async fn default_gain_is_five() {
        let users = store().await;
        users.add_default_experience("u").await;
        assert_eq!(users.get("u").await.unwrap().xp, 5);
    }

    #[tokio::test]
    async fn ban_and_sudo_flags() {
        let users = store().await;
        assert!(!users.is_banned("a").await);
        users.ban("a").await;
        users.ban("b").await;
        users.add_sudo("c").await;
        assert!(users.is_banned("a").await);
        assert!(users.is_sudo("c").await);

        let mut banned = users.list_banned().await;
        banned.sort();
        assert_eq!(banned, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(users.list_sudo().await, vec!["c".to_string()]);

        users.unban("a").await;
        users.remove_sudo("c").await;
        assert_eq!(users.list_banned().await, vec!["b".to_string()]);
        assert!(users.list_sudo().await.is_empty());
    }

    #[tokio::test]
    async fn coins_and_daily_claim() {
        let users = store().await;
        assert_eq!(users.add_coins("u", 10).await, Some(10));
        assert_eq!(users.add_coins("u", -3).await, Some(7));

        assert_eq!(
            users.claim_daily("u", 100).await,
            Some(DailyClaim::Claimed { balance: 107 })
        );
        match users.claim_daily("u", 100).await {
            Some(DailyClaim::TooSoon { retry_in_ms }) => {
                assert!(retry_in_ms > 0 && retry_in_ms <= DAILY_COOLDOWN_MS)
            }
            other => panic!("expected cooldown, got {other:?}"),
        }
        assert_eq!(users.get("u").await.unwrap().coins, 107);
    }
}
