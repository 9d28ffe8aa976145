//! Per-group moderation settings.
//!
//! Same get-or-create / upsert shape as users. Reads go through the
//! connection's group cache. Every write bumps the group's `revision` and
//! writes the stored document through to the cache; the cache only ever
//! moves forward in revision, so a slow read racing a write cannot leave a
//! stale group behind.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cache::CacheLayer;
use crate::connection::Connection;
use crate::connection::collections::GROUPS;
use crate::document::{Filter, Update, from_document, now_ms, to_document};

/// A chat group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    pub jid: String,
    pub name: String,
    pub antilink: bool,
    pub antispam: bool,
    pub antibot: bool,
    pub antitag: bool,
    pub welcome: bool,
    pub goodbye: bool,
    pub mute: bool,
    pub created_at: i64,
    /// Number of writes applied through [`GroupStore::update`].
    pub revision: i64,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            jid: String::new(),
            name: String::new(),
            antilink: false,
            antispam: false,
            antibot: false,
            antitag: false,
            welcome: true,
            goodbye: true,
            mute: false,
            created_at: 0,
            revision: 0,
        }
    }
}

impl Group {
    pub fn new(jid: impl Into<String>, now: i64) -> Self {
        Self {
            jid: jid.into(),
            created_at: now,
            ..Self::default()
        }
    }

    /// Current state of `toggle`.
    pub fn toggle(&self, toggle: GroupToggle) -> bool {
        match toggle {
            GroupToggle::Antilink => self.antilink,
            GroupToggle::Antispam => self.antispam,
            GroupToggle::Antibot => self.antibot,
            GroupToggle::Antitag => self.antitag,
            GroupToggle::Welcome => self.welcome,
            GroupToggle::Goodbye => self.goodbye,
        }
    }
}

/// The six independent moderation switches of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupToggle {
    Antilink,
    Antispam,
    Antibot,
    Antitag,
    Welcome,
    Goodbye,
}

impl GroupToggle {
    pub const ALL: [GroupToggle; 6] = [
        Self::Antilink,
        Self::Antispam,
        Self::Antibot,
        Self::Antitag,
        Self::Welcome,
        Self::Goodbye,
    ];

    /// Document field backing this toggle.
    pub fn field(self) -> &'static str {
        match self {
            Self::Antilink => "antilink",
            Self::Antispam => "antispam",
            Self::Antibot => "antibot",
            Self::Antitag => "antitag",
            Self::Welcome => "welcome",
            Self::Goodbye => "goodbye",
        }
    }
}

impl std::fmt::Display for GroupToggle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field())
    }
}

impl std::str::FromStr for GroupToggle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.field().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown group toggle: {s}"))
    }
}

/// Fields to overwrite in [`GroupStore::update`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antilink: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antispam: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antibot: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antitag: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goodbye: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
}

#[derive(Clone)]
pub struct GroupStore {
    conn: Connection,
    cache: CacheLayer<Group>,
}

impl GroupStore {
    pub fn new(conn: Connection, cache: CacheLayer<Group>) -> Self {
        Self { conn, cache }
    }

    fn filter(jid: &str) -> Filter {
        Filter::eq("jid", jid)
    }

    /// Fetch a group, creating it with default toggles on first access.
    ///
    /// Neutral value: `None`.
    #[instrument(skip(self))]
    pub async fn get(&self, jid: &str) -> Option<Group> {
        let jid = jid.to_string();
        let cache = self.cache.clone();
        self.conn
            .run("groups.get", None, |db| async move {
                if let Some(group) = cache.get(&jid).await {
                    return Ok(Some(group));
                }
                let groups = db.collection(GROUPS);
                let filter = Self::filter(&jid);
                let doc = match groups.find_one(&filter).await? {
                    Some(doc) => doc,
                    None => {
                        let update = Update::new()
                            .set_on_insert_all(to_document(&Group::new(jid.as_str(), now_ms()))?);
                        debug!(jid = %jid, "group created");
                        match groups.update_one(&filter, &update, true).await? {
                            Some(doc) => doc,
                            None => return Ok(None),
                        }
                    }
                };
                let group: Group = from_document(doc)?;
                remember(&cache, &jid, group.clone()).await;
                Ok(Some(group))
            })
            .await
    }

    /// Overwrite the fields set in `patch`, creating the group if needed.
    ///
    /// Neutral value: `false`.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, jid: &str, patch: &GroupPatch) -> bool {
        let jid = jid.to_string();
        let patch = patch.clone();
        let cache = self.cache.clone();
        self.conn
            .run("groups.update", false, |db| async move {
                let update = Update::new()
                    .set_on_insert_all(to_document(&Group::new(jid.as_str(), now_ms()))?)
                    .set_all(to_document(&patch)?)
                    .inc("revision", 1);
                let stored = db
                    .collection(GROUPS)
                    .update_one(&Self::filter(&jid), &update, true)
                    .await?;
                match stored.map(from_document::<Group>).transpose() {
                    Ok(Some(group)) => remember(&cache, &jid, group).await,
                    Ok(None) => cache.invalidate(&jid).await,
                    Err(err) => {
                        warn!(jid = %jid, %err, "stored group is unreadable, dropping cache entry");
                        cache.invalidate(&jid).await;
                    }
                }
                Ok(true)
            })
            .await
    }

    /// Switch one moderation toggle. Neutral value: `false`.
    pub async fn set_toggle(&self, jid: &str, toggle: GroupToggle, on: bool) -> bool {
        let mut patch = GroupPatch::default();
        let slot = match toggle {
            GroupToggle::Antilink => &mut patch.antilink,
            GroupToggle::Antispam => &mut patch.antispam,
            GroupToggle::Antibot => &mut patch.antibot,
            GroupToggle::Antitag => &mut patch.antitag,
            GroupToggle::Welcome => &mut patch.welcome,
            GroupToggle::Goodbye => &mut patch.goodbye,
        };
        *slot = Some(on);
        self.update(jid, &patch).await
    }

    /// Neutral value: `false`.
    pub async fn set_muted(&self, jid: &str, muted: bool) -> bool {
        let patch = GroupPatch {
            mute: Some(muted),
            ..GroupPatch::default()
        };
        self.update(jid, &patch).await
    }
}

/// Cache `group` unless a later revision is already cached.
async fn remember(cache: &CacheLayer<Group>, jid: &str, group: Group) {
    cache.insert_newest(jid, group, |g| g.revision).await;
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    async fn store() -> GroupStore {
        Connection::connect(StoreConfig::with_uri("memory://")).await.groups()
    }

    #[tokio::test]
    async fn new_group_has_welcome_and_goodbye_on() {
        let groups = store().await;
        let group = groups.get("123@g.us").await.unwrap();
        assert!(group.welcome && group.goodbye);
        assert!(!group.antilink && !group.antispam && !group.antibot && !group.antitag);
        assert!(!group.mute);
    }

    #[tokio::test]
    async fn toggles_are_independent_and_visible_after_write() {
        let groups = store().await;
        groups.get("g").await;
        assert!(groups.set_toggle("g", GroupToggle::Antilink, true).await);
        assert!(groups.set_toggle("g", GroupToggle::Welcome, false).await);
        assert!(groups.set_muted("g", true).await);

        let group = groups.get("g").await.unwrap();
        assert!(group.toggle(GroupToggle::Antilink));
        assert!(!group.toggle(GroupToggle::Welcome));
        assert!(group.toggle(GroupToggle::Goodbye));
        assert!(!group.toggle(GroupToggle::Antibot));
        assert!(group.mute);
    }

    #[tokio::test]
    async fn update_creates_missing_group_with_defaults() {
        let groups = store().await;
        let patch = GroupPatch {
            name: Some("Famille".into()),
            ..GroupPatch::default()
        };
        assert!(groups.update("fresh", &patch).await);
        let group = groups.get("fresh").await.unwrap();
        assert_eq!(group.name, "Famille");
        assert!(group.welcome);
    }

    #[tokio::test]
    async fn slow_read_cannot_restore_a_stale_group() {
        let groups = store().await;
        let stale = groups.get("g").await.unwrap();
        assert_eq!(stale.revision, 0);

        assert!(groups.set_toggle("g", GroupToggle::Antilink, true).await);
        // A read that loaded the group before the write finishes late.
        remember(&groups.cache, "g", stale).await;

        let group = groups.get("g").await.unwrap();
        assert!(group.antilink);
        assert_eq!(group.revision, 1);
    }

    #[tokio::test]
    async fn writes_go_through_to_the_cache() {
        let groups = store().await;
        assert!(groups.set_muted("g", true).await);
        let cached = groups.cache.get("g").await.unwrap();
        assert!(cached.mute);
        assert_eq!(cached.revision, 1);
    }

    #[test]
    fn toggle_parsing() {
        assert_eq!("AntiLink".parse::<GroupToggle>(), Ok(GroupToggle::Antilink));
        assert!("antiporn".parse::<GroupToggle>().is_err());
        assert_eq!(GroupToggle::Goodbye.to_string(), "goodbye");
    }
}
