//! Connection manager and the degraded-mode policy.
//!
//! A [`Connection`] is established once at startup. Its availability is
//! fixed at construction: there is no reconnect loop, and an unavailable
//! connection stays unavailable until the host builds a new one.
//!
//! Every entity operation goes through [`Connection::run`]. When the store
//! is unavailable the operation's neutral value is returned without
//! touching any driver; when the driver fails, the fault is logged and the
//! same neutral value is returned. Callers never see a [`StoreError`].

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::CacheLayer;
use crate::config::StoreConfig;
use crate::contacts::ContactStore;
use crate::driver::Driver;
use crate::error::{StoreError, StoreResult};
use crate::groups::{Group, GroupStore};
use crate::memory::MemoryDriver;
use crate::messages::MessageStore;
use crate::mongo::MongoDriver;
use crate::session::SessionStore;
use crate::settings::SettingStore;
use crate::sqlite::SqliteDriver;
use crate::stats::{self, StatsStore};
use crate::ttl;
use crate::users::UserStore;
use crate::warns::WarnStore;

/// Collection names shared by every driver.
pub mod collections {
    pub const SESSIONS: &str = "sessions";
    pub const USERS: &str = "users";
    pub const GROUPS: &str = "groups";
    pub const WARNS: &str = "warns";
    pub const CONTACTS: &str = "contacts";
    pub const STATS: &str = "stats";
    pub const SETTINGS: &str = "settings";
    pub const STORED_MESSAGES: &str = "stored_messages";
}

/// Process-wide handle to the store. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    driver: Option<Arc<dyn Driver>>,
    unavailable_reason: Option<String>,
    config: StoreConfig,
    group_cache: CacheLayer<Group>,
    sweeper: Option<JoinHandle<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

impl Connection {
    /// Connect using `config.uri`. Never fails: check [`Connection::is_available`].
    ///
    /// An empty URI yields an unavailable connection (the host is expected to
    /// fall back to its own local persistence). Otherwise exactly one attempt
    /// is made; on failure the reason is logged and kept in
    /// [`Connection::unavailable_reason`].
    pub async fn connect(config: StoreConfig) -> Self {
        let uri = config.uri.trim().to_string();
        if uri.is_empty() {
            warn!("no store connection string configured, running without a store");
            return Self::unavailable(config, "no connection string configured");
        }

        match open_driver(&uri).await {
            Ok(driver) => Self::with_driver(driver, config).await,
            Err(err) => {
                error!(%err, "store connection failed");
                Self::unavailable(config, err.to_string())
            }
        }
    }

    /// Wrap an already-open driver (tests, embedding hosts).
    ///
    /// Pings the driver and makes sure the global stats document exists;
    /// if either step fails the connection is unavailable.
    pub async fn with_driver(driver: Arc<dyn Driver>, config: StoreConfig) -> Self {
        if let Err(err) = bootstrap(driver.as_ref()).await {
            error!(driver = driver.kind(), %err, "store bootstrap failed");
            return Self::unavailable(config, err.to_string());
        }
        info!(driver = driver.kind(), "store connected");

        let native_ttl = match driver
            .enable_native_ttl(collections::STORED_MESSAGES, config.message_ttl())
            .await
        {
            Ok(native) => native,
            Err(err) => {
                warn!(driver = driver.kind(), %err, "native expiry unavailable, sweeping instead");
                false
            }
        };
        let sweeper = if native_ttl {
            None
        } else {
            config.sweep_interval().map(|interval| {
                ttl::spawn_sweeper(
                    driver.collection(collections::STORED_MESSAGES),
                    config.message_ttl(),
                    interval,
                )
            })
        };

        Self::build(Some(driver), None, config, sweeper)
    }

    /// A connection that degrades every operation to its neutral value.
    pub fn unavailable(config: StoreConfig, reason: impl Into<String>) -> Self {
        Self::build(None, Some(reason.into()), config, None)
    }

    fn build(
        driver: Option<Arc<dyn Driver>>,
        unavailable_reason: Option<String>,
        config: StoreConfig,
        sweeper: Option<JoinHandle<()>>,
    ) -> Self {
        let group_cache = CacheLayer::builder("groups")
            .max_capacity(config.cache_capacity)
            .ttl(config.cache_ttl())
            .build();
        Self {
            inner: Arc::new(Inner {
                driver,
                unavailable_reason,
                config,
                group_cache,
                sweeper,
            }),
        }
    }

    /// Whether a store is connected.
    pub fn is_available(&self) -> bool {
        self.inner.driver.is_some()
    }

    /// Why the store is unavailable, if it is.
    pub fn unavailable_reason(&self) -> Option<&str> {
        self.inner.unavailable_reason.as_deref()
    }

    /// Backend name of the connected driver.
    pub fn driver_kind(&self) -> Option<&'static str> {
        self.inner.driver.as_ref().map(|d| d.kind())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ── entity stores ────────────────────────────────────────────────

    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.clone())
    }

    pub fn users(&self) -> UserStore {
        UserStore::new(self.clone())
    }

    pub fn groups(&self) -> GroupStore {
        GroupStore::new(self.clone(), self.inner.group_cache.clone())
    }

    pub fn warns(&self) -> WarnStore {
        WarnStore::new(self.clone())
    }

    pub fn contacts(&self) -> ContactStore {
        ContactStore::new(self.clone())
    }

    pub fn stats(&self) -> StatsStore {
        StatsStore::new(self.clone())
    }

    pub fn settings(&self) -> SettingStore {
        SettingStore::new(self.clone())
    }

    pub fn messages(&self) -> MessageStore {
        MessageStore::new(self.clone())
    }

    // ── policy ───────────────────────────────────────────────────────

    /// Run `f` against the driver, collapsing unavailability and faults to `neutral`.
    pub(crate) async fn run<T, F, Fut>(&self, op: &'static str, neutral: T, f: F) -> T
    where
        F: FnOnce(Arc<dyn Driver>) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let Some(driver) = self.inner.driver.clone() else {
            debug!(op, "store unavailable, returning neutral value");
            return neutral;
        };
        match f(driver).await {
            Ok(value) => value,
            Err(err) => {
                warn!(op, %err, "store operation failed, returning neutral value");
                neutral
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("driver", &self.driver_kind())
            .field("unavailable_reason", &self.unavailable_reason())
            .finish()
    }
}

/// Resolve a connection string to a driver.
///
/// Accepted forms: `mongodb://…`, `mongodb+srv://…`, `sqlite://<path>`,
/// `sqlite::memory:`, `memory://`.
async fn open_driver(uri: &str) -> StoreResult<Arc<dyn Driver>> {
    if uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://") {
        return Ok(Arc::new(MongoDriver::connect(uri).await?));
    }
    if uri == "sqlite::memory:" {
        return Ok(Arc::new(SqliteDriver::open_in_memory().await?));
    }
    if let Some(path) = uri.strip_prefix("sqlite://") {
        if path.is_empty() {
            return Err(StoreError::Unsupported("sqlite:// needs a file path".into()));
        }
        return Ok(Arc::new(SqliteDriver::open(path).await?));
    }
    if uri.starts_with("memory://") {
        return Ok(Arc::new(MemoryDriver::new()));
    }

    let scheme = uri.split("://").next().unwrap_or(uri);
    Err(StoreError::Unsupported(format!("no driver for scheme {scheme:?}")))
}

async fn bootstrap(driver: &dyn Driver) -> StoreResult<()> {
    driver.ping().await?;
    stats::ensure_global(driver).await
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Filter;

    #[tokio::test]
    async fn empty_uri_is_unavailable() {
        let conn = Connection::connect(StoreConfig::default()).await;
        assert!(!conn.is_available());
        assert!(conn.unavailable_reason().is_some());
        assert_eq!(conn.driver_kind(), None);
    }

    #[tokio::test]
    async fn unknown_scheme_is_unavailable_with_reason() {
        let conn = Connection::connect(StoreConfig::with_uri("redis://localhost/0")).await;
        assert!(!conn.is_available());
        assert!(conn.unavailable_reason().unwrap().contains("redis"));
    }

    #[tokio::test]
    async fn unreachable_mongodb_is_unavailable_with_reason() {
        let uri = "mongodb://127.0.0.1:1/hanimd?serverSelectionTimeoutMS=200";
        let conn = Connection::connect(StoreConfig::with_uri(uri)).await;
        assert!(!conn.is_available());
        assert!(conn.unavailable_reason().unwrap().contains("mongodb"));
    }

    #[tokio::test]
    async fn backends_without_native_expiry_get_a_sweeper() {
        let conn = Connection::connect(StoreConfig::with_uri("memory://")).await;
        assert!(conn.inner.sweeper.is_some());

        let config = StoreConfig {
            sweep_interval_secs: 0,
            ..StoreConfig::with_uri("memory://")
        };
        let conn = Connection::connect(config).await;
        assert!(conn.inner.sweeper.is_none());
    }

    #[tokio::test]
    async fn native_expiry_replaces_the_sweeper() {
        struct NativeTtl(MemoryDriver);

        #[async_trait::async_trait]
        impl Driver for NativeTtl {
            fn kind(&self) -> &'static str {
                "native-ttl"
            }
            async fn ping(&self) -> StoreResult<()> {
                self.0.ping().await
            }
            fn collection(&self, name: &str) -> Arc<dyn crate::driver::Collection> {
                self.0.collection(name)
            }
            async fn enable_native_ttl(
                &self,
                collection: &str,
                _retention: std::time::Duration,
            ) -> StoreResult<bool> {
                Ok(collection == collections::STORED_MESSAGES)
            }
        }

        let driver = Arc::new(NativeTtl(MemoryDriver::new()));
        let conn = Connection::with_driver(driver, StoreConfig::default()).await;
        assert!(conn.is_available());
        assert!(conn.inner.sweeper.is_none());
    }

    #[tokio::test]
    async fn memory_and_sqlite_uris_connect() {
        let mem = Connection::connect(StoreConfig::with_uri("memory://")).await;
        assert_eq!(mem.driver_kind(), Some("memory"));

        let sql = Connection::connect(StoreConfig::with_uri("sqlite::memory:")).await;
        assert_eq!(sql.driver_kind(), Some("sqlite"));
        assert!(sql.unavailable_reason().is_none());
    }

    #[tokio::test]
    async fn connect_creates_stats_singleton_once() {
        let driver = MemoryDriver::new();
        let stats = driver.collection(collections::STATS);

        let _first = Connection::with_driver(Arc::new(driver.clone()), StoreConfig::default()).await;
        let _second = Connection::with_driver(Arc::new(driver.clone()), StoreConfig::default()).await;

        assert_eq!(stats.count(&Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failing_driver_at_startup_is_unavailable() {
        let driver = MemoryDriver::new();
        driver.set_failing(true);
        let conn = Connection::with_driver(Arc::new(driver), StoreConfig::default()).await;
        assert!(!conn.is_available());
        assert!(conn.unavailable_reason().unwrap().contains("injected"));
    }

    #[tokio::test]
    async fn run_collapses_errors_to_neutral() {
        let conn = Connection::connect(StoreConfig::with_uri("memory://")).await;
        let value = conn
            .run("test.fail", 7_u32, |_driver| async {
                Err::<u32, _>(StoreError::Driver("boom".into()))
            })
            .await;
        assert_eq!(value, 7);

        let value = conn.run("test.ok", 7_u32, |_driver| async { Ok(1) }).await;
        assert_eq!(value, 1);
    }
}
