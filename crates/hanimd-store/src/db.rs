//! SQLite handle used by the SQLite driver.
//!
//! The [`Database`] struct wraps a `rusqlite::Connection` behind an
//! `Arc<Mutex<>>` and exposes async methods that use
//! `tokio::task::spawn_blocking` to keep SQLite I/O off the async runtime.
//! The mutex is the only serialisation point: every closure passed to
//! [`Database::execute_mut`] runs with exclusive access to the connection.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Thread-safe handle to a SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file at `path` and apply pragmas.
    ///
    /// Missing parent directories are created.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Driver(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;
        Self::register_functions(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;
        Self::register_functions(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database file and run all pending migrations.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(|conn| migration::run_all(conn)).await
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute_mut(|conn| f(conn)).await
    }

    /// Run `f` with mutable access, for work that needs a transaction.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await?
    }

    // ── pragmas ──────────────────────────────────────────────────────

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        // WAL: readers never block the writer.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // With WAL, NORMAL only risks the last transaction on power loss.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        // Negative value is KiB: ~16 MiB page cache.
        conn.pragma_update(None, "cache_size", -16_000_i32)?;

        conn.pragma_update(None, "temp_store", "MEMORY")?;

        // Concurrent writers (e.g. a second process) wait instead of failing.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        debug!("database pragmas applied");
        Ok(())
    }

    // ── functions ────────────────────────────────────────────────────

    /// `unicode_lower(text)`: full Unicode lowercase. SQLite's own `lower()`
    /// only folds ASCII, so `'É'` would never match `'é'`.
    fn register_functions(conn: &Connection) -> StoreResult<()> {
        conn.create_scalar_function(
            UNICODE_LOWER,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text = ctx.get::<Option<String>>(0)?;
                Ok(text.map(|s| s.to_lowercase()))
            },
        )?;
        Ok(())
    }
}

/// Name of the Unicode-aware lowercase SQL function.
pub const UNICODE_LOWER: &str = "unicode_lower";

// ── tests ────────────────────────────────────────────────────────────
