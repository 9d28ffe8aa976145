//! Schema migrations for the SQLite driver.
//!
//! The SQLite driver keeps every collection in one `documents` table: one
//! row per document, the body as JSON text, plus write timestamps used for
//! expiry. Versions applied are recorded in `_migrations` so reopening an
//! existing database is a no-op.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Append new migrations at the end; never edit an applied one.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "document table",
        sql: r#"
            CREATE TABLE documents (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                collection  TEXT NOT NULL,
                body        TEXT NOT NULL CHECK(json_valid(body)),
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );
            CREATE INDEX idx_documents_collection ON documents(collection, seq);
            CREATE INDEX idx_documents_updated ON documents(collection, updated_at);
        "#,
    },
    Migration {
        version: 2,
        description: "key lookup indexes for jid, key, session_id and message_id",
        sql: r#"
            CREATE INDEX idx_documents_jid
                ON documents(collection, json_extract(body, '$.jid'));
            CREATE INDEX idx_documents_key
                ON documents(collection, json_extract(body, '$.key'));
            CREATE INDEX idx_documents_session_id
                ON documents(collection, json_extract(body, '$.session_id'));
            CREATE INDEX idx_documents_message_id
                ON documents(collection, json_extract(body, '$.message_id'));
        "#,
    },
];

/// Apply every migration newer than the recorded version.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "document schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Latest applied migration version, or 0 on a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to read current version: {e}"),
    })
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

/// Apply one migration inside an immediate transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    let fail = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    // `&Connection` cannot open a `Transaction`, so BEGIN/COMMIT by hand.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| fail(format!("failed to begin transaction: {e}")))?;

    let result = conn
        .execute_batch(migration.sql)
        .map_err(|e| fail(format!("SQL execution failed: {e}")))
        .and_then(|()| {
            conn.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version,
                    migration.description,
                    chrono::Utc::now().timestamp()
                ],
            )
            .map(|_| ())
            .map_err(|e| fail(format!("failed to record migration: {e}")))
        });

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| fail(format!("failed to commit: {e}")))?;
            Ok(())
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
