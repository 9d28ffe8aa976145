//! SQLite-backed [`Driver`].
//!
//! Each document is a row in `documents` with its body stored as JSON text.
//! Filters compile to `json_extract` predicates; updates run as a
//! read-modify-write inside an immediate transaction, which makes every
//! `update_one` atomic with respect to other writers on the same file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use tracing::debug;

use crate::db::{Database, UNICODE_LOWER};
use crate::document::{Document, Filter, FindOptions, Update, validate_field};
use crate::driver::{Collection, Driver};
use crate::error::{StoreError, StoreResult};

/// Durable driver over a single SQLite database.
#[derive(Clone)]
pub struct SqliteDriver {
    db: Database,
}

impl SqliteDriver {
    /// Open (or create) the database file at `path` and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::open_and_migrate(path.as_ref().to_path_buf()).await?;
        Ok(Self { db })
    }

    /// Fresh in-memory database, migrated.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let db = Database::open_in_memory()?;
        db.run_migrations().await?;
        Ok(Self { db })
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db
            .execute(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(SqliteCollection {
            db: self.db.clone(),
            name: name.to_string(),
        })
    }
}

/// One named collection inside the `documents` table.
struct SqliteCollection {
    db: Database,
    name: String,
}

#[async_trait]
impl Collection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        let mut docs = self.find(filter, FindOptions::default().limit(1)).await?;
        Ok(docs.pop())
    }

    async fn find(&self, filter: &Filter, options: FindOptions) -> StoreResult<Vec<Document>> {
        let (clause, mut params) = where_clause(&self.name, filter)?;
        let mut sql = format!("SELECT body FROM documents WHERE {clause}");
        match &options.sort {
            Some(sort) => {
                let path = json_path(&sort.field)?;
                let dir = if sort.descending { "DESC" } else { "ASC" };
                sql.push_str(&format!(
                    " ORDER BY json_extract(body, '{path}') {dir}, seq {dir}"
                ));
            }
            None => sql.push_str(" ORDER BY seq ASC"),
        }
        if let Some(limit) = options.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(i64::from(limit)));
        }

        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let bodies = stmt
                    .query_map(rusqlite::params_from_iter(params), |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                bodies.iter().map(|body| parse_body(body)).collect()
            })
            .await
    }

    async fn insert_one(&self, doc: Document) -> StoreResult<()> {
        let name = self.name.clone();
        let body = serde_json::to_string(&doc)?;
        let now = Utc::now().timestamp_millis();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO documents (collection, body, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?3)",
                    rusqlite::params![name, body, now],
                )?;
                Ok(())
            })
            .await
    }

    async fn update_one(
        &self,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        update.validate()?;
        let (clause, params) = where_clause(&self.name, filter)?;
        let select = format!("SELECT seq, body FROM documents WHERE {clause} ORDER BY seq LIMIT 1");
        let name = self.name.clone();
        let filter = filter.clone();
        let update = update.clone();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let found: Option<(i64, String)> = tx
                    .query_row(&select, rusqlite::params_from_iter(params), |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })
                    .optional()?;
                let now = Utc::now().timestamp_millis();

                let doc = match found {
                    Some((seq, body)) => {
                        let mut doc = parse_body(&body)?;
                        if !update.is_noop_for_existing() {
                            update.apply(&mut doc, false);
                            tx.execute(
                                "UPDATE documents SET body = ?1, updated_at = ?2 WHERE seq = ?3",
                                rusqlite::params![serde_json::to_string(&doc)?, now, seq],
                            )?;
                        }
                        Some(doc)
                    }
                    None if upsert => {
                        let doc = update.seed(&filter);
                        tx.execute(
                            "INSERT INTO documents (collection, body, created_at, updated_at) \
                             VALUES (?1, ?2, ?3, ?3)",
                            rusqlite::params![name, serde_json::to_string(&doc)?, now],
                        )?;
                        debug!(collection = %name, "upsert inserted document");
                        Some(doc)
                    }
                    None => None,
                };
                tx.commit()?;
                Ok(doc)
            })
            .await
    }

    async fn delete_one(&self, filter: &Filter) -> StoreResult<bool> {
        let (clause, params) = where_clause(&self.name, filter)?;
        let sql = format!(
            "DELETE FROM documents WHERE seq = \
             (SELECT seq FROM documents WHERE {clause} ORDER BY seq ASC LIMIT 1)"
        );
        self.db
            .execute(move |conn| {
                let deleted = conn.execute(&sql, rusqlite::params_from_iter(params))?;
                Ok(deleted > 0)
            })
            .await
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        let (clause, params) = where_clause(&self.name, filter)?;
        let sql = format!("SELECT count(*) FROM documents WHERE {clause}");
        self.db
            .execute(move |conn| {
                let count: i64 =
                    conn.query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))?;
                Ok(count.max(0) as u64)
            })
            .await
    }

    async fn expire_before(&self, cutoff_ms: i64) -> StoreResult<u64> {
        let name = self.name.clone();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND updated_at < ?2",
                    rusqlite::params![name, cutoff_ms],
                )?;
                Ok(deleted as u64)
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  SQL compilation
// ═══════════════════════════════════════════════════════════════════════

/// `collection = ? AND (<filter>)` plus its positional parameters.
fn where_clause(collection: &str, filter: &Filter) -> StoreResult<(String, Vec<SqlValue>)> {
    let mut params = vec![SqlValue::Text(collection.to_string())];
    let predicate = compile(filter, &mut params)?;
    Ok((format!("collection = ? AND ({predicate})"), params))
}

fn compile(filter: &Filter, params: &mut Vec<SqlValue>) -> StoreResult<String> {
    match filter {
        Filter::All => Ok("1".to_string()),
        Filter::Eq(field, value) => {
            let extract = format!("json_extract(body, '{}')", json_path(field)?);
            let param = match value {
                Value::Null => return Ok(format!("{extract} IS NULL")),
                Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => SqlValue::Integer(i),
                    None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
                },
                Value::String(s) => SqlValue::Text(s.clone()),
                Value::Array(_) | Value::Object(_) => {
                    return Err(StoreError::InvalidArgument(format!(
                        "equality on compound value for field {field:?}"
                    )));
                }
            };
            params.push(param);
            Ok(format!("{extract} = ?"))
        }
        Filter::Contains {
            field,
            needle,
            case_insensitive,
        } => {
            let extract = format!("json_extract(body, '{}')", json_path(field)?);
            params.push(SqlValue::Text(needle.clone()));
            // Only string fields can match, mirroring the in-memory driver.
            let typed = format!("json_type(body, '{}') = 'text'", json_path(field)?);
            if *case_insensitive {
                Ok(format!(
                    "({typed} AND instr({UNICODE_LOWER}({extract}), {UNICODE_LOWER}(?)) > 0)"
                ))
            } else {
                Ok(format!("({typed} AND instr({extract}, ?) > 0)"))
            }
        }
        Filter::Or(filters) if filters.is_empty() => Ok("0".to_string()),
        Filter::And(filters) if filters.is_empty() => Ok("1".to_string()),
        Filter::Or(filters) => join(filters, " OR ", params),
        Filter::And(filters) => join(filters, " AND ", params),
    }
}

fn join(filters: &[Filter], op: &str, params: &mut Vec<SqlValue>) -> StoreResult<String> {
    let parts = filters
        .iter()
        .map(|f| compile(f, params))
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(format!("({})", parts.join(op)))
}

/// JSON path for a validated field name. Safe to splice into SQL text.
fn json_path(field: &str) -> StoreResult<String> {
    validate_field(field)?;
    Ok(format!("$.{field}"))
}

fn parse_body(body: &str) -> StoreResult<Document> {
    match serde_json::from_str(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Driver("stored body is not a JSON object".into())),
    }
}

// ── tests ────────────────────────────────────────────────────────────
