//! Schemaless documents and the small query vocabulary drivers understand.
//!
//! A [`Document`] is a JSON object. Entity stores build [`Filter`]s and
//! [`Update`]s out of a handful of primitives (equality, substring match,
//! boolean composition; `$set` / `$setOnInsert` / `$inc`) and hand them to a
//! [`Collection`](crate::driver::Collection). Nothing here is an ad-hoc query
//! language: the vocabulary only covers what the entity stores need.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// A stored document: a JSON object keyed by field name.
pub type Document = serde_json::Map<String, Value>;

/// Serialize a typed record into a [`Document`].
pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidArgument(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Deserialize a [`Document`] into a typed record.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Current time as Unix milliseconds, the timestamp unit of every document.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Reject field names that are not plain identifiers.
///
/// Field names end up inside SQLite JSON paths, so only `[A-Za-z0-9_]` is
/// accepted. Both drivers apply the same rule so they fail identically.
pub fn validate_field(field: &str) -> StoreResult<()> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidArgument(format!(
            "invalid field name: {field:?}"
        )))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Filter
// ═══════════════════════════════════════════════════════════════════════

/// Predicate over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// `field == value`. A missing field compares equal to `null`.
    Eq(String, Value),
    /// `needle` is a substring of the string stored at `field`.
    Contains {
        field: String,
        needle: String,
        case_insensitive: bool,
    },
    /// At least one sub-filter matches. An empty list matches nothing.
    Or(Vec<Filter>),
    /// Every sub-filter matches. An empty list matches everything.
    And(Vec<Filter>),
}

impl Filter {
    /// Equality on a single field.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// Case-sensitive substring match.
    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
            case_insensitive: false,
        }
    }

    /// Case-insensitive substring match.
    pub fn contains_ci(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
            case_insensitive: true,
        }
    }

    /// Check every field name referenced by this filter.
    pub fn validate(&self) -> StoreResult<()> {
        match self {
            Self::All => Ok(()),
            Self::Eq(field, _) | Self::Contains { field, .. } => validate_field(field),
            Self::Or(filters) | Self::And(filters) => {
                filters.iter().try_for_each(Filter::validate)
            }
        }
    }

    /// Evaluate the filter against a document in memory.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, value) => doc.get(field).unwrap_or(&Value::Null) == value,
            Self::Contains {
                field,
                needle,
                case_insensitive,
            } => match doc.get(field) {
                Some(Value::String(hay)) if *case_insensitive => {
                    hay.to_lowercase().contains(&needle.to_lowercase())
                }
                Some(Value::String(hay)) => hay.contains(needle.as_str()),
                _ => false,
            },
            Self::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }

    /// Equality constraints that seed a document inserted by an upsert.
    ///
    /// Only top-level `Eq` terms and `Eq` terms nested in `And` contribute;
    /// anything under `Or` is ambiguous and ignored.
    pub fn equality_fields(&self) -> Document {
        let mut seed = Document::new();
        self.collect_equalities(&mut seed);
        seed
    }

    fn collect_equalities(&self, seed: &mut Document) {
        match self {
            Self::Eq(field, value) => {
                seed.insert(field.clone(), value.clone());
            }
            Self::And(filters) => filters.iter().for_each(|f| f.collect_equalities(seed)),
            _ => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Update
// ═══════════════════════════════════════════════════════════════════════

/// Field-level modification applied by [`Collection::update_one`](crate::driver::Collection::update_one).
///
/// On insert the document is built as: filter equalities, then
/// `set_on_insert`, then `set`, then `inc` (starting from zero).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    /// Fields overwritten on every write.
    pub set: Document,
    /// Fields written only when the upsert inserts a new document.
    pub set_on_insert: Document,
    /// Integer fields atomically incremented by the given delta.
    pub inc: BTreeMap<String, i64>,
}

impl Update {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite `field` with `value`.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    /// Overwrite every field present in `fields`.
    pub fn set_all(mut self, fields: Document) -> Self {
        self.set.extend(fields);
        self
    }

    /// Write `fields` only if the document is being created.
    pub fn set_on_insert_all(mut self, fields: Document) -> Self {
        self.set_on_insert.extend(fields);
        self
    }

    /// Increment `field` by `delta`.
    pub fn inc(mut self, field: impl Into<String>, delta: i64) -> Self {
        *self.inc.entry(field.into()).or_insert(0) += delta;
        self
    }

    /// `true` when applying this update to an existing document is a no-op.
    pub fn is_noop_for_existing(&self) -> bool {
        self.set.is_empty() && self.inc.is_empty()
    }

    /// Check every field name referenced by this update.
    pub fn validate(&self) -> StoreResult<()> {
        self.set
            .keys()
            .chain(self.set_on_insert.keys())
            .chain(self.inc.keys())
            .try_for_each(|field| validate_field(field))
    }

    /// Apply the update to `doc` in place.
    pub fn apply(&self, doc: &mut Document, inserting: bool) {
        if inserting {
            for (field, value) in &self.set_on_insert {
                doc.insert(field.clone(), value.clone());
            }
        }
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
        for (field, delta) in &self.inc {
            let current = doc.get(field).and_then(Value::as_i64).unwrap_or(0);
            doc.insert(field.clone(), Value::from(current.saturating_add(*delta)));
        }
    }

    /// Build the document an upsert inserts when nothing matched `filter`.
    pub fn seed(&self, filter: &Filter) -> Document {
        let mut doc = filter.equality_fields();
        self.apply(&mut doc, true);
        doc
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Find options
// ═══════════════════════════════════════════════════════════════════════

/// Sort key for [`Collection::find`](crate::driver::Collection::find).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

/// Ordering and paging for multi-document reads.
///
/// Without a sort, documents come back in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Option<Sort>,
    pub limit: Option<u32>,
}

impl FindOptions {
    /// Sort ascending by `field`.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            sort: Some(Sort {
                field: field.into(),
                descending: false,
            }),
            limit: None,
        }
    }

    /// Sort descending by `field`.
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            sort: Some(Sort {
                field: field.into(),
                descending: true,
            }),
            limit: None,
        }
    }

    /// Cap the number of returned documents.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ── tests ────────────────────────────────────────────────────────────
