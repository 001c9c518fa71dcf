//! # Record Repository
//!
//! Generic storage for mapped records, keyed by (table, conflict value).
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  synced_records                                                         │
//! │  ┌────────────┬────────────┬──────────────────────────────┬──────────┐ │
//! │  │ table_name │ record_key │ payload (JSON object)        │ updated  │ │
//! │  ├────────────┼────────────┼──────────────────────────────┼──────────┤ │
//! │  │ items      │ 4600001    │ {"item_id":"4600001",...}    │ ...      │ │
//! │  │ items      │ 4600002    │ {"item_id":"4600002",...}    │ ...      │ │
//! │  │ contacts   │ 9100017    │ {"contact_id":"9100017",...} │ ...      │ │
//! │  └────────────┴────────────┴──────────────────────────────┴──────────┘ │
//! │          UNIQUE (table_name, record_key) ← upsert conflict target      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Upsert Semantics
//! - New key: the record is inserted as-is.
//! - Existing key: columns present in the new record replace stored ones,
//!   columns absent from it are kept. An explicit `null` overwrites.
//!
//! Filters and ordering run against `json_extract(payload, '$.<column>')`.
//! Column names are checked with [`validate_identifier`] before they reach SQL.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tether_core::validation::validate_identifier;
use tether_core::StorageRecord;

// =============================================================================
// Query Types
// =============================================================================

/// Comparison applied by a [`FieldFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
}

impl FilterOp {
    fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        }
    }
}

/// One predicate on a record column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldFilter {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldFilter {
            column: column.into(),
            op: FilterOp::Gte,
            value: value.into(),
        }
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldFilter {
            column: column.into(),
            op: FilterOp::Lte,
            value: value.into(),
        }
    }
}

/// Sort key for [`RecordQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// Parameters of [`RecordStore::select`]. All filters are ANDed.
///
/// ## Example
/// ```rust,ignore
/// let query = RecordQuery::new()
///     .filter(FieldFilter::gte("date", "2024-01-01"))
///     .order_by("date", false)
///     .limit(500);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u32>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

// =============================================================================
// Storage Interface
// =============================================================================

/// The storage primitives the sync engine consumes.
///
/// [`RecordRepository`] is the SQLite implementation; tests may substitute
/// their own.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// First record of `table` matching every filter, if any.
    async fn get_single(&self, table: &str, filters: &[FieldFilter]) -> DbResult<Option<StorageRecord>>;

    /// Inserts `record`, or merges it into the stored record with the same
    /// `conflict_column` value. Returns the stored result.
    async fn upsert(
        &self,
        table: &str,
        record: &StorageRecord,
        conflict_column: &str,
    ) -> DbResult<StorageRecord>;

    /// Records of `table` matching `query`.
    async fn select(&self, table: &str, query: &RecordQuery) -> DbResult<Vec<StorageRecord>>;
}

// =============================================================================
// SQLite Implementation
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct PayloadRow {
    payload: String,
}

/// SQLite-backed [`RecordStore`].
#[derive(Debug, Clone)]
pub struct RecordRepository {
    pool: SqlitePool,
}

impl RecordRepository {
    /// Creates a new RecordRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecordRepository { pool }
    }

    /// Number of stored records in `table`.
    pub async fn count(&self, table: &str) -> DbResult<i64> {
        check_identifier("table", table)?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM synced_records WHERE table_name = ?1")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Deletes every record of `table`. Returns the number removed.
    pub async fn clear(&self, table: &str) -> DbResult<u64> {
        check_identifier("table", table)?;

        let result = sqlx::query("DELETE FROM synced_records WHERE table_name = ?1")
            .bind(table)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn build_select<'a>(
        table: &'a str,
        filters: &'a [FieldFilter],
        order_by: Option<&'a OrderBy>,
        limit: Option<u32>,
    ) -> DbResult<QueryBuilder<'a, Sqlite>> {
        check_identifier("table", table)?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT payload FROM synced_records WHERE table_name = ");
        qb.push_bind(table);

        for filter in filters {
            check_identifier("column", &filter.column)?;
            qb.push(" AND json_extract(payload, ");
            qb.push_bind(json_path(&filter.column));
            qb.push(")");

            if filter.value.is_null() {
                // NULL never compares equal; only Eq has a meaning here.
                if filter.op != FilterOp::Eq {
                    return Err(DbError::QueryFailed(format!(
                        "cannot compare '{}' {} null",
                        filter.column,
                        filter.op.as_sql()
                    )));
                }
                qb.push(" IS NULL");
                continue;
            }

            qb.push(" ").push(filter.op.as_sql()).push(" ");
            push_json_bind(&mut qb, &filter.value)?;
        }

        match order_by {
            Some(order) => {
                check_identifier("column", &order.column)?;
                qb.push(" ORDER BY json_extract(payload, ");
                qb.push_bind(json_path(&order.column));
                qb.push(if order.descending { ") DESC, id DESC" } else { ") ASC, id ASC" });
            }
            None => {
                qb.push(" ORDER BY id ASC");
            }
        }

        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(i64::from(limit));
        }

        Ok(qb)
    }
}

#[async_trait]
impl RecordStore for RecordRepository {
    async fn get_single(&self, table: &str, filters: &[FieldFilter]) -> DbResult<Option<StorageRecord>> {
        let mut qb = Self::build_select(table, filters, None, Some(1))?;

        let row = qb
            .build_query_as::<PayloadRow>()
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_payload(&row.payload)).transpose()
    }

    async fn upsert(
        &self,
        table: &str,
        record: &StorageRecord,
        conflict_column: &str,
    ) -> DbResult<StorageRecord> {
        check_identifier("table", table)?;
        check_identifier("column", conflict_column)?;

        let key = record
            .get(conflict_column)
            .and_then(conflict_key)
            .ok_or_else(|| DbError::MissingConflictKey {
                table: table.to_string(),
                column: conflict_column.to_string(),
            })?;

        // Take the write lock up front. A deferred transaction that reads
        // first cannot upgrade once another writer has committed.
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM synced_records WHERE table_name = ?1 AND record_key = ?2",
        )
        .bind(table)
        .bind(&key)
        .fetch_optional(&mut *tx)
        .await?;

        let merged = match existing {
            Some(payload) => {
                let mut stored = decode_payload(&payload)?;
                for (column, value) in record {
                    stored.insert(column.clone(), value.clone());
                }
                stored
            }
            None => record.clone(),
        };

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO synced_records (table_name, record_key, payload, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (table_name, record_key) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(table)
        .bind(&key)
        .bind(serde_json::to_string(&merged)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(table = %table, key = %key, "Record upserted");

        Ok(merged)
    }

    async fn select(&self, table: &str, query: &RecordQuery) -> DbResult<Vec<StorageRecord>> {
        let mut qb = Self::build_select(table, &query.filters, query.order_by.as_ref(), query.limit)?;

        let rows = qb
            .build_query_as::<PayloadRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| decode_payload(&row.payload)).collect()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn check_identifier(field: &str, name: &str) -> DbResult<()> {
    validate_identifier(field, name).map_err(|e| DbError::InvalidIdentifier(e.to_string()))
}

fn json_path(column: &str) -> String {
    format!("$.{}", column)
}

/// String form of a conflict value. Only non-empty strings and numbers key
/// a record.
fn conflict_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Binds a JSON scalar the way `json_extract` returns it.
fn push_json_bind(qb: &mut QueryBuilder<'_, Sqlite>, value: &Value) -> DbResult<()> {
    match value {
        Value::String(s) => {
            qb.push_bind(s.clone());
        }
        Value::Bool(b) => {
            qb.push_bind(i64::from(*b));
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                qb.push_bind(i);
            }
            None => {
                qb.push_bind(n.as_f64().unwrap_or_default());
            }
        },
        other => {
            return Err(DbError::QueryFailed(format!(
                "cannot filter on non-scalar value {}",
                other
            )))
        }
    }
    Ok(())
}

fn decode_payload(payload: &str) -> DbResult<StorageRecord> {
    match serde_json::from_str::<Value>(payload)? {
        Value::Object(map) => Ok(map),
        other => Err(DbError::Serialization(format!(
            "stored payload is not an object: {}",
            other
        ))),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
