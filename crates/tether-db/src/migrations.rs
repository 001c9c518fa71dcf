//! # Schema Migrations
//!
//! The store's schema is a short sequence of embedded SQL files applied on
//! connect.
//!
//! ```text
//! migrations/sqlite/
//! └── 001_initial_schema.sql   synced_records, oauth_tokens
//! ```
//!
//! Applied versions are tracked by sqlx in `_sqlx_migrations`. Files are
//! append-only: a shipped migration is never edited, a new one is added.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

/// Tables the engine cannot run without.
pub const REQUIRED_TABLES: &[&str] = &["synced_records", "oauth_tokens"];

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applied vs. embedded migration counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub embedded: usize,
    pub applied: usize,
}

impl MigrationStatus {
    pub fn pending(&self) -> usize {
        self.embedded.saturating_sub(self.applied)
    }

    pub fn is_current(&self) -> bool {
        self.pending() == 0
    }
}

/// Applies every pending migration. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let before = migration_status(pool).await?;
    if before.is_current() {
        debug!(applied = before.applied, "Schema up to date");
        return Ok(());
    }

    MIGRATOR.run(pool).await?;
    info!(applied = before.pending(), total = before.embedded, "Schema migrated");
    Ok(())
}

/// Reads how many embedded migrations have been applied.
///
/// A database that was never migrated reports zero applied.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<MigrationStatus> {
    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;

    let applied: i64 = if tracked == 0 {
        0
    } else {
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?
    };

    Ok(MigrationStatus {
        embedded: MIGRATOR.migrations.len(),
        applied: usize::try_from(applied).unwrap_or_default(),
    })
}

/// Names from [`REQUIRED_TABLES`] that do not exist.
pub async fn missing_tables(pool: &SqlitePool) -> DbResult<Vec<&'static str>> {
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        let found: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")
                .bind(table)
                .fetch_one(pool)
                .await?;
        if found == 0 {
            missing.push(*table);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_fresh_database_has_nothing_applied() {
        let db = Database::new(DbConfig::in_memory().run_migrations(false)).await.unwrap();

        let status = migration_status(db.pool()).await.unwrap();
        assert_eq!(status.applied, 0);
        assert!(status.pending() >= 1);
        assert_eq!(missing_tables(db.pool()).await.unwrap(), REQUIRED_TABLES.to_vec());
    }

    #[tokio::test]
    async fn test_run_twice_is_noop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        run_migrations(db.pool()).await.unwrap();
        let status = migration_status(db.pool()).await.unwrap();
        assert!(status.is_current());
        assert!(missing_tables(db.pool()).await.unwrap().is_empty());
    }
}
