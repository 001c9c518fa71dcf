//! # OAuth Token Repository
//!
//! Persistence for OAuth grants, one row per (service, owner).
//!
//! ## Row Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  OAuth callback ──► save_authorization()   INSERT ... ON CONFLICT      │
//! │        │                                    (full row replaced)         │
//! │        ▼                                                                │
//! │  Token refresh  ──► replace_access_token()  single UPDATE of           │
//! │        │                                    access_token + expires_at  │
//! │        ▼                                                                │
//! │  Revoke         ──► delete()                row removed                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! System-level tokens (`owner_id == None`) are stored with owner `''` so the
//! primary key can cover them.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tether_core::{OAuthToken, RemoteService};

const SYSTEM_OWNER: &str = "";

fn owner_key(owner_id: Option<&str>) -> &str {
    owner_id.unwrap_or(SYSTEM_OWNER)
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    service: String,
    owner_id: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TokenRow> for OAuthToken {
    type Error = DbError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let service: RemoteService = row
            .service
            .parse()
            .map_err(|e: tether_core::ValidationError| DbError::Serialization(e.to_string()))?;

        let metadata = match serde_json::from_str::<Value>(&row.metadata)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(OAuthToken {
            service,
            owner_id: (!row.owner_id.is_empty()).then_some(row.owner_id),
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            expires_at: row.expires_at,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for OAuth token rows.
#[derive(Debug, Clone)]
pub struct TokenRepository {
    pool: SqlitePool,
}

impl TokenRepository {
    /// Creates a new TokenRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TokenRepository { pool }
    }

    /// Loads the token for (service, owner).
    pub async fn get(&self, service: RemoteService, owner_id: Option<&str>) -> DbResult<Option<OAuthToken>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT service, owner_id, access_token, refresh_token,
                   expires_at, metadata, created_at, updated_at
            FROM oauth_tokens
            WHERE service = ?1 AND owner_id = ?2
            "#,
        )
        .bind(service.as_str())
        .bind(owner_key(owner_id))
        .fetch_optional(&self.pool)
        .await?;

        row.map(OAuthToken::try_from).transpose()
    }

    /// Stores a freshly authorized grant, replacing any previous row for the
    /// same (service, owner).
    pub async fn save_authorization(&self, token: &OAuthToken) -> DbResult<OAuthToken> {
        debug!(
            service = %token.service,
            owner_id = ?token.owner_id,
            "Saving OAuth authorization"
        );

        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            INSERT INTO oauth_tokens (
                service, owner_id, access_token, refresh_token,
                expires_at, metadata, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT (service, owner_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            RETURNING service, owner_id, access_token, refresh_token,
                      expires_at, metadata, created_at, updated_at
            "#,
        )
        .bind(token.service.as_str())
        .bind(owner_key(token.owner_id.as_deref()))
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(token.expires_at)
        .bind(serde_json::to_string(&token.metadata)?)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        OAuthToken::try_from(row)
    }

    /// Replaces the access token and its expiry in one statement.
    ///
    /// `refresh_token` is written only when `Some` (the remote rotated it);
    /// otherwise the stored refresh token is kept.
    ///
    /// ## Errors
    /// `DbError::NotFound` when the row was revoked in the meantime.
    pub async fn replace_access_token(
        &self,
        service: RemoteService,
        owner_id: Option<&str>,
        access_token: &str,
        expires_at: DateTime<Utc>,
        refresh_token: Option<&str>,
    ) -> DbResult<OAuthToken> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            UPDATE oauth_tokens SET
                access_token = ?3,
                expires_at = ?4,
                refresh_token = COALESCE(?5, refresh_token),
                updated_at = ?6
            WHERE service = ?1 AND owner_id = ?2
            RETURNING service, owner_id, access_token, refresh_token,
                      expires_at, metadata, created_at, updated_at
            "#,
        )
        .bind(service.as_str())
        .bind(owner_key(owner_id))
        .bind(access_token)
        .bind(expires_at)
        .bind(refresh_token)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            DbError::not_found("OAuthToken", format!("{}/{}", service, owner_key(owner_id)))
        })?;

        OAuthToken::try_from(row)
    }

    /// Deletes the row. Returns whether one existed.
    pub async fn delete(&self, service: RemoteService, owner_id: Option<&str>) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM oauth_tokens WHERE service = ?1 AND owner_id = ?2")
            .bind(service.as_str())
            .bind(owner_key(owner_id))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Tokens of a service whose expiry falls before `before`.
    ///
    /// Used to refresh grants ahead of scheduled backfills.
    pub async fn list_expiring(&self, service: RemoteService, before: DateTime<Utc>) -> DbResult<Vec<OAuthToken>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT service, owner_id, access_token, refresh_token,
                   expires_at, metadata, created_at, updated_at
            FROM oauth_tokens
            WHERE service = ?1 AND expires_at < ?2
            ORDER BY expires_at ASC
            "#,
        )
        .bind(service.as_str())
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OAuthToken::try_from).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use serde_json::json;

    fn grant(owner: Option<&str>, access: &str) -> OAuthToken {
        let now = Utc::now();
        let mut metadata = Map::new();
        metadata.insert("organization_id".to_string(), json!("60001234"));
        OAuthToken {
            service: RemoteService::Books,
            owner_id: owner.map(str::to_string),
            access_token: access.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: now + Duration::hours(1),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    async fn repo() -> TokenRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().tokens()
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = repo().await;

        repo.save_authorization(&grant(Some("u1"), "access-1")).await.unwrap();

        let token = repo.get(RemoteService::Books, Some("u1")).await.unwrap().unwrap();
        assert_eq!(token.access_token, "access-1");
        assert_eq!(token.organization_id(), Some("60001234"));
        assert!(repo.get(RemoteService::Crm, Some("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_row_per_service_and_owner() {
        let repo = repo().await;

        repo.save_authorization(&grant(Some("u1"), "first")).await.unwrap();
        repo.save_authorization(&grant(Some("u1"), "second")).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oauth_tokens")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let token = repo.get(RemoteService::Books, Some("u1")).await.unwrap().unwrap();
        assert_eq!(token.access_token, "second");
    }

    #[tokio::test]
    async fn test_system_token_distinct_from_users() {
        let repo = repo().await;

        repo.save_authorization(&grant(None, "system")).await.unwrap();
        repo.save_authorization(&grant(Some("u1"), "user")).await.unwrap();

        let system = repo.get(RemoteService::Books, None).await.unwrap().unwrap();
        assert_eq!(system.access_token, "system");
        assert!(system.owner_id.is_none());
    }

    #[tokio::test]
    async fn test_replace_access_token() {
        let repo = repo().await;
        repo.save_authorization(&grant(Some("u1"), "old")).await.unwrap();

        let expires = Utc::now() + Duration::hours(2);
        let token = repo
            .replace_access_token(RemoteService::Books, Some("u1"), "new", expires, None)
            .await
            .unwrap();
        assert_eq!(token.access_token, "new");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(token.expires_at.timestamp(), expires.timestamp());

        let rotated = repo
            .replace_access_token(RemoteService::Books, Some("u1"), "newer", expires, Some("refresh-2"))
            .await
            .unwrap();
        assert_eq!(rotated.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_replace_missing_row_is_not_found() {
        let repo = repo().await;

        let err = repo
            .replace_access_token(RemoteService::Books, Some("ghost"), "x", Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = repo().await;
        repo.save_authorization(&grant(Some("u1"), "a")).await.unwrap();

        assert!(repo.delete(RemoteService::Books, Some("u1")).await.unwrap());
        assert!(!repo.delete(RemoteService::Books, Some("u1")).await.unwrap());
        assert!(repo.get(RemoteService::Books, Some("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_expiring() {
        let repo = repo().await;
        let mut soon = grant(Some("soon"), "a");
        soon.expires_at = Utc::now() + Duration::minutes(2);
        repo.save_authorization(&soon).await.unwrap();
        repo.save_authorization(&grant(Some("later"), "b")).await.unwrap();

        let expiring = repo
            .list_expiring(RemoteService::Books, Utc::now() + Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].owner_id.as_deref(), Some("soon"));
    }
}
