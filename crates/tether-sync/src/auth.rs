//! # OAuth Auth Service
//!
//! Keeps one usable access token per (service, owner), refreshing through the
//! remote token endpoint and persisting every result.
//!
//! ## Refresh Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  valid_access_token(service, owner)                                     │
//! │        │                                                                │
//! │        ├── stored token outside refresh margin ──► return it            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  refresh_access_token(service, owner)                                   │
//! │        │                                                                │
//! │        ├── refresh already in flight? ──► await the same future         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  load refresh token ──► POST token endpoint ──► replace_access_token    │
//! │                                                  (one UPDATE)           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concurrent callers for the same key share one upstream refresh. Callers
//! for different keys never wait on each other.

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteApi, RemoteError, TokenGrant};
use tether_core::{OAuthToken, RemoteService};
use tether_db::{DbError, TokenRepository};

type RefreshKey = (RemoteService, Option<String>);
type SharedRefresh = Shared<BoxFuture<'static, SyncResult<OAuthToken>>>;

/// Token lifecycle for every remote service.
pub struct AuthService {
    tokens: TokenRepository,
    remote: Arc<dyn RemoteApi>,
    refresh_margin: chrono::Duration,
    request_timeout: Duration,
    in_flight: Mutex<HashMap<RefreshKey, SharedRefresh>>,
}

impl AuthService {
    pub fn new(tokens: TokenRepository, remote: Arc<dyn RemoteApi>) -> Self {
        AuthService {
            tokens,
            remote,
            refresh_margin: chrono::Duration::seconds(tether_core::DEFAULT_REFRESH_MARGIN_SECS),
            request_timeout: Duration::from_secs(30),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(tokens: TokenRepository, remote: Arc<dyn RemoteApi>, config: &SyncConfig) -> Self {
        AuthService::new(tokens, remote)
            .with_refresh_margin(config.refresh_margin())
            .with_request_timeout(config.request_timeout())
    }

    pub fn with_refresh_margin(mut self, margin: chrono::Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    // =========================================================================
    // Token Access
    // =========================================================================

    /// Stored token for (service, owner), as-is.
    pub async fn get_token(&self, service: RemoteService, owner_id: Option<&str>) -> SyncResult<Option<OAuthToken>> {
        Ok(self.tokens.get(service, owner_id).await?)
    }

    /// Token safe to use right now, refreshed first when it is within the
    /// refresh margin of expiry.
    ///
    /// ## Errors
    /// `NoRefreshTokenAvailable` when nothing is stored for the pair.
    pub async fn valid_access_token(&self, service: RemoteService, owner_id: Option<&str>) -> SyncResult<OAuthToken> {
        let token = self
            .tokens
            .get(service, owner_id)
            .await?
            .ok_or_else(|| no_refresh_token(service, owner_id))?;

        if token.needs_refresh(self.refresh_margin) {
            debug!(
                %service,
                owner_id = ?owner_id,
                remaining_secs = token.remaining_secs(),
                "Token within refresh margin"
            );
            return self.refresh_access_token(service, owner_id).await;
        }

        Ok(token)
    }

    /// Replaces `token` with a refreshed one once it has crossed the refresh
    /// margin. Returns whether a refresh happened.
    ///
    /// Long runs call this before every remote request so the token never
    /// ages past the margin mid-run.
    pub async fn ensure_fresh(&self, token: &mut OAuthToken) -> SyncResult<bool> {
        if !token.needs_refresh(self.refresh_margin) {
            return Ok(false);
        }

        debug!(
            service = %token.service,
            owner_id = ?token.owner_id,
            remaining_secs = token.remaining_secs(),
            "Token crossed refresh margin mid-run"
        );
        let refreshed = self
            .refresh_access_token(token.service, token.owner_id.as_deref())
            .await?;
        *token = refreshed;
        Ok(true)
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        self.refresh_margin
    }

    /// Persists a grant obtained from the interactive OAuth flow.
    pub async fn store_authorization(
        &self,
        service: RemoteService,
        owner_id: Option<&str>,
        grant: TokenGrant,
        mut metadata: Map<String, Value>,
    ) -> SyncResult<OAuthToken> {
        let now = Utc::now();
        metadata.extend(grant.metadata.clone());

        let token = OAuthToken {
            service,
            owner_id: owner_id.map(str::to_string),
            expires_at: grant.expires_at(now),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            metadata,
            created_at: now,
            updated_at: now,
        };

        let saved = self.tokens.save_authorization(&token).await?;
        info!(%service, owner_id = ?owner_id, "Stored OAuth authorization");
        Ok(saved)
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Exchanges the stored refresh token for a new access token and persists
    /// it.
    ///
    /// Concurrent calls for the same (service, owner) share one upstream
    /// request and all observe the same outcome.
    ///
    /// ## Errors
    /// - `NoRefreshTokenAvailable`: no row, or the row has no refresh token
    /// - `RemoteAuthError`: the remote refused the grant
    /// - `Transport` / `Timeout`: the token endpoint was unreachable
    pub async fn refresh_access_token(&self, service: RemoteService, owner_id: Option<&str>) -> SyncResult<OAuthToken> {
        let key: RefreshKey = (service, owner_id.map(str::to_string));

        let refresh = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(pending) if pending.peek().is_none() => {
                    debug!(%service, owner_id = ?owner_id, "Joining in-flight refresh");
                    pending.clone()
                }
                // No entry, or a finished one left by a caller that was
                // dropped before it could clean up.
                _ => {
                    let fut = refresh_once(
                        self.tokens.clone(),
                        Arc::clone(&self.remote),
                        self.request_timeout,
                        service,
                        key.1.clone(),
                    )
                    .boxed()
                    .shared();
                    in_flight.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        let result = refresh.await;

        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(&key)
            .is_some_and(|current| current.peek().is_some())
        {
            in_flight.remove(&key);
        }

        result
    }

    /// Refreshes every token of `service` that is inside the refresh margin.
    ///
    /// Run before a scheduled backfill. Failures for one owner are logged and
    /// do not stop the sweep. Returns how many tokens were refreshed.
    pub async fn refresh_expiring(&self, service: RemoteService) -> SyncResult<usize> {
        let expiring = self
            .tokens
            .list_expiring(service, Utc::now() + self.refresh_margin)
            .await?;

        let mut refreshed = 0;
        for token in &expiring {
            match self.refresh_access_token(service, token.owner_id.as_deref()).await {
                Ok(_) => refreshed += 1,
                Err(e) => warn!(%service, owner_id = ?token.owner_id, error = %e, "Skipping token in sweep"),
            }
        }

        info!(%service, expiring = expiring.len(), refreshed, "Refresh sweep finished");
        Ok(refreshed)
    }

    // =========================================================================
    // Revoke
    // =========================================================================

    /// Revokes the grant upstream and deletes it locally.
    ///
    /// The remote call is best-effort: when it fails the failure is logged and
    /// the local row is still removed. Returns whether a row existed.
    pub async fn revoke_token(&self, service: RemoteService, owner_id: Option<&str>) -> SyncResult<bool> {
        let Some(token) = self.tokens.get(service, owner_id).await? else {
            debug!(%service, owner_id = ?owner_id, "Nothing to revoke");
            return Ok(false);
        };

        let upstream = token.refresh_token.as_deref().unwrap_or(&token.access_token);
        match tokio::time::timeout(self.request_timeout, self.remote.revoke_token(service, upstream)).await {
            Ok(Ok(())) => debug!(%service, "Token revoked upstream"),
            Ok(Err(e)) => warn!(?e, %service, "Failed to revoke token on remote"),
            Err(_) => warn!(%service, "Timed out revoking token on remote"),
        }

        let deleted = self.tokens.delete(service, owner_id).await?;
        info!(%service, owner_id = ?owner_id, "OAuth authorization removed");
        Ok(deleted)
    }
}

fn no_refresh_token(service: RemoteService, owner_id: Option<&str>) -> SyncError {
    SyncError::NoRefreshTokenAvailable {
        service,
        owner: owner_id.unwrap_or("<system>").to_string(),
    }
}

/// One upstream refresh. Runs detached from any single caller.
async fn refresh_once(
    tokens: TokenRepository,
    remote: Arc<dyn RemoteApi>,
    request_timeout: Duration,
    service: RemoteService,
    owner_id: Option<String>,
) -> SyncResult<OAuthToken> {
    let owner = owner_id.as_deref();

    let refresh_token = tokens
        .get(service, owner)
        .await?
        .and_then(|token| token.refresh_token)
        .ok_or_else(|| no_refresh_token(service, owner))?;

    info!(%service, owner_id = ?owner, "Refreshing access token");

    let grant = match tokio::time::timeout(request_timeout, remote.refresh_token(service, &refresh_token)).await {
        Ok(Ok(grant)) => grant,
        Ok(Err(e)) => {
            warn!(%service, owner_id = ?owner, error = %e, "Token refresh failed");
            return Err(match e {
                RemoteError::AuthenticationExpired => SyncError::RemoteAuthError {
                    service,
                    message: "refresh token rejected".to_string(),
                },
                RemoteError::Rejected { status, message } if (400..500).contains(&status) => {
                    SyncError::RemoteAuthError { service, message }
                }
                other => other.into_sync_error(service),
            });
        }
        Err(_) => return Err(SyncError::Timeout(request_timeout.as_secs())),
    };

    let expires_at = grant.expires_at(Utc::now());
    let updated = tokens
        .replace_access_token(
            service,
            owner,
            &grant.access_token,
            expires_at,
            grant.refresh_token.as_deref(),
        )
        .await
        .map_err(|e| match e {
            // Revoked while the refresh was in flight.
            DbError::NotFound { .. } => no_refresh_token(service, owner),
            other => other.into(),
        })?;

    debug!(%service, owner_id = ?owner, expires_at = %updated.expires_at, "Access token refreshed");
    Ok(updated)
}

// =============================================================================
// Unit Tests
// =============================================================================
