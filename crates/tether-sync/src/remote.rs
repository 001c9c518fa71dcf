//! # Remote API Client
//!
//! The seam between the sync engine and the third-party SaaS APIs.
//!
//! ## Call Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  list_page      GET  {api_base}/{path}?page=N&per_page=M               │
//! │                 Authorization: Zoho-oauthtoken <access>                 │
//! │                 ──► { "<records_key>": [...],                           │
//! │                       "page_context": { "has_more_page": true } }       │
//! │                                                                         │
//! │  refresh_token  POST {accounts}/oauth/v2/token                          │
//! │                 grant_type=refresh_token                                │
//! │                 ──► { "access_token", "expires_in", ... }               │
//! │                                                                         │
//! │  revoke_token   POST {accounts}/oauth/v2/token/revoke?token=...         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! 401 on a list call is surfaced as [`RemoteError::AuthenticationExpired`];
//! the orchestrator owns the refresh-and-retry decision.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{RemoteSettings, SyncConfig};
use crate::error::{SyncError, SyncResult};
use tether_core::mapping::RemoteResource;
use tether_core::{OAuthToken, RemoteService};

// =============================================================================
// Wire Types
// =============================================================================

/// One page of raw remote records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePage {
    pub records: Vec<Value>,
    /// Whether the remote reports a further page.
    pub has_more: bool,
}

/// Outcome of a successful token exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    /// Present only when the remote rotates refresh tokens.
    pub refresh_token: Option<String>,
    /// Extra fields worth keeping (e.g. `api_domain`).
    pub metadata: Map<String, Value>,
}

impl TokenGrant {
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in)
    }
}

/// Failures of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote answered 401 for the access token.
    #[error("access token rejected")]
    AuthenticationExpired,

    /// The token endpoint refused the grant (revoked or invalid).
    #[error("grant rejected: {0}")]
    InvalidGrant(String),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("{0}")]
    Transport(String),

    #[error("status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    /// Lifts a list-call failure into the engine's error type.
    pub fn into_sync_error(self, service: RemoteService) -> SyncError {
        match self {
            RemoteError::AuthenticationExpired => SyncError::AuthenticationExpired { service },
            RemoteError::InvalidGrant(message) => SyncError::RemoteAuthError { service, message },
            RemoteError::Timeout(secs) => SyncError::Timeout(secs),
            RemoteError::Transport(message) => SyncError::Transport(message),
            RemoteError::Rejected { status, message } => SyncError::RemoteRejected { status, message },
        }
    }
}

// =============================================================================
// Remote Interface
// =============================================================================

/// Everything the engine needs from the remote.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetches page `page` (1-based) of `resource`.
    async fn list_page(
        &self,
        resource: &RemoteResource,
        page: u32,
        page_size: u32,
        token: &OAuthToken,
    ) -> Result<RemotePage, RemoteError>;

    /// Exchanges a refresh token for a new access token.
    async fn refresh_token(&self, service: RemoteService, refresh_token: &str) -> Result<TokenGrant, RemoteError>;

    /// Revokes a token upstream.
    async fn revoke_token(&self, service: RemoteService, token: &str) -> Result<(), RemoteError>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// Longest error body echoed into an error message.
const MAX_ERROR_BODY: usize = 512;

/// [`RemoteApi`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    http: reqwest::Client,
    settings: RemoteSettings,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    api_domain: Option<String>,
    error: Option<String>,
}

impl HttpRemoteClient {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(HttpRemoteClient {
            http,
            settings: config.remote.clone(),
        })
    }

    fn authorization(&self, access_token: &str) -> String {
        format!("{} {}", self.settings.auth_scheme, access_token)
    }

    fn token_url(&self, suffix: &str) -> String {
        format!(
            "{}/oauth/v2/token{}",
            self.settings.accounts_url.trim_end_matches('/'),
            suffix
        )
    }

    fn map_send_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.settings.request_timeout_secs)
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

async fn error_body(resp: reqwest::Response) -> String {
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// Reads the records array and the more-pages flag from a list response.
///
/// Books and Inventory report `page_context.has_more_page`; CRM reports
/// `info.more_records`.
fn parse_page(body: &Value, records_key: &str) -> Result<RemotePage, RemoteError> {
    let records = match body.get(records_key) {
        Some(Value::Array(items)) => items.clone(),
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            return Err(RemoteError::Transport(format!(
                "field '{}' in list response is not an array",
                records_key
            )))
        }
    };

    let has_more = body
        .pointer("/page_context/has_more_page")
        .or_else(|| body.pointer("/info/more_records"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(RemotePage { records, has_more })
}

#[async_trait]
impl RemoteApi for HttpRemoteClient {
    #[instrument(level = "debug", skip(self, token), fields(path = %resource.path))]
    async fn list_page(
        &self,
        resource: &RemoteResource,
        page: u32,
        page_size: u32,
        token: &OAuthToken,
    ) -> Result<RemotePage, RemoteError> {
        let url = format!(
            "{}/{}",
            self.settings.api_base(resource.service),
            resource.path.trim_start_matches('/')
        );

        let mut query = vec![
            ("page", page.to_string()),
            ("per_page", page_size.to_string()),
        ];
        if let Some(org) = token.organization_id() {
            query.push(("organization_id", org.to_string()));
        }

        let resp = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.authorization(&token.access_token))
            .query(&query)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RemoteError::AuthenticationExpired);
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(RemotePage::default());
        }
        if !status.is_success() {
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message: error_body(resp).await,
            });
        }

        let body: Value = resp.json().await.map_err(|e| self.map_send_error(e))?;
        let page = parse_page(&body, &resource.records_key)?;
        debug!(records = page.records.len(), has_more = page.has_more, "Fetched page");
        Ok(page)
    }

    #[instrument(level = "debug", skip_all, fields(%service))]
    async fn refresh_token(&self, service: RemoteService, refresh_token: &str) -> Result<TokenGrant, RemoteError> {
        let form = [
            ("refresh_token", refresh_token),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let resp = self
            .http
            .post(self.token_url(""))
            .form(&form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if status.is_client_error() {
            return Err(RemoteError::InvalidGrant(error_body(resp).await));
        }
        if !status.is_success() {
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message: error_body(resp).await,
            });
        }

        // The token endpoint reports a bad grant as 200 with an `error` field.
        let body: TokenResponse = resp.json().await.map_err(|e| self.map_send_error(e))?;
        if let Some(error) = body.error {
            return Err(RemoteError::InvalidGrant(error));
        }
        let access_token = body
            .access_token
            .ok_or_else(|| RemoteError::Transport("token response without access_token".into()))?;

        let mut metadata = Map::new();
        if let Some(domain) = body.api_domain {
            metadata.insert("api_domain".to_string(), Value::String(domain));
        }

        let expires_in = body.expires_in.unwrap_or(3600);
        debug!(%service, expires_in, rotated = body.refresh_token.is_some(), "Token endpoint issued access token");

        Ok(TokenGrant {
            access_token,
            expires_in,
            refresh_token: body.refresh_token,
            metadata,
        })
    }

    #[instrument(level = "debug", skip_all, fields(%service))]
    async fn revoke_token(&self, service: RemoteService, token: &str) -> Result<(), RemoteError> {
        let resp = self
            .http
            .post(self.token_url("/revoke"))
            .query(&[("token", token)])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if status.is_success() {
            debug!(%service, "Token revoked");
            Ok(())
        } else {
            Err(RemoteError::Rejected {
                status: status.as_u16(),
                message: error_body(resp).await,
            })
        }
    }
}

// =============================================================================
// Test Double
// =============================================================================

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory remote for engine tests.

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    type PageHook = Box<dyn Fn(u32) + Send + Sync>;

    /// Serves `records` in pages of the requested size.
    #[derive(Default)]
    pub struct MockRemote {
        records: Mutex<Vec<Value>>,
        failures: Mutex<HashMap<u32, RemoteError>>,
        rejected_tokens: Mutex<HashSet<String>>,
        refresh_results: Mutex<Vec<Result<TokenGrant, RemoteError>>>,
        refresh_delay: Mutex<Option<std::time::Duration>>,
        list_delay: Mutex<Option<std::time::Duration>>,
        on_page: Mutex<Option<PageHook>>,
        revoke_fails: AtomicBool,
        pub list_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
        pub revoke_calls: AtomicUsize,
        pub seen_tokens: Mutex<Vec<String>>,
    }

    impl MockRemote {
        pub fn with_records(records: Vec<Value>) -> Self {
            let mock = MockRemote::default();
            *mock.records.lock().unwrap() = records;
            mock
        }

        /// Page `page` fails with `err` on every attempt.
        pub fn fail_page(&self, page: u32, err: RemoteError) {
            self.failures.lock().unwrap().insert(page, err);
        }

        /// The remote answers 401 whenever `access_token` is presented.
        pub fn reject_token(&self, access_token: &str) {
            self.rejected_tokens.lock().unwrap().insert(access_token.to_string());
        }

        /// Queues the outcome of the next refresh call.
        pub fn push_refresh(&self, result: Result<TokenGrant, RemoteError>) {
            self.refresh_results.lock().unwrap().push(result);
        }

        pub fn set_refresh_delay(&self, delay: std::time::Duration) {
            *self.refresh_delay.lock().unwrap() = Some(delay);
        }

        pub fn set_list_delay(&self, delay: std::time::Duration) {
            *self.list_delay.lock().unwrap() = Some(delay);
        }

        /// Runs `hook(page)` after each page is served.
        pub fn on_page(&self, hook: impl Fn(u32) + Send + Sync + 'static) {
            *self.on_page.lock().unwrap() = Some(Box::new(hook));
        }

        pub fn fail_revoke(&self) {
            self.revoke_fails.store(true, Ordering::SeqCst);
        }
    }

    pub fn grant(access_token: &str) -> TokenGrant {
        TokenGrant {
            access_token: access_token.to_string(),
            expires_in: 3600,
            refresh_token: None,
            metadata: Map::new(),
        }
    }

    #[async_trait]
    impl RemoteApi for MockRemote {
        async fn list_page(
            &self,
            _resource: &RemoteResource,
            page: u32,
            page_size: u32,
            token: &OAuthToken,
        ) -> Result<RemotePage, RemoteError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_tokens.lock().unwrap().push(token.access_token.clone());

            let delay = *self.list_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.rejected_tokens.lock().unwrap().contains(&token.access_token) {
                return Err(RemoteError::AuthenticationExpired);
            }
            if let Some(err) = self.failures.lock().unwrap().get(&page) {
                return Err(err.clone());
            }

            let records = self.records.lock().unwrap();
            let size = page_size as usize;
            let start = (page as usize - 1) * size;
            let end = (start + size).min(records.len());
            let slice = if start < records.len() {
                records[start..end].to_vec()
            } else {
                Vec::new()
            };
            let result = RemotePage {
                records: slice,
                has_more: end < records.len(),
            };
            drop(records);

            if let Some(hook) = self.on_page.lock().unwrap().as_ref() {
                hook(page);
            }
            Ok(result)
        }

        async fn refresh_token(&self, _service: RemoteService, _refresh_token: &str) -> Result<TokenGrant, RemoteError> {
            let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

            let delay = *self.refresh_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut queued = self.refresh_results.lock().unwrap();
            if queued.is_empty() {
                Ok(grant(&format!("refreshed-{}", call)))
            } else {
                queued.remove(0)
            }
        }

        async fn revoke_token(&self, _service: RemoteService, _token: &str) -> Result<(), RemoteError> {
            self.revoke_calls.fetch_add(1, Ordering::SeqCst);
            if self.revoke_fails.load(Ordering::SeqCst) {
                Err(RemoteError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_books_page() {
        let body = json!({
            "code": 0,
            "contacts": [{"contact_id": "1"}, {"contact_id": "2"}],
            "page_context": {"page": 1, "per_page": 2, "has_more_page": true}
        });

        let page = parse_page(&body, "contacts").unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.has_more);
    }

    #[test]
    fn test_parse_crm_page() {
        let body = json!({
            "data": [{"id": "99"}],
            "info": {"more_records": false}
        });

        let page = parse_page(&body, "data").unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(!page.has_more);
    }

    #[test]
    fn test_parse_missing_records_is_empty_last_page() {
        let page = parse_page(&json!({"code": 0}), "items").unwrap();
        assert_eq!(page, RemotePage::default());

        let err = parse_page(&json!({"items": {"oops": 1}}), "items").unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)));
    }

    #[test]
    fn test_remote_error_mapping() {
        let service = RemoteService::Inventory;
        assert!(matches!(
            RemoteError::AuthenticationExpired.into_sync_error(service),
            SyncError::AuthenticationExpired { .. }
        ));
        assert!(RemoteError::InvalidGrant("invalid_code".into())
            .into_sync_error(service)
            .is_terminal_auth());
        assert!(matches!(
            RemoteError::Timeout(30).into_sync_error(service),
            SyncError::Timeout(30)
        ));
    }

    #[test]
    fn test_grant_expiry() {
        let now = Utc::now();
        let grant = mock::grant("a");
        assert_eq!(grant.expires_at(now), now + Duration::seconds(3600));
    }

    #[test]
    fn test_client_builds_from_config() {
        let config = SyncConfig::default();
        let client = HttpRemoteClient::new(&config).unwrap();
        assert_eq!(client.authorization("abc"), "Zoho-oauthtoken abc");
        assert_eq!(
            client.token_url("/revoke"),
            "https://accounts.zoho.com/oauth/v2/token/revoke"
        );
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint_is_transport_error() {
        let mut config = SyncConfig::default();
        config.remote.accounts_url = "http://127.0.0.1:9".to_string();
        config.remote.request_timeout_secs = 2;
        let client = HttpRemoteClient::new(&config).unwrap();

        let refresh = client.refresh_token(RemoteService::Books, "r").await.unwrap_err();
        assert!(matches!(refresh, RemoteError::Transport(_) | RemoteError::Timeout(_)));

        let revoke = client.revoke_token(RemoteService::Books, "t").await.unwrap_err();
        assert!(matches!(revoke, RemoteError::Transport(_) | RemoteError::Timeout(_)));
    }
}
