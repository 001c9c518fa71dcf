//! # Domain Types
//!
//! Core domain types shared by the storage and sync layers.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  OAuthToken     │   │ SyncRunSnapshot │   │   SyncReport    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  service        │   │  owner_id       │   │  success        │       │
//! │  │  owner_id?      │   │  current_page   │   │  synced/total   │       │
//! │  │  access_token   │   │  stop_requested │   │  errors[]       │       │
//! │  │  expires_at     │   │  counts         │   │  summary        │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │ RemoteService   │   │   SyncCounts    │                             │
//! │  │  Inventory      │   │  seen           │                             │
//! │  │  Books          │   │  transformed    │                             │
//! │  │  Crm            │   │  upserted       │                             │
//! │  └─────────────────┘   │  errors         │                             │
//! │                        └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Remote Service
// =============================================================================

/// One of the remote SaaS API's services. Each has its own API base URL and
/// its own OAuth grant per owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RemoteService {
    /// Items, stock and sales orders.
    Inventory,
    /// Contacts, invoices and accounting documents.
    Books,
    /// Accounts, leads and deals.
    Crm,
}

impl RemoteService {
    /// All services, in declaration order.
    pub const ALL: [RemoteService; 3] = [
        RemoteService::Inventory,
        RemoteService::Books,
        RemoteService::Crm,
    ];

    /// Stable string used as the storage discriminator.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RemoteService::Inventory => "inventory",
            RemoteService::Books => "books",
            RemoteService::Crm => "crm",
        }
    }
}

impl std::fmt::Display for RemoteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RemoteService {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inventory" => Ok(RemoteService::Inventory),
            "books" => Ok(RemoteService::Books),
            "crm" => Ok(RemoteService::Crm),
            other => Err(ValidationError::InvalidFormat {
                field: "service".to_string(),
                reason: format!("unknown service '{}'", other),
            }),
        }
    }
}

// =============================================================================
// OAuth Token
// =============================================================================

/// A stored OAuth grant for one (service, owner) pair.
///
/// `owner_id == None` marks a system-level token shared by background jobs.
/// At most one row exists per (service, owner).
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub service: RemoteService,
    pub owner_id: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Service-specific extras (e.g. the remote organization id).
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthToken {
    /// True once `now + margin` reaches the literal expiry.
    ///
    /// The margin absorbs clock skew and in-flight request latency so the
    /// token is refreshed before the remote starts answering 401.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }

    /// [`needs_refresh_at`](Self::needs_refresh_at) against the wall clock.
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        self.needs_refresh_at(Utc::now(), margin)
    }

    /// True once the literal expiry has passed (no grace period).
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Remaining validity in whole seconds, zero when expired.
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Remote organization id, when the grant carries one.
    pub fn organization_id(&self) -> Option<&str> {
        self.metadata.get("organization_id").and_then(Value::as_str)
    }
}

// Secrets never reach logs through `{:?}`.
impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("service", &self.service)
            .field("owner_id", &self.owner_id)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("metadata", &self.metadata)
            .finish()
    }
}

// =============================================================================
// Sync Counts
// =============================================================================

/// Running counters for one sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncCounts {
    /// Records returned by the remote (parents and children).
    pub seen: u64,
    /// Records that passed transform and validation.
    pub transformed: u64,
    /// Records written to storage.
    pub upserted: u64,
    /// Records rejected (transform, validation or per-record write errors).
    pub errors: u64,
}

// =============================================================================
// Sync Run Snapshot
// =============================================================================

/// Read-only projection of an in-flight sync, served to polling UIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncRunSnapshot {
    pub run_id: String,
    pub owner_id: String,
    /// Storage table being synced, once the orchestrator has attached it.
    pub table: Option<String>,
    #[ts(as = "String")]
    pub started_at: DateTime<Utc>,
    /// Page currently being processed (or last processed).
    pub current_page: u32,
    pub stop_requested: bool,
    pub counts: SyncCounts,
}

// =============================================================================
// Sync Report
// =============================================================================

/// Error descriptor for one rejected record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RecordError {
    /// Value of the remote unique key, `"<unknown>"` when absent.
    pub remote_id: String,
    pub message: String,
}

impl RecordError {
    pub fn new(remote_id: impl Into<String>, message: impl Into<String>) -> Self {
        RecordError {
            remote_id: remote_id.into(),
            message: message.into(),
        }
    }
}

/// Immutable summary of one sync, returned to the caller.
///
/// `success == false` only when a fatal error (transport, auth) aborted the
/// run. Rejected records downgrade completeness, not success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncReport {
    pub success: bool,
    /// True when the run ended early on a stop request.
    pub stopped: bool,
    /// Records upserted.
    pub synced_count: u64,
    /// Records seen on the remote.
    pub total_count: u64,
    /// Records that passed transform and validation.
    pub transformed_count: u64,
    pub errors: Vec<RecordError>,
    pub pages_processed: u32,
    /// Last page fully committed, if any.
    pub last_page: Option<u32>,
    /// Cause of a non-success outcome.
    pub fatal_error: Option<String>,
    pub summary: String,
}

/// How a sync run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEnd {
    /// Remote exhausted or page limit reached.
    Completed,
    /// Stop request honored at a page boundary.
    Stopped,
    /// Fatal error; partial progress preserved.
    Failed(String),
}

impl SyncReport {
    /// Builds the report and its human-readable summary.
    pub fn finish(
        table: &str,
        counts: SyncCounts,
        errors: Vec<RecordError>,
        pages_processed: u32,
        last_page: Option<u32>,
        end: SyncEnd,
    ) -> Self {
        let mut summary = format!(
            "{}: synced {}/{} records ({} transformed, {} errors) across {} page(s)",
            table,
            counts.upserted,
            counts.seen,
            counts.transformed,
            counts.errors,
            pages_processed
        );

        let (success, stopped, fatal_error) = match end {
            SyncEnd::Completed => (true, false, None),
            SyncEnd::Stopped => {
                summary.push_str(&match last_page {
                    Some(page) => format!("; stopped on request after page {}", page),
                    None => "; stopped on request before the first page".to_string(),
                });
                (true, true, None)
            }
            SyncEnd::Failed(reason) => {
                summary.push_str(&format!("; aborted: {}", reason));
                (false, false, Some(reason))
            }
        };

        SyncReport {
            success,
            stopped,
            synced_count: counts.upserted,
            total_count: counts.seen,
            transformed_count: counts.transformed,
            errors,
            pages_processed,
            last_page,
            fatal_error,
            summary,
        }
    }

    /// True when every seen record was written.
    pub fn is_complete(&self) -> bool {
        self.success && !self.stopped && self.errors.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in_secs: i64) -> OAuthToken {
        let now = Utc::now();
        OAuthToken {
            service: RemoteService::Inventory,
            owner_id: Some("owner-1".to_string()),
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_at: now + Duration::seconds(expires_in_secs),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_token_needs_refresh_inside_margin() {
        let token = token(60);
        assert!(token.needs_refresh(Duration::seconds(300)));
        assert!(!token.is_expired());
    }

    #[test]
    fn test_token_no_refresh_needed() {
        let token = token(3600);
        assert!(!token.needs_refresh(Duration::seconds(300)));
        assert!(token.remaining_secs() > 3500);
    }

    #[test]
    fn test_token_debug_redacts_secrets() {
        let rendered = format!("{:?}", token(60));
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
    }

    #[test]
    fn test_service_round_trip() {
        for service in RemoteService::ALL {
            assert_eq!(service.as_str().parse::<RemoteService>().unwrap(), service);
        }
        assert!("billing".parse::<RemoteService>().is_err());
    }

    #[test]
    fn test_report_summary() {
        let counts = SyncCounts {
            seen: 10,
            transformed: 9,
            upserted: 9,
            errors: 1,
        };
        let errors = vec![RecordError::new("42", "missing name")];

        let done = SyncReport::finish("items", counts, errors.clone(), 2, Some(2), SyncEnd::Completed);
        assert!(done.success);
        assert!(!done.is_complete());
        assert_eq!(
            done.summary,
            "items: synced 9/10 records (9 transformed, 1 errors) across 2 page(s)"
        );

        let stopped = SyncReport::finish("items", counts, vec![], 2, Some(2), SyncEnd::Stopped);
        assert!(stopped.success && stopped.stopped);
        assert!(stopped.summary.ends_with("stopped on request after page 2"));

        let failed = SyncReport::finish(
            "items",
            counts,
            errors,
            2,
            Some(2),
            SyncEnd::Failed("connection refused".to_string()),
        );
        assert!(!failed.success);
        assert_eq!(failed.fatal_error.as_deref(), Some("connection refused"));
        assert_eq!(failed.synced_count, 9);
    }
}
