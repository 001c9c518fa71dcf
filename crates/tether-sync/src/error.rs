//! # Sync Error Types
//!
//! Error types for auth, transport and sync lifecycle failures.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌─────────────────┐  ┌─────────────────────┐ │
//! │  │  Auth               │  │   Transport     │  │  Lifecycle          │ │
//! │  │                     │  │                 │  │                     │ │
//! │  │  AuthExpired   (1×) │  │  Transport      │  │  SyncAlreadyActive  │ │
//! │  │  NoRefreshToken (✗) │  │  Timeout        │  │  InvalidParameters  │ │
//! │  │  RemoteAuthError(✗) │  │  RemoteRejected │  │  InvalidMapping     │ │
//! │  │  NotAuthorized  (✗) │  │                 │  │                     │ │
//! │  └─────────────────────┘  └─────────────────┘  └─────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌─────────────────────────────────────────┐  │
//! │  │  Configuration      │  │  Storage                                │  │
//! │  │  InvalidConfig      │  │  DatabaseError                          │  │
//! │  │  InvalidUrl         │  │                                         │  │
//! │  │  ConfigLoadFailed   │  │                                         │  │
//! │  └─────────────────────┘  └─────────────────────────────────────────┘  │
//! │                                                                         │
//! │  (1×) refreshed and retried once      (✗) needs interactive re-auth    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-record mapping and validation failures are not here: they are
//! collected into the [`SyncReport`](tether_core::SyncReport) and never
//! escape a sync.

use thiserror::Error;

use tether_core::{CoreError, RemoteService, ValidationError};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering every failure above the per-record level.
///
/// `Clone` so a single in-flight token refresh can hand the same outcome to
/// every waiter.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// The remote answered 401 for an access token. Recoverable by one
    /// refresh-and-retry.
    #[error("Access token expired for {service}")]
    AuthenticationExpired { service: RemoteService },

    /// No refresh token stored (or no token row at all).
    #[error("No refresh token available for {service} (owner: {owner})")]
    NoRefreshTokenAvailable { service: RemoteService, owner: String },

    /// The remote rejected the refresh token. The grant is likely revoked
    /// upstream and must be re-authorized interactively.
    #[error("Remote rejected refresh for {service}: {message}")]
    RemoteAuthError { service: RemoteService, message: String },

    /// The token was refreshed but the remote still refuses it.
    #[error("Not authorized for {service} after token refresh")]
    NotAuthorized { service: RemoteService },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Remote unreachable, connection reset, malformed response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote call exceeded its deadline.
    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),

    /// Non-auth error status from the remote.
    #[error("Remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// A sync is already running for this owner.
    #[error("A sync is already active for owner '{0}'")]
    SyncAlreadyActive(String),

    /// Parameters rejected before any work begins.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Mapping cannot be synced (unknown name, no remote resource).
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid remote URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Database query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<tether_db::DbError> for SyncError {
    fn from(err: tether_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidParameters(e) => SyncError::InvalidParameters(e.to_string()),
            CoreError::InvalidMapping { .. } | CoreError::UnknownMapping(_) => {
                SyncError::InvalidMapping(err.to_string())
            }
            CoreError::Mapping(e) => SyncError::InvalidMapping(e.to_string()),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidParameters(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if re-running the sync later may succeed without any
    /// operator action.
    ///
    /// ## Retryable Errors
    /// - Transport failures and timeouts
    /// - Non-auth rejections (rate limits, 5xx)
    /// - Storage failures
    ///
    /// ## Non-Retryable Errors
    /// - Terminal auth errors (need re-authorization)
    /// - Configuration and parameter errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Timeout(_)
                | SyncError::RemoteRejected { .. }
                | SyncError::DatabaseError(_)
        )
    }

    /// Returns true if the grant must be re-authorized through the
    /// interactive OAuth flow.
    pub fn is_terminal_auth(&self) -> bool {
        matches!(
            self,
            SyncError::NoRefreshTokenAvailable { .. }
                | SyncError::RemoteAuthError { .. }
                | SyncError::NotAuthorized { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Transport("connection reset".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
        assert!(SyncError::RemoteRejected {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::SyncAlreadyActive("u1".into()).is_retryable());
    }

    #[test]
    fn test_terminal_auth_errors() {
        let service = RemoteService::Books;
        assert!(SyncError::RemoteAuthError {
            service,
            message: "invalid_code".into()
        }
        .is_terminal_auth());
        assert!(SyncError::NoRefreshTokenAvailable {
            service,
            owner: "u1".into()
        }
        .is_terminal_auth());
        assert!(!SyncError::AuthenticationExpired { service }.is_terminal_auth());
    }

    #[test]
    fn test_core_error_conversion() {
        let err: SyncError = CoreError::InvalidParameters(ValidationError::MustBePositive {
            field: "page_size".into(),
        })
        .into();
        assert!(matches!(err, SyncError::InvalidParameters(_)));
        assert_eq!(err.to_string(), "Invalid parameters: page_size must be positive");
    }
}
