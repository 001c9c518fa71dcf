//! # tether-sync: Sync Engine for Tether
//!
//! Pulls records from third-party SaaS APIs (Inventory, Books, CRM) into the
//! local store, keeping OAuth grants fresh along the way.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncOrchestrator (one run per owner)             │  │
//! │  │                                                                  │  │
//! │  │  page loop ─► transform ─► validate ─► upsert ─► children        │  │
//! │  └───────┬───────────────────────┬──────────────────────┬───────────┘  │
//! │          │                       │                      │              │
//! │          ▼                       ▼                      ▼              │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌────────────────────┐    │
//! │  │  SyncRegistry  │  │    AuthService     │  │   RemoteApi        │    │
//! │  │                │  │                    │  │                    │    │
//! │  │ one run/owner  │  │ refresh margin     │  │ HttpRemoteClient   │    │
//! │  │ stop flags     │  │ single-flight      │  │ (reqwest)          │    │
//! │  │ status polling │  │ refresh, revoke    │  │                    │    │
//! │  └────────────────┘  └─────────┬──────────┘  └────────────────────┘    │
//! │                                │                                        │
//! │                                ▼                                        │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  tether-db: TokenRepository, RecordStore (SQLite)                │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                ▲                                        │
//! │  ┌─────────────────────────────┴────────────────────────────────────┐  │
//! │  │  ReorderService: line items in window ─► reorder levels          │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`analytics`] - Reorder levels from synced line items
//! - [`auth`] - OAuth token lifecycle
//! - [`config`] - TOML + environment configuration
//! - [`engine`] - Wiring of all services
//! - [`error`] - Sync error types
//! - [`orchestrator`] - Paginated sync runs
//! - [`registry`] - Active runs and stop flags
//! - [`remote`] - Remote API seam and HTTP client
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether_sync::{SyncConfig, SyncEngine};
//! use tether_core::catalog;
//!
//! let engine = SyncEngine::connect(SyncConfig::load(None)?).await?;
//! let report = engine
//!     .orchestrator()
//!     .sync(&catalog::items()?, engine.default_options(), "owner-1")
//!     .await?;
//! println!("{}", report.summary);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod analytics;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod remote;

// =============================================================================
// Re-exports
// =============================================================================

pub use analytics::{ReorderParams, ReorderService};
pub use auth::AuthService;
pub use config::{AnalyticsSettings, DatabaseSettings, RemoteSettings, SyncConfig, SyncSettings};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use orchestrator::{OrchestratorSettings, SyncOptions, SyncOrchestrator};
pub use registry::{SyncHandle, SyncRegistry};
pub use remote::{HttpRemoteClient, RemoteApi, RemoteError, RemotePage, TokenGrant};

/// Default `RUST_LOG`-style filter for binaries.
pub const DEFAULT_LOG_FILTER: &str = "info,tether_sync=debug,sqlx=warn";

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Safe to call more than once; later
/// calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
