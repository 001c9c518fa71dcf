//! # tether-core: Pure Logic for the Tether Sync Engine
//!
//! This crate holds everything about a sync that can be decided without I/O:
//! how remote records become storage records, what a sync reports, and how
//! reorder levels are derived from synced sales.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tether Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 API layer (outside this workspace)              │   │
//! │  │      sync ── request_stop ── get_sync_status ── revoke          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 tether-sync (I/O orchestration)                 │   │
//! │  │      AuthService ── SyncRegistry ── SyncOrchestrator            │   │
//! │  └──────────────┬──────────────────────────────┬───────────────────┘   │
//! │                 │                              │                        │
//! │  ┌──────────────▼────────────────┐  ┌──────────▼──────────────────┐   │
//! │  │  ★ tether-core (THIS CRATE) ★ │  │  tether-db (SQLite)          │   │
//! │  │                               │  │  records + oauth_tokens      │   │
//! │  │  mapping  catalog  reorder    │  └─────────────────────────────┘   │
//! │  │  types    validation          │                                     │
//! │  │                               │                                     │
//! │  │  NO I/O • NO DATABASE • NO NETWORK                                  │
//! │  └───────────────────────────────┘                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`mapping`] - Declarative field mapping interpreter
//! - [`catalog`] - Built-in entity mappings
//! - [`reorder`] - Reorder-level arithmetic
//! - [`types`] - Tokens, sync snapshots and reports
//! - [`validation`] - Parameter validation
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Same input, same output. Log lines are returned as
//!    data, never printed.
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Data, not code**: A new remote resource is a new mapping value, not a
//!    new branch in the orchestrator
//! 4. **Explicit Errors**: All errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod catalog;
pub mod error;
pub mod mapping;
pub mod reorder;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, MappingError, ValidationError};
pub use mapping::{EntityMapping, FieldRule, RecordValidation, StorageRecord, Transform};
pub use reorder::{summarize_line_items_into_items, ItemReorder, LineItem, ReorderSummary};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of an owner identity.
pub const MAX_OWNER_ID_LEN: usize = 255;

/// Seconds before literal expiry at which a token is treated as expired.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

/// Hard ceiling on pages fetched by one sync.
///
/// Guards against a remote that keeps reporting `has_more_page` forever.
pub const DEFAULT_MAX_PAGES: u32 = 1000;

/// Default records per remote page.
pub const DEFAULT_PAGE_SIZE: u32 = 200;
