//! # tether-db: Storage Layer for the Tether Sync Engine
//!
//! SQLite persistence for synced records and OAuth tokens, using sqlx for
//! async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tether Data Flow                                 │
//! │                                                                         │
//! │  SyncOrchestrator / AuthService / ReorderService (tether-sync)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tether-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │  │   │
//! │  │   │               │    │ RecordRepo     │   │              │  │   │
//! │  │   │ SqlitePool    │◄───│ TokenRepo      │   │ 001_init.sql │  │   │
//! │  │   │ WAL, busy_to  │    │                │   │              │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/tether.db                                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Record store and token repository
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether_db::{Database, DbConfig, RecordStore};
//!
//! let db = Database::new(DbConfig::new("path/to/tether.db")).await?;
//!
//! let stored = db.records().upsert("items", &record, "item_id").await?;
//! let token = db.tokens().get(RemoteService::Inventory, Some("owner-1")).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::records::{FieldFilter, FilterOp, OrderBy, RecordQuery, RecordRepository, RecordStore};
pub use repository::tokens::TokenRepository;
