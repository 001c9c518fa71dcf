//! # Repository Module
//!
//! Database repository implementations for the sync engine.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  SyncOrchestrator                  AuthService                          │
//! │       │                                 │                               │
//! │       │ store.upsert(table, rec, key)   │ db.tokens().get(svc, owner)   │
//! │       ▼                                 ▼                               │
//! │  RecordRepository                  TokenRepository                      │
//! │  ├── get_single                    ├── get                              │
//! │  ├── upsert                        ├── save_authorization               │
//! │  └── select                        ├── replace_access_token             │
//! │       │                            └── delete                           │
//! │       ▼                                 │                               │
//! │  synced_records                    oauth_tokens                         │
//! │                                                                         │
//! │  The orchestrator only sees the RecordStore trait, so tests and other  │
//! │  storage engines can stand in for SQLite.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`RecordRepository`] - Generic mapped-record storage ([`RecordStore`])
//! - [`TokenRepository`] - OAuth token rows

pub mod records;
pub mod tokens;

pub use records::{FieldFilter, FilterOp, OrderBy, RecordQuery, RecordRepository, RecordStore};
pub use tokens::TokenRepository;
