//! # Error Types
//!
//! Domain-specific error types for tether-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tether-core errors (this file)                                        │
//! │  ├── CoreError        - General domain errors                          │
//! │  ├── ValidationError  - Parameter validation failures                  │
//! │  └── MappingError     - Per-record transform failures                  │
//! │                                                                         │
//! │  tether-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tether-sync errors (separate crate)                                   │
//! │  └── SyncError        - Auth, transport and lifecycle failures         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → API layer             │
//! │        MappingError    → collected per record, never escapes a batch   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Parameters rejected before any work begins.
    ///
    /// ## When This Occurs
    /// - Non-positive analytics parameters (max quantity, look-back days, ...)
    /// - Zero page size passed to a sync
    #[error("Invalid parameters: {0}")]
    InvalidParameters(#[from] ValidationError),

    /// An entity mapping definition breaks one of its invariants.
    ///
    /// ## When This Occurs
    /// - Unique key field is not mapped to a column
    /// - Two fields map onto the same storage column
    /// - Table or column name is not a safe identifier
    #[error("Invalid mapping for '{table}': {reason}")]
    InvalidMapping { table: String, reason: String },

    /// No built-in mapping with this name.
    #[error("Unknown mapping: {0}")]
    UnknownMapping(String),

    /// A record could not be transformed.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Used for early validation before any computation or network call runs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid identifier, non-finite number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Mapping Error
// =============================================================================

/// Errors raised while transforming one remote record.
///
/// These are isolated per record: the orchestrator collects them into the
/// sync report and keeps processing the batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MappingError {
    /// The remote record is not a JSON object.
    #[error("remote record is not an object (got {kind})")]
    NotAnObject { kind: String },

    /// A field value could not be coerced to the declared type.
    #[error("field '{field}' could not be coerced to {expected}: {reason}")]
    Coercion {
        field: String,
        expected: String,
        reason: String,
    },

    /// A custom transform rejected the value.
    #[error("field '{field}' rejected: {reason}")]
    Rejected { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
