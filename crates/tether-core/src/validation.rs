//! # Validation Module
//!
//! Parameter validation utilities shared by the mapping layer, the analytics
//! engine and the orchestrator.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: API layer (outside this workspace)                           │
//! │  └── Request decoding                                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Parameters rejected before any work begins                        │
//! │  └── Identifiers checked before they reach SQL                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Per-record validation (mapping::validate_record)             │
//! │  └── Required columns present and non-null                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tether_core::validation::{validate_identifier, validate_positive};
//!
//! validate_identifier("table", "sales_orders").unwrap();
//! assert!(validate_positive("look_back_days", 0).is_err());
//! ```

use crate::error::ValidationError;
use crate::MAX_OWNER_ID_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an owner identity (the key of sync runs and user tokens).
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most [`MAX_OWNER_ID_LEN`] characters
pub fn validate_owner_id(owner_id: &str) -> ValidationResult<()> {
    let owner_id = owner_id.trim();

    if owner_id.is_empty() {
        return Err(ValidationError::Required {
            field: "owner_id".to_string(),
        });
    }

    if owner_id.len() > MAX_OWNER_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "owner_id".to_string(),
            max: MAX_OWNER_ID_LEN,
        });
    }

    Ok(())
}

/// Validates a SQL-facing identifier (table or column name).
///
/// ## Rules
/// - Must start with an ASCII letter or underscore
/// - Only ASCII letters, digits and underscores
/// - At most 63 characters
///
/// Storage builds JSON paths and table discriminators from these names, so
/// anything outside this alphabet is refused up front.
///
/// ## Example
/// ```rust
/// use tether_core::validation::validate_identifier;
///
/// assert!(validate_identifier("column", "item_id").is_ok());
/// assert!(validate_identifier("column", "item id").is_err());
/// assert!(validate_identifier("column", "1st").is_err());
/// ```
pub fn validate_identifier(field: &str, name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.len() > 63 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 63,
        });
    }

    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);

    if !starts_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("'{}' must match [A-Za-z_][A-Za-z0-9_]*", name),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates that an integer parameter is strictly positive.
pub fn validate_positive(field: &str, value: i64) -> ValidationResult<()> {
    if value <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a page size against the configured maximum.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed `max`
pub fn validate_page_size(page_size: u32, max: u32) -> ValidationResult<()> {
    if page_size == 0 {
        return Err(ValidationError::MustBePositive {
            field: "page_size".to_string(),
        });
    }

    if page_size > max {
        return Err(ValidationError::OutOfRange {
            field: "page_size".to_string(),
            min: 1,
            max: i64::from(max),
        });
    }

    Ok(())
}

/// Validates a page number (pages are 1-based on the remote).
pub fn validate_page(page: u32) -> ValidationResult<()> {
    if page == 0 {
        return Err(ValidationError::MustBePositive {
            field: "page".to_string(),
        });
    }

    Ok(())
}

/// Validates a line-item quantity.
///
/// ## Rules
/// - Must be a finite number
/// - Must not be negative (returns are synced as separate documents)
pub fn validate_quantity(item_id: &str, quantity: f64) -> ValidationResult<()> {
    if !quantity.is_finite() {
        return Err(ValidationError::InvalidFormat {
            field: format!("quantity[{}]", item_id),
            reason: "must be a finite number".to_string(),
        });
    }

    if quantity < 0.0 {
        return Err(ValidationError::OutOfRange {
            field: format!("quantity[{}]", item_id),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
