//! # Entity Mapping
//!
//! Declarative, data-driven translation of remote records into storage
//! records.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Mapping Pipeline                                  │
//! │                                                                         │
//! │   remote JSON object                                                   │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   ┌──────────────────────┐   parent keys (child records only)          │
//! │   │ merge parent keys    │◄──────────────────────────────────          │
//! │   └──────────┬───────────┘                                             │
//! │              ▼                                                          │
//! │   ┌──────────────────────┐   for each declared field, in order:        │
//! │   │ apply field rules    │   None rule    → dropped                    │
//! │   │ (allow-list)         │   Some(value)  → column = value             │
//! │   └──────────┬───────────┘   None result  → column omitted             │
//! │              ▼               undeclared   → dropped                    │
//! │   ┌──────────────────────┐                                             │
//! │   │ validate_record      │   required columns present and non-null     │
//! │   └──────────┬───────────┘                                             │
//! │              ▼                                                          │
//! │   upsert ON CONFLICT (conflict_column)                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Omitted vs Null
//!
//! A transform returns `Option<Value>`:
//! - `None` means "undefined": the column is left out of the record, so an
//!   upsert never overwrites the stored value.
//! - `Some(Value::Null)` writes an explicit null.
//!
//! ## Example
//! ```rust
//! use serde_json::json;
//! use tether_core::mapping::{EntityMapping, FieldRule, Transform};
//!
//! let mapping = EntityMapping::builder("items", "item_id")
//!     .field("item_id", FieldRule::new("item_id"))
//!     .field("name", FieldRule::new("name").required().with(Transform::Trimmed))
//!     .field("rate", FieldRule::new("rate").with(Transform::Decimal))
//!     .build()
//!     .unwrap();
//!
//! let record = mapping
//!     .transform_to_db_record(&json!({"item_id": "7", "name": " Bolt ", "rate": "1.5", "x": 1}), None)
//!     .unwrap();
//!
//! assert_eq!(record["name"], json!("Bolt"));
//! assert_eq!(record["rate"], json!(1.5));
//! assert!(!record.contains_key("x"));
//! assert!(mapping.validate_record(&record).valid);
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult, MappingError};
use crate::types::RemoteService;
use crate::validation::validate_identifier;

/// A normalized storage record: column name to JSON value.
pub type StorageRecord = Map<String, Value>;

/// User-supplied transform. Receives the remote value (`None` when the field
/// is absent) and returns the column value or a rejection reason.
pub type CustomTransform =
    Arc<dyn Fn(Option<&Value>) -> Result<Option<Value>, String> + Send + Sync>;

// =============================================================================
// Transform
// =============================================================================

/// Field transform, interpreted by [`Transform::apply`].
///
/// Every built-in transform maps an absent remote field to `None` (omit),
/// except [`Transform::DefaultTo`] and [`Transform::Constant`].
#[derive(Clone)]
pub enum Transform {
    /// Copy the value as-is.
    Identity,
    /// Render scalars as a string.
    Text,
    /// Like `Text`, trimmed. Blank strings become null.
    Trimmed,
    /// Like `Trimmed`, lowercased.
    Lowercase,
    /// Whole number. Accepts numbers and numeric strings.
    Integer,
    /// Floating point number. Accepts numbers and numeric strings.
    Decimal,
    /// Accepts booleans, `0`/`1`, and `true`/`false`/`yes`/`no` strings.
    Boolean,
    /// Timestamp normalized to RFC 3339 UTC.
    Timestamp,
    /// Calendar date normalized to `YYYY-MM-DD`.
    Date,
    /// Structured JSON. Strings are parsed as JSON documents.
    Json,
    /// Identity, but absent or null becomes the given value.
    DefaultTo(Value),
    /// Always the given value, regardless of input.
    Constant(Value),
    /// Arbitrary closure.
    Custom(CustomTransform),
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transform::Identity => f.write_str("Identity"),
            Transform::Text => f.write_str("Text"),
            Transform::Trimmed => f.write_str("Trimmed"),
            Transform::Lowercase => f.write_str("Lowercase"),
            Transform::Integer => f.write_str("Integer"),
            Transform::Decimal => f.write_str("Decimal"),
            Transform::Boolean => f.write_str("Boolean"),
            Transform::Timestamp => f.write_str("Timestamp"),
            Transform::Date => f.write_str("Date"),
            Transform::Json => f.write_str("Json"),
            Transform::DefaultTo(v) => f.debug_tuple("DefaultTo").field(v).finish(),
            Transform::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Transform::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Transform {
    /// Wraps a closure as a [`Transform::Custom`].
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>) -> Result<Option<Value>, String> + Send + Sync + 'static,
    {
        Transform::Custom(Arc::new(f))
    }

    /// Applies the transform to one remote field value.
    pub fn apply(&self, field: &str, input: Option<&Value>) -> Result<Option<Value>, MappingError> {
        match self {
            Transform::Constant(v) => return Ok(Some(v.clone())),
            Transform::DefaultTo(default) => {
                return Ok(match input {
                    None | Some(Value::Null) => Some(default.clone()),
                    Some(v) => Some(v.clone()),
                })
            }
            Transform::Custom(f) => {
                return (**f)(input).map_err(|reason| MappingError::Rejected {
                    field: field.to_string(),
                    reason,
                })
            }
            _ => {}
        }

        let value = match input {
            None => return Ok(None),
            Some(Value::Null) => return Ok(Some(Value::Null)),
            Some(v) => v,
        };

        let coerced = match self {
            Transform::Identity
            | Transform::DefaultTo(_)
            | Transform::Constant(_)
            | Transform::Custom(_) => value.clone(),
            Transform::Text => Value::String(scalar_text(field, value)?),
            Transform::Trimmed => blank_to_null(scalar_text(field, value)?.trim().to_string()),
            Transform::Lowercase => {
                blank_to_null(scalar_text(field, value)?.trim().to_lowercase())
            }
            Transform::Integer => coerce_integer(field, value)?,
            Transform::Decimal => coerce_decimal(field, value)?,
            Transform::Boolean => coerce_boolean(field, value)?,
            Transform::Timestamp => coerce_timestamp(field, value)?,
            Transform::Date => coerce_date(field, value)?,
            Transform::Json => match value {
                Value::String(s) if s.trim().is_empty() => Value::Null,
                Value::String(s) => serde_json::from_str(s)
                    .map_err(|e| coercion(field, "json", e.to_string()))?,
                other => other.clone(),
            },
        };

        Ok(Some(coerced))
    }
}

fn coercion(field: &str, expected: &str, reason: impl Into<String>) -> MappingError {
    MappingError::Coercion {
        field: field.to_string(),
        expected: expected.to_string(),
        reason: reason.into(),
    }
}

fn blank_to_null(s: String) -> Value {
    if s.is_empty() {
        Value::Null
    } else {
        Value::String(s)
    }
}

fn scalar_text(field: &str, value: &Value) -> Result<String, MappingError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(coercion(field, "text", format!("got {}", kind_of(other)))),
    }
}

fn coerce_integer(field: &str, value: &Value) -> Result<Value, MappingError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Value::from(i));
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(coercion(field, "integer", format!("{} is not a whole number", n))),
            }
        }
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| coercion(field, "integer", format!("'{}' is not an integer", s))),
        other => Err(coercion(field, "integer", format!("got {}", kind_of(other)))),
    }
}

fn coerce_decimal(field: &str, value: &Value) -> Result<Value, MappingError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Ok(Value::Null),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => return Err(coercion(field, "decimal", format!("got {}", kind_of(other)))),
    };

    parsed
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| coercion(field, "decimal", format!("{} is not a number", value)))
}

fn coerce_boolean(field: &str, value: &Value) -> Result<Value, MappingError> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err(coercion(field, "boolean", format!("{} is not 0 or 1", n))),
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "" => Ok(Value::Null),
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(coercion(field, "boolean", format!("'{}' is not a boolean", s))),
        },
        other => Err(coercion(field, "boolean", format!("got {}", kind_of(other)))),
    }
}

/// Timestamp layouts seen on the remote, tried in order after RFC 3339.
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z"];

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    // Zone-less timestamps are taken as UTC.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn coerce_timestamp(field: &str, value: &Value) -> Result<Value, MappingError> {
    match value {
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => parse_timestamp(s.trim())
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
            .ok_or_else(|| coercion(field, "timestamp", format!("'{}' is not a timestamp", s))),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
            .ok_or_else(|| coercion(field, "timestamp", format!("{} is not epoch seconds", n))),
        other => Err(coercion(field, "timestamp", format!("got {}", kind_of(other)))),
    }
}

fn coerce_date(field: &str, value: &Value) -> Result<Value, MappingError> {
    let s = match value {
        Value::String(s) => s.trim(),
        other => return Err(coercion(field, "date", format!("got {}", kind_of(other)))),
    };

    if s.is_empty() {
        return Ok(Value::Null);
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(s).map(|dt| dt.date_naive()))
        .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
        .ok_or_else(|| coercion(field, "date", format!("'{}' is not a date", s)))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Field Rules
// =============================================================================

/// Where and how one remote field lands in storage.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub column: String,
    pub required: bool,
    pub transform: Transform,
}

impl FieldRule {
    /// Optional column with the identity transform.
    pub fn new(column: impl Into<String>) -> Self {
        FieldRule {
            column: column.into(),
            required: false,
            transform: Transform::Identity,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

/// The remote endpoint a top-level mapping is synced from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResource {
    pub service: RemoteService,
    /// Path relative to the service's API base URL, e.g. `items`.
    pub path: String,
    /// Key of the records array in the list response, e.g. `items`.
    pub records_key: String,
}

/// Projects a column of the transformed parent onto each child record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentKey {
    pub parent_column: String,
    pub child_column: String,
}

/// A nested array of child records (e.g. sales-order line items) synced into
/// its own table.
#[derive(Debug, Clone)]
pub struct ChildMapping {
    /// Remote field holding the child array.
    pub field: String,
    pub mapping: Arc<EntityMapping>,
    pub parent_keys: Vec<ParentKey>,
}

impl ChildMapping {
    pub fn new(field: impl Into<String>, mapping: EntityMapping) -> Self {
        ChildMapping {
            field: field.into(),
            mapping: Arc::new(mapping),
            parent_keys: Vec::new(),
        }
    }

    pub fn parent_key(mut self, parent_column: impl Into<String>, child_column: impl Into<String>) -> Self {
        self.parent_keys.push(ParentKey {
            parent_column: parent_column.into(),
            child_column: child_column.into(),
        });
        self
    }

    /// Builds the parent-key record merged into every child of `parent`.
    ///
    /// Parent columns missing from the transformed parent are skipped.
    pub fn parent_record(&self, parent: &StorageRecord) -> StorageRecord {
        self.parent_keys
            .iter()
            .filter_map(|key| {
                parent
                    .get(&key.parent_column)
                    .map(|v| (key.child_column.clone(), v.clone()))
            })
            .collect()
    }
}

// =============================================================================
// Entity Mapping
// =============================================================================

/// Result of [`EntityMapping::validate_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordValidation {
    pub valid: bool,
    /// Required columns absent or null, in declaration order.
    pub missing_fields: Vec<String>,
}

/// Static definition translating one remote resource into one storage table.
///
/// Construct through [`EntityMapping::builder`], which enforces:
/// - table and column names are safe identifiers
/// - the unique key field is mapped (and therefore required)
/// - no two fields share a column
#[derive(Debug, Clone)]
pub struct EntityMapping {
    table: String,
    unique_key: String,
    resource: Option<RemoteResource>,
    fields: Vec<(String, Option<FieldRule>)>,
    children: Vec<ChildMapping>,
}

impl EntityMapping {
    /// Starts a mapping for `table`, keyed on the remote field `unique_key`.
    pub fn builder(table: impl Into<String>, unique_key: impl Into<String>) -> EntityMappingBuilder {
        EntityMappingBuilder {
            table: table.into(),
            unique_key: unique_key.into(),
            resource: None,
            fields: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Remote field carrying the record's identity.
    pub fn unique_key(&self) -> &str {
        &self.unique_key
    }

    pub fn resource(&self) -> Option<&RemoteResource> {
        self.resource.as_ref()
    }

    pub fn fields(&self) -> &[(String, Option<FieldRule>)] {
        &self.fields
    }

    pub fn children(&self) -> &[ChildMapping] {
        &self.children
    }

    /// Storage column used as the upsert conflict key.
    pub fn conflict_column(&self) -> &str {
        self.rule_for(&self.unique_key)
            .map(|rule| rule.column.as_str())
            .unwrap_or(self.unique_key.as_str())
    }

    fn rule_for(&self, remote_field: &str) -> Option<&FieldRule> {
        self.fields
            .iter()
            .find(|(name, _)| name == remote_field)
            .and_then(|(_, rule)| rule.as_ref())
    }

    /// Required columns, in declaration order.
    pub fn required_columns(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter_map(|(_, rule)| rule.as_ref())
            .filter(|rule| rule.required)
            .map(|rule| rule.column.as_str())
    }

    /// Remote identity of a raw record, used to label per-record errors.
    pub fn remote_id_of(&self, remote: &Value) -> Option<String> {
        match remote.get(&self.unique_key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Transforms one remote record into a storage record.
    ///
    /// `parent_keys` are merged first so a field rule targeting the same
    /// column overrides them.
    pub fn transform_to_db_record(
        &self,
        remote: &Value,
        parent_keys: Option<&StorageRecord>,
    ) -> Result<StorageRecord, MappingError> {
        let source = remote.as_object().ok_or_else(|| MappingError::NotAnObject {
            kind: kind_of(remote).to_string(),
        })?;

        let mut record = parent_keys.cloned().unwrap_or_default();

        for (field, rule) in &self.fields {
            let Some(rule) = rule else { continue };
            if let Some(value) = rule.transform.apply(field, source.get(field))? {
                record.insert(rule.column.clone(), value);
            }
        }

        Ok(record)
    }

    /// A record is valid iff every required column is present and non-null.
    pub fn validate_record(&self, record: &StorageRecord) -> RecordValidation {
        let missing_fields: Vec<String> = self
            .required_columns()
            .filter(|column| record.get(*column).map_or(true, Value::is_null))
            .map(str::to_string)
            .collect();

        RecordValidation {
            valid: missing_fields.is_empty(),
            missing_fields,
        }
    }
}

/// Builder for [`EntityMapping`].
#[derive(Debug)]
pub struct EntityMappingBuilder {
    table: String,
    unique_key: String,
    resource: Option<RemoteResource>,
    fields: Vec<(String, Option<FieldRule>)>,
    children: Vec<ChildMapping>,
}

impl EntityMappingBuilder {
    /// Sets the remote endpoint; required for top-level syncs.
    pub fn resource(
        mut self,
        service: RemoteService,
        path: impl Into<String>,
        records_key: impl Into<String>,
    ) -> Self {
        self.resource = Some(RemoteResource {
            service,
            path: path.into(),
            records_key: records_key.into(),
        });
        self
    }

    pub fn field(mut self, remote_field: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push((remote_field.into(), Some(rule)));
        self
    }

    /// Declares a remote field that is deliberately not stored.
    pub fn drop_field(mut self, remote_field: impl Into<String>) -> Self {
        self.fields.push((remote_field.into(), None));
        self
    }

    pub fn child(mut self, child: ChildMapping) -> Self {
        self.children.push(child);
        self
    }

    pub fn build(mut self) -> CoreResult<EntityMapping> {
        let table = self.table.clone();
        let invalid = |reason: String| CoreError::InvalidMapping {
            table: table.clone(),
            reason,
        };

        validate_identifier("table", &self.table).map_err(|e| invalid(e.to_string()))?;

        let mut remote_fields = HashSet::new();
        let mut columns = HashSet::new();
        for (field, rule) in &self.fields {
            if !remote_fields.insert(field.as_str()) {
                return Err(invalid(format!("remote field '{}' declared twice", field)));
            }
            if let Some(rule) = rule {
                validate_identifier("column", &rule.column).map_err(|e| invalid(e.to_string()))?;
                if !columns.insert(rule.column.as_str()) {
                    return Err(invalid(format!("column '{}' mapped twice", rule.column)));
                }
            }
        }

        for child in &self.children {
            if !child.mapping.children.is_empty() {
                return Err(invalid(format!(
                    "child '{}' declares its own children; one level of nesting is supported",
                    child.field
                )));
            }
            for key in &child.parent_keys {
                if !columns.contains(key.parent_column.as_str()) {
                    return Err(invalid(format!(
                        "child '{}' projects unknown parent column '{}'",
                        child.field, key.parent_column
                    )));
                }
            }
        }

        let key_rule = self
            .fields
            .iter_mut()
            .find(|(name, _)| *name == self.unique_key)
            .and_then(|(_, rule)| rule.as_mut())
            .ok_or_else(|| invalid(format!("unique key '{}' is not mapped", self.unique_key)))?;
        key_rule.required = true;

        Ok(EntityMapping {
            table: self.table,
            unique_key: self.unique_key,
            resource: self.resource,
            fields: self.fields,
            children: self.children,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contacts() -> EntityMapping {
        EntityMapping::builder("contacts", "contact_id")
            .resource(RemoteService::Books, "contacts", "contacts")
            .field("contact_id", FieldRule::new("contact_id").with(Transform::Text))
            .field("contact_name", FieldRule::new("name").required().with(Transform::Trimmed))
            .field("email", FieldRule::new("email").with(Transform::Lowercase))
            .field("outstanding", FieldRule::new("outstanding").with(Transform::Decimal))
            .field("last_modified_time", FieldRule::new("modified_at").with(Transform::Timestamp))
            .drop_field("internal_notes")
            .build()
            .unwrap()
    }

    #[test]
    fn test_transform_renames_and_coerces() {
        let record = contacts()
            .transform_to_db_record(
                &json!({
                    "contact_id": 1001,
                    "contact_name": "  Acme Ltd ",
                    "email": "Ops@Acme.COM",
                    "outstanding": "12.50",
                    "last_modified_time": "2024-03-01T10:00:00+0530",
                    "internal_notes": "secret",
                    "unknown": true
                }),
                None,
            )
            .unwrap();

        assert_eq!(record["contact_id"], json!("1001"));
        assert_eq!(record["name"], json!("Acme Ltd"));
        assert_eq!(record["email"], json!("ops@acme.com"));
        assert_eq!(record["outstanding"], json!(12.5));
        assert_eq!(record["modified_at"], json!("2024-03-01T04:30:00Z"));
        assert!(!record.contains_key("internal_notes"));
        assert!(!record.contains_key("unknown"));
    }

    #[test]
    fn test_undefined_is_omitted_and_null_is_written() {
        let mapping = contacts();

        let absent = mapping
            .transform_to_db_record(&json!({"contact_id": "1", "contact_name": "A"}), None)
            .unwrap();
        assert!(!absent.contains_key("email"));

        let null = mapping
            .transform_to_db_record(
                &json!({"contact_id": "1", "contact_name": "A", "email": null}),
                None,
            )
            .unwrap();
        assert_eq!(null.get("email"), Some(&Value::Null));
    }

    #[test]
    fn test_custom_transform_can_omit() {
        let mapping = EntityMapping::builder("t", "id")
            .field("id", FieldRule::new("id"))
            .field(
                "status",
                FieldRule::new("status").with(Transform::custom(|v| {
                    Ok(match v.and_then(Value::as_str) {
                        Some("draft") => None,
                        Some(s) => Some(Value::String(s.to_uppercase())),
                        None => Some(Value::Null),
                    })
                })),
            )
            .build()
            .unwrap();

        let draft = mapping
            .transform_to_db_record(&json!({"id": 1, "status": "draft"}), None)
            .unwrap();
        assert!(!draft.contains_key("status"));

        let open = mapping
            .transform_to_db_record(&json!({"id": 1, "status": "open"}), None)
            .unwrap();
        assert_eq!(open["status"], json!("OPEN"));
    }

    #[test]
    fn test_coercion_failure_is_mapping_error() {
        let mapping = EntityMapping::builder("t", "id")
            .field("id", FieldRule::new("id"))
            .field("qty", FieldRule::new("qty").with(Transform::Integer))
            .build()
            .unwrap();

        let err = mapping
            .transform_to_db_record(&json!({"id": 1, "qty": "abc"}), None)
            .unwrap_err();
        assert!(matches!(err, MappingError::Coercion { ref field, .. } if field == "qty"));

        let err = mapping.transform_to_db_record(&json!([1, 2]), None).unwrap_err();
        assert_eq!(
            err,
            MappingError::NotAnObject {
                kind: "array".to_string()
            }
        );
    }

    #[test]
    fn test_validate_record_reports_missing_required() {
        let mapping = contacts();

        let record = mapping
            .transform_to_db_record(&json!({"contact_id": "9", "contact_name": "   "}), None)
            .unwrap();
        let validation = mapping.validate_record(&record);
        assert!(!validation.valid);
        assert_eq!(validation.missing_fields, vec!["name".to_string()]);

        let record = mapping
            .transform_to_db_record(&json!({"contact_name": "X"}), None)
            .unwrap();
        let validation = mapping.validate_record(&record);
        assert_eq!(validation.missing_fields, vec!["contact_id".to_string()]);
    }

    #[test]
    fn test_parent_keys_merged_and_overridden() {
        let mapping = EntityMapping::builder("lines", "line_item_id")
            .field("line_item_id", FieldRule::new("line_item_id"))
            .field("order_ref", FieldRule::new("order_id"))
            .build()
            .unwrap();

        let mut parent = StorageRecord::new();
        parent.insert("order_id".to_string(), json!("SO-1"));
        parent.insert("date".to_string(), json!("2024-01-02"));

        let inherited = mapping
            .transform_to_db_record(&json!({"line_item_id": "L1"}), Some(&parent))
            .unwrap();
        assert_eq!(inherited["order_id"], json!("SO-1"));
        assert_eq!(inherited["date"], json!("2024-01-02"));

        let overridden = mapping
            .transform_to_db_record(&json!({"line_item_id": "L1", "order_ref": "SO-9"}), Some(&parent))
            .unwrap();
        assert_eq!(overridden["order_id"], json!("SO-9"));
    }

    #[test]
    fn test_builder_rejects_broken_mappings() {
        let unmapped_key = EntityMapping::builder("t", "id")
            .field("name", FieldRule::new("name"))
            .build();
        assert!(matches!(unmapped_key, Err(CoreError::InvalidMapping { .. })));

        let dropped_key = EntityMapping::builder("t", "id").drop_field("id").build();
        assert!(dropped_key.is_err());

        let duplicate_column = EntityMapping::builder("t", "id")
            .field("id", FieldRule::new("id"))
            .field("other", FieldRule::new("id"))
            .build();
        assert!(duplicate_column.is_err());

        let bad_table = EntityMapping::builder("t; drop", "id")
            .field("id", FieldRule::new("id"))
            .build();
        assert!(bad_table.is_err());
    }

    #[test]
    fn test_unique_key_forced_required() {
        let mapping = EntityMapping::builder("t", "id")
            .field("id", FieldRule::new("record_id"))
            .build()
            .unwrap();

        assert_eq!(mapping.conflict_column(), "record_id");
        assert_eq!(mapping.required_columns().collect::<Vec<_>>(), vec!["record_id"]);
    }

    #[test]
    fn test_scalar_transforms() {
        let apply = |t: Transform, v: Value| t.apply("f", Some(&v));

        assert_eq!(apply(Transform::Integer, json!(4.0)).unwrap(), Some(json!(4)));
        assert!(apply(Transform::Integer, json!(4.5)).is_err());
        assert_eq!(apply(Transform::Boolean, json!("Yes")).unwrap(), Some(json!(true)));
        assert_eq!(apply(Transform::Boolean, json!(0)).unwrap(), Some(json!(false)));
        assert_eq!(
            apply(Transform::Date, json!("2024-05-06T23:10:00Z")).unwrap(),
            Some(json!("2024-05-06"))
        );
        assert!(apply(Transform::Date, json!("06/05/2024")).is_err());
        assert_eq!(
            apply(Transform::Json, json!("{\"a\":1}")).unwrap(),
            Some(json!({"a": 1}))
        );
        assert!(apply(Transform::Text, json!({"a": 1})).is_err());
        assert_eq!(
            Transform::DefaultTo(json!(0)).apply("f", None).unwrap(),
            Some(json!(0))
        );
        assert_eq!(
            Transform::Constant(json!("books")).apply("f", Some(&json!("x"))).unwrap(),
            Some(json!("books"))
        );
    }
}
