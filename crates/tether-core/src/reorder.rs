//! # Reorder-Level Analytics
//!
//! Scales historical consumption to the inventory turnover horizon.
//!
//! ```text
//!   line items (already windowed by the caller)
//!        │  group by item_id, keep first-seen order
//!        ▼
//!   summed quantity ──► summed / look_back_days × turnover_days
//!                                      │ ceil
//!                                      ▼
//!                          clamp to [0, max_quantity]
//! ```
//!
//! Date filtering is the caller's job; this module only does arithmetic so it
//! can be tested with literal windows.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreResult;
use crate::validation::{validate_positive, validate_quantity};

/// One sold line: which item, how many.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: String,
    pub quantity: f64,
}

impl LineItem {
    pub fn new(item_id: impl Into<String>, quantity: f64) -> Self {
        LineItem {
            item_id: item_id.into(),
            quantity,
        }
    }
}

/// Computed reorder level for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ItemReorder {
    pub item_id: String,
    /// Total quantity across the supplied window.
    pub summed_quantity: f64,
    /// Bounded to `[0, max_quantity]`.
    pub reorder_level: i64,
}

/// Result of [`summarize_line_items_into_items`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReorderSummary {
    /// In order of each item's first appearance.
    pub items: Vec<ItemReorder>,
    /// One human-readable line per item.
    pub logs: Vec<String>,
}

/// Aggregates line items per item and derives a bounded reorder level.
///
/// ## Errors
/// `CoreError::InvalidParameters` when any parameter is not positive, or a
/// quantity is negative or not finite. Nothing is computed in that case.
///
/// ## Example
/// ```rust
/// use tether_core::reorder::{summarize_line_items_into_items, LineItem};
///
/// let summary = summarize_line_items_into_items(
///     &[LineItem::new("A", 10.0), LineItem::new("A", 5.0)],
///     20,
///     180,
///     90,
/// )
/// .unwrap();
///
/// assert_eq!(summary.items[0].summed_quantity, 15.0);
/// assert_eq!(summary.items[0].reorder_level, 8);
/// ```
pub fn summarize_line_items_into_items(
    line_items: &[LineItem],
    max_quantity: i64,
    look_back_days: i64,
    inventory_turnover_days: i64,
) -> CoreResult<ReorderSummary> {
    validate_positive("max_quantity", max_quantity)?;
    validate_positive("look_back_days", look_back_days)?;
    validate_positive("inventory_turnover_days", inventory_turnover_days)?;
    for line in line_items {
        validate_quantity(&line.item_id, line.quantity)?;
    }

    let mut order: Vec<&str> = Vec::new();
    let mut totals: HashMap<&str, f64> = HashMap::new();
    for line in line_items {
        let total = totals.entry(line.item_id.as_str()).or_insert_with(|| {
            order.push(line.item_id.as_str());
            0.0
        });
        *total += line.quantity;
    }

    let mut items = Vec::with_capacity(order.len());
    let mut logs = Vec::with_capacity(order.len());

    for item_id in order {
        let summed = totals.get(item_id).copied().unwrap_or_default();
        let scaled = summed * inventory_turnover_days as f64 / look_back_days as f64;
        let reorder_level = (scaled.ceil() as i64).clamp(0, max_quantity);

        logs.push(format!(
            "item {}: sold {} over {} days, projected {:.2} over {} days, reorder level {} (cap {})",
            item_id,
            summed,
            look_back_days,
            scaled,
            inventory_turnover_days,
            reorder_level,
            max_quantity
        ));
        items.push(ItemReorder {
            item_id: item_id.to_string(),
            summed_quantity: summed,
            reorder_level,
        });
    }

    Ok(ReorderSummary { items, logs })
}
