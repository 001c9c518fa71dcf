//! # Reorder Analytics
//!
//! Loads synced sales-order line items from the local store and turns them
//! into per-item reorder levels.
//!
//! ```text
//!   sales_order_line_items              summarize_line_items_into_items
//!   WHERE date BETWEEN today-(N-1) AND today ──► (pure, tether-core) ──► levels
//! ```

use chrono::{Duration, NaiveDate};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AnalyticsSettings;
use crate::error::SyncResult;
use tether_core::catalog::LINE_ITEMS_TABLE;
use tether_core::validation::validate_positive;
use tether_core::{summarize_line_items_into_items, LineItem, ReorderSummary, StorageRecord};
use tether_db::{FieldFilter, RecordQuery, RecordStore};

/// Parameters of one reorder run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderParams {
    pub max_quantity: i64,
    pub look_back_days: i64,
    pub inventory_turnover_days: i64,
}

impl From<&AnalyticsSettings> for ReorderParams {
    fn from(settings: &AnalyticsSettings) -> Self {
        ReorderParams {
            max_quantity: settings.max_quantity,
            look_back_days: settings.look_back_days,
            inventory_turnover_days: settings.inventory_turnover_days,
        }
    }
}

pub struct ReorderService {
    store: Arc<dyn RecordStore>,
}

impl ReorderService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        ReorderService { store }
    }

    /// Reorder levels from line items dated in the `look_back_days` calendar
    /// days ending on `today`.
    ///
    /// Rows without an item id or a usable quantity are skipped. Negative
    /// quantities (returns, credits) do not count as demand.
    pub async fn compute(&self, params: ReorderParams, today: NaiveDate) -> SyncResult<ReorderSummary> {
        validate_positive("max_quantity", params.max_quantity)?;
        validate_positive("look_back_days", params.look_back_days)?;
        validate_positive("inventory_turnover_days", params.inventory_turnover_days)?;

        let since = today - Duration::days(params.look_back_days - 1);
        let query = RecordQuery::new()
            .filter(FieldFilter::gte("date", since.to_string()))
            .filter(FieldFilter::lte("date", today.to_string()))
            .order_by("date", false);

        let rows = self.store.select(LINE_ITEMS_TABLE, &query).await?;
        let line_items: Vec<LineItem> = rows.iter().filter_map(line_item).collect();
        debug!(
            rows = rows.len(),
            usable = line_items.len(),
            %since,
            "Loaded line items for reorder window"
        );

        let summary = summarize_line_items_into_items(
            &line_items,
            params.max_quantity,
            params.look_back_days,
            params.inventory_turnover_days,
        )?;

        for line in &summary.logs {
            info!("{}", line);
        }
        Ok(summary)
    }
}

fn line_item(row: &StorageRecord) -> Option<LineItem> {
    let item_id = match row.get("item_id")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let quantity = row.get("quantity")?.as_f64()?;
    if !quantity.is_finite() || quantity < 0.0 {
        debug!(%item_id, quantity, "Skipping line item with unusable quantity");
        return None;
    }
    Some(LineItem::new(item_id, quantity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_db::{Database, DbConfig};

    async fn store_with(lines: &[(&str, &str, &str, f64)]) -> Arc<dyn RecordStore> {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(db.records());
        for (line_id, item_id, date, quantity) in lines {
            let record = json!({
                "line_item_id": line_id,
                "item_id": item_id,
                "date": date,
                "quantity": quantity,
            });
            let record = record.as_object().unwrap().clone();
            store.upsert(LINE_ITEMS_TABLE, &record, "line_item_id").await.unwrap();
        }
        store
    }

    fn params() -> ReorderParams {
        ReorderParams {
            max_quantity: 20,
            look_back_days: 30,
            inventory_turnover_days: 15,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
    }

    #[tokio::test]
    async fn test_window_and_levels() {
        let store = store_with(&[
            ("L1", "A", "2026-10-01", 10.0),
            ("L2", "A", "2026-09-20", 5.0),
            ("L3", "B", "2026-10-14", 100.0),
            ("L4", "A", "2026-08-01", 500.0),
        ])
        .await;

        let summary = ReorderService::new(store).compute(params(), today()).await.unwrap();

        let a = summary.items.iter().find(|i| i.item_id == "A").unwrap();
        assert_eq!(a.summed_quantity, 15.0);
        assert_eq!(a.reorder_level, 8);

        let b = summary.items.iter().find(|i| i.item_id == "B").unwrap();
        assert_eq!(b.reorder_level, 20);
        assert_eq!(summary.logs.len(), 2);
    }

    #[tokio::test]
    async fn test_window_spans_exactly_look_back_days() {
        let store = store_with(&[
            ("L1", "A", "2026-10-14", 10.0),
            ("L2", "A", "2026-10-15", 10.0),
        ])
        .await;
        let one_day = ReorderParams {
            max_quantity: 100,
            look_back_days: 1,
            inventory_turnover_days: 1,
        };

        let summary = ReorderService::new(store).compute(one_day, today()).await.unwrap();

        assert_eq!(summary.items.len(), 1);
        assert_eq!(summary.items[0].summed_quantity, 10.0);
        assert_eq!(summary.items[0].reorder_level, 10);
    }

    #[tokio::test]
    async fn test_window_includes_first_day() {
        // 30-day window ending 2026-10-15 starts on 2026-09-16.
        let store = store_with(&[
            ("L1", "A", "2026-09-16", 4.0),
            ("L2", "A", "2026-09-15", 100.0),
        ])
        .await;

        let summary = ReorderService::new(store).compute(params(), today()).await.unwrap();
        assert_eq!(summary.items[0].summed_quantity, 4.0);
    }

    #[tokio::test]
    async fn test_negative_quantity_rows_skipped() {
        let store = store_with(&[
            ("L1", "A", "2026-10-10", 10.0),
            ("L2", "B", "2026-10-11", -2.0),
        ])
        .await;

        let summary = ReorderService::new(store).compute(params(), today()).await.unwrap();

        assert_eq!(summary.items.len(), 1);
        assert_eq!(summary.items[0].item_id, "A");
    }

    #[tokio::test]
    async fn test_empty_window() {
        let store = store_with(&[]).await;

        let summary = ReorderService::new(store).compute(params(), today()).await.unwrap();
        assert!(summary.items.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_params_rejected() {
        let store = store_with(&[]).await;
        let bad = ReorderParams {
            look_back_days: 0,
            ..params()
        };

        let err = ReorderService::new(store).compute(bad, today()).await.unwrap_err();
        assert!(matches!(err, crate::error::SyncError::InvalidParameters(_)));
    }

    #[test]
    fn test_line_item_from_row() {
        let row = json!({"item_id": 42, "quantity": 3.0});
        let item = line_item(row.as_object().unwrap()).unwrap();
        assert_eq!(item.item_id, "42");

        let no_qty = json!({"item_id": "A", "quantity": null});
        assert!(line_item(no_qty.as_object().unwrap()).is_none());

        let credit = json!({"item_id": "A", "quantity": -1});
        assert!(line_item(credit.as_object().unwrap()).is_none());
    }
}
