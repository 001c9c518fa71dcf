//! # Built-in Mapping Catalog
//!
//! The entity mappings shipped with the engine. Adding a resource means
//! adding a function here, never touching the orchestrator.
//!
//! ```text
//! ┌────────────────────────┬───────────┬──────────────────┬─────────────────┐
//! │ Table                  │ Service   │ Remote path      │ Unique key      │
//! ├────────────────────────┼───────────┼──────────────────┼─────────────────┤
//! │ items                  │ Inventory │ items            │ item_id         │
//! │ contacts               │ Books     │ contacts         │ contact_id      │
//! │ sales_orders           │ Inventory │ salesorders      │ salesorder_id   │
//! │  └ sales_order_line_items (child of line_items)       │ line_item_id    │
//! │ invoices               │ Books     │ invoices         │ invoice_id      │
//! │ crm_accounts           │ Crm       │ Accounts         │ id              │
//! └────────────────────────┴───────────┴──────────────────┴─────────────────┘
//! ```

use crate::error::{CoreError, CoreResult};
use crate::mapping::{ChildMapping, EntityMapping, FieldRule, Transform};
use crate::types::RemoteService;

/// Names accepted by [`by_name`].
pub const MAPPING_NAMES: &[&str] = &["items", "contacts", "sales_orders", "invoices", "crm_accounts"];

/// Storage table holding synced sales-order line items.
pub const LINE_ITEMS_TABLE: &str = "sales_order_line_items";

/// Looks up a built-in mapping by its table name.
pub fn by_name(name: &str) -> CoreResult<EntityMapping> {
    match name {
        "items" => items(),
        "contacts" => contacts(),
        "sales_orders" => sales_orders(),
        "invoices" => invoices(),
        "crm_accounts" => crm_accounts(),
        other => Err(CoreError::UnknownMapping(other.to_string())),
    }
}

/// Inventory items.
pub fn items() -> CoreResult<EntityMapping> {
    EntityMapping::builder("items", "item_id")
        .resource(RemoteService::Inventory, "items", "items")
        .field("item_id", FieldRule::new("item_id").with(Transform::Text))
        .field("name", FieldRule::new("name").required().with(Transform::Trimmed))
        .field("sku", FieldRule::new("sku").with(Transform::Trimmed))
        .field("status", FieldRule::new("status").with(Transform::Lowercase))
        .field("unit", FieldRule::new("unit").with(Transform::Trimmed))
        .field("rate", FieldRule::new("rate").with(Transform::Decimal))
        .field("purchase_rate", FieldRule::new("purchase_rate").with(Transform::Decimal))
        .field("stock_on_hand", FieldRule::new("stock_on_hand").with(Transform::Decimal))
        .field("reorder_level", FieldRule::new("reorder_level").with(Transform::Decimal))
        .field("is_taxable", FieldRule::new("is_taxable").with(Transform::Boolean))
        .field("last_modified_time", FieldRule::new("remote_modified_at").with(Transform::Timestamp))
        .drop_field("image_document_id")
        .drop_field("image_name")
        .build()
}

/// Books contacts (customers and vendors).
pub fn contacts() -> CoreResult<EntityMapping> {
    EntityMapping::builder("contacts", "contact_id")
        .resource(RemoteService::Books, "contacts", "contacts")
        .field("contact_id", FieldRule::new("contact_id").with(Transform::Text))
        .field("contact_name", FieldRule::new("name").required().with(Transform::Trimmed))
        .field("company_name", FieldRule::new("company_name").with(Transform::Trimmed))
        .field("contact_type", FieldRule::new("contact_type").with(Transform::Lowercase))
        .field("email", FieldRule::new("email").with(Transform::Lowercase))
        .field("phone", FieldRule::new("phone").with(Transform::Trimmed))
        .field("status", FieldRule::new("status").with(Transform::Lowercase))
        .field(
            "outstanding_receivable_amount",
            FieldRule::new("outstanding_receivable").with(Transform::Decimal),
        )
        .field("currency_code", FieldRule::new("currency_code").with(Transform::Text))
        .field("last_modified_time", FieldRule::new("remote_modified_at").with(Transform::Timestamp))
        .drop_field("custom_fields")
        .build()
}

/// Line items nested under a sales order.
///
/// Carries the order id, date and customer of its parent so the reorder
/// loader can window on `date` without a join.
pub fn sales_order_line_items() -> CoreResult<EntityMapping> {
    EntityMapping::builder(LINE_ITEMS_TABLE, "line_item_id")
        .field("line_item_id", FieldRule::new("line_item_id").with(Transform::Text))
        .field("item_id", FieldRule::new("item_id").required().with(Transform::Text))
        .field("name", FieldRule::new("name").with(Transform::Trimmed))
        .field("sku", FieldRule::new("sku").with(Transform::Trimmed))
        .field("quantity", FieldRule::new("quantity").required().with(Transform::Decimal))
        .field("rate", FieldRule::new("rate").with(Transform::Decimal))
        .field("item_total", FieldRule::new("item_total").with(Transform::Decimal))
        .build()
}

/// Inventory sales orders, with their line items as a child collection.
pub fn sales_orders() -> CoreResult<EntityMapping> {
    let line_items = ChildMapping::new("line_items", sales_order_line_items()?)
        .parent_key("salesorder_id", "salesorder_id")
        .parent_key("date", "date")
        .parent_key("customer_id", "customer_id");

    EntityMapping::builder("sales_orders", "salesorder_id")
        .resource(RemoteService::Inventory, "salesorders", "salesorders")
        .field("salesorder_id", FieldRule::new("salesorder_id").with(Transform::Text))
        .field(
            "salesorder_number",
            FieldRule::new("salesorder_number").required().with(Transform::Trimmed),
        )
        .field("date", FieldRule::new("date").required().with(Transform::Date))
        .field("customer_id", FieldRule::new("customer_id").with(Transform::Text))
        .field("customer_name", FieldRule::new("customer_name").with(Transform::Trimmed))
        .field("status", FieldRule::new("status").with(Transform::Lowercase))
        .field("total", FieldRule::new("total").with(Transform::Decimal))
        .field("currency_code", FieldRule::new("currency_code").with(Transform::Text))
        .field("last_modified_time", FieldRule::new("remote_modified_at").with(Transform::Timestamp))
        .drop_field("line_items")
        .child(line_items)
        .build()
}

/// Books invoices.
pub fn invoices() -> CoreResult<EntityMapping> {
    EntityMapping::builder("invoices", "invoice_id")
        .resource(RemoteService::Books, "invoices", "invoices")
        .field("invoice_id", FieldRule::new("invoice_id").with(Transform::Text))
        .field(
            "invoice_number",
            FieldRule::new("invoice_number").required().with(Transform::Trimmed),
        )
        .field("customer_id", FieldRule::new("customer_id").required().with(Transform::Text))
        .field("date", FieldRule::new("date").with(Transform::Date))
        .field("due_date", FieldRule::new("due_date").with(Transform::Date))
        .field("status", FieldRule::new("status").with(Transform::Lowercase))
        .field("total", FieldRule::new("total").with(Transform::Decimal))
        .field("balance", FieldRule::new("balance").with(Transform::Decimal))
        .field("last_modified_time", FieldRule::new("remote_modified_at").with(Transform::Timestamp))
        .build()
}

/// CRM accounts.
pub fn crm_accounts() -> CoreResult<EntityMapping> {
    EntityMapping::builder("crm_accounts", "id")
        .resource(RemoteService::Crm, "Accounts", "data")
        .field("id", FieldRule::new("account_id").with(Transform::Text))
        .field("Account_Name", FieldRule::new("name").required().with(Transform::Trimmed))
        .field("Website", FieldRule::new("website").with(Transform::Trimmed))
        .field("Phone", FieldRule::new("phone").with(Transform::Trimmed))
        .field("Industry", FieldRule::new("industry").with(Transform::Trimmed))
        .field("Annual_Revenue", FieldRule::new("annual_revenue").with(Transform::Decimal))
        .field("Employees", FieldRule::new("employees").with(Transform::Integer))
        .field("Modified_Time", FieldRule::new("remote_modified_at").with(Transform::Timestamp))
        .field("source", FieldRule::new("source").with(Transform::Constant("crm".into())))
        .build()
}
