//! Notifications derived from committed stock movements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::AggregateRoot;
use stockledger_events::Event;

use crate::product::{Product, ProductId};
use crate::transaction::{StockTransaction, TransactionKind};

/// Stock changed for a product.
///
/// `product_version` is the product's version after the commit, one per ledger
/// row, so consumers can order and de-duplicate deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdated {
    pub product_id: ProductId,
    pub product_version: u64,
    pub name: String,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub kind: TransactionKind,
    pub occurred_at: DateTime<Utc>,
}

/// A removal left a product at or below its reorder level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStock {
    pub product_id: ProductId,
    pub product_version: u64,
    pub name: String,
    pub current_stock: i64,
    pub reorder_level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockNotification {
    StockUpdated(StockUpdated),
    LowStock(LowStock),
}

impl StockNotification {
    pub fn product_id(&self) -> ProductId {
        match self {
            StockNotification::StockUpdated(e) => e.product_id,
            StockNotification::LowStock(e) => e.product_id,
        }
    }

    pub fn product_version(&self) -> u64 {
        match self {
            StockNotification::StockUpdated(e) => e.product_version,
            StockNotification::LowStock(e) => e.product_version,
        }
    }
}

impl Event for StockNotification {
    fn event_type(&self) -> &'static str {
        match self {
            StockNotification::StockUpdated(_) => "inventory.stock.updated",
            StockNotification::LowStock(_) => "inventory.stock.low",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockNotification::StockUpdated(e) => e.occurred_at,
            StockNotification::LowStock(e) => e.occurred_at,
        }
    }
}

/// Notifications owed for a committed ledger row, in delivery order.
///
/// `product` is the post-commit state. The low-stock check only runs for
/// removals: a restock that still leaves the product low does not alert.
pub fn notifications_for(
    previous_stock: i64,
    product: &Product,
    row: &StockTransaction,
) -> Vec<StockNotification> {
    let mut out = vec![StockNotification::StockUpdated(StockUpdated {
        product_id: product.id_typed(),
        product_version: product.version(),
        name: product.name().to_string(),
        previous_stock,
        new_stock: product.current_stock(),
        kind: row.kind,
        occurred_at: row.created_at,
    })];

    if row.kind == TransactionKind::StockOut && product.is_low_stock() {
        out.push(StockNotification::LowStock(LowStock {
            product_id: product.id_typed(),
            product_version: product.version(),
            name: product.name().to_string(),
            current_stock: product.current_stock(),
            reorder_level: product.reorder_level(),
            occurred_at: row.created_at,
        }));
    }

    out
}
