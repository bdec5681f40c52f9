//! Stock domain module.
//!
//! Business rules for per-product stock and its ledger, implemented purely as
//! deterministic domain logic (no IO, no storage, no clocks).
//!
//! A [`Product`] is the aggregate; every accepted [`StockCommand`] yields exactly
//! one [`StockTransaction`] (a ledger row), and applying that row is the only way
//! the cached current stock changes.

pub mod adjustment;
pub mod notification;
pub mod product;
pub mod transaction;

pub use adjustment::{
    Actor, MAX_ACTOR_LEN, MAX_NOTE_LEN, MAX_REFERENCE_LEN, MoveStock, Quantity, StockAdjustment,
    StockCommand,
};
pub use notification::{LowStock, StockNotification, StockUpdated, notifications_for};
pub use product::{
    DEFAULT_REORDER_LEVEL, NewProduct, PRODUCT_AGGREGATE_TYPE, Product, ProductId, ProductRecord,
    ProductView, is_low_stock,
};
pub use transaction::{StockTransaction, TransactionKind, derived_stock};
