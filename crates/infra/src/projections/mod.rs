//! Read models built from published stock notifications.
//!
//! Projections are:
//! - **Rebuildable**: reconstructed by replaying envelopes
//! - **Idempotent**: safe for at-least-once delivery

pub mod stock_levels;

pub use stock_levels::{LowStockAlert, ProjectionError, StockLevel, StockLevelProjection};
