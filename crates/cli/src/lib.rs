//! Batch driver for the stock ledger: reads products and adjustments as JSON
//! and applies them through the engine.

pub mod batch;

pub use batch::{AdjustmentOutcome, Batch, BatchAdjustment, BatchReport, Direction, apply_batch};
