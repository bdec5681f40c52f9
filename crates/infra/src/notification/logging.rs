use stockledger_inventory::{LowStock, StockUpdated};

use super::{NotificationSink, NotifyError};

/// Writes notifications as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl LoggingSink {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationSink for LoggingSink {
    fn on_stock_update(&self, event: &StockUpdated) -> Result<(), NotifyError> {
        tracing::info!(
            product_id = %event.product_id,
            product = %event.name,
            previous_stock = event.previous_stock,
            new_stock = event.new_stock,
            kind = %event.kind,
            "stock updated"
        );
        Ok(())
    }

    fn on_low_stock(&self, event: &LowStock) -> Result<(), NotifyError> {
        tracing::warn!(
            product_id = %event.product_id,
            product = %event.name,
            current_stock = event.current_stock,
            reorder_level = event.reorder_level,
            "low stock"
        );
        Ok(())
    }
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn on_stock_update(&self, _event: &StockUpdated) -> Result<(), NotifyError> {
        Ok(())
    }

    fn on_low_stock(&self, _event: &LowStock) -> Result<(), NotifyError> {
        Ok(())
    }
}
