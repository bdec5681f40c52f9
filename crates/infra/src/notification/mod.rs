//! Outbound stock notifications.
//!
//! The engine hands every committed movement to a [`NotificationSink`] after the
//! ledger write succeeds. Sinks are fire-and-forget from the engine's point of
//! view: an error is logged and the adjustment still stands.

pub mod bus;
pub mod logging;

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockledger_events::{EventEnvelope, InMemoryEventBus};
use stockledger_inventory::{LowStock, StockNotification, StockUpdated};

use crate::config::{ConfigError, LedgerConfig, NotificationMode};

pub use bus::BusSink;
pub use logging::{LoggingSink, NoopSink};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("failed to encode notification: {0}")]
    Encode(String),

    #[error("failed to deliver notification: {0}")]
    Delivery(String),
}

/// Receives stock notifications.
pub trait NotificationSink: Send + Sync {
    fn on_stock_update(&self, event: &StockUpdated) -> Result<(), NotifyError>;

    fn on_low_stock(&self, event: &LowStock) -> Result<(), NotifyError>;

    /// Route a notification to the matching callback.
    fn deliver(&self, notification: &StockNotification) -> Result<(), NotifyError> {
        match notification {
            StockNotification::StockUpdated(e) => self.on_stock_update(e),
            StockNotification::LowStock(e) => self.on_low_stock(e),
        }
    }
}

impl<S> NotificationSink for Arc<S>
where
    S: NotificationSink + ?Sized,
{
    fn on_stock_update(&self, event: &StockUpdated) -> Result<(), NotifyError> {
        (**self).on_stock_update(event)
    }

    fn on_low_stock(&self, event: &LowStock) -> Result<(), NotifyError> {
        (**self).on_low_stock(event)
    }
}

/// Envelope bus used for in-process delivery.
pub type LocalBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// Build the sink selected by configuration.
///
/// `local_bus` backs [`NotificationMode::Bus`]; callers subscribe to it to
/// receive notifications in-process.
pub fn build_sink(
    config: &LedgerConfig,
    local_bus: &Arc<LocalBus>,
) -> Result<Arc<dyn NotificationSink>, ConfigError> {
    let sink: Arc<dyn NotificationSink> = match config.notifier {
        NotificationMode::Log => Arc::new(LoggingSink::new()),
        NotificationMode::Noop => Arc::new(NoopSink),
        NotificationMode::Bus => Arc::new(BusSink::new(Arc::clone(local_bus))),
        NotificationMode::Redis => redis_sink(config)?,
    };
    tracing::info!(notifier = ?config.notifier, "notification sink ready");
    Ok(sink)
}

#[cfg(feature = "redis")]
fn redis_sink(config: &LedgerConfig) -> Result<Arc<dyn NotificationSink>, ConfigError> {
    use crate::config::ENV_REDIS_URL;
    use crate::event_bus::RedisPubSubEventBus;

    let redis = config.redis.as_ref().ok_or(ConfigError::Missing {
        var: ENV_REDIS_URL,
        because: "STOCK_LEDGER_NOTIFIER=redis",
    })?;
    let bus = RedisPubSubEventBus::new(&redis.url, redis.channel.clone()).map_err(|e| {
        ConfigError::Invalid {
            var: ENV_REDIS_URL,
            reason: e.to_string(),
        }
    })?;
    Ok(Arc::new(BusSink::new(bus)))
}

#[cfg(not(feature = "redis"))]
fn redis_sink(_config: &LedgerConfig) -> Result<Arc<dyn NotificationSink>, ConfigError> {
    Err(ConfigError::Unsupported("redis".to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_events::EventBus;

    #[test]
    fn builds_each_local_mode() {
        let bus = Arc::new(LocalBus::new());
        for mode in [NotificationMode::Log, NotificationMode::Noop, NotificationMode::Bus] {
            let config = LedgerConfig {
                notifier: mode,
                ..LedgerConfig::default()
            };
            assert!(build_sink(&config, &bus).is_ok());
        }
    }

    #[test]
    fn bus_mode_publishes_on_the_shared_bus() {
        let bus = Arc::new(LocalBus::new());
        let sub = bus.subscribe();
        let config = LedgerConfig {
            notifier: NotificationMode::Bus,
            ..LedgerConfig::default()
        };
        let sink = build_sink(&config, &bus).unwrap();

        sink.on_low_stock(&LowStock {
            product_id: stockledger_inventory::ProductId::generate(),
            product_version: 4,
            name: "Widget".to_string(),
            current_stock: 2,
            reorder_level: 10,
            occurred_at: chrono::Utc::now(),
        })
        .unwrap();

        let got = sub.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].event_type(), "inventory.stock.low");
        assert_eq!(got[0].sequence_number(), 4);
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn redis_mode_needs_the_feature() {
        let config = LedgerConfig {
            notifier: NotificationMode::Redis,
            ..LedgerConfig::default()
        };
        match build_sink(&config, &Arc::new(LocalBus::new())) {
            Err(ConfigError::Unsupported(_)) => {}
            _ => panic!("expected unsupported"),
        }
    }
}
