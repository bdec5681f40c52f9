use serde_json::Value as JsonValue;

use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::{LowStock, PRODUCT_AGGREGATE_TYPE, StockNotification, StockUpdated};

use super::{NotificationSink, NotifyError};

/// Publishes notifications as JSON envelopes on an [`EventBus`].
///
/// The envelope sequence number is the product version the notification was
/// derived from, so consumers can drop redeliveries.
#[derive(Debug)]
pub struct BusSink<B> {
    bus: B,
}

impl<B> BusSink<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn into_inner(self) -> B {
        self.bus
    }
}

impl<B> BusSink<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn publish(&self, notification: StockNotification) -> Result<(), NotifyError> {
        let envelope = EventEnvelope::for_event(
            notification.product_id().0,
            PRODUCT_AGGREGATE_TYPE,
            notification.product_version(),
            notification,
        );
        let envelope = envelope_to_json(envelope)?;
        self.bus
            .publish(envelope)
            .map_err(|e| NotifyError::Delivery(format!("{e:?}")))
    }
}

fn envelope_to_json(
    envelope: EventEnvelope<StockNotification>,
) -> Result<EventEnvelope<JsonValue>, NotifyError> {
    let payload = serde_json::to_value(envelope.payload())
        .map_err(|e| NotifyError::Encode(e.to_string()))?;
    Ok(envelope.map_payload(|_| payload))
}

impl<B> NotificationSink for BusSink<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn on_stock_update(&self, event: &StockUpdated) -> Result<(), NotifyError> {
        self.publish(StockNotification::StockUpdated(event.clone()))
    }

    fn on_low_stock(&self, event: &LowStock) -> Result<(), NotifyError> {
        self.publish(StockNotification::LowStock(event.clone()))
    }
}
