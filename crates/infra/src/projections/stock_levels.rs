use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockledger_events::{EventEnvelope, Subscription};
use stockledger_inventory::{ProductId, StockNotification, TransactionKind};

/// Queryable stock read model: latest known stock per product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub name: String,
    pub current_stock: i64,
    pub last_kind: TransactionKind,
    pub updated_at: DateTime<Utc>,
    /// Set while the latest low-stock alert is newer than the latest update
    /// that cleared it.
    pub low_stock_alert: Option<LowStockAlert>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowStockAlert {
    pub current_stock: i64,
    pub reorder_level: i64,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("failed to deserialize stock notification: {0}")]
    Deserialize(String),

    #[error("envelope for {envelope} carries a notification for {payload}")]
    AggregateMismatch {
        envelope: ProductId,
        payload: ProductId,
    },

    #[error("sequence number 0 is never valid")]
    ZeroSequence,

    #[error("projection state lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    updated: u64,
    low_stock: u64,
}

#[derive(Debug, Default)]
struct State {
    levels: HashMap<ProductId, StockLevel>,
    cursors: HashMap<ProductId, Cursor>,
}

/// Stock level projection.
///
/// Consumes notification envelopes (JSON payloads) from an event bus. The
/// envelope sequence number is the product version, so:
///
/// - replays (sequence ≤ cursor) are ignored, making the projection safe
///   under at-least-once delivery;
/// - gaps are accepted, since pub/sub transports may drop messages and the
///   next update carries the absolute stock anyway.
#[derive(Debug, Default)]
pub struct StockLevelProjection {
    state: RwLock<State>,
}

impl StockLevelProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, product_id: ProductId) -> Option<StockLevel> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.levels.get(&product_id).cloned())
    }

    pub fn list(&self) -> Vec<StockLevel> {
        self.state
            .read()
            .map(|s| s.levels.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Products whose latest notification was a low-stock alert.
    pub fn alerting(&self) -> Vec<StockLevel> {
        self.list()
            .into_iter()
            .filter(|l| l.low_stock_alert.is_some())
            .collect()
    }

    /// Apply one published envelope. Returns whether it changed anything.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, ProjectionError> {
        let seq = envelope.sequence_number();
        if seq == 0 {
            return Err(ProjectionError::ZeroSequence);
        }

        let notification: StockNotification = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let product_id = ProductId::new(envelope.aggregate_id());
        if notification.product_id() != product_id {
            return Err(ProjectionError::AggregateMismatch {
                envelope: product_id,
                payload: notification.product_id(),
            });
        }

        let mut state = self.state.write().map_err(|_| ProjectionError::Poisoned)?;
        let State { levels, cursors } = &mut *state;
        let cursor = cursors.entry(product_id).or_default();

        match notification {
            StockNotification::StockUpdated(e) => {
                if seq <= cursor.updated {
                    return Ok(false);
                }
                let level = levels.entry(product_id).or_insert_with(|| StockLevel {
                    product_id,
                    name: String::new(),
                    current_stock: 0,
                    last_kind: e.kind,
                    updated_at: e.occurred_at,
                    low_stock_alert: None,
                });
                level.name = e.name;
                level.current_stock = e.new_stock;
                level.last_kind = e.kind;
                level.updated_at = e.occurred_at;
                // An alert from an older version no longer describes the stock.
                if cursor.low_stock < seq {
                    level.low_stock_alert = None;
                }
                cursor.updated = seq;
            }
            StockNotification::LowStock(e) => {
                if seq <= cursor.low_stock || seq < cursor.updated {
                    return Ok(false);
                }
                let level = levels.entry(product_id).or_insert_with(|| StockLevel {
                    product_id,
                    name: e.name.clone(),
                    current_stock: e.current_stock,
                    last_kind: TransactionKind::StockOut,
                    updated_at: e.occurred_at,
                    low_stock_alert: None,
                });
                level.low_stock_alert = Some(LowStockAlert {
                    current_stock: e.current_stock,
                    reorder_level: e.reorder_level,
                    raised_at: e.occurred_at,
                });
                cursor.low_stock = seq;
            }
        }

        Ok(true)
    }

    /// Apply everything already queued on a subscription.
    ///
    /// Envelopes that fail to apply are logged and skipped; one malformed
    /// message must not stall the consumer.
    pub fn catch_up(&self, subscription: &Subscription<EventEnvelope<JsonValue>>) -> usize {
        let mut applied = 0;
        for envelope in subscription.drain() {
            match self.apply_envelope(&envelope) {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    error = %e,
                    event_id = %envelope.event_id(),
                    "skipping notification envelope"
                ),
            }
        }
        applied
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        {
            let mut state = self.state.write().map_err(|_| ProjectionError::Poisoned)?;
            *state = State::default();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        // Deterministic replay order: aggregate, then sequence.
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_inventory::{LowStock, PRODUCT_AGGREGATE_TYPE, StockUpdated};

    fn envelope(n: StockNotification) -> EventEnvelope<JsonValue> {
        let env = EventEnvelope::for_event(
            n.product_id().0,
            PRODUCT_AGGREGATE_TYPE,
            n.product_version(),
            n,
        );
        let payload = serde_json::to_value(env.payload()).unwrap();
        env.map_payload(|_| payload)
    }

    fn updated(id: ProductId, version: u64, new_stock: i64) -> EventEnvelope<JsonValue> {
        envelope(StockNotification::StockUpdated(StockUpdated {
            product_id: id,
            product_version: version,
            name: "Widget".to_string(),
            previous_stock: 0,
            new_stock,
            kind: TransactionKind::StockOut,
            occurred_at: Utc::now(),
        }))
    }

    fn low(id: ProductId, version: u64, current_stock: i64) -> EventEnvelope<JsonValue> {
        envelope(StockNotification::LowStock(LowStock {
            product_id: id,
            product_version: version,
            name: "Widget".to_string(),
            current_stock,
            reorder_level: 10,
            occurred_at: Utc::now(),
        }))
    }

    #[test]
    fn replays_are_ignored() {
        let p = StockLevelProjection::new();
        let id = ProductId::generate();

        assert!(p.apply_envelope(&updated(id, 1, 50)).unwrap());
        assert!(p.apply_envelope(&updated(id, 2, 40)).unwrap());
        assert!(!p.apply_envelope(&updated(id, 1, 50)).unwrap());
        assert!(!p.apply_envelope(&updated(id, 2, 40)).unwrap());

        assert_eq!(p.get(id).unwrap().current_stock, 40);
    }

    #[test]
    fn low_stock_alert_shares_the_update_version() {
        let p = StockLevelProjection::new();
        let id = ProductId::generate();

        p.apply_envelope(&updated(id, 3, 5)).unwrap();
        assert!(p.apply_envelope(&low(id, 3, 5)).unwrap());
        assert!(!p.apply_envelope(&low(id, 3, 5)).unwrap());

        let alert = p.get(id).unwrap().low_stock_alert.unwrap();
        assert_eq!((alert.current_stock, alert.reorder_level), (5, 10));
        assert_eq!(p.alerting().len(), 1);

        // A later restock clears it.
        p.apply_envelope(&updated(id, 4, 50)).unwrap();
        assert!(p.get(id).unwrap().low_stock_alert.is_none());
    }

    #[test]
    fn stale_alert_after_newer_update_is_ignored() {
        let p = StockLevelProjection::new();
        let id = ProductId::generate();

        p.apply_envelope(&updated(id, 5, 80)).unwrap();
        assert!(!p.apply_envelope(&low(id, 4, 3)).unwrap());
        assert!(p.get(id).unwrap().low_stock_alert.is_none());
    }

    #[test]
    fn rejects_bad_envelopes() {
        let p = StockLevelProjection::new();
        let id = ProductId::generate();

        let original = updated(id, 1, 1);
        let rerouted = EventEnvelope::new(
            original.event_id(),
            ProductId::generate().0,
            original.aggregate_type(),
            1,
            original.event_type(),
            original.payload().clone(),
        );
        match p.apply_envelope(&rerouted).unwrap_err() {
            ProjectionError::AggregateMismatch { .. } => {}
            other => panic!("expected mismatch, got {other:?}"),
        }

        let zero = updated(id, 0, 1);
        assert_eq!(p.apply_envelope(&zero).unwrap_err(), ProjectionError::ZeroSequence);

        let junk = EventEnvelope::new(
            uuid::Uuid::now_v7(),
            id.0,
            PRODUCT_AGGREGATE_TYPE,
            1,
            "something.else",
            serde_json::json!({"hello": "world"}),
        );
        match p.apply_envelope(&junk).unwrap_err() {
            ProjectionError::Deserialize(_) => {}
            other => panic!("expected deserialize error, got {other:?}"),
        }
    }

    #[test]
    fn rebuild_is_order_independent() {
        let id = ProductId::generate();
        let envs = vec![low(id, 2, 4), updated(id, 2, 4), updated(id, 1, 30)];

        let p = StockLevelProjection::new();
        p.rebuild_from_scratch(envs).unwrap();

        let level = p.get(id).unwrap();
        assert_eq!(level.current_stock, 4);
        assert!(level.low_stock_alert.is_some());
    }
}
