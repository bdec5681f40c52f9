//! JSON batch format and its application through the engine.

use serde::{Deserialize, Serialize};

use stockledger_infra::{LedgerError, LedgerQueries, LedgerStore, NotificationSink, Reconciliation, StockLedgerEngine};
use stockledger_inventory::{NewProduct, ProductId, ProductView, StockAdjustment};

/// Products to register, then adjustments to apply in order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub products: Vec<NewProduct>,
    #[serde(default)]
    pub adjustments: Vec<BatchAdjustment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchAdjustment {
    pub direction: Direction,
    #[serde(flatten)]
    pub adjustment: StockAdjustment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdjustmentOutcome {
    Applied {
        index: usize,
        direction: Direction,
        product: ProductView,
    },
    Rejected {
        index: usize,
        direction: Direction,
        reason: &'static str,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub products_created: usize,
    pub outcomes: Vec<AdjustmentOutcome>,
    pub low_stock: Vec<ProductView>,
    pub reconciliations: Vec<Reconciliation>,
}

impl BatchReport {
    pub fn rejected(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, AdjustmentOutcome::Rejected { .. }))
            .count()
    }
}

/// Apply a batch.
///
/// Business rejections are recorded per adjustment and the batch continues.
/// A store failure stops the batch and is returned as-is.
pub fn apply_batch<S, N>(
    engine: &StockLedgerEngine<S, N>,
    queries: &LedgerQueries<S>,
    batch: Batch,
) -> Result<BatchReport, LedgerError>
where
    S: LedgerStore,
    N: NotificationSink,
{
    let mut touched: Vec<ProductId> = Vec::new();

    for new in batch.products {
        touched.push(new.id);
        engine.create_product(new)?;
    }
    let products_created = touched.len();

    let mut outcomes = Vec::with_capacity(batch.adjustments.len());
    for (index, BatchAdjustment { direction, adjustment }) in batch.adjustments.into_iter().enumerate() {
        let product_id = adjustment.product_id;
        let result = match direction {
            Direction::Add => engine.add_stock(adjustment),
            Direction::Remove => engine.remove_stock(adjustment),
        };
        match result {
            Ok(product) => {
                if !touched.contains(&product_id) {
                    touched.push(product_id);
                }
                outcomes.push(AdjustmentOutcome::Applied {
                    index,
                    direction,
                    product,
                });
            }
            Err(LedgerError::StoreFailure(e)) => return Err(LedgerError::StoreFailure(e)),
            Err(e) => outcomes.push(AdjustmentOutcome::Rejected {
                index,
                direction,
                reason: reason(&e),
                error: e.to_string(),
            }),
        }
    }

    let reconciliations = touched
        .into_iter()
        .map(|id| queries.reconcile(id))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BatchReport {
        products_created,
        outcomes,
        low_stock: engine.list_low_stock()?,
        reconciliations,
    })
}

fn reason(err: &LedgerError) -> &'static str {
    match err {
        LedgerError::NotFound(_) => "not_found",
        LedgerError::InsufficientStock { .. } => "insufficient_stock",
        LedgerError::Validation(_) => "validation",
        LedgerError::StoreFailure(_) => "store_failure",
    }
}
