//! Read-only views over the stock ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockledger_inventory::{ProductId, TransactionKind, derived_stock};

use crate::engine::LedgerError;
use crate::ledger_store::{LedgerStore, Page, Pagination, TransactionFilter, TransactionView};

/// Rows returned by [`LedgerQueries::recent_history`].
pub const RECENT_HISTORY_LIMIT: u32 = 100;

/// Outcome of replaying a product's ledger against its cached stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub product_id: ProductId,
    pub opening_stock: i64,
    pub cached_stock: i64,
    pub derived_stock: i64,
    pub ledger_rows: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.cached_stock == self.derived_stock
    }
}

/// Query surface over a [`LedgerStore`]. All pages are most recent first.
#[derive(Debug, Clone)]
pub struct LedgerQueries<S> {
    store: S,
}

impl<S> LedgerQueries<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Paged history of one product. `NotFound` when the product does not exist.
    #[instrument(skip(self), err)]
    pub fn history(
        &self,
        product_id: ProductId,
        pagination: Pagination,
    ) -> Result<Page<TransactionView>, LedgerError> {
        self.ensure_product(product_id)?;
        Ok(self
            .store
            .query_transactions(&TransactionFilter::for_product(product_id), pagination)?)
    }

    /// The latest [`RECENT_HISTORY_LIMIT`] rows of one product.
    pub fn recent_history(&self, product_id: ProductId) -> Result<Vec<TransactionView>, LedgerError> {
        Ok(self
            .history(product_id, Pagination::first(RECENT_HISTORY_LIMIT))?
            .items)
    }

    pub fn all(&self, pagination: Pagination) -> Result<Page<TransactionView>, LedgerError> {
        Ok(self
            .store
            .query_transactions(&TransactionFilter::default(), pagination)?)
    }

    pub fn by_kind(
        &self,
        kind: TransactionKind,
        pagination: Pagination,
    ) -> Result<Page<TransactionView>, LedgerError> {
        Ok(self
            .store
            .query_transactions(&TransactionFilter::for_kind(kind), pagination)?)
    }

    /// Rows created within `[from, to]`, both ends inclusive.
    pub fn by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        pagination: Pagination,
    ) -> Result<Page<TransactionView>, LedgerError> {
        if from > to {
            return Err(LedgerError::Validation(format!(
                "date range start {from} is after end {to}"
            )));
        }
        Ok(self
            .store
            .query_transactions(&TransactionFilter::between(from, to), pagination)?)
    }

    /// Total quantity moved for one product and kind; 0 when there are no rows.
    pub fn sum_quantity(
        &self,
        product_id: ProductId,
        kind: TransactionKind,
    ) -> Result<i64, LedgerError> {
        Ok(self.store.sum_quantity(product_id, kind)?)
    }

    /// Replay the full ledger of a product and compare with its cached stock.
    #[instrument(skip(self), err)]
    pub fn reconcile(&self, product_id: ProductId) -> Result<Reconciliation, LedgerError> {
        let product = self
            .store
            .get_product(product_id)?
            .ok_or(LedgerError::NotFound(product_id))?;
        let ledger = self.store.load_ledger(product_id)?;

        let report = Reconciliation {
            product_id,
            opening_stock: product.opening_stock(),
            cached_stock: product.current_stock(),
            derived_stock: derived_stock(product.opening_stock(), &ledger),
            ledger_rows: ledger.len(),
        };
        if !report.is_consistent() {
            tracing::error!(
                %product_id,
                cached_stock = report.cached_stock,
                derived_stock = report.derived_stock,
                "cached stock disagrees with ledger"
            );
        }
        Ok(report)
    }

    fn ensure_product(&self, product_id: ProductId) -> Result<(), LedgerError> {
        match self.store.get_product(product_id)? {
            Some(_) => Ok(()),
            None => Err(LedgerError::NotFound(product_id)),
        }
    }
}
