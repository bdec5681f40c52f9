use std::sync::Arc;

use thiserror::Error;

use stockledger_core::ExpectedVersion;
use stockledger_inventory::{Product, ProductId, StockTransaction, TransactionKind};

use super::query::{Page, Pagination, TransactionFilter, TransactionView};

/// Ledger store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, integrity) as
/// opposed to domain errors (validation, insufficient stock).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerStoreError {
    /// Optimistic concurrency check failed (the product moved underneath us).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A unique key (product id or SKU) is already taken.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// The product row a write targets does not exist.
    #[error("missing product: {0}")]
    MissingProduct(String),

    /// The write would break a stored invariant, or a stored row is malformed.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// IO, pool, runtime or driver failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Durable home of product stock and the stock ledger.
///
/// ## Atomicity
///
/// `save_product_and_transaction()` is the only write the engine performs. It
/// must make the product row update and the ledger row insert visible together
/// or not at all, and it must reject the write when the stored product version
/// does not match `expected_version`.
///
/// ## Ledger rows
///
/// Rows are append-only. Nothing on this trait updates or deletes them.
///
/// ## Ordering
///
/// Paged queries return the most recent rows first (creation time, then insert
/// order). `list_low_stock()` makes no ordering promise.
pub trait LedgerStore: Send + Sync {
    /// Insert a product created by the catalog.
    fn create_product(&self, product: &Product) -> Result<(), LedgerStoreError>;

    /// Fetch the current state of a product.
    fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, LedgerStoreError>;

    /// Persist the post-adjustment product and its ledger row in one atomic unit.
    fn save_product_and_transaction(
        &self,
        product: &Product,
        row: &StockTransaction,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError>;

    /// Every product satisfying `is_low_stock`.
    fn list_low_stock(&self) -> Result<Vec<Product>, LedgerStoreError>;

    /// Filtered, paged ledger rows, most recent first.
    fn query_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<TransactionView>, LedgerStoreError>;

    /// Sum of quantities for one product and kind (0 when there are none).
    fn sum_quantity(
        &self,
        product_id: ProductId,
        kind: TransactionKind,
    ) -> Result<i64, LedgerStoreError>;

    /// Full ledger of one product in commit order (oldest first).
    fn load_ledger(&self, product_id: ProductId) -> Result<Vec<StockTransaction>, LedgerStoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn create_product(&self, product: &Product) -> Result<(), LedgerStoreError> {
        (**self).create_product(product)
    }

    fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, LedgerStoreError> {
        (**self).get_product(product_id)
    }

    fn save_product_and_transaction(
        &self,
        product: &Product,
        row: &StockTransaction,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        (**self).save_product_and_transaction(product, row, expected_version)
    }

    fn list_low_stock(&self) -> Result<Vec<Product>, LedgerStoreError> {
        (**self).list_low_stock()
    }

    fn query_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<TransactionView>, LedgerStoreError> {
        (**self).query_transactions(filter, pagination)
    }

    fn sum_quantity(
        &self,
        product_id: ProductId,
        kind: TransactionKind,
    ) -> Result<i64, LedgerStoreError> {
        (**self).sum_quantity(product_id, kind)
    }

    fn load_ledger(&self, product_id: ProductId) -> Result<Vec<StockTransaction>, LedgerStoreError> {
        (**self).load_ledger(product_id)
    }
}

/// Checks every backend applies before writing, so a buggy caller cannot
/// persist a row that disagrees with the product it claims to move.
pub(crate) fn check_adjustment_write(
    product: &Product,
    row: &StockTransaction,
    stored_version: u64,
    expected_version: ExpectedVersion,
) -> Result<(), LedgerStoreError> {
    use stockledger_core::AggregateRoot;

    if !expected_version.matches(stored_version) {
        return Err(LedgerStoreError::Concurrency(format!(
            "product {}: expected {expected_version:?}, found {stored_version}",
            product.id_typed()
        )));
    }
    if row.product_id != product.id_typed() {
        return Err(LedgerStoreError::InvalidRecord(format!(
            "ledger row targets {}, product is {}",
            row.product_id,
            product.id_typed()
        )));
    }
    if product.version() != stored_version + 1 {
        return Err(LedgerStoreError::InvalidRecord(format!(
            "product {} must advance exactly one version (stored {stored_version}, new {})",
            product.id_typed(),
            product.version()
        )));
    }
    if product.current_stock() < 0 {
        return Err(LedgerStoreError::InvalidRecord(format!(
            "product {} would hold negative stock ({})",
            product.id_typed(),
            product.current_stock()
        )));
    }
    Ok(())
}
