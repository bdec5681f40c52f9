use std::collections::HashMap;
use std::sync::RwLock;

use tracing::instrument;

use stockledger_core::{AggregateRoot, ExpectedVersion};
use stockledger_inventory::{Product, ProductId, ProductRecord, StockTransaction, TransactionKind};

use super::query::{Page, Pagination, TransactionFilter, TransactionView};
use super::r#trait::{LedgerStore, LedgerStoreError, check_adjustment_write};

#[derive(Debug, Clone)]
struct LedgerEntry {
    seq: u64,
    row: StockTransaction,
}

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, ProductRecord>,
    skus: HashMap<String, ProductId>,
    ledger: Vec<LedgerEntry>,
    next_seq: u64,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Every write takes the single write lock, so the
/// product update and ledger insert are trivially one atomic unit.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger rows across all products.
    pub fn ledger_len(&self) -> usize {
        self.state.read().map(|s| s.ledger.len()).unwrap_or(0)
    }

    fn poisoned() -> LedgerStoreError {
        LedgerStoreError::Backend("lock poisoned".to_string())
    }

    fn restore(record: &ProductRecord) -> Result<Product, LedgerStoreError> {
        Product::restore(record.clone())
            .map_err(|e| LedgerStoreError::InvalidRecord(e.to_string()))
    }

    fn view(state: &State, entry: &LedgerEntry) -> TransactionView {
        let (product_name, product_sku) = state
            .products
            .get(&entry.row.product_id)
            .map(|p| (p.name.clone(), p.sku.clone()))
            .unwrap_or_default();
        TransactionView {
            transaction: entry.row.clone(),
            product_name,
            product_sku,
        }
    }
}

impl LedgerStore for InMemoryLedgerStore {
    #[instrument(skip(self, product), fields(product_id = %product.id_typed()), err)]
    fn create_product(&self, product: &Product) -> Result<(), LedgerStoreError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;

        let id = product.id_typed();
        if state.products.contains_key(&id) {
            return Err(LedgerStoreError::Duplicate(format!("product {id} already exists")));
        }
        if state.skus.contains_key(product.sku()) {
            return Err(LedgerStoreError::Duplicate(format!(
                "sku {} already exists",
                product.sku()
            )));
        }

        state.skus.insert(product.sku().to_string(), id);
        state.products.insert(id, product.record());
        Ok(())
    }

    fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, LedgerStoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        state.products.get(&product_id).map(Self::restore).transpose()
    }

    #[instrument(
        skip(self, product, row),
        fields(product_id = %product.id_typed(), kind = %row.kind, expected_version = ?expected_version),
        err
    )]
    fn save_product_and_transaction(
        &self,
        product: &Product,
        row: &StockTransaction,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;

        let id = product.id_typed();
        let stored_version = state
            .products
            .get(&id)
            .map(|p| p.version)
            .ok_or_else(|| LedgerStoreError::MissingProduct(id.to_string()))?;

        check_adjustment_write(product, row, stored_version, expected_version)?;

        // All checks passed; nothing below can fail.
        let seq = state.next_seq;
        state.next_seq += 1;
        state.products.insert(id, product.record());
        state.ledger.push(LedgerEntry {
            seq,
            row: row.clone(),
        });

        tracing::debug!(version = product.version(), seq, "ledger row committed");
        Ok(())
    }

    fn list_low_stock(&self) -> Result<Vec<Product>, LedgerStoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        state
            .products
            .values()
            .filter(|p| stockledger_inventory::is_low_stock(p.current_stock, p.reorder_level))
            .map(Self::restore)
            .collect()
    }

    fn query_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<TransactionView>, LedgerStoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;

        let mut matching: Vec<&LedgerEntry> =
            state.ledger.iter().filter(|e| filter.matches(&e.row)).collect();
        matching.sort_by(|a, b| {
            b.row
                .created_at
                .cmp(&a.row.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(pagination.offset()).unwrap_or(usize::MAX))
            .take(pagination.size as usize)
            .map(|e| Self::view(&state, e))
            .collect();

        Ok(Page::new(items, pagination, total))
    }

    fn sum_quantity(
        &self,
        product_id: ProductId,
        kind: TransactionKind,
    ) -> Result<i64, LedgerStoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.row.product_id == product_id && e.row.kind == kind)
            .map(|e| e.row.quantity.get())
            .sum())
    }

    fn load_ledger(&self, product_id: ProductId) -> Result<Vec<StockTransaction>, LedgerStoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.row.product_id == product_id)
            .map(|e| e.row.clone())
            .collect())
    }
}
