//! Read-side types for ledger queries.
//!
//! All transaction queries are paged and return the most recent rows first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_inventory::{ProductId, StockTransaction, TransactionKind};

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest page a caller can ask for.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Page index, starting at 0.
    pub page: u32,
    /// Rows per page (at least 1).
    pub size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn new(page: Option<u32>, size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(0),
            size: size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// First page of `size` rows.
    pub fn first(size: u32) -> Self {
        Self::new(None, Some(size))
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.size)
    }
}

/// Filter criteria for transaction queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub product_id: Option<ProductId>,
    pub kind: Option<TransactionKind>,
    /// Inclusive lower bound on `created_at`.
    pub occurred_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub occurred_to: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    pub fn for_kind(kind: TransactionKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            occurred_from: Some(from),
            occurred_to: Some(to),
            ..Default::default()
        }
    }

    pub fn matches(&self, row: &StockTransaction) -> bool {
        self.product_id.is_none_or(|id| row.product_id == id)
            && self.kind.is_none_or(|k| row.kind == k)
            && self.occurred_from.is_none_or(|from| row.created_at >= from)
            && self.occurred_to.is_none_or(|to| row.created_at <= to)
    }
}

/// A ledger row joined with the product it moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: StockTransaction,
    pub product_name: String,
    pub product_sku: String,
}

/// One page of results plus the metadata callers need to walk the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
    pub first: bool,
    pub last: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, pagination: Pagination, total_elements: u64) -> Self {
        let size = u64::from(pagination.size.max(1));
        let total_pages = total_elements.div_ceil(size);
        let page = u64::from(pagination.page);
        Self {
            items,
            page: pagination.page,
            size: pagination.size,
            total_elements,
            total_pages,
            first: page == 0,
            last: page + 1 >= total_pages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
            first: self.first,
            last: self.last,
        }
    }
}
