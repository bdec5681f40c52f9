//! Persistence boundary for products and their stock ledger.
//!
//! The engine only ever talks to [`LedgerStore`]; backends decide how the
//! product update and the ledger insert become one atomic unit.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, Page, Pagination, TransactionFilter, TransactionView,
};
pub use r#trait::{LedgerStore, LedgerStoreError};
