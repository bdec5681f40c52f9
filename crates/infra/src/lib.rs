//! Infrastructure layer: ledger stores, the adjustment engine, notification
//! delivery, queries, projections and configuration.

pub mod config;
pub mod engine;
pub mod event_bus;
pub mod ledger_store;
pub mod notification;
pub mod projections;
pub mod queries;


pub use config::{ConfigError, LedgerConfig, NotificationMode};
pub use engine::{LedgerError, StockLedgerEngine};
pub use ledger_store::{
    InMemoryLedgerStore, LedgerStore, LedgerStoreError, Page, Pagination, PostgresLedgerStore,
    TransactionFilter, TransactionView,
};
pub use notification::{BusSink, LocalBus, LoggingSink, NoopSink, NotificationSink, NotifyError, build_sink};
pub use projections::{ProjectionError, StockLevelProjection};
pub use queries::{LedgerQueries, Reconciliation};
