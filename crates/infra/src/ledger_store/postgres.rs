//! Postgres-backed ledger store.
//!
//! ## Atomicity
//!
//! `save_product_and_transaction()` runs one SQL transaction: a conditional
//! `UPDATE products ... WHERE id = $1 AND version = $expected` followed by the
//! ledger `INSERT`. Zero updated rows means another writer got there first and
//! the transaction is rolled back.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerStoreError |
//! |------------|----------------------|------------------|
//! | Database (unique violation) | `23505` | `Duplicate` on create, `Concurrency` on save |
//! | Database (check constraint violation) | `23514` | `InvalidRecord` |
//! | Database (foreign key violation) | `23503` | `MissingProduct` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / other | N/A | `Backend` |
//!
//! ## Sync bridge
//!
//! [`LedgerStore`] is synchronous. The trait impl runs the async methods with
//! `block_in_place` + `Handle::block_on`, so it must be called from a
//! multi-threaded tokio runtime (or from a `spawn_blocking` task).

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use stockledger_core::{AggregateId, AggregateRoot, ExpectedVersion, TransactionId};
use stockledger_inventory::{
    Actor, Product, ProductId, ProductRecord, Quantity, StockTransaction, TransactionKind,
};

use super::query::{Page, Pagination, TransactionFilter, TransactionView};
use super::r#trait::{LedgerStore, LedgerStoreError, check_adjustment_write};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id             UUID PRIMARY KEY,
    name           VARCHAR(200) NOT NULL,
    sku            VARCHAR(50)  NOT NULL UNIQUE,
    current_stock  BIGINT       NOT NULL CHECK (current_stock >= 0),
    reorder_level  BIGINT       NOT NULL CHECK (reorder_level >= 0),
    opening_stock  BIGINT       NOT NULL CHECK (opening_stock >= 0),
    version        BIGINT       NOT NULL DEFAULT 0,
    created_at     TIMESTAMPTZ  NOT NULL,
    updated_at     TIMESTAMPTZ  NOT NULL
);

CREATE TABLE IF NOT EXISTS stock_transactions (
    seq               BIGSERIAL    PRIMARY KEY,
    id                UUID         NOT NULL UNIQUE,
    product_id        UUID         NOT NULL REFERENCES products (id),
    transaction_type  VARCHAR(20)  NOT NULL,
    quantity          BIGINT       NOT NULL CHECK (quantity >= 1),
    reference_number  VARCHAR(50),
    notes             VARCHAR(500),
    created_at        TIMESTAMPTZ  NOT NULL,
    created_by        VARCHAR(100) NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stock_transactions_product
    ON stock_transactions (product_id, created_at DESC, seq DESC);
CREATE INDEX IF NOT EXISTS idx_stock_transactions_created
    ON stock_transactions (created_at DESC, seq DESC);
"#;

const TRANSACTION_COLUMNS: &str = r#"
    t.id, t.product_id, t.transaction_type, t.quantity, t.reference_number,
    t.notes, t.created_at, t.created_by, p.name AS product_name, p.sku AS product_sku
"#;

const TRANSACTION_FILTER: &str = r#"
    ($1::uuid IS NULL OR t.product_id = $1)
    AND ($2::text IS NULL OR t.transaction_type = $2)
    AND ($3::timestamptz IS NULL OR t.created_at >= $3)
    AND ($4::timestamptz IS NULL OR t.created_at <= $4)
"#;

/// Postgres-backed ledger store.
///
/// Uses the SQLx connection pool, which is `Send + Sync`.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect with a small default pool.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerStoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes when missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), LedgerStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, product), fields(product_id = %product.id_typed()), err)]
    pub async fn insert_product(&self, product: &Product) -> Result<(), LedgerStoreError> {
        let r = product.record();
        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, sku, current_stock, reorder_level, opening_stock,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(r.id.0.as_uuid())
        .bind(&r.name)
        .bind(&r.sku)
        .bind(r.current_stock)
        .bind(r.reorder_level)
        .bind(r.opening_stock)
        .bind(to_db_version(r.version)?)
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerStoreError::Duplicate(format!(
                    "product {} or sku {} already exists",
                    r.id, r.sku
                ))
            } else {
                map_sqlx_error("insert_product", e)
            }
        })?;
        Ok(())
    }

    pub async fn fetch_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Product>, LedgerStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, sku, current_stock, reorder_level, opening_stock,
                   version, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.0.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_product", e))?;

        row.as_ref().map(product_from_row).transpose()
    }

    /// The atomic unit: conditional product update plus ledger insert.
    #[instrument(
        skip(self, product, txn),
        fields(product_id = %product.id_typed(), kind = %txn.kind, expected_version = ?expected_version),
        err
    )]
    pub async fn commit_adjustment(
        &self,
        product: &Product,
        txn: &StockTransaction,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        let stored_version = match expected_version {
            ExpectedVersion::Exact(v) => v,
            ExpectedVersion::Any => product.version().saturating_sub(1),
        };
        check_adjustment_write(product, txn, stored_version, expected_version)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE products
            SET current_stock = $2, version = $3, updated_at = $4
            WHERE id = $1 AND ($5::bigint IS NULL OR version = $5)
            "#,
        )
        .bind(product.id_typed().0.as_uuid())
        .bind(product.current_stock())
        .bind(to_db_version(product.version())?)
        .bind(product.updated_at())
        .bind(match expected_version {
            ExpectedVersion::Exact(v) => Some(to_db_version(v)?),
            ExpectedVersion::Any => None,
        })
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(self.explain_missed_update(product.id_typed(), expected_version).await);
        }

        sqlx::query(
            r#"
            INSERT INTO stock_transactions (
                id, product_id, transaction_type, quantity, reference_number,
                notes, created_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(txn.id.as_uuid())
        .bind(txn.product_id.0.as_uuid())
        .bind(txn.kind.as_str())
        .bind(txn.quantity.get())
        .bind(txn.reference_number.as_deref())
        .bind(txn.note.as_deref())
        .bind(txn.created_at)
        .bind(txn.actor.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn explain_missed_update(
        &self,
        product_id: ProductId,
        expected_version: ExpectedVersion,
    ) -> LedgerStoreError {
        match self.fetch_product(product_id).await {
            Ok(Some(current)) => LedgerStoreError::Concurrency(format!(
                "product {product_id}: expected {expected_version:?}, found {}",
                current.version()
            )),
            Ok(None) => LedgerStoreError::MissingProduct(product_id.to_string()),
            Err(e) => e,
        }
    }

    pub async fn fetch_low_stock(&self) -> Result<Vec<Product>, LedgerStoreError> {
        // Mirrors `stockledger_inventory::is_low_stock`.
        let rows = sqlx::query(
            r#"
            SELECT id, name, sku, current_stock, reorder_level, opening_stock,
                   version, created_at, updated_at
            FROM products
            WHERE current_stock <= reorder_level
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_low_stock", e))?;

        rows.iter().map(product_from_row).collect()
    }

    pub async fn fetch_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<TransactionView>, LedgerStoreError> {
        let product_param = filter.product_id.map(|id| *id.0.as_uuid());
        let kind_param = filter.kind.map(TransactionKind::as_str);

        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM stock_transactions t WHERE {TRANSACTION_FILTER}"
        );
        let total: i64 = sqlx::query(&count_sql)
            .bind(product_param)
            .bind(kind_param)
            .bind(filter.occurred_from)
            .bind(filter.occurred_to)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_transactions", e))?
            .try_get("total")
            .map_err(|e| LedgerStoreError::InvalidRecord(format!("failed to read count: {e}")))?;

        let page_sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM stock_transactions t
            JOIN products p ON p.id = t.product_id
            WHERE {TRANSACTION_FILTER}
            ORDER BY t.created_at DESC, t.seq DESC
            LIMIT $5 OFFSET $6
            "#
        );
        let rows = sqlx::query(&page_sql)
            .bind(product_param)
            .bind(kind_param)
            .bind(filter.occurred_from)
            .bind(filter.occurred_to)
            .bind(to_db_i64(pagination.limit())?)
            .bind(to_db_i64(pagination.offset())?)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_transactions", e))?;

        let items = rows
            .iter()
            .map(|row| {
                Ok(TransactionView {
                    transaction: transaction_from_row(row)?,
                    product_name: row.try_get("product_name").map_err(decode_error)?,
                    product_sku: row.try_get("product_sku").map_err(decode_error)?,
                })
            })
            .collect::<Result<Vec<_>, LedgerStoreError>>()?;

        Ok(Page::new(items, pagination, u64::try_from(total).unwrap_or(0)))
    }

    pub async fn fetch_sum_quantity(
        &self,
        product_id: ProductId,
        kind: TransactionKind,
    ) -> Result<i64, LedgerStoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::bigint AS total
            FROM stock_transactions
            WHERE product_id = $1 AND transaction_type = $2
            "#,
        )
        .bind(product_id.0.as_uuid())
        .bind(kind.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sum_quantity", e))?;

        row.try_get("total").map_err(decode_error)
    }

    pub async fn fetch_ledger(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<StockTransaction>, LedgerStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, transaction_type, quantity, reference_number,
                   notes, created_at, created_by
            FROM stock_transactions
            WHERE product_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(product_id.0.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_ledger", e))?;

        rows.iter().map(transaction_from_row).collect()
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, LedgerStoreError>
    where
        F: Future<Output = Result<T, LedgerStoreError>>,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            LedgerStoreError::Backend(
                "PostgresLedgerStore requires a tokio runtime; call it from within one".to_string(),
            )
        })?;
        tokio::task::block_in_place(|| handle.block_on(fut))
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn create_product(&self, product: &Product) -> Result<(), LedgerStoreError> {
        self.block_on(self.insert_product(product))
    }

    fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, LedgerStoreError> {
        self.block_on(self.fetch_product(product_id))
    }

    fn save_product_and_transaction(
        &self,
        product: &Product,
        row: &StockTransaction,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        self.block_on(self.commit_adjustment(product, row, expected_version))
    }

    fn list_low_stock(&self) -> Result<Vec<Product>, LedgerStoreError> {
        self.block_on(self.fetch_low_stock())
    }

    fn query_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<TransactionView>, LedgerStoreError> {
        self.block_on(self.fetch_transactions(filter, pagination))
    }

    fn sum_quantity(
        &self,
        product_id: ProductId,
        kind: TransactionKind,
    ) -> Result<i64, LedgerStoreError> {
        self.block_on(self.fetch_sum_quantity(product_id, kind))
    }

    fn load_ledger(&self, product_id: ProductId) -> Result<Vec<StockTransaction>, LedgerStoreError> {
        self.block_on(self.fetch_ledger(product_id))
    }
}

fn to_db_version(version: u64) -> Result<i64, LedgerStoreError> {
    to_db_i64(version)
}

fn to_db_i64(value: u64) -> Result<i64, LedgerStoreError> {
    i64::try_from(value)
        .map_err(|_| LedgerStoreError::InvalidRecord(format!("{value} does not fit in BIGINT")))
}

fn decode_error(e: sqlx::Error) -> LedgerStoreError {
    LedgerStoreError::InvalidRecord(format!("failed to decode row: {e}"))
}

fn product_from_row(row: &PgRow) -> Result<Product, LedgerStoreError> {
    let id: uuid::Uuid = row.try_get("id").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode_error)?;

    let record = ProductRecord {
        id: ProductId::new(AggregateId::from_uuid(id)),
        name: row.try_get("name").map_err(decode_error)?,
        sku: row.try_get("sku").map_err(decode_error)?,
        current_stock: row.try_get("current_stock").map_err(decode_error)?,
        reorder_level: row.try_get("reorder_level").map_err(decode_error)?,
        opening_stock: row.try_get("opening_stock").map_err(decode_error)?,
        version: u64::try_from(version)
            .map_err(|_| LedgerStoreError::InvalidRecord(format!("negative version {version}")))?,
        created_at,
        updated_at,
    };
    Product::restore(record).map_err(|e| LedgerStoreError::InvalidRecord(e.to_string()))
}

fn transaction_from_row(row: &PgRow) -> Result<StockTransaction, LedgerStoreError> {
    let id: uuid::Uuid = row.try_get("id").map_err(decode_error)?;
    let product_id: uuid::Uuid = row.try_get("product_id").map_err(decode_error)?;
    let kind: String = row.try_get("transaction_type").map_err(decode_error)?;
    let quantity: i64 = row.try_get("quantity").map_err(decode_error)?;
    let actor: String = row.try_get("created_by").map_err(decode_error)?;

    let invalid = |e: stockledger_core::DomainError| LedgerStoreError::InvalidRecord(e.to_string());

    Ok(StockTransaction {
        id: TransactionId::from_uuid(id),
        product_id: ProductId::new(AggregateId::from_uuid(product_id)),
        kind: kind.parse().map_err(invalid)?,
        quantity: Quantity::new(quantity).map_err(invalid)?,
        reference_number: row.try_get("reference_number").map_err(decode_error)?,
        note: row.try_get("notes").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        actor: Actor::new(actor).map_err(invalid)?,
    })
}

/// Map SQLx errors to LedgerStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                // A unique violation outside create means a racing writer.
                Some("23505") => LedgerStoreError::Concurrency(msg),
                Some("23503") => LedgerStoreError::MissingProduct(msg),
                Some("23514") => LedgerStoreError::InvalidRecord(msg),
                _ => LedgerStoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => LedgerStoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}
