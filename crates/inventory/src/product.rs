use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult};

use crate::adjustment::{MoveStock, Quantity, StockCommand};
use crate::transaction::{StockTransaction, TransactionKind};

/// Reorder level used when the catalog does not set one.
pub const DEFAULT_REORDER_LEVEL: i64 = 10;

/// Aggregate type name carried on published envelopes.
pub const PRODUCT_AGGREGATE_TYPE: &str = "inventory.product";

const MAX_NAME_LEN: usize = 200;
const MAX_SKU_LEN: usize = 50;

/// The low-stock predicate.
///
/// Inclusive: a product sitting exactly at its reorder level is low. Every
/// low-stock check, in memory or in SQL, must agree with this function.
pub fn is_low_stock(current_stock: i64, reorder_level: i64) -> bool {
    current_stock <= reorder_level
}

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for ProductId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Catalog input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    #[serde(default)]
    pub opening_stock: i64,
    #[serde(default)]
    pub reorder_level: Option<i64>,
}

/// Persisted shape of a product row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    pub current_stock: i64,
    pub reorder_level: i64,
    pub opening_stock: i64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate root: Product (stock-bearing view of a catalog item).
///
/// `current_stock` is a cached value derived from `opening_stock` and the
/// ledger. It only changes through [`Aggregate::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    name: String,
    sku: String,
    current_stock: i64,
    reorder_level: i64,
    opening_stock: i64,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    /// Create a product as the catalog would, with its opening stock.
    pub fn create(new: NewProduct, created_at: DateTime<Utc>) -> DomainResult<Self> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(DomainError::validation(format!(
                "name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        let sku = new.sku.trim();
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if sku.chars().count() > MAX_SKU_LEN {
            return Err(DomainError::validation(format!(
                "sku must be at most {MAX_SKU_LEN} characters"
            )));
        }
        if new.opening_stock < 0 {
            return Err(DomainError::validation("opening stock cannot be negative"));
        }
        let reorder_level = new.reorder_level.unwrap_or(DEFAULT_REORDER_LEVEL);
        if reorder_level < 0 {
            return Err(DomainError::validation("reorder level cannot be negative"));
        }

        Ok(Self {
            id: new.id,
            name: name.to_string(),
            sku: sku.to_string(),
            current_stock: new.opening_stock,
            reorder_level,
            opening_stock: new.opening_stock,
            version: 0,
            created_at,
            updated_at: created_at,
        })
    }

    /// Rehydrate from a stored row.
    pub fn restore(record: ProductRecord) -> DomainResult<Self> {
        if record.current_stock < 0 {
            return Err(DomainError::invariant(format!(
                "stored stock for {} is negative ({})",
                record.id, record.current_stock
            )));
        }
        Ok(Self {
            id: record.id,
            name: record.name,
            sku: record.sku,
            current_stock: record.current_stock,
            reorder_level: record.reorder_level,
            opening_stock: record.opening_stock,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    pub fn record(&self) -> ProductRecord {
        ProductRecord {
            id: self.id,
            name: self.name.clone(),
            sku: self.sku.clone(),
            current_stock: self.current_stock,
            reorder_level: self.reorder_level,
            opening_stock: self.opening_stock,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn current_stock(&self) -> i64 {
        self.current_stock
    }

    pub fn reorder_level(&self) -> i64 {
        self.reorder_level
    }

    pub fn opening_stock(&self) -> i64 {
        self.opening_stock
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_low_stock(&self) -> bool {
        is_low_stock(self.current_stock, self.reorder_level)
    }

    pub fn view(&self) -> ProductView {
        ProductView::from(self)
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Product {
    type Command = StockCommand;
    type Event = StockTransaction;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        self.current_stock += event.signed_delta();
        self.updated_at = event.created_at;

        // One ledger row, one version.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::AddStock(cmd) => self.handle_add(cmd),
            StockCommand::RemoveStock(cmd) => self.handle_remove(cmd),
        }
    }
}

impl Product {
    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_add(&self, cmd: &MoveStock) -> Result<Vec<StockTransaction>, DomainError> {
        self.ensure_product_id(cmd.adjustment.product_id)?;
        let quantity = cmd.adjustment.validate()?;

        if self.current_stock.checked_add(quantity.get()).is_none() {
            return Err(DomainError::validation("stock would overflow"));
        }

        Ok(vec![self.ledger_row(cmd, TransactionKind::StockIn, quantity)])
    }

    fn handle_remove(&self, cmd: &MoveStock) -> Result<Vec<StockTransaction>, DomainError> {
        self.ensure_product_id(cmd.adjustment.product_id)?;
        let quantity = cmd.adjustment.validate()?;

        if self.current_stock < quantity.get() {
            return Err(DomainError::insufficient_stock(
                self.id.0,
                quantity.get(),
                self.current_stock,
            ));
        }

        Ok(vec![self.ledger_row(cmd, TransactionKind::StockOut, quantity)])
    }

    fn ledger_row(
        &self,
        cmd: &MoveStock,
        kind: TransactionKind,
        quantity: Quantity,
    ) -> StockTransaction {
        StockTransaction {
            id: cmd.transaction_id,
            product_id: self.id,
            kind,
            quantity,
            reference_number: cmd.adjustment.reference_number.clone(),
            note: cmd.adjustment.note.clone(),
            created_at: cmd.occurred_at,
            actor: cmd.adjustment.actor.clone(),
        }
    }
}

/// Product projection returned to callers after an adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductView {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    pub current_stock: i64,
    pub reorder_level: i64,
    pub low_stock: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Product> for ProductView {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            sku: p.sku.clone(),
            current_stock: p.current_stock,
            reorder_level: p.reorder_level,
            low_stock: p.is_low_stock(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}
