//! Ledger rows: the append-only history of stock movements.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, Entity, TransactionId};

use crate::adjustment::{Actor, Quantity};
use crate::product::ProductId;

/// Kind of stock movement.
///
/// Quantities on ledger rows are magnitudes; the kind carries the direction.
/// `Adjustment` rows count as increases.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    StockIn,
    StockOut,
    Adjustment,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 3] = [
        TransactionKind::StockIn,
        TransactionKind::StockOut,
        TransactionKind::Adjustment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::StockIn => "STOCK_IN",
            TransactionKind::StockOut => "STOCK_OUT",
            TransactionKind::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn is_increase(self) -> bool {
        !matches!(self, TransactionKind::StockOut)
    }

    /// Apply the direction of this kind to a magnitude.
    pub fn signed(self, quantity: Quantity) -> i64 {
        if self.is_increase() {
            quantity.get()
        } else {
            -quantity.get()
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown transaction kind: {s}")))
    }
}

/// One ledger row. Created once per accepted adjustment, never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransaction {
    pub id: TransactionId,
    pub product_id: ProductId,
    pub kind: TransactionKind,
    pub quantity: Quantity,
    pub reference_number: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub actor: Actor,
}

impl StockTransaction {
    pub fn signed_delta(&self) -> i64 {
        self.kind.signed(self.quantity)
    }
}

impl Entity for StockTransaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Stock implied by a product's opening stock and its ledger.
///
/// This is the value the cached current stock must always equal.
pub fn derived_stock<'a>(
    opening_stock: i64,
    ledger: impl IntoIterator<Item = &'a StockTransaction>,
) -> i64 {
    ledger
        .into_iter()
        .fold(opening_stock, |acc, t| acc + t.signed_delta())
}
