//! Stock adjustment requests and the commands built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, TransactionId, ValueObject};

use crate::product::ProductId;
use crate::transaction::TransactionKind;

/// Longest accepted reference number, in characters.
pub const MAX_REFERENCE_LEN: usize = 50;

/// Longest accepted free-text note, in characters.
pub const MAX_NOTE_LEN: usize = 500;

/// Longest accepted actor identity, in characters.
pub const MAX_ACTOR_LEN: usize = 100;

/// Magnitude of a stock movement. Always at least one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(i64);

impl Quantity {
    pub fn new(value: i64) -> DomainResult<Self> {
        if value < 1 {
            return Err(DomainError::validation(format!(
                "quantity must be at least 1 (got {value})"
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl ValueObject for Quantity {}

impl TryFrom<i64> for Quantity {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identity recorded on each ledger row.
///
/// Callers pass this explicitly. When no authenticated identity is available the
/// sentinel [`Actor::SYSTEM`] is recorded instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Actor(String);

impl Actor {
    /// Sentinel identity for work done without a caller identity.
    pub const SYSTEM: &'static str = "system";

    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("actor cannot be empty"));
        }
        if name.chars().count() > MAX_ACTOR_LEN {
            return Err(DomainError::validation(format!(
                "actor must be at most {MAX_ACTOR_LEN} characters"
            )));
        }
        Ok(Self(name))
    }

    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Actor {}

impl Default for Actor {
    fn default() -> Self {
        Self::system()
    }
}

impl TryFrom<String> for Actor {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Actor> for String {
    fn from(value: Actor) -> Self {
        value.0
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A caller's request to move stock for one product.
///
/// The same shape is used for additions and removals; the direction comes from
/// which engine operation receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub actor: Actor,
}

impl StockAdjustment {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
            reference_number: None,
            note: None,
            actor: Actor::system(),
        }
    }

    pub fn with_reference(mut self, reference_number: impl Into<String>) -> Self {
        self.reference_number = Some(reference_number.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    /// Check every bounded field. Runs before any store access.
    pub fn validate(&self) -> DomainResult<Quantity> {
        let quantity = Quantity::new(self.quantity)?;

        if let Some(reference) = &self.reference_number {
            if reference.chars().count() > MAX_REFERENCE_LEN {
                return Err(DomainError::validation(format!(
                    "reference number must be at most {MAX_REFERENCE_LEN} characters"
                )));
            }
        }

        if let Some(note) = &self.note {
            if note.chars().count() > MAX_NOTE_LEN {
                return Err(DomainError::validation(format!(
                    "note must be at most {MAX_NOTE_LEN} characters"
                )));
            }
        }

        Ok(quantity)
    }
}

/// A validated-at-handle movement with its server-assigned identity and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveStock {
    pub transaction_id: TransactionId,
    pub adjustment: StockAdjustment,
    pub occurred_at: DateTime<Utc>,
}

impl MoveStock {
    pub fn new(adjustment: StockAdjustment, occurred_at: DateTime<Utc>) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            adjustment,
            occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    AddStock(MoveStock),
    RemoveStock(MoveStock),
}

impl StockCommand {
    pub fn kind(&self) -> TransactionKind {
        match self {
            StockCommand::AddStock(_) => TransactionKind::StockIn,
            StockCommand::RemoveStock(_) => TransactionKind::StockOut,
        }
    }

    pub fn movement(&self) -> &MoveStock {
        match self {
            StockCommand::AddStock(m) | StockCommand::RemoveStock(m) => m,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.movement().adjustment.product_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjustment(quantity: i64) -> StockAdjustment {
        StockAdjustment::new(ProductId::generate(), quantity)
    }

    #[test]
    fn quantity_rejects_zero_and_negative() {
        assert!(Quantity::new(0).is_err());
        assert!(Quantity::new(-3).is_err());
        assert_eq!(Quantity::new(1).unwrap().get(), 1);
    }

    #[test]
    fn reference_length_is_bounded() {
        let ok = adjustment(1).with_reference("R".repeat(MAX_REFERENCE_LEN));
        assert!(ok.validate().is_ok());

        let too_long = adjustment(1).with_reference("R".repeat(MAX_REFERENCE_LEN + 1));
        match too_long.validate().unwrap_err() {
            DomainError::Validation(msg) => assert!(msg.contains("reference")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn note_length_counts_characters_not_bytes() {
        let note: String = "é".repeat(MAX_NOTE_LEN);
        assert!(note.len() > MAX_NOTE_LEN);
        assert!(adjustment(1).with_note(note).validate().is_ok());

        let too_long = adjustment(1).with_note("n".repeat(MAX_NOTE_LEN + 1));
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn actor_defaults_to_system_sentinel() {
        assert_eq!(adjustment(1).actor, Actor::system());
        assert_eq!(Actor::default().as_str(), Actor::SYSTEM);
        assert_eq!(Actor::new("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn actor_rejects_blank_and_overlong_names() {
        assert!(Actor::new("   ").is_err());
        assert!(Actor::new("a".repeat(MAX_ACTOR_LEN + 1)).is_err());
    }

    #[test]
    fn deserializing_a_bad_quantity_fails() {
        let json = format!(
            r#"{{"product_id":"{}","quantity":0}}"#,
            ProductId::generate()
        );
        let parsed: StockAdjustment = serde_json::from_str(&json).unwrap();
        // Raw requests deserialize; validation is what rejects them.
        assert!(parsed.validate().is_err());
        assert!(serde_json::from_str::<Quantity>("0").is_err());
    }

    #[test]
    fn command_kind_follows_variant() {
        let m = MoveStock::new(adjustment(2), Utc::now());
        assert_eq!(StockCommand::AddStock(m.clone()).kind(), TransactionKind::StockIn);
        assert_eq!(StockCommand::RemoveStock(m).kind(), TransactionKind::StockOut);
    }
}
