//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. In the stock ledger
/// a quantity of `5` is the same as any other quantity of `5`; a product with the
/// same stock as another is still a different product (that is an entity).
///
/// Constructors of value objects are expected to validate, so that holding an
/// instance is proof the value is well-formed.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
