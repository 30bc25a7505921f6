//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**: they are defined entirely by their
//! attribute values. A stock key `(product, variant)` or a tax rate of 1000 basis
//! points is the same value wherever it appears.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one.
///
/// ## Value Object vs Entity
///
/// - **Value Object**: `TaxRate(1000)` equals any other `TaxRate(1000)`
/// - **Entity**: two `StockLevel`s for different keys are different even when
///   every quantity matches
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// struct TaxRate(u32);
///
/// impl ValueObject for TaxRate {}
///
/// assert_eq!(TaxRate(1000), TaxRate(1000));
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
