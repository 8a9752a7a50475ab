//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two destinations
/// with the same normalized address are the same destination, regardless of
/// which customer record they were read from.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Destination(String);
///
/// impl ValueObject for Destination {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
