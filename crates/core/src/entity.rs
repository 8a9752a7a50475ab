//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Documents and customers are owned by the backend-of-record; the pipeline
/// only ever holds read copies keyed by the backend's primary key.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
