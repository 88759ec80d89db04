//! Entity trait: identity + continuity across state changes.

use crate::error::DomainResult;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier, `None` until the store has assigned one.
    fn id(&self) -> Option<Self::Id>;

    /// Checks that the entity is complete enough to be persisted.
    fn validate(&self) -> DomainResult<()>;
}
