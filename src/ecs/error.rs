//! Error kinds surfaced by the ECS core.
//!
//! Propagation policy (`spec.md` §7): fail fast at the call site. Debug
//! builds additionally trap most of these as assertions so bugs are caught
//! before they have a chance to corrupt storage; release builds return the
//! matching [`Error`] variant instead of panicking, and never silently
//! continue with corrupted state. `World::gc` is the only operation that
//! legitimately no-ops on already-collected state.

use std::fmt;

use crate::ecs::{component, entity};

/// A failure returned by a structural or lookup operation on the ECS core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The entity's generation did not match, or its id was out of range.
    InvalidEntity(entity::Entity),

    /// Attempted to add a component the entity already has.
    DuplicateComponent(component::Id),

    /// Attempted to read or remove a component the entity doesn't have.
    MissingComponent(component::Id),

    /// The target archetype would exceed the fixed component-per-archetype
    /// maximum, or its column layout would overflow the chunk payload
    /// budget.
    ComponentBudgetExceeded,

    /// Attempted a structural change on an archetype currently being
    /// iterated by a query.
    StructuralLockHeld,

    /// The host allocator failed to provide a new page for the chunk
    /// allocator.
    ChunkAllocatorExhausted,

    /// The entity id space (2^20 - 1 live ids) is exhausted.
    IdSpaceExhausted,
}

/// Convenience alias for fallible ECS core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidEntity(entity) => write!(f, "invalid entity: {entity:?}"),
            Error::DuplicateComponent(id) => {
                write!(f, "component {id:?} is already present on the entity")
            }
            Error::MissingComponent(id) => {
                write!(f, "component {id:?} is not present on the entity")
            }
            Error::ComponentBudgetExceeded => {
                write!(f, "archetype component budget or chunk byte budget exceeded")
            }
            Error::StructuralLockHeld => {
                write!(f, "structural change attempted while archetype is locked by a query")
            }
            Error::ChunkAllocatorExhausted => {
                write!(f, "chunk allocator failed to obtain a new page")
            }
            Error::IdSpaceExhausted => write!(f, "entity id space is exhausted"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_mention_kind() {
        assert!(Error::ComponentBudgetExceeded.to_string().contains("budget"));
        assert!(Error::StructuralLockHeld.to_string().contains("locked"));
        assert!(Error::IdSpaceExhausted.to_string().contains("exhausted"));
    }
}
