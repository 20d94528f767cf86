//! An archetype/chunk Entity-Component-System storage and query core.
//!
//! `strata_ecs` stores large numbers of entities composed of typed
//! components and iterates over them through user-defined queries. Entities
//! with identical component signatures are grouped into *archetypes*;
//! within an archetype, rows live in fixed-size, page-allocated *chunks*
//! laid out column-major so that a query touching only a few component
//! types never has to read the others.
//!
//! See [`ecs::world::World`] for the façade most callers start from.

// Allows the derive macro (`strata_ecs_macros::Component`) to refer to this crate by name both
// from within the crate's own tests and from downstream crates.
extern crate self as strata_ecs;

pub mod ecs;

pub use ecs::component::Component;
pub use ecs::entity::Entity;
pub use ecs::world::World;
