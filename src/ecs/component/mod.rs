//! Component registration, type-erased descriptors, and signatures.
//!
//! # Architecture
//!
//! - [`Component`]: the marker trait a Rust type implements (directly or via
//!   `#[derive(Component)]`) to be stored in the ECS.
//! - [`Descriptor`]: type-erased layout/lifecycle metadata captured once at
//!   registration time — size, alignment, drop/clone thunks, and the two
//!   stable hashes (`spec.md` §3) used by archetype matching.
//! - [`Cache`]: the process-wide table mapping a Rust type to its [`Id`] and
//!   [`Descriptor`], built once per `World`.
//! - [`Signature`]: a sorted, deduplicated set of component ids identifying
//!   an archetype.
//! - [`Values`]/[`Target`]: type-erased application of a single component or
//!   a tuple of components onto some row-shaped destination (a new entity,
//!   a `CommandBuffer` entry, ...).

mod descriptor;
mod registry;
mod set;
mod signature;

pub use descriptor::{Descriptor, Kind};
pub use registry::Cache;
pub use set::{Target, Values};
pub use signature::{IntoSignature, Signature};

/// A dense index identifying a registered component type within one
/// [`Cache`] (`spec.md` §3, Component id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl Id {
    #[inline]
    pub(crate) const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the index of this id for use in indexable storage (e.g. `Vec`).
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for Id {
    #[inline]
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

/// Marker trait for a Rust type storable as an ECS component.
///
/// `Clone` is a supertrait here, unlike the teacher's original `'static +
/// Sized + Send + Sync` bound, because [`crate::World::create_entity_like`]
/// clones an existing entity's component columns into a new row and Rust
/// has no way to conditionally provide a clone thunk for types that aren't
/// `Clone` without specialization.
///
/// `IS_SOA` selects the storage layout for this type's column within a
/// chunk (`spec.md` §3, Component kind: SoA vs AoS). Types deriving via
/// `#[derive(Component)]` get the `false` (AoS) default; a type that wants
/// struct-of-arrays layout implements `Component` by hand and overrides it.
pub trait Component: 'static + Sized + Send + Sync + Clone {
    const IS_SOA: bool = false;
}
