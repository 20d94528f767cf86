//! Single query parameters (`spec.md` §4.7): the individual elements a
//! [`super::data::Data`] tuple is built from — a component reference, an
//! optional component reference, or the entity itself.
//!
//! Grounded on the teacher's `query::param::Parameter`, generalized from a
//! single growable `Table` to an archetype's chunk-list-aware columnar
//! storage: fetching now takes the owning chunk list and chunk index rather
//! than a bare row into one contiguous table.

use crate::ecs::archetype::{Archetype, ChunkList};
use crate::ecs::component::{self, Cache, Component};
use crate::ecs::entity::Entity;

/// What one [`Fetch`] parameter needs from the archetype graph: whether it's
/// the entity itself or a specific component, and whether that component is
/// read mutably and/or optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSpec {
    Entity,
    Component { id: component::Id, mutable: bool, optional: bool },
}

/// A single element of a query's data tuple: `&C`, `&mut C`, `Option<&C>`,
/// `Option<&mut C>`, or [`Entity`].
pub trait Fetch: Sized {
    type Value<'w>;

    /// Describe this parameter, registering its component type if this is
    /// the first time it's been queried.
    fn spec(cache: &Cache) -> FetchSpec;

    /// Fetch this parameter's value for one row.
    ///
    /// Returns `None` only when the archetype doesn't carry the component at
    /// all (required components are already guaranteed present by the
    /// archetype match; this path only matters for `Option<...>` params
    /// queried against an archetype that doesn't carry them, where it's
    /// folded into `Some(None)` rather than propagated).
    ///
    /// # Safety
    /// `(list, chunk, row)` must name a live row of `archetype`, and no two
    /// live [`Fetch::Value`]s may alias a `&mut` over the same component
    /// column at the same time.
    unsafe fn fetch<'w>(
        entity: Entity,
        archetype: &'w Archetype,
        list: ChunkList,
        chunk: u32,
        row: u32,
        cache: &Cache,
    ) -> Option<Self::Value<'w>>;
}

impl<C: Component> Fetch for &C {
    type Value<'w> = &'w C;

    fn spec(cache: &Cache) -> FetchSpec {
        FetchSpec::Component { id: cache.register_generic::<C>(), mutable: false, optional: false }
    }

    unsafe fn fetch<'w>(
        _entity: Entity,
        archetype: &'w Archetype,
        list: ChunkList,
        chunk: u32,
        row: u32,
        cache: &Cache,
    ) -> Option<Self::Value<'w>> {
        let id = cache.get::<C>()?;
        let ptr = archetype.generic_ptr_in(list, chunk, row, id)?;
        // SAFETY: forwarded from this method's own safety contract.
        Some(unsafe { &*ptr.as_ptr().cast::<C>() })
    }
}

impl<C: Component> Fetch for &mut C {
    type Value<'w> = &'w mut C;

    fn spec(cache: &Cache) -> FetchSpec {
        FetchSpec::Component { id: cache.register_generic::<C>(), mutable: true, optional: false }
    }

    unsafe fn fetch<'w>(
        _entity: Entity,
        archetype: &'w Archetype,
        list: ChunkList,
        chunk: u32,
        row: u32,
        cache: &Cache,
    ) -> Option<Self::Value<'w>> {
        let id = cache.get::<C>()?;
        let ptr = archetype.generic_ptr_in(list, chunk, row, id)?;
        // SAFETY: the query builder validates no component is requested
        // mutably more than once, so this is the only live reference.
        Some(unsafe { &mut *ptr.as_ptr().cast::<C>() })
    }
}

impl<C: Component> Fetch for Option<&C> {
    type Value<'w> = Option<&'w C>;

    fn spec(cache: &Cache) -> FetchSpec {
        FetchSpec::Component { id: cache.register_generic::<C>(), mutable: false, optional: true }
    }

    unsafe fn fetch<'w>(
        entity: Entity,
        archetype: &'w Archetype,
        list: ChunkList,
        chunk: u32,
        row: u32,
        cache: &Cache,
    ) -> Option<Self::Value<'w>> {
        // Never fails the row: a missing optional component is `Some(None)`.
        Some(unsafe { <&C>::fetch(entity, archetype, list, chunk, row, cache) })
    }
}

impl<C: Component> Fetch for Option<&mut C> {
    type Value<'w> = Option<&'w mut C>;

    fn spec(cache: &Cache) -> FetchSpec {
        FetchSpec::Component { id: cache.register_generic::<C>(), mutable: true, optional: true }
    }

    unsafe fn fetch<'w>(
        entity: Entity,
        archetype: &'w Archetype,
        list: ChunkList,
        chunk: u32,
        row: u32,
        cache: &Cache,
    ) -> Option<Self::Value<'w>> {
        Some(unsafe { <&mut C>::fetch(entity, archetype, list, chunk, row, cache) })
    }
}

impl Fetch for Entity {
    type Value<'w> = Entity;

    fn spec(_cache: &Cache) -> FetchSpec {
        FetchSpec::Entity
    }

    unsafe fn fetch<'w>(
        entity: Entity,
        _archetype: &'w Archetype,
        _list: ChunkList,
        _chunk: u32,
        _row: u32,
        _cache: &Cache,
    ) -> Option<Self::Value<'w>> {
        Some(entity)
    }
}

/// A per-chunk singleton component, fetched by value rather than by row
/// (`spec.md` §3, Component kind: `Chunk`). Every row in the chunk sees the
/// same reference.
pub struct Shared<'w, C>(&'w C);

impl<C> Shared<'_, C> {
    #[inline]
    pub fn get(&self) -> &C {
        self.0
    }
}

impl<C: Component> Fetch for Shared<'_, C> {
    type Value<'w> = Shared<'w, C>;

    fn spec(cache: &Cache) -> FetchSpec {
        FetchSpec::Component { id: cache.register_chunk::<C>(), mutable: false, optional: false }
    }

    unsafe fn fetch<'w>(
        _entity: Entity,
        archetype: &'w Archetype,
        list: ChunkList,
        chunk: u32,
        _row: u32,
        cache: &Cache,
    ) -> Option<Self::Value<'w>> {
        let id = cache.get::<C>()?;
        let ptr = archetype.chunk_ptr_in(list, chunk, id)?;
        // SAFETY: forwarded from this method's own safety contract.
        Some(Shared(unsafe { &*ptr.as_ptr().cast::<C>() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::archetype::Registry as ArchetypeRegistry;
    use crate::ecs::component::Signature;
    use crate::ecs::entity::{Generation, Id as EntityId};
    use crate::ecs::storage::allocator::ChunkAllocator;

    #[derive(Clone, Debug, PartialEq)]
    struct Position {
        x: f32,
    }
    impl Component for Position {}

    fn entity(n: u32) -> Entity {
        Entity::new(EntityId::from(n), Generation::FIRST)
    }

    #[test]
    fn spec_for_component_ref() {
        let cache = Cache::new();
        let spec = <&Position>::spec(&cache);
        let id = cache.get::<Position>().unwrap();
        assert_eq!(spec, FetchSpec::Component { id, mutable: false, optional: false });
    }

    #[test]
    fn spec_for_component_ref_mut() {
        let cache = Cache::new();
        let spec = <&mut Position>::spec(&cache);
        let id = cache.get::<Position>().unwrap();
        assert_eq!(spec, FetchSpec::Component { id, mutable: true, optional: false });
    }

    #[test]
    fn spec_for_entity() {
        let cache = Cache::new();
        assert_eq!(Entity::spec(&cache), FetchSpec::Entity);
    }

    #[test]
    fn fetch_reads_component_value() {
        let cache = Cache::new();
        let id = cache.register_generic::<Position>();
        let mut registry = ArchetypeRegistry::new();
        let archetype_id = registry.get_or_create(Signature::new([id]), Signature::default(), &cache).unwrap();
        let mut allocator = ChunkAllocator::new();
        let archetype = registry.get_mut(archetype_id).unwrap();
        let (chunk, row) = archetype.insert(&mut allocator, entity(1)).unwrap();
        unsafe { archetype.generic_ptr(chunk, row, id).unwrap().as_ptr().cast::<Position>().write(Position { x: 4.0 }) };

        let archetype = registry.get(archetype_id).unwrap();
        let value = unsafe { <&Position>::fetch(entity(1), archetype, ChunkList::Enabled, chunk, row, &cache) };
        assert_eq!(value.unwrap().x, 4.0);
    }

    #[test]
    fn fetch_for_missing_optional_is_some_none() {
        let cache = Cache::new();
        let mut registry = ArchetypeRegistry::new();
        let archetype_id = registry.root(&cache).unwrap();
        let mut allocator = ChunkAllocator::new();
        let archetype = registry.get_mut(archetype_id).unwrap();
        let (chunk, row) = archetype.insert(&mut allocator, entity(1)).unwrap();

        let archetype = registry.get(archetype_id).unwrap();
        let value = unsafe { <Option<&Position>>::fetch(entity(1), archetype, ChunkList::Enabled, chunk, row, &cache) };
        assert_eq!(value, Some(None));
    }
}
