//! Complete query data shapes: a single [`Fetch`] parameter, or a tuple of
//! them (`spec.md` §4.7). Grounded on the teacher's `query::data::Data`,
//! adapted to fetch from an archetype's chunk-list storage instead of a
//! `Table`.

use crate::ecs::archetype::{Archetype, ChunkList};
use crate::ecs::component::Cache;
use crate::ecs::entity::Entity;
use crate::ecs::query::param::{Fetch, FetchSpec};

/// A complete query data specification: one or more [`Fetch`] parameters.
///
/// Any [`Fetch`] type implements `Data` directly (a single-parameter
/// query); tuples of `Data` implement `Data` for multi-parameter queries,
/// up to 26 elements.
pub trait Data: Sized {
    type Item<'w>;

    fn spec(cache: &Cache) -> Vec<FetchSpec>;

    /// # Safety
    /// See [`Fetch::fetch`].
    unsafe fn fetch<'w>(
        entity: Entity,
        archetype: &'w Archetype,
        list: ChunkList,
        chunk: u32,
        row: u32,
        cache: &Cache,
    ) -> Option<Self::Item<'w>>;
}

impl<P: Fetch> Data for P {
    type Item<'w> = P::Value<'w>;

    fn spec(cache: &Cache) -> Vec<FetchSpec> {
        vec![P::spec(cache)]
    }

    unsafe fn fetch<'w>(
        entity: Entity,
        archetype: &'w Archetype,
        list: ChunkList,
        chunk: u32,
        row: u32,
        cache: &Cache,
    ) -> Option<Self::Item<'w>> {
        unsafe { P::fetch(entity, archetype, list, chunk, row, cache) }
    }
}

impl Data for () {
    type Item<'w> = ();

    fn spec(_cache: &Cache) -> Vec<FetchSpec> {
        Vec::new()
    }

    unsafe fn fetch<'w>(
        _entity: Entity,
        _archetype: &'w Archetype,
        _list: ChunkList,
        _chunk: u32,
        _row: u32,
        _cache: &Cache,
    ) -> Option<Self::Item<'w>> {
        Some(())
    }
}

macro_rules! tuple_data_impl {
    ($($name: ident),*) => {
        impl<$($name: Data),*> Data for ($($name,)*) {
            type Item<'w> = ($($name::Item<'w>,)*);

            fn spec(cache: &Cache) -> Vec<FetchSpec> {
                let mut params = Vec::new();
                $(
                    params.extend(<$name>::spec(cache));
                )*
                params
            }

            unsafe fn fetch<'w>(
                entity: Entity,
                archetype: &'w Archetype,
                list: ChunkList,
                chunk: u32,
                row: u32,
                cache: &Cache,
            ) -> Option<Self::Item<'w>> {
                Some((
                    $(
                        unsafe { <$name>::fetch(entity, archetype, list, chunk, row, cache)? },
                    )*
                ))
            }
        }
    }
}

crate::all_tuples!(tuple_data_impl);
