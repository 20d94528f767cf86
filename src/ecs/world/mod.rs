//! `World`: the façade tying the component cache, entity registry,
//! archetype graph, and chunk allocator into the external interface
//! `spec.md` §6 describes.
//!
//! Replaces the teacher's `access`/`registry`/`shard`/`type_registry`
//! submodules — a sharded, dynamically-typed component-registry design
//! built around a different storage layer with no counterpart in this
//! crate's chunked storage model.

use std::marker::PhantomData;

use crate::ecs::archetype::{self, ChunkList};
use crate::ecs::component::{self, Cache, Component, Descriptor, Kind, Values};
use crate::ecs::entity::{self, Entity, Location};
use crate::ecs::error::{Error, Result};
use crate::ecs::query;
use crate::ecs::storage::allocator::ChunkAllocator;

/// The central ECS container: owns every entity, component value, and
/// archetype in one simulation (`spec.md` §3 OVERVIEW).
///
/// Not `Send`/`Sync` — the structural core is single-threaded by design
/// (`spec.md` §5); a `World` is meant to be driven by one orchestrator
/// thread, with worker threads feeding it deferred work through a
/// [`crate::ecs::command::CommandBuffer`].
pub struct World {
    cache: Cache,
    entities: entity::Registry,
    archetypes: archetype::Registry,
    allocator: ChunkAllocator,
    /// Monotonic counter bumped on every change, used as the baseline for
    /// query change-detection (`spec.md` §4.3).
    version: u32,
    query_cache: query::PlanCache,
    /// Pins this type `!Send`/`!Sync`: a raw pointer has no thread affinity
    /// of its own, but the compiler still refuses to auto-derive either
    /// marker trait for a struct containing one.
    _not_send: PhantomData<*mut ()>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            cache: Cache::new(),
            entities: entity::Registry::new(),
            archetypes: archetype::Registry::new(),
            allocator: ChunkAllocator::new(),
            version: 1,
            query_cache: query::PlanCache::default(),
            _not_send: PhantomData,
        }
    }

    /// Build a `World` whose archetypes use `lifespan` GC ticks instead of
    /// [`archetype::DEFAULT_CHUNK_LIFESPAN`], so tests can drain `gc()`
    /// deterministically without padding out several no-op ticks.
    pub fn with_lifespan(lifespan: u32) -> Self {
        let mut world = Self::new();
        world.archetypes.set_default_lifespan(lifespan);
        world
    }

    #[inline]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Whether `entity` is live: its generation matches the registry slot,
    /// the slot is occupied, and — if it has been placed in storage — the
    /// row it points at actually stores this entity back (`spec.md` §4.5).
    ///
    /// That third check is a corruption detector the entity registry alone
    /// can't perform, since the row data it cross-checks against lives in
    /// archetype storage, not the registry.
    pub fn valid(&self, entity: Entity) -> bool {
        if !self.entities.valid(entity) {
            return false;
        }
        let Ok(Some(location)) = self.entities.locate(entity) else {
            return true;
        };
        let Some(archetype) = self.archetypes.get(archetype::Id::new(location.archetype)) else {
            return false;
        };
        let list = if self.entities.is_disabled(entity) { ChunkList::Disabled } else { ChunkList::Enabled };
        match archetype.chunks(list).get(location.chunk as usize) {
            Some(chunk) => chunk.entity(archetype.layout(), location.row) == entity,
            None => false,
        }
    }

    #[inline]
    pub(crate) fn archetypes(&self) -> &archetype::Registry {
        &self.archetypes
    }

    #[inline]
    pub(crate) fn archetypes_mut(&mut self) -> &mut archetype::Registry {
        &mut self.archetypes
    }

    /// Begin building a query over `D` (`spec.md` §4.7).
    pub fn query<D: query::Data>(&mut self) -> query::Builder<'_, D> {
        query::Builder::new(self)
    }

    #[inline]
    pub(crate) fn query_plan_matches(&mut self, key: u64, ctx: query::LookupContext) -> (&[archetype::Id], u32) {
        self.query_cache.matches(key, ctx, &self.archetypes)
    }

    #[inline]
    pub(crate) fn set_query_baseline(&mut self, key: u64, version: u32) {
        self.query_cache.set_baseline(key, version);
    }

    /// Spawn a new entity with no components, placed directly in the root
    /// archetype (`spec.md` §6 `create_entity`).
    pub fn create_entity(&mut self) -> Result<Entity> {
        let entity = self.entities.alloc()?;
        self.place_in_root(entity)?;
        self.bump_version();
        Ok(entity)
    }

    /// Spawn a new entity carrying `values` (a component or tuple of
    /// components), going straight to its destination archetype instead of
    /// via the root (`spec.md` §6 `create_entity` convenience overload).
    pub fn create_entity_with<V: Values>(&mut self, values: V) -> Result<Entity> {
        let entity = self.entities.alloc()?;
        let signature = V::into_signature(&self.cache);
        let archetype_id = self.archetypes.get_or_create(signature, component::Signature::default(), &self.cache)?;

        let (chunk, row) = {
            let archetype = self.archetypes.get_mut(archetype_id).expect("just created");
            archetype.insert(&mut self.allocator, entity)?
        };
        self.entities.set_location(entity, Location { archetype: archetype_id.index() as u32, chunk, row });

        let version = self.bump_version();
        let archetype = self.archetypes.get_mut(archetype_id).expect("just created");
        let mut target = ChunkTarget { archetype, chunk, row, version };
        values.apply(&self.cache, &mut target);

        Ok(entity)
    }

    /// Clone a live entity's components onto a brand-new entity
    /// (`spec.md` §6 `create_entity_like`, §8 Clone scenario).
    pub fn create_entity_like(&mut self, source: Entity) -> Result<Entity> {
        let source_loc = self.location(source)?;
        let source_list = if self.entities.is_disabled(source) { ChunkList::Disabled } else { ChunkList::Enabled };
        let source_archetype_id = archetype::Id::new(source_loc.archetype);

        let new = self.entities.alloc()?;
        let (generic_signature, chunk_signature) = {
            let source_archetype = self.archetypes.get(source_archetype_id).expect("location references a live archetype");
            (source_archetype.generic_signature().clone(), source_archetype.chunk_signature().clone())
        };
        let destination_id = self.archetypes.get_or_create(generic_signature, chunk_signature, &self.cache)?;

        // The clone always starts enabled, independent of the source's
        // current enabled/disabled state.
        let (new_chunk, new_row) = if source_archetype_id == destination_id {
            let archetype = self.archetypes.get_mut(destination_id).expect("just resolved");
            let (new_chunk, new_row) = archetype.insert(&mut self.allocator, new)?;
            for &id in archetype.generic_signature().ids() {
                let descriptor = self.cache.get_info_of(id).expect("signature id is registered");
                let src = archetype
                    .generic_ptr_in(source_list, source_loc.chunk, source_loc.row, id)
                    .expect("same archetype carries its own signature");
                let dst = archetype.generic_ptr(new_chunk, new_row, id).expect("just inserted");
                // SAFETY: src addresses a live value of this type; dst was
                // just reserved and is uninitialized.
                unsafe { descriptor.clone_into(src, dst) };
            }
            (new_chunk, new_row)
        } else {
            let (from, to) = self.archetypes.get_pair_mut(source_archetype_id, destination_id);
            let (new_chunk, new_row) = to.insert(&mut self.allocator, new)?;
            for &id in to.generic_signature().ids() {
                let descriptor = self.cache.get_info_of(id).expect("signature id is registered");
                let src = from
                    .generic_ptr_in(source_list, source_loc.chunk, source_loc.row, id)
                    .expect("destination signature is a copy of the source's");
                let dst = to.generic_ptr(new_chunk, new_row, id).expect("just inserted");
                // SAFETY: src addresses a live value of this type; dst was
                // just reserved and is uninitialized.
                unsafe { descriptor.clone_into(src, dst) };
            }
            (new_chunk, new_row)
        };

        self.entities.set_location(new, Location { archetype: destination_id.index() as u32, chunk: new_chunk, row: new_row });
        self.bump_version();
        Ok(new)
    }

    /// Destroy a live entity, dropping every component value it carries
    /// (`spec.md` §6 `destroy`).
    pub fn destroy(&mut self, entity: Entity) -> Result<()> {
        let loc = self.location(entity)?;
        let list = if self.entities.is_disabled(entity) { ChunkList::Disabled } else { ChunkList::Enabled };
        let archetype_id = archetype::Id::new(loc.archetype);
        let archetype = self.archetypes.get_mut(archetype_id).expect("location references a live archetype");

        let moved = archetype.remove_in(list, loc.chunk, loc.row)?;
        if let Some(moved_entity) = moved {
            self.entities.set_location(moved_entity, Location { archetype: loc.archetype, chunk: loc.chunk, row: loc.row });
        }
        self.entities.free(entity)?;
        self.bump_version();
        Ok(())
    }

    /// Move `entity` between its archetype's enabled and disabled chunk
    /// lists (`spec.md` §4.5 `set_enabled`). Setting the same state twice
    /// is a no-op, not an error (`spec.md` §8 round-trip rule).
    pub fn set_enabled(&mut self, entity: Entity, enabled: bool) -> Result<()> {
        if self.entities.is_disabled(entity) == !enabled {
            return Ok(());
        }

        let loc = self.location(entity)?;
        let archetype_id = archetype::Id::new(loc.archetype);
        let (from_list, to_list) = if enabled {
            (ChunkList::Disabled, ChunkList::Enabled)
        } else {
            (ChunkList::Enabled, ChunkList::Disabled)
        };

        let archetype = self.archetypes.get_mut(archetype_id).expect("location references a live archetype");
        let outcome = archetype.move_between_lists(loc.chunk, loc.row, from_list, to_list, &mut self.allocator)?;
        self.entities.set_disabled(entity, !enabled);
        if let Some(outcome) = outcome {
            if let Some(swapped) = outcome.swapped {
                self.entities.set_location(swapped, Location { archetype: loc.archetype, chunk: loc.chunk, row: loc.row });
            }
            self.entities.set_location(entity, Location { archetype: loc.archetype, chunk: outcome.chunk, row: outcome.row });
        }
        self.bump_version();
        Ok(())
    }

    /// Whether `entity` carries component `C`.
    pub fn has<C: Component>(&self, entity: Entity) -> Result<bool> {
        let loc = self.location(entity)?;
        let archetype = self.archetypes.get(archetype::Id::new(loc.archetype)).expect("location references a live archetype");
        Ok(match self.cache.get::<C>() {
            Some(id) => match self.cache.kind(id) {
                Some(Kind::Generic) => archetype.generic_signature().contains(id),
                Some(Kind::Chunk) => archetype.chunk_signature().contains(id),
                None => false,
            },
            None => false,
        })
    }

    /// Read component `C` on `entity`, if present. Works whether `entity`
    /// is currently enabled or disabled.
    pub fn get<C: Component>(&self, entity: Entity) -> Result<Option<&C>> {
        let loc = self.location(entity)?;
        let list = if self.entities.is_disabled(entity) { ChunkList::Disabled } else { ChunkList::Enabled };
        let archetype = self.archetypes.get(archetype::Id::new(loc.archetype)).expect("location references a live archetype");
        let Some(id) = self.cache.get::<C>() else { return Ok(None) };

        let ptr = match self.cache.kind(id) {
            Some(Kind::Generic) => archetype.generic_ptr_in(list, loc.chunk, loc.row, id),
            Some(Kind::Chunk) => archetype.chunk_ptr_in(list, loc.chunk, id),
            None => None,
        };
        // SAFETY: the pointer, if present, addresses a live value of type C
        // for as long as `&self` is borrowed (no structural mutation can
        // happen while that borrow is held).
        Ok(ptr.map(|p| unsafe { &*p.as_ptr().cast::<C>() }))
    }

    /// Set `entity`'s value for component `C`, adding it first if absent
    /// (`spec.md` §6 `set`).
    pub fn set<C: Component>(&mut self, entity: Entity, value: C) -> Result<()> {
        let id = self.cache.register_generic::<C>();
        if !self.has::<C>(entity)? {
            return self.add(entity, value);
        }

        let loc = self.location(entity)?;
        let list = if self.entities.is_disabled(entity) { ChunkList::Disabled } else { ChunkList::Enabled };
        let version = self.bump_version();
        let archetype = self.archetypes.get_mut(archetype::Id::new(loc.archetype)).expect("location references a live archetype");
        let ptr = archetype.generic_ptr_in(list, loc.chunk, loc.row, id).expect("has() confirmed presence");
        // SAFETY: ptr addresses a live, initialized C; the old value is
        // dropped before the new one is written in its place.
        unsafe {
            std::ptr::drop_in_place(ptr.as_ptr().cast::<C>());
            std::ptr::write(ptr.as_ptr().cast::<C>(), value);
        }
        archetype.mark_changed_in(list, loc.chunk, id, version);
        Ok(())
    }

    /// Add component `C` with `value` to `entity` (`spec.md` §6 `add`).
    ///
    /// # Errors
    /// Returns [`Error::DuplicateComponent`] if `entity` already carries
    /// `C` — adding is not idempotent (`spec.md` §8 round-trip rule).
    pub fn add<C: Component>(&mut self, entity: Entity, value: C) -> Result<()> {
        let id = self.cache.register_generic::<C>();
        let (to_id, chunk, row) = self.structural_add(entity, id, Kind::Generic)?;
        let version = self.bump_version();
        let list = if self.entities.is_disabled(entity) { ChunkList::Disabled } else { ChunkList::Enabled };
        let archetype = self.archetypes.get_mut(to_id).expect("structural_add returns a live archetype");
        let ptr = archetype.generic_ptr_in(list, chunk, row, id).expect("just migrated into this archetype");
        // SAFETY: the slot at (chunk, row) for a brand-new column is
        // reserved but left uninitialized until this write.
        unsafe { std::ptr::write(ptr.as_ptr().cast::<C>(), value) };
        archetype.mark_changed_in(list, chunk, id, version);
        Ok(())
    }

    /// Remove component `C` from `entity` (`spec.md` §6 `remove`).
    ///
    /// # Errors
    /// Returns [`Error::MissingComponent`] if `entity` doesn't carry `C`.
    pub fn remove<C: Component>(&mut self, entity: Entity) -> Result<()> {
        let id = self.cache.register_generic::<C>();
        self.structural_remove(entity, id, Kind::Generic)?;
        self.bump_version();
        Ok(())
    }

    /// Run every archetype's garbage-collection tick, releasing pages
    /// whose chunks have been empty long enough (`spec.md` §6 `gc`, §8 GC
    /// scenario). Always succeeds, including when there's nothing to
    /// collect.
    pub fn gc(&mut self) {
        log::debug!("gc: ticking {} archetype(s)", self.archetypes.len());
        for archetype in self.archetypes.iter_mut() {
            archetype.gc(&mut self.allocator);
        }
        self.allocator.flush();
    }

    fn location(&self, entity: Entity) -> Result<Location> {
        self.entities.locate(entity)?.ok_or(Error::InvalidEntity(entity))
    }

    fn place_in_root(&mut self, entity: Entity) -> Result<()> {
        let root = self.archetypes.root(&self.cache)?;
        let archetype = self.archetypes.get_mut(root).expect("root archetype just created");
        let (chunk, row) = archetype.insert(&mut self.allocator, entity)?;
        self.entities.set_location(entity, Location { archetype: root.index() as u32, chunk, row });
        Ok(())
    }

    /// Bump the world's change-version, returning the new value so callers
    /// can stamp a column's version with a value that any earlier baseline
    /// will observe as changed.
    #[inline]
    pub(crate) fn bump_version(&mut self) -> u32 {
        self.version = self.version.wrapping_add(1);
        self.version
    }

    /// Dynamic counterpart of [`World::add`], used by
    /// [`crate::ecs::command::CommandBuffer::commit`] for the ids-only
    /// `AddComponent` wire record. Only sound for zero-sized component
    /// types, since there are no bytes to initialize from the record.
    pub(crate) fn add_zeroed(&mut self, entity: Entity, id: component::Id) -> Result<()> {
        let descriptor = self.cache.get_info_of(id).expect("id was registered when queued");
        debug_assert_eq!(descriptor.size(), 0, "add_zeroed is only sound for zero-sized components");
        let kind = descriptor.kind();
        let list = if self.entities.is_disabled(entity) { ChunkList::Disabled } else { ChunkList::Enabled };
        let (to_id, chunk, _row) = self.structural_add(entity, id, kind)?;
        let version = self.bump_version();
        let archetype = self.archetypes.get_mut(to_id).expect("structural_add returns a live archetype");
        if kind == Kind::Generic {
            archetype.mark_changed_in(list, chunk, id, version);
        }
        Ok(())
    }

    /// Dynamic counterpart of [`World::set`], used by
    /// [`crate::ecs::command::CommandBuffer::commit`] for the
    /// `SetComponent` wire record: writes `bytes` (produced by the
    /// descriptor's clone thunk at push time) into the column, adding the
    /// component first if absent.
    pub(crate) fn set_raw(&mut self, entity: Entity, id: component::Id, descriptor: &Descriptor, bytes: &[u8]) -> Result<()> {
        debug_assert_eq!(bytes.len(), descriptor.size());
        let loc = self.location(entity)?;
        let archetype_id = archetype::Id::new(loc.archetype);
        let already_present = {
            let archetype = self.archetypes.get(archetype_id).expect("location references a live archetype");
            match descriptor.kind() {
                Kind::Generic => archetype.generic_signature().contains(id),
                Kind::Chunk => archetype.chunk_signature().contains(id),
            }
        };

        // Structural migration preserves enabled/disabled state, so this
        // holds for both branches below.
        let list = if self.entities.is_disabled(entity) { ChunkList::Disabled } else { ChunkList::Enabled };
        let (target_archetype_id, chunk, row) = if already_present {
            (archetype_id, loc.chunk, loc.row)
        } else {
            self.structural_add(entity, id, descriptor.kind())?
        };

        let version = self.bump_version();
        let archetype = self.archetypes.get_mut(target_archetype_id).expect("resolved above");
        let ptr = match descriptor.kind() {
            Kind::Generic => archetype.generic_ptr_in(list, chunk, row, id),
            Kind::Chunk => archetype.chunk_ptr_in(list, chunk, id),
        }
        .expect("column exists after structural_add");

        // SAFETY: ptr addresses descriptor.size() bytes, either freshly
        // reserved (never initialized) or already holding a live value of
        // this type that is dropped before being overwritten.
        unsafe {
            if already_present {
                descriptor.drop_in_place(ptr);
            }
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), descriptor.size());
        }
        if descriptor.kind() == Kind::Generic {
            archetype.mark_changed_in(list, chunk, id, version);
        }
        Ok(())
    }

    /// Dynamic counterpart of [`World::remove`], used by
    /// [`crate::ecs::command::CommandBuffer::commit`]. A no-op if the
    /// entity doesn't carry the component.
    pub(crate) fn remove_raw(&mut self, entity: Entity, id: component::Id) -> Result<()> {
        let Some(descriptor) = self.cache.get_info_of(id) else { return Ok(()) };
        match self.structural_remove(entity, id, descriptor.kind()) {
            Ok(()) => {
                self.bump_version();
                Ok(())
            }
            Err(Error::MissingComponent(_)) => Ok(()),
            Err(other) => Err(other),
        }
    }

    /// Core structural-add algorithm (`spec.md` §4.6): find or create the
    /// archetype reached by adding `id` to `entity`'s current archetype
    /// (caching the edge both ways), migrate the row, and return the new
    /// location so the caller can initialize the new column.
    fn structural_add(&mut self, entity: Entity, id: component::Id, kind: Kind) -> Result<(archetype::Id, u32, u32)> {
        let loc = self.location(entity)?;
        let from_id = archetype::Id::new(loc.archetype);
        let from = self.archetypes.get(from_id).expect("location references a live archetype");

        let already_present = match kind {
            Kind::Generic => from.generic_signature().contains(id),
            Kind::Chunk => from.chunk_signature().contains(id),
        };
        if already_present {
            return Err(Error::DuplicateComponent(id));
        }

        let to_id = match from.add_edge(id) {
            Some(to) => to,
            None => {
                let (generic_sig, chunk_sig) = match kind {
                    Kind::Generic => (from.generic_signature().with(id), from.chunk_signature().clone()),
                    Kind::Chunk => (from.generic_signature().clone(), from.chunk_signature().with(id)),
                };
                let to = self.archetypes.get_or_create(generic_sig, chunk_sig, &self.cache)?;
                self.archetypes.get_mut(from_id).expect("checked above").set_add_edge(id, to);
                self.archetypes.get_mut(to).expect("just created").set_del_edge(id, from_id);
                to
            }
        };

        self.move_row(entity, from_id, to_id)
    }

    /// Core structural-remove algorithm, the mirror of
    /// [`World::structural_add`].
    fn structural_remove(&mut self, entity: Entity, id: component::Id, kind: Kind) -> Result<()> {
        let loc = self.location(entity)?;
        let from_id = archetype::Id::new(loc.archetype);
        let from = self.archetypes.get(from_id).expect("location references a live archetype");

        let present = match kind {
            Kind::Generic => from.generic_signature().contains(id),
            Kind::Chunk => from.chunk_signature().contains(id),
        };
        if !present {
            return Err(Error::MissingComponent(id));
        }

        let to_id = match from.del_edge(id) {
            Some(to) => to,
            None => {
                let (generic_sig, chunk_sig) = match kind {
                    Kind::Generic => (from.generic_signature().without(id), from.chunk_signature().clone()),
                    Kind::Chunk => (from.generic_signature().clone(), from.chunk_signature().without(id)),
                };
                let to = self.archetypes.get_or_create(generic_sig, chunk_sig, &self.cache)?;
                self.archetypes.get_mut(from_id).expect("checked above").set_del_edge(id, to);
                self.archetypes.get_mut(to).expect("just created").set_add_edge(id, from_id);
                to
            }
        };

        self.move_row(entity, from_id, to_id)?;
        Ok(())
    }

    /// Migrate `entity`'s row from `from_id` to `to_id`: byte-copy every
    /// column the destination still carries (a true move — the source
    /// bytes are never dropped for those columns), drop any column the
    /// destination doesn't carry, then vacate the source row.
    fn move_row(&mut self, entity: Entity, from_id: archetype::Id, to_id: archetype::Id) -> Result<(archetype::Id, u32, u32)> {
        let loc = self.location(entity)?;
        // A structural change preserves the entity's enabled/disabled state
        // (`spec.md` §4.6 `add_component`, step 4: `enabled=!E.disabled`).
        let list = if self.entities.is_disabled(entity) { ChunkList::Disabled } else { ChunkList::Enabled };
        let (from, to) = self.archetypes.get_pair_mut(from_id, to_id);
        let (new_chunk, new_row) = to.insert_in(list, &mut self.allocator, entity)?;

        for &id in to.generic_signature().ids() {
            let Some(src_ptr) = from.generic_ptr_in(list, loc.chunk, loc.row, id) else { continue };
            let Some(dst_ptr) = to.generic_ptr_in(list, new_chunk, new_row, id) else { continue };
            let descriptor = self.cache.get_info_of(id).expect("signature id is registered");
            // SAFETY: src_ptr addresses a live value of this type; dst_ptr
            // is freshly reserved and uninitialized. This is a byte-move —
            // src_ptr's bytes are intentionally left unvisited afterwards.
            unsafe { std::ptr::copy_nonoverlapping(src_ptr.as_ptr(), dst_ptr.as_ptr(), descriptor.size()) };
        }

        for &id in from.generic_signature().ids() {
            if to.generic_signature().contains(id) {
                continue;
            }
            if let Some(ptr) = from.generic_ptr_in(list, loc.chunk, loc.row, id) {
                let descriptor = self.cache.get_info_of(id).expect("signature id is registered");
                // SAFETY: ptr addresses a live value not carried to `to`.
                unsafe { descriptor.drop_in_place(ptr) };
            }
        }

        // SAFETY: every generic column at (loc.chunk, loc.row) was just
        // either relocated (copy_nonoverlapping above) or dropped.
        let moved = unsafe { from.vacate_in(list, loc.chunk, loc.row)? };
        if let Some(moved_entity) = moved {
            self.entities.set_location(moved_entity, Location { archetype: from_id.index() as u32, chunk: loc.chunk, row: loc.row });
        }

        self.entities.set_location(entity, Location { archetype: to_id.index() as u32, chunk: new_chunk, row: new_row });
        Ok((to_id, new_chunk, new_row))
    }
}

/// [`component::Target`] that writes directly into a freshly inserted row,
/// used by [`World::create_entity_with`].
struct ChunkTarget<'a> {
    archetype: &'a mut archetype::Archetype,
    chunk: u32,
    row: u32,
    version: u32,
}

impl component::Target for ChunkTarget<'_> {
    fn apply<C: Component>(&mut self, id: component::Id, value: C) {
        let ptr = self
            .archetype
            .generic_ptr(self.chunk, self.row, id)
            .expect("column reserved by create_entity_with's signature");
        // SAFETY: the slot was reserved but left uninitialized by `insert`.
        unsafe { std::ptr::write(ptr.as_ptr().cast::<C>(), value) };
        self.archetype.mark_changed(self.chunk, id, self.version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }
    impl Component for Velocity {}

    #[derive(Clone, Debug, PartialEq)]
    struct Name(String);
    impl Component for Name {}

    #[test]
    fn create_entity_places_it_in_the_root_archetype() {
        // Given / When
        let mut world = World::new();
        let entity = world.create_entity().unwrap();

        // Then
        assert!(world.valid(entity));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn add_then_get_round_trips() {
        // Given
        let mut world = World::new();
        let entity = world.create_entity().unwrap();

        // When
        world.add(entity, Position { x: 1.0, y: 2.0 }).unwrap();

        // Then
        assert_eq!(world.get::<Position>(entity).unwrap(), Some(&Position { x: 1.0, y: 2.0 }));
        assert!(world.has::<Position>(entity).unwrap());
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut world = World::new();
        let entity = world.create_entity().unwrap();
        world.add(entity, Position { x: 0.0, y: 0.0 }).unwrap();

        let id = world.cache().get::<Position>().unwrap();
        assert_eq!(world.add(entity, Position { x: 1.0, y: 1.0 }), Err(Error::DuplicateComponent(id)));
    }

    #[test]
    fn add_two_components_then_remove_one_preserves_the_other() {
        // Given
        let mut world = World::new();
        let entity = world.create_entity().unwrap();
        world.add(entity, Position { x: 1.0, y: 2.0 }).unwrap();
        world.add(entity, Velocity { dx: 3.0, dy: 4.0 }).unwrap();

        // When
        world.remove::<Position>(entity).unwrap();

        // Then
        assert!(!world.has::<Position>(entity).unwrap());
        assert_eq!(world.get::<Velocity>(entity).unwrap(), Some(&Velocity { dx: 3.0, dy: 4.0 }));
    }

    #[test]
    fn remove_missing_component_errors() {
        let mut world = World::new();
        let entity = world.create_entity().unwrap();
        assert!(matches!(world.remove::<Position>(entity), Err(Error::MissingComponent(_))));
    }

    #[test]
    fn migration_does_not_double_free_heap_owning_components() {
        // Given - Name owns a heap String; if move_row double-copied and
        // double-dropped, this would double-free under a leak/UB checker.
        let mut world = World::new();
        let entity = world.create_entity().unwrap();
        world.add(entity, Name("hello".to_string())).unwrap();
        world.add(entity, Position { x: 1.0, y: 1.0 }).unwrap();

        // When
        world.remove::<Position>(entity).unwrap();

        // Then
        assert_eq!(world.get::<Name>(entity).unwrap(), Some(&Name("hello".to_string())));
        world.destroy(entity).unwrap();
    }

    #[test]
    fn destroy_frees_the_entity_and_swaps_the_last_row() {
        // Given
        let mut world = World::new();
        let a = world.create_entity().unwrap();
        let b = world.create_entity().unwrap();
        world.add(a, Position { x: 1.0, y: 1.0 }).unwrap();
        world.add(b, Position { x: 2.0, y: 2.0 }).unwrap();

        // When
        world.destroy(a).unwrap();

        // Then
        assert!(!world.valid(a));
        assert!(world.valid(b));
        assert_eq!(world.get::<Position>(b).unwrap(), Some(&Position { x: 2.0, y: 2.0 }));
    }

    #[test]
    fn valid_detects_a_corrupted_chunk_back_reference() {
        // Given - two entities, each in its own row.
        let mut world = World::new();
        let a = world.create_entity().unwrap();
        let b = world.create_entity().unwrap();
        world.add(a, Position { x: 1.0, y: 1.0 }).unwrap();
        world.add(b, Position { x: 2.0, y: 2.0 }).unwrap();

        // When - `a`'s registry slot is corrupted to claim `b`'s row, but
        // that row's chunk storage still reports `b` as its occupant.
        let b_loc = world.location(b).unwrap();
        world.entities.set_location(a, b_loc);

        // Then - the back-reference mismatch makes `a` invalid even though
        // its generation and occupied bit still look fine.
        assert!(!world.valid(a));
        assert!(world.valid(b));
    }

    #[test]
    fn create_entity_like_clones_components() {
        // Given
        let mut world = World::new();
        let source = world.create_entity().unwrap();
        world.add(source, Position { x: 5.0, y: 6.0 }).unwrap();
        world.add(source, Name("clone-me".to_string())).unwrap();

        // When
        let clone = world.create_entity_like(source).unwrap();

        // Then
        assert_eq!(world.get::<Position>(clone).unwrap(), Some(&Position { x: 5.0, y: 6.0 }));
        assert_eq!(world.get::<Name>(clone).unwrap(), Some(&Name("clone-me".to_string())));
        assert_ne!(source, clone);
    }

    #[test]
    fn create_entity_with_tuple_applies_every_member() {
        // Given / When
        let mut world = World::new();
        let entity = world.create_entity_with((Position { x: 1.0, y: 1.0 }, Velocity { dx: 2.0, dy: 2.0 })).unwrap();

        // Then
        assert_eq!(world.get::<Position>(entity).unwrap(), Some(&Position { x: 1.0, y: 1.0 }));
        assert_eq!(world.get::<Velocity>(entity).unwrap(), Some(&Velocity { dx: 2.0, dy: 2.0 }));
    }

    #[test]
    fn set_adds_when_absent_and_overwrites_when_present() {
        // Given
        let mut world = World::new();
        let entity = world.create_entity().unwrap();

        // When
        world.set(entity, Position { x: 1.0, y: 1.0 }).unwrap();
        world.set(entity, Position { x: 9.0, y: 9.0 }).unwrap();

        // Then
        assert_eq!(world.get::<Position>(entity).unwrap(), Some(&Position { x: 9.0, y: 9.0 }));
    }

    #[test]
    fn set_enabled_true_twice_is_a_no_op() {
        let mut world = World::new();
        let entity = world.create_entity().unwrap();
        world.set_enabled(entity, true).unwrap();
        world.set_enabled(entity, true).unwrap();
        assert!(world.valid(entity));
    }

    #[test]
    fn disabling_then_enabling_preserves_components() {
        // Given
        let mut world = World::new();
        let entity = world.create_entity().unwrap();
        world.add(entity, Position { x: 3.0, y: 4.0 }).unwrap();

        // When
        world.set_enabled(entity, false).unwrap();
        world.set_enabled(entity, true).unwrap();

        // Then
        assert_eq!(world.get::<Position>(entity).unwrap(), Some(&Position { x: 3.0, y: 4.0 }));
    }

    #[test]
    fn gc_on_an_empty_world_is_a_no_op() {
        let mut world = World::new();
        world.gc();
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn with_lifespan_drains_an_emptied_chunk_in_exactly_that_many_ticks() {
        // Given
        let mut world = World::with_lifespan(2);
        let entity = world.create_entity().unwrap();
        let archetype_id = archetype::Id::new(world.location(entity).unwrap().archetype);
        world.destroy(entity).unwrap();

        // When - one tick short of the lifespan, the empty chunk survives.
        world.gc();
        assert_eq!(world.archetypes().get(archetype_id).unwrap().chunks(ChunkList::Enabled).len(), 1);

        // Then - the second tick releases it.
        world.gc();
        assert_eq!(world.archetypes().get(archetype_id).unwrap().chunks(ChunkList::Enabled).len(), 0);
    }
}
