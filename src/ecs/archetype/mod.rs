//! Archetypes: groups of entities sharing one component signature, and the
//! chunk lists, lattice edges, and structural lock that back them
//! (`spec.md` §3, Archetype; §4.4 structural changes; §4.6 structural
//! lock).
//!
//! Consolidates the teacher's two half-finished, nearly-identical
//! `Archetype`/`Archetypes` types (`storage/archetype.rs` and its newer
//! `archetype/registry.rs` counterpart) into one definition generalized for
//! fixed-capacity chunks instead of an unbounded `Table`.

mod registry;

pub use registry::Registry;

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ecs::component::{self, Signature};
use crate::ecs::entity::Entity;
use crate::ecs::error::{Error, Result};
use crate::ecs::hash;
use crate::ecs::storage::allocator::ChunkAllocator;
use crate::ecs::storage::chunk::{Chunk, ChunkLayout};

/// Default number of GC ticks an emptied chunk survives before its block is
/// eligible for release (`spec.md` §6 `World::gc`; Open Question resolved
/// in `DESIGN.md`).
pub const DEFAULT_CHUNK_LIFESPAN: u32 = 4;

/// Upper bound on the combined generic + chunk-kind component count of one
/// archetype (`spec.md` §7, `ComponentBudgetExceeded`).
pub const MAX_COMPONENTS_PER_ARCHETYPE: usize = 32;

/// A unique identifier for an archetype within one [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(u32);

impl Id {
    #[inline]
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Where a chunk lives within its archetype: the enabled list (queried by
/// default) or the disabled list (`spec.md` §4.5 `set_enabled`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkList {
    Enabled,
    Disabled,
}

/// A group of entities sharing one generic + chunk-kind component
/// signature, stored as a list of fixed-capacity chunks.
pub struct Archetype {
    id: Id,
    generic_signature: Signature,
    chunk_signature: Signature,
    /// Bitwise-OR of every generic component's matcher hash, used as a
    /// bloom-style fail-fast prefilter before the exact signature check
    /// (`spec.md` §3, §4.7).
    matcher_hash: u64,
    layout: Arc<ChunkLayout>,
    enabled: Vec<Chunk>,
    disabled: Vec<Chunk>,
    /// Indices into `enabled` with at least one free row.
    open: Vec<u32>,
    /// Component id this archetype was reached by adding, from its parent
    /// (`None` for the root archetype).
    add_edges: HashMap<component::Id, Id>,
    del_edges: HashMap<component::Id, Id>,
    /// Incremented while a query holds an iterator over this archetype;
    /// structural mutation is rejected while nonzero (`spec.md` §4.6).
    structural_lock: Cell<u32>,
    /// GC ticks a newly-emptied chunk survives before release, fixed at
    /// archetype-creation time (`spec.md` §6 `World::gc`).
    lifespan: u32,
}

impl Archetype {
    fn new(id: Id, generic_signature: Signature, chunk_signature: Signature, cache: &component::Cache, lifespan: u32) -> Result<Self> {
        if generic_signature.len() + chunk_signature.len() > MAX_COMPONENTS_PER_ARCHETYPE {
            return Err(Error::ComponentBudgetExceeded);
        }
        let generic_descriptors = generic_signature
            .ids()
            .iter()
            .map(|&id| cache.get_info_of(id).expect("signature id must be registered"))
            .collect();
        let chunk_descriptors = chunk_signature
            .ids()
            .iter()
            .map(|&id| cache.get_info_of(id).expect("signature id must be registered"))
            .collect();
        let layout = ChunkLayout::compute(generic_descriptors, chunk_descriptors)?;

        let matcher_hash = generic_signature
            .ids()
            .iter()
            .filter_map(|&id| cache.get_info_of(id))
            .fold(0u64, |acc, d| acc | d.matcher_hash());

        Ok(Self {
            id,
            generic_signature,
            chunk_signature,
            matcher_hash,
            layout: Arc::new(layout),
            enabled: Vec::new(),
            disabled: Vec::new(),
            open: Vec::new(),
            add_edges: HashMap::new(),
            del_edges: HashMap::new(),
            structural_lock: Cell::new(0),
            lifespan,
        })
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub fn generic_signature(&self) -> &Signature {
        &self.generic_signature
    }

    #[inline]
    pub fn chunk_signature(&self) -> &Signature {
        &self.chunk_signature
    }

    #[inline]
    pub fn matcher_hash(&self) -> u64 {
        self.matcher_hash
    }

    #[inline]
    pub fn layout(&self) -> &Arc<ChunkLayout> {
        &self.layout
    }

    /// Whether this archetype's signature contains every id `signature`
    /// names (`spec.md` §4.7, the exact post-bloom check).
    #[inline]
    pub fn supports(&self, signature: &Signature) -> bool {
        self.generic_signature.contains_all(signature)
    }

    #[inline]
    pub fn chunks(&self, list: ChunkList) -> &[Chunk] {
        match list {
            ChunkList::Enabled => &self.enabled,
            ChunkList::Disabled => &self.disabled,
        }
    }

    #[inline]
    pub fn entity_count(&self) -> usize {
        self.enabled.iter().map(|c| c.len() as usize).sum()
    }

    /// Raise the structural lock, rejecting further structural mutation of
    /// this archetype until it is lowered (`spec.md` §4.6). Returns a guard
    /// that lowers it again on drop.
    pub fn lock(&self) -> StructuralLockGuard<'_> {
        self.structural_lock.set(self.structural_lock.get() + 1);
        StructuralLockGuard { archetype: self }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.structural_lock.get() > 0
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.is_locked() {
            Err(Error::StructuralLockHeld)
        } else {
            Ok(())
        }
    }

    fn chunks_mut(&mut self, list: ChunkList) -> &mut Vec<Chunk> {
        match list {
            ChunkList::Enabled => &mut self.enabled,
            ChunkList::Disabled => &mut self.disabled,
        }
    }

    /// Find a chunk in `list` with a free row, or allocate a new one.
    /// `open` only tracks free slots for the enabled list — the common,
    /// hot path — since disabled chunks are rarely inserted into and a
    /// linear scan over them is cheap.
    fn open_slot(&mut self, list: ChunkList, allocator: &mut ChunkAllocator) -> Result<u32> {
        match list {
            ChunkList::Enabled => match self.open.last().copied() {
                Some(index) => Ok(index),
                None => {
                    let chunk = Chunk::new(allocator, &self.layout, self.lifespan)?;
                    log::trace!("archetype {:?}: allocated enabled chunk {}", self.id, self.enabled.len());
                    self.enabled.push(chunk);
                    let index = self.enabled.len() as u32 - 1;
                    self.open.push(index);
                    Ok(index)
                }
            },
            ChunkList::Disabled => {
                if let Some(index) = self.disabled.iter().position(|c| !c.is_full(&self.layout)) {
                    return Ok(index as u32);
                }
                let chunk = Chunk::new(allocator, &self.layout, self.lifespan)?;
                log::trace!("archetype {:?}: allocated disabled chunk {}", self.id, self.disabled.len());
                self.disabled.push(chunk);
                Ok(self.disabled.len() as u32 - 1)
            }
        }
    }

    fn insert_into_list(&mut self, list: ChunkList, allocator: &mut ChunkAllocator, entity: Entity) -> Result<(u32, u32)> {
        self.ensure_unlocked()?;
        let chunk_index = self.open_slot(list, allocator)?;
        let chunk = &mut self.chunks_mut(list)[chunk_index as usize];
        let row = chunk.add_row(&self.layout, entity);
        chunk.reset_lifespan(self.lifespan);
        if list == ChunkList::Enabled && chunk.is_full(&self.layout) {
            self.open.pop();
        }
        Ok((chunk_index, row))
    }

    fn remove_from_list(&mut self, list: ChunkList, chunk_index: u32, row: u32, drop_values: bool) -> Result<Option<Entity>> {
        self.ensure_unlocked()?;
        let was_full = self.chunks(list)[chunk_index as usize].is_full(&self.layout);
        let chunk = &mut self.chunks_mut(list)[chunk_index as usize];
        // SAFETY: row was returned by a prior insert into this list and is still in bounds.
        let moved = if drop_values {
            unsafe { chunk.remove_row(&self.layout, row) }
        } else {
            unsafe { chunk.vacate_row(&self.layout, row) }
        };
        if list == ChunkList::Enabled && was_full {
            self.open.push(chunk_index);
        }
        Ok(moved)
    }

    /// Insert `entity` into the enabled chunk list, allocating a new chunk
    /// if every existing enabled chunk is full.
    ///
    /// Returns the row's location within this archetype; every generic
    /// column at that row is uninitialized until the caller writes each
    /// component value.
    pub fn insert(&mut self, allocator: &mut ChunkAllocator, entity: Entity) -> Result<(u32, u32)> {
        self.insert_into_list(ChunkList::Enabled, allocator, entity)
    }

    /// List-aware counterpart of [`Archetype::insert`], needed when
    /// migrating a disabled entity so it lands back in the disabled list
    /// (`spec.md` §4.6 `add_component`, step 4: `enabled=!E.disabled`).
    pub fn insert_in(&mut self, list: ChunkList, allocator: &mut ChunkAllocator, entity: Entity) -> Result<(u32, u32)> {
        self.insert_into_list(list, allocator, entity)
    }

    /// Remove the row at `(chunk_index, row)` from the enabled list.
    /// Returns the entity that swapped into that slot, if any, so the
    /// caller (`World`) can update its registry location.
    pub fn remove(&mut self, chunk_index: u32, row: u32) -> Result<Option<Entity>> {
        self.remove_from_list(ChunkList::Enabled, chunk_index, row, true)
    }

    /// List-aware counterpart of [`Archetype::remove`].
    pub fn remove_in(&mut self, list: ChunkList, chunk_index: u32, row: u32) -> Result<Option<Entity>> {
        self.remove_from_list(list, chunk_index, row, true)
    }

    /// Remove the row at `(chunk_index, row)` without dropping its column
    /// values, for the structural-migration path where every column was
    /// already relocated (copied) or explicitly dropped by the caller
    /// first. See [`crate::ecs::storage::chunk::Chunk::vacate_row`].
    ///
    /// # Safety
    /// Every generic column at `(chunk_index, row)` must already be either
    /// relocated to its destination or dropped by the caller.
    pub unsafe fn vacate(&mut self, chunk_index: u32, row: u32) -> Result<Option<Entity>> {
        self.remove_from_list(ChunkList::Enabled, chunk_index, row, false)
    }

    /// List-aware counterpart of [`Archetype::vacate`].
    ///
    /// # Safety
    /// Same contract as [`Archetype::vacate`].
    pub unsafe fn vacate_in(&mut self, list: ChunkList, chunk_index: u32, row: u32) -> Result<Option<Entity>> {
        self.remove_from_list(list, chunk_index, row, false)
    }

    /// Move the row at `(chunk_index, row)` between the enabled and
    /// disabled chunk lists (`spec.md` §4.5 `set_enabled`). Both lists
    /// share this archetype's `ChunkLayout`, so this is a same-layout
    /// byte-copy rather than a full archetype-graph migration. Returns
    /// `None` if `from == to`.
    pub fn move_between_lists(
        &mut self,
        chunk_index: u32,
        row: u32,
        from: ChunkList,
        to: ChunkList,
        allocator: &mut ChunkAllocator,
    ) -> Result<Option<ListMove>> {
        self.ensure_unlocked()?;
        if from == to {
            return Ok(None);
        }

        let entity = self.chunks(from)[chunk_index as usize].entity(&self.layout, row);
        let (new_chunk, new_row) = self.insert_into_list(to, allocator, entity)?;

        for descriptor in self.layout.generic_descriptors() {
            let id = descriptor.id();
            let src = self.chunks(from)[chunk_index as usize]
                .generic_ptr(&self.layout, id, row)
                .expect("enabled and disabled chunks share a layout");
            let dst = self.chunks(to)[new_chunk as usize]
                .generic_ptr(&self.layout, id, new_row)
                .expect("just inserted");
            // SAFETY: src is a live value of this type; dst was just
            // reserved and is uninitialized.
            unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), descriptor.size()) };
        }

        let swapped = self.remove_from_list(from, chunk_index, row, false)?;
        Ok(Some(ListMove { chunk: new_chunk, row: new_row, swapped }))
    }

    pub fn get_entity(&self, chunk_index: u32, row: u32) -> Entity {
        self.get_entity_in(ChunkList::Enabled, chunk_index, row)
    }

    /// List-aware counterpart of [`Archetype::get_entity`], used by the
    /// query engine when iterating disabled chunks.
    pub fn get_entity_in(&self, list: ChunkList, chunk_index: u32, row: u32) -> Entity {
        self.chunks(list)[chunk_index as usize].entity(&self.layout, row)
    }

    /// Read a generic column's slot for a row in the enabled list, the hot
    /// path every query runs.
    pub fn generic_ptr(&self, chunk_index: u32, row: u32, id: component::Id) -> Option<std::ptr::NonNull<u8>> {
        self.generic_ptr_in(ChunkList::Enabled, chunk_index, row, id)
    }

    pub fn chunk_ptr(&self, chunk_index: u32, id: component::Id) -> Option<std::ptr::NonNull<u8>> {
        self.chunk_ptr_in(ChunkList::Enabled, chunk_index, id)
    }

    /// List-aware counterpart of [`Archetype::generic_ptr`], needed because
    /// a disabled entity's row lives in the disabled chunk list but its
    /// components must still be readable and writable through `World`.
    pub fn generic_ptr_in(&self, list: ChunkList, chunk_index: u32, row: u32, id: component::Id) -> Option<std::ptr::NonNull<u8>> {
        self.chunks(list)[chunk_index as usize].generic_ptr(&self.layout, id, row)
    }

    pub fn chunk_ptr_in(&self, list: ChunkList, chunk_index: u32, id: component::Id) -> Option<std::ptr::NonNull<u8>> {
        self.chunks(list)[chunk_index as usize].chunk_ptr(&self.layout, id)
    }

    pub fn mark_changed(&mut self, chunk_index: u32, id: component::Id, world_version: u32) {
        self.mark_changed_in(ChunkList::Enabled, chunk_index, id, world_version);
    }

    pub fn mark_changed_in(&mut self, list: ChunkList, chunk_index: u32, id: component::Id, world_version: u32) {
        self.chunks_mut(list)[chunk_index as usize].mark_changed(&self.layout, id, world_version);
    }

    pub fn did_change(&self, chunk_index: u32, id: component::Id, since_version: u32) -> bool {
        self.did_change_in(ChunkList::Enabled, chunk_index, id, since_version)
    }

    /// List-aware counterpart of [`Archetype::did_change`], needed so the
    /// query engine can apply a `changed<T>` filter to disabled chunks too.
    pub fn did_change_in(&self, list: ChunkList, chunk_index: u32, id: component::Id, since_version: u32) -> bool {
        self.chunks(list)[chunk_index as usize].did_change(&self.layout, id, since_version)
    }

    /// Look up the archetype reached by adding `component_id`'s column to
    /// this one, if that edge has already been traversed.
    pub fn add_edge(&self, component_id: component::Id) -> Option<Id> {
        self.add_edges.get(&component_id).copied()
    }

    pub fn set_add_edge(&mut self, component_id: component::Id, to: Id) {
        self.add_edges.insert(component_id, to);
    }

    pub fn del_edge(&self, component_id: component::Id) -> Option<Id> {
        self.del_edges.get(&component_id).copied()
    }

    pub fn set_del_edge(&mut self, component_id: component::Id, to: Id) {
        self.del_edges.insert(component_id, to);
    }

    /// Tick every empty enabled chunk's lifespan, releasing blocks whose
    /// lifespan reaches zero (`spec.md` §6 `World::gc`).
    pub fn gc(&mut self, allocator: &mut ChunkAllocator) {
        let layout = Arc::clone(&self.layout);
        let mut index = 0;
        while index < self.enabled.len() {
            let expired = self.enabled[index].tick_lifespan();
            if expired && self.enabled[index].is_empty() {
                let chunk = self.enabled.swap_remove(index);
                log::debug!("archetype {:?}: releasing expired empty chunk", self.id);
                // SAFETY: chunk is empty and owned solely by this archetype.
                unsafe { chunk.release(&layout, allocator) };
                self.open.retain(|&i| i != index as u32);
                self.open.iter_mut().for_each(|i| {
                    if *i == self.enabled.len() as u32 {
                        *i = index as u32;
                    }
                });
            } else {
                index += 1;
            }
        }
    }
}

/// Outcome of [`Archetype::move_between_lists`]: the row's new location,
/// plus the entity (if any) that got swapped into the vacated slot in the
/// source list.
#[derive(Debug, Clone, Copy)]
pub struct ListMove {
    pub chunk: u32,
    pub row: u32,
    pub swapped: Option<Entity>,
}

/// RAII guard lowering an archetype's structural lock on drop.
pub struct StructuralLockGuard<'a> {
    archetype: &'a Archetype,
}

impl Drop for StructuralLockGuard<'_> {
    fn drop(&mut self) {
        let current = self.archetype.structural_lock.get();
        self.archetype.structural_lock.set(current.saturating_sub(1));
    }
}

/// Stable key for looking up an existing archetype by its full signature
/// pair without cloning the signatures themselves.
pub(crate) fn signature_key(generic: &Signature, chunk: &Signature) -> u64 {
    hash::combine(
        hash::combine_all(0, generic.ids().iter().map(|id| id.index() as u64)),
        hash::combine_all(1, chunk.ids().iter().map(|id| id.index() as u64)),
    )
}
