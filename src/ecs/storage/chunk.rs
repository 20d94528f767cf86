//! Fixed-capacity, column-major row storage (`spec.md` §3, Chunk).
//!
//! A chunk is one block obtained from [`super::allocator::ChunkAllocator`]
//! sliced into: an entity column, one column per generic (per-row)
//! component in sorted id order, and one slot per chunk-kind (per-chunk
//! singleton) component. Capacity is fixed at construction time from the
//! owning archetype's [`ChunkLayout`] and never grows — unlike the
//! teacher's `storage::Table`, which backs every column with an
//! independently growable `Vec`.
//!
//! Grounded on `engine/src/ecs/storage/cell.rs` (`Cell`/`CellMut` raw
//! pointer plus debug-only type tag) for typed access, and
//! `zakarumych-alex/src/archetype/archetype.rs` for the alignment-sorted
//! offset arithmetic used to build [`ChunkLayout`].

use std::ptr::NonNull;

use crate::ecs::component::{self, Cache, Descriptor};
use crate::ecs::entity::Entity;
use crate::ecs::storage::allocator::{BLOCK_PAYLOAD, ChunkAllocator};

/// Bytes withheld from the end of every block's payload, unavailable to row
/// storage (`spec.md` §3, Chunk invariants: `16 KiB - header - reserved-tail
/// (128 B)`).
const CHUNK_RESERVED_TAIL: usize = 128;

/// Column offsets and row capacity for every chunk of one archetype.
/// Computed once when the archetype is created and shared (via `Arc`) by
/// every chunk belonging to it.
#[derive(Debug)]
pub struct ChunkLayout {
    capacity: u32,
    entity_offset: usize,
    /// Parallel to the archetype's generic signature ids: byte offset of
    /// that column's first element within the block.
    generic_offsets: Vec<usize>,
    generic_descriptors: Vec<Descriptor>,
    /// Parallel to the archetype's chunk-kind signature ids: byte offset of
    /// that component's single instance within the block.
    chunk_offsets: Vec<usize>,
    chunk_descriptors: Vec<Descriptor>,
}

impl ChunkLayout {
    /// Compute the layout for an archetype with the given generic and
    /// chunk-kind component descriptors (already in the archetype's sorted
    /// id order). Descriptors are sorted by descending alignment first, to
    /// minimize padding, matching `zakarumych-alex`'s `chunk_layout`.
    ///
    /// # Errors
    /// Returns [`crate::ecs::error::Error::ComponentBudgetExceeded`] if even
    /// a single row's worth of columns (plus chunk-kind singletons) would
    /// not fit in one block.
    pub fn compute(
        generic_descriptors: Vec<Descriptor>,
        chunk_descriptors: Vec<Descriptor>,
    ) -> crate::ecs::error::Result<Self> {
        let mut generic_sorted = generic_descriptors;
        generic_sorted.sort_by_key(|d| std::cmp::Reverse(d.align()));

        let mut chunk_sorted = chunk_descriptors;
        chunk_sorted.sort_by_key(|d| std::cmp::Reverse(d.align()));

        // Chunk-kind singletons have a fixed size independent of row
        // capacity, so they're placed first.
        let mut cursor = 0usize;
        let mut chunk_offsets = Vec::with_capacity(chunk_sorted.len());
        for descriptor in &chunk_sorted {
            cursor = align_up(cursor, descriptor.align());
            chunk_offsets.push(cursor);
            cursor += descriptor.size();
        }
        let fixed_bytes = cursor;

        // Every remaining byte is split between the entity column and the
        // generic component columns, each sized `capacity * element_size`.
        // Rust's layout guarantee (a type's size is always a multiple of
        // its alignment) means array elements need no inter-element
        // padding; only each column's *starting* offset needs aligning, a
        // one-time cost bounded by `align - 1`. Reserve the worst case for
        // every column up front so the capacity estimate never overshoots.
        let entity_layout = std::alloc::Layout::new::<Entity>();
        let variable_unit: usize = entity_layout.size()
            + generic_sorted.iter().map(Descriptor::size).sum::<usize>();
        let max_padding: usize = (entity_layout.align() - 1)
            + generic_sorted.iter().map(|d| d.align() - 1).sum::<usize>();

        let usable = (BLOCK_PAYLOAD.saturating_sub(CHUNK_RESERVED_TAIL))
            .saturating_sub(fixed_bytes)
            .saturating_sub(max_padding);
        let capacity = (usable / variable_unit.max(1)) as u32;
        if capacity == 0 {
            return Err(crate::ecs::error::Error::ComponentBudgetExceeded);
        }

        let mut column_cursor = align_up(fixed_bytes, entity_layout.align());
        let entity_offset = column_cursor;
        column_cursor += entity_layout.size() * capacity as usize;

        let mut generic_offsets = Vec::with_capacity(generic_sorted.len());
        for descriptor in &generic_sorted {
            column_cursor = align_up(column_cursor, descriptor.align());
            generic_offsets.push(column_cursor);
            column_cursor += descriptor.size() * capacity as usize;
        }

        debug_assert!(
            column_cursor <= BLOCK_PAYLOAD - CHUNK_RESERVED_TAIL,
            "padding reservation was insufficient"
        );

        Ok(Self {
            capacity,
            entity_offset,
            generic_offsets,
            generic_descriptors: generic_sorted,
            chunk_offsets,
            chunk_descriptors: chunk_sorted,
        })
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Every generic (per-row) component descriptor, in column order —
    /// shared by every chunk of the owning archetype regardless of which
    /// list (enabled/disabled) it's currently in.
    #[inline]
    pub fn generic_descriptors(&self) -> &[Descriptor] {
        &self.generic_descriptors
    }

    fn generic_index(&self, id: component::Id) -> Option<usize> {
        self.generic_descriptors.iter().position(|d| d.id() == id)
    }

    fn chunk_index(&self, id: component::Id) -> Option<usize> {
        self.chunk_descriptors.iter().position(|d| d.id() == id)
    }
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    let align = align.max(1);
    (value + align - 1) & !(align - 1)
}

/// A fixed-capacity, column-major block of rows, all sharing one archetype.
pub struct Chunk {
    block: NonNull<u8>,
    len: u32,
    /// Per-generic-column version counter, bumped whenever a mutable view
    /// is taken (`spec.md` §4.3/§5: change detection is per-column, not
    /// per-row).
    versions: Vec<u32>,
    /// Remaining GC ticks before an empty chunk's block is eligible for
    /// release back to the allocator (`spec.md` §6, `World::gc`).
    lifespan: u32,
}

impl Chunk {
    pub fn new(allocator: &mut ChunkAllocator, layout: &ChunkLayout, lifespan: u32) -> crate::ecs::error::Result<Self> {
        let block = allocator.alloc()?;
        Ok(Self {
            block,
            len: 0,
            versions: vec![0; layout.generic_descriptors.len()],
            lifespan,
        })
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self, layout: &ChunkLayout) -> bool {
        self.len >= layout.capacity
    }

    #[inline]
    pub fn lifespan(&self) -> u32 {
        self.lifespan
    }

    #[inline]
    pub fn reset_lifespan(&mut self, lifespan: u32) {
        self.lifespan = lifespan;
    }

    #[inline]
    pub fn tick_lifespan(&mut self) -> bool {
        if self.is_empty() {
            self.lifespan = self.lifespan.saturating_sub(1);
        }
        self.lifespan == 0
    }

    fn entity_ptr(&self, layout: &ChunkLayout, row: u32) -> NonNull<Entity> {
        let offset = layout.entity_offset + row as usize * std::mem::size_of::<Entity>();
        // SAFETY: row < capacity is the caller's responsibility; offset stays within the block.
        unsafe { NonNull::new_unchecked(self.block.as_ptr().add(offset).cast()) }
    }

    pub fn entity(&self, layout: &ChunkLayout, row: u32) -> Entity {
        debug_assert!(row < self.len, "row out of bounds");
        // SAFETY: row < len, slot was initialized by add_row.
        unsafe { *self.entity_ptr(layout, row).as_ptr() }
    }

    fn set_entity(&mut self, layout: &ChunkLayout, row: u32, entity: Entity) {
        // SAFETY: row < capacity, slot is either uninitialized or being overwritten with Copy data.
        unsafe { self.entity_ptr(layout, row).as_ptr().write(entity) };
    }

    /// Reserve the next free row for `entity`, returning its row index.
    /// Component columns at that row are left uninitialized; the caller
    /// must initialize every generic column before the chunk is queried.
    pub fn add_row(&mut self, layout: &ChunkLayout, entity: Entity) -> u32 {
        debug_assert!(!self.is_full(layout), "add_row on a full chunk");
        let row = self.len;
        self.set_entity(layout, row, entity);
        self.len += 1;
        row
    }

    /// Remove `row` by swapping the last row into its place (`spec.md` §4.4:
    /// removal is swap-with-last, not shift). Drops the removed row's
    /// component values. Returns the entity that used to occupy the last
    /// row, if a swap occurred (the caller must update its location).
    ///
    /// # Safety
    /// `row` must be `< self.len()`.
    pub unsafe fn remove_row(&mut self, layout: &ChunkLayout, row: u32) -> Option<Entity> {
        debug_assert!(row < self.len);

        for (column, descriptor) in layout.generic_descriptors.iter().enumerate() {
            let ptr = self.generic_row_ptr(layout, column, row);
            // SAFETY: row < len, column was initialized by the caller when the row was added.
            unsafe { descriptor.drop_in_place(ptr) };
        }

        // SAFETY: forwarded from this method's own safety contract.
        unsafe { self.vacate_row(layout, row) }
    }

    /// Swap the last row into `row`'s place without dropping anything at
    /// `row` first, for the archetype-migration path (`World::move_row`):
    /// every column byte-copied out to a destination archetype is a Rust
    /// move, and the source bytes must be treated as uninitialized rather
    /// than dropped again. Columns the caller didn't carry over must be
    /// dropped by the caller before calling this.
    ///
    /// # Safety
    /// `row` must be `< self.len()`, and every generic column at `row` must
    /// already be either relocated or dropped by the caller.
    pub unsafe fn vacate_row(&mut self, layout: &ChunkLayout, row: u32) -> Option<Entity> {
        debug_assert!(row < self.len);
        let last = self.len - 1;

        let moved = if row != last {
            for (column, descriptor) in layout.generic_descriptors.iter().enumerate() {
                let src = self.generic_row_ptr(layout, column, last);
                let dst = self.generic_row_ptr(layout, column, row);
                // SAFETY: src/dst are distinct, correctly sized and aligned slots within the block.
                unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), descriptor.size()) };
            }
            let moved_entity = self.entity(layout, last);
            self.set_entity(layout, row, moved_entity);
            Some(moved_entity)
        } else {
            None
        };

        self.len -= 1;
        moved
    }

    fn generic_row_ptr(&self, layout: &ChunkLayout, column: usize, row: u32) -> NonNull<u8> {
        let descriptor = &layout.generic_descriptors[column];
        let offset = layout.generic_offsets[column] + row as usize * descriptor.size();
        // SAFETY: offset computed from layout stays within the block.
        unsafe { NonNull::new_unchecked(self.block.as_ptr().add(offset)) }
    }

    /// Pointer to row `row` of the generic component `id`, or `None` if
    /// this chunk's archetype doesn't carry that component.
    pub fn generic_ptr(&self, layout: &ChunkLayout, id: component::Id, row: u32) -> Option<NonNull<u8>> {
        let column = layout.generic_index(id)?;
        Some(self.generic_row_ptr(layout, column, row))
    }

    /// Pointer to the chunk-kind singleton `id`, or `None` if this chunk's
    /// archetype doesn't carry that component.
    pub fn chunk_ptr(&self, layout: &ChunkLayout, id: component::Id) -> Option<NonNull<u8>> {
        let column = layout.chunk_index(id)?;
        let offset = layout.chunk_offsets[column];
        // SAFETY: offset computed from layout stays within the block.
        Some(unsafe { NonNull::new_unchecked(self.block.as_ptr().add(offset)) })
    }

    /// Write `value` into an uninitialized generic column slot.
    ///
    /// # Safety
    /// The slot at `(id, row)` must not already hold an initialized value
    /// of this component.
    pub unsafe fn write_generic<C: component::Component>(
        &mut self,
        layout: &ChunkLayout,
        id: component::Id,
        row: u32,
    ) -> Option<*mut C> {
        let ptr = self.generic_ptr(layout, id, row)?;
        Some(ptr.as_ptr().cast())
    }

    /// Bump the change-version for generic column `id`. Called when a
    /// mutable view into that column is acquired (`spec.md` §4.3: version
    /// bumps happen per write-view, not per row write).
    pub fn mark_changed(&mut self, layout: &ChunkLayout, id: component::Id, world_version: u32) {
        if let Some(column) = layout.generic_index(id) {
            self.versions[column] = world_version;
        }
    }

    /// Whether generic column `id` has been written since `since_version`,
    /// comparing with wrapping subtraction so counter overflow doesn't
    /// falsely report staleness (`spec.md` §4.3, §4.7 `changed<T>`).
    pub fn did_change(&self, layout: &ChunkLayout, id: component::Id, since_version: u32) -> bool {
        match layout.generic_index(id) {
            Some(column) => self.versions[column].wrapping_sub(since_version) > 0,
            None => false,
        }
    }

    /// Free this chunk's block back to its allocator. Drops every
    /// remaining row's component values first.
    ///
    /// # Safety
    /// This chunk must not be used again afterwards, and `allocator` must
    /// be the same allocator that produced this chunk's block.
    pub unsafe fn release(mut self, layout: &ChunkLayout, allocator: &mut ChunkAllocator) {
        while self.len > 0 {
            // SAFETY: row len-1 is always in bounds while len > 0.
            unsafe { self.remove_row(layout, self.len - 1) };
        }
        unsafe { allocator.free(self.block) };
    }
}

// SAFETY: Chunk is raw-pointer based with no thread affinity beyond the
// `!Send` marker already carried by `World`.
unsafe impl Send for Chunk {}
