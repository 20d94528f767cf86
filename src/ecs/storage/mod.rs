//! Fixed-capacity, column-major storage backing every archetype
//! (`spec.md` §3, Chunk + Chunk allocator).
//!
//! Replaces the teacher's `Table`/`Column` layer — an archetype-indexed
//! collection of independently growable `Vec` columns — with a page-backed
//! [`allocator::ChunkAllocator`] handing out fixed 16 KiB blocks that
//! [`chunk::Chunk`] slices into an entity column, generic (per-row)
//! component columns, and chunk-kind (per-chunk) component slots.

pub mod allocator;
pub mod chunk;
