use std::{alloc::Layout, ptr::NonNull};

use crate::ecs::{component::Id, hash};

/// Which slot shape a component occupies within a chunk (`spec.md` §3,
/// Component kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// One instance per entity: stored as a column of length equal to the
    /// chunk's row count.
    Generic,
    /// One instance per chunk: stored as a singleton alongside the
    /// generic columns.
    Chunk,
}

/// Layout and lifecycle metadata for a registered component type
/// (`spec.md` §3, Component descriptor).
///
/// Rust has no user-definable move constructor — moving a value is always a
/// byte-for-byte copy of its representation, so unlike the spec's source
/// material there is no separate "move" thunk stored here: every call site
/// that needs to relocate a column entry does a raw `ptr::copy_nonoverlapping`
/// directly. `drop` and `clone` thunks remain because those *are*
/// user-definable (`Drop::drop`, `Clone::clone`).
#[derive(Clone, Copy)]
pub struct Descriptor {
    id: Id,
    name: &'static str,
    kind: Kind,
    layout: Layout,
    is_soa: bool,
    lookup_hash: u64,
    matcher_hash: u64,
    drop_fn: unsafe fn(NonNull<u8>),
    clone_fn: unsafe fn(src: NonNull<u8>, dst: NonNull<u8>),
}

impl Descriptor {
    pub(crate) fn new<T: crate::ecs::component::Component>(id: Id, kind: Kind) -> Self {
        let lookup_hash = hash::type_name_hash::<T>();
        Self {
            id,
            name: std::any::type_name::<T>(),
            kind,
            layout: Layout::new::<T>(),
            is_soa: T::IS_SOA,
            lookup_hash,
            matcher_hash: hash::matcher_bit(lookup_hash),
            drop_fn: if std::mem::needs_drop::<T>() {
                drop_impl::<T>
            } else {
                drop_noop
            },
            clone_fn: clone_impl::<T>,
        }
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    #[inline]
    pub fn is_soa(&self) -> bool {
        self.is_soa
    }

    #[inline]
    pub fn lookup_hash(&self) -> u64 {
        self.lookup_hash
    }

    #[inline]
    pub fn matcher_hash(&self) -> u64 {
        self.matcher_hash
    }

    /// Drop the value at `ptr` in place. A no-op for types that don't need
    /// drop.
    ///
    /// # Safety
    /// `ptr` must point at a valid, initialized instance of the described
    /// type, and must not be used again afterwards.
    #[inline]
    pub unsafe fn drop_in_place(&self, ptr: NonNull<u8>) {
        unsafe { (self.drop_fn)(ptr) }
    }

    /// Clone the value at `src` into uninitialized memory at `dst`.
    ///
    /// # Safety
    /// `src` must point at a valid, initialized instance; `dst` must point
    /// at memory of at least `self.size()` bytes, suitably aligned, and not
    /// already initialized.
    #[inline]
    pub unsafe fn clone_into(&self, src: NonNull<u8>, dst: NonNull<u8>) {
        unsafe { (self.clone_fn)(src, dst) }
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("layout", &self.layout)
            .field("is_soa", &self.is_soa)
            .finish()
    }
}

unsafe fn drop_impl<T>(ptr: NonNull<u8>) {
    unsafe {
        std::ptr::drop_in_place(ptr.as_ptr().cast::<T>());
    }
}

unsafe fn drop_noop(_ptr: NonNull<u8>) {}

unsafe fn clone_impl<T: Clone>(src: NonNull<u8>, dst: NonNull<u8>) {
    unsafe {
        let value = (*src.as_ptr().cast::<T>()).clone();
        std::ptr::write(dst.as_ptr().cast::<T>(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::Component;

    #[derive(Clone)]
    struct Plain {
        #[allow(dead_code)]
        x: u32,
    }
    impl Component for Plain {}

    #[derive(Clone)]
    struct NeedsDrop {
        #[allow(dead_code)]
        data: String,
    }
    impl Component for NeedsDrop {}

    #[test]
    fn descriptor_captures_layout() {
        let d = Descriptor::new::<Plain>(Id::new(0), Kind::Generic);
        assert_eq!(d.layout(), Layout::new::<Plain>());
        assert_eq!(d.kind(), Kind::Generic);
        assert!(!d.is_soa());
    }

    #[test]
    fn matcher_hash_is_single_bit() {
        let d = Descriptor::new::<Plain>(Id::new(0), Kind::Generic);
        assert_eq!(d.matcher_hash().count_ones(), 1);
    }

    #[test]
    fn clone_and_drop_round_trip_for_heap_type() {
        // Given
        let descriptor = Descriptor::new::<NeedsDrop>(Id::new(0), Kind::Generic);
        let src = NeedsDrop { data: "hello".to_string() };
        let src_ptr = NonNull::from(&src).cast::<u8>();

        // When
        let mut dst = std::mem::MaybeUninit::<NeedsDrop>::uninit();
        let dst_ptr = NonNull::new(dst.as_mut_ptr()).unwrap().cast::<u8>();
        unsafe { descriptor.clone_into(src_ptr, dst_ptr) };

        // Then
        let cloned = unsafe { dst.assume_init() };
        assert_eq!(cloned.data, "hello");

        // Clean up both (clone_into does not consume `src`).
        unsafe { descriptor.drop_in_place(NonNull::from(&cloned).cast::<u8>()) };
        std::mem::forget(cloned);
    }
}
