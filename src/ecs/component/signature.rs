use smallvec::SmallVec;

use crate::{all_tuples, ecs::component::{Cache, Component, Id}};

/// Most archetypes carry only a handful of component types; inline storage
/// for up to 8 avoids a heap allocation for the common case.
type IdVec = SmallVec<[Id; 8]>;

/// A sorted, deduplicated set of component ids identifying an archetype
/// (`spec.md` §3, Signature). Equality and hashing operate on the sorted
/// contents, so two signatures built from ids in different orders compare
/// equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    ids: IdVec,
}

impl Signature {
    /// The empty signature (the root archetype).
    #[inline]
    pub fn empty() -> Self {
        Self { ids: SmallVec::new() }
    }

    /// Build a signature from a collection of ids, sorting and deduplicating.
    pub fn new(ids: impl IntoIterator<Item = Id>) -> Self {
        let mut ids: IdVec = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    #[inline]
    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether this signature contains `id`.
    #[inline]
    pub fn contains(&self, id: Id) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Whether this signature contains every id in `other`.
    pub fn contains_all(&self, other: &Signature) -> bool {
        other.ids.iter().all(|id| self.contains(*id))
    }

    /// Union of this signature with `other`.
    pub fn merge(&self, other: &Signature) -> Self {
        let mut ids = IdVec::with_capacity(self.ids.len() + other.ids.len());
        ids.extend_from_slice(&self.ids);
        ids.extend_from_slice(&other.ids);
        Self::new(ids)
    }

    /// This signature with `id` added, if not already present.
    pub fn with(&self, id: Id) -> Self {
        if self.contains(id) {
            return self.clone();
        }
        let mut ids = self.ids.clone();
        ids.push(id);
        ids.sort_unstable();
        Self { ids }
    }

    /// This signature with `id` removed, if present.
    pub fn without(&self, id: Id) -> Self {
        let mut ids = self.ids.clone();
        ids.retain(|&existing| existing != id);
        Self { ids }
    }
}

impl FromIterator<Id> for Signature {
    fn from_iter<I: IntoIterator<Item = Id>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Converts a component value or tuple of values into the [`Signature`] its
/// types would occupy, registering any not-yet-seen types along the way
/// (`spec.md` §3: components are registered lazily on first use).
pub trait IntoSignature<Marker = ()> {
    fn into_signature(cache: &Cache) -> Signature;
}

impl IntoSignature for () {
    fn into_signature(_cache: &Cache) -> Signature {
        Signature::default()
    }
}

impl<C: Component> IntoSignature for C {
    fn into_signature(cache: &Cache) -> Signature {
        Signature::new([cache.register_generic::<C>()])
    }
}

macro_rules! tuple_signature {
    ($($name: ident),*) => {
        impl<$($name: IntoSignature),*> IntoSignature for ($($name,)*) {
            fn into_signature(cache: &Cache) -> Signature {
                let mut ids = IdVec::new();
                $(
                    ids.extend_from_slice(<$name>::into_signature(cache).ids());
                )*
                Signature::new(ids)
            }
        }
    }
}

all_tuples!(tuple_signature);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Comp1;
    impl Component for Comp1 {}
    #[derive(Clone)]
    struct Comp2;
    impl Component for Comp2 {}
    #[derive(Clone)]
    struct Comp3;
    impl Component for Comp3 {}
    #[derive(Clone)]
    struct Comp4;
    impl Component for Comp4 {}

    #[test]
    fn signature_is_order_independent() {
        let cache = Cache::new();
        let id1 = cache.register_generic::<Comp1>();
        let id2 = cache.register_generic::<Comp2>();
        let id3 = cache.register_generic::<Comp3>();

        let a = Signature::new([id2, id1, id3]);
        let b = Signature::new([id1, id2, id3]);
        assert_eq!(a, b);
    }

    #[test]
    fn signature_dedupes() {
        let cache = Cache::new();
        let id1 = cache.register_generic::<Comp1>();
        let id2 = cache.register_generic::<Comp2>();

        let sig = Signature::new([id1, id2, id1]);
        assert_eq!(sig.ids(), &[id1, id2]);
    }

    #[test]
    fn contains_and_contains_all() {
        let cache = Cache::new();
        let id1 = cache.register_generic::<Comp1>();
        let id2 = cache.register_generic::<Comp2>();
        let id3 = cache.register_generic::<Comp3>();
        let id4 = cache.register_generic::<Comp4>();

        let full = Signature::new([id1, id2, id3]);
        let subset = Signature::new([id1, id2]);
        let disjoint = Signature::new([id1, id4]);

        assert!(full.contains_all(&subset));
        assert!(full.contains_all(&Signature::default()));
        assert!(!full.contains_all(&disjoint));
    }

    #[test]
    fn with_and_without_round_trip() {
        let cache = Cache::new();
        let id1 = cache.register_generic::<Comp1>();
        let id2 = cache.register_generic::<Comp2>();

        let base = Signature::new([id1]);
        let added = base.with(id2);
        assert!(added.contains(id1) && added.contains(id2));

        let removed = added.without(id1);
        assert_eq!(removed, Signature::new([id2]));
    }

    #[test]
    fn tuple_into_signature_matches_merged_singles() {
        let cache = Cache::new();
        let sig = <(Comp1, Comp2, Comp3)>::into_signature(&cache);
        let id1 = cache.register_generic::<Comp1>();
        let id2 = cache.register_generic::<Comp2>();
        let id3 = cache.register_generic::<Comp3>();
        assert_eq!(sig, Signature::new([id1, id2, id3]));
    }
}
