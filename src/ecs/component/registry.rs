use std::{
    any::TypeId,
    sync::RwLock,
    sync::atomic::{AtomicU32, Ordering},
};

use dashmap::DashMap;

use crate::ecs::component::{Component, Descriptor, Id, Kind};

/// A thread-safe component registry mapping Rust types to dense [`Id`]s and
/// their [`Descriptor`]s (`spec.md` §3, Component cache).
///
/// Reads are lock-free via `DashMap`; registration takes a write lock on the
/// descriptor table only for the rare case of a brand-new type. A type may
/// be registered as at most one [`Kind`] — attempting to register the same
/// type as both `Generic` and `Chunk` is a logic error and panics, mirroring
/// the teacher's `TypeRegistry::register` policy of treating such conflicts
/// as programmer error rather than a recoverable `Result`.
pub struct Cache {
    type_map: DashMap<TypeId, Id>,
    descriptors: RwLock<Vec<Option<Descriptor>>>,
    next_id: AtomicU32,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    #[inline]
    pub fn new() -> Self {
        Self {
            type_map: DashMap::new(),
            descriptors: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Register `C` as a per-entity (generic) component, or return its
    /// existing id if already registered.
    ///
    /// # Panics
    /// Panics if `C` was previously registered as [`Kind::Chunk`].
    pub fn register_generic<C: Component>(&self) -> Id {
        self.register::<C>(Kind::Generic)
    }

    /// Register `C` as a per-chunk (singleton) component, or return its
    /// existing id if already registered.
    ///
    /// # Panics
    /// Panics if `C` was previously registered as [`Kind::Generic`].
    pub fn register_chunk<C: Component>(&self) -> Id {
        self.register::<C>(Kind::Chunk)
    }

    fn register<C: Component>(&self, kind: Kind) -> Id {
        let type_id = TypeId::of::<C>();

        if let Some(id) = self.type_map.get(&type_id) {
            let id = *id;
            let existing_kind = self.kind(id).expect("registered id must have a descriptor");
            assert_eq!(
                existing_kind, kind,
                "component {} registered as both {:?} and {:?}",
                std::any::type_name::<C>(),
                existing_kind,
                kind
            );
            return id;
        }

        *self
            .type_map
            .entry(type_id)
            .or_insert_with(|| {
                let raw_id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let id = Id::new(raw_id);

                let mut descriptors = self.descriptors.write().unwrap();
                let index = id.index();
                if index >= descriptors.len() {
                    descriptors.resize(index + 1, None);
                }
                descriptors[index] = Some(Descriptor::new::<C>(id, kind));

                id
            })
            .value()
    }

    /// Get the id for `C`, if registered (either kind).
    #[inline]
    pub fn get<C: Component>(&self) -> Option<Id> {
        self.type_map.get(&TypeId::of::<C>()).map(|entry| *entry.value())
    }

    /// Get the id for `C` if it was registered as [`Kind::Generic`].
    #[inline]
    pub fn get_generic<C: Component>(&self) -> Option<Id> {
        let id = self.get::<C>()?;
        (self.kind(id)? == Kind::Generic).then_some(id)
    }

    /// Get the id for `C` if it was registered as [`Kind::Chunk`].
    #[inline]
    pub fn get_chunk<C: Component>(&self) -> Option<Id> {
        let id = self.get::<C>()?;
        (self.kind(id)? == Kind::Chunk).then_some(id)
    }

    /// Get the descriptor for `C`, if registered.
    #[inline]
    pub fn get_info<C: Component>(&self) -> Option<Descriptor> {
        let id = self.get::<C>()?;
        self.get_info_of(id)
    }

    /// Get the descriptor registered for `id`.
    #[inline]
    pub fn get_info_of(&self, id: Id) -> Option<Descriptor> {
        let descriptors = self.descriptors.read().unwrap();
        descriptors.get(id.index()).copied().flatten()
    }

    /// Get the [`Kind`] a given id was registered under.
    #[inline]
    pub fn kind(&self, id: Id) -> Option<Kind> {
        self.get_info_of(id).map(|d| d.kind())
    }

    /// Number of distinct component types registered so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.descriptors.read().unwrap().iter().flatten().count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    struct Position {
        #[allow(dead_code)]
        x: f32,
    }
    impl Component for Position {}

    #[derive(Clone, PartialEq, Debug)]
    struct Velocity {
        #[allow(dead_code)]
        dx: f32,
    }
    impl Component for Velocity {}

    #[derive(Clone, PartialEq, Debug)]
    struct WorldSeed {
        #[allow(dead_code)]
        value: u64,
    }
    impl Component for WorldSeed {}

    #[test]
    fn registering_same_type_twice_returns_same_id() {
        let cache = Cache::new();
        let a = cache.register_generic::<Position>();
        let b = cache.register_generic::<Position>();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_types_get_distinct_ids() {
        let cache = Cache::new();
        let pos = cache.register_generic::<Position>();
        let vel = cache.register_generic::<Velocity>();
        assert_ne!(pos, vel);
    }

    #[test]
    fn get_returns_none_for_unregistered_type() {
        let cache = Cache::new();
        assert_eq!(cache.get::<Position>(), None);
    }

    #[test]
    fn chunk_kind_round_trips() {
        let cache = Cache::new();
        let id = cache.register_chunk::<WorldSeed>();
        assert_eq!(cache.kind(id), Some(Kind::Chunk));
        assert_eq!(cache.get_chunk::<WorldSeed>(), Some(id));
        assert_eq!(cache.get_generic::<WorldSeed>(), None);
    }

    #[test]
    #[should_panic(expected = "registered as both")]
    fn registering_same_type_with_conflicting_kind_panics() {
        let cache = Cache::new();
        cache.register_generic::<Position>();
        cache.register_chunk::<Position>();
    }

    #[test]
    fn concurrent_registration_is_consistent() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(Cache::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.register_generic::<Position>())
            })
            .collect();

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(cache.len(), 1);
    }
}
