use crate::ecs::entity::{Entity, Generation, Id};

/// Where a live entity's row data lives. Stored as raw indices rather than
/// pointers/references (`spec.md` §9 design note: "Never store
/// back-pointers into movable containers") — `archetype`/`chunk` index into
/// the world's archetype arena and that archetype's chunk list respectively,
/// so the container stays valid across any `Vec` growth that relocates the
/// chunks themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Index of the owning archetype in the world's archetype arena.
    pub archetype: u32,
    /// Index of the chunk within the archetype's active or disabled list.
    pub chunk: u32,
    /// Row within that chunk.
    pub row: u32,
}

/// Per-slot bookkeeping for one entity id (`spec.md` §3, Entity container).
///
/// A slot is either occupied (entity is live, `location` is `Some`) or free
/// (entity was destroyed, `free_next` holds the next free slot's id — this
/// is the spec's "row field reused as free-list link", expressed as an enum
/// instead of literal field-overloading since that's the idiomatic
/// equivalent in Rust and carries the same O(1) push/pop behavior).
#[derive(Debug, Clone, Copy)]
enum Slot {
    Occupied { location: Option<Location>, disabled: bool },
    Free { next: Id },
}

#[derive(Debug, Clone, Copy)]
struct Container {
    slot: Slot,
    generation: Generation,
}

/// Generation-stamped entity handle table with an implicit free list.
///
/// `alloc`/`free` are O(1) amortized; `valid`/`locate` are O(1). The free
/// list is singly linked through dead slots themselves (no extra
/// allocation), terminated by [`Id::BAD`] (`spec.md` §4.5, §8 I5).
#[derive(Debug, Default)]
pub struct Registry {
    slots: Vec<Container>,
    free_head: Id,
    free_count: usize,
}

impl Registry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: Id::BAD,
            free_count: 0,
        }
    }

    /// Number of currently live entities.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a new entity, recycling a freed slot if one is available.
    ///
    /// The new entity starts with no location (as if just created in the
    /// root archetype); callers set the location once storage has placed
    /// the entity's row.
    ///
    /// # Errors
    /// Returns [`crate::ecs::Error::IdSpaceExhausted`] once `2^20 - 1` ids
    /// are in use (`spec.md` §8 boundary test).
    pub fn alloc(&mut self) -> crate::ecs::error::Result<Entity> {
        if let Some(id) = self.pop_free() {
            let container = &mut self.slots[id.index()];
            container.slot = Slot::Occupied { location: None, disabled: false };
            return Ok(Entity::new(id, container.generation));
        }

        if self.slots.len() as u32 >= crate::ecs::entity::MAX_ENTITIES {
            return Err(crate::ecs::error::Error::IdSpaceExhausted);
        }

        let id = Id::new(self.slots.len() as u32);
        self.slots.push(Container {
            slot: Slot::Occupied { location: None, disabled: false },
            generation: Generation::FIRST,
        });
        Ok(Entity::new(id, Generation::FIRST))
    }

    /// Allocate `count` entities in one call, reusing freed slots first.
    /// No different in effect from calling [`Registry::alloc`] `count`
    /// times, but saves bulk spawners a call per entity.
    pub fn alloc_many(&mut self, count: usize) -> crate::ecs::error::Result<Vec<Entity>> {
        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            entities.push(self.alloc()?);
        }
        Ok(entities)
    }

    fn pop_free(&mut self) -> Option<Id> {
        if self.free_head.is_bad() {
            return None;
        }
        let id = self.free_head;
        let Slot::Free { next } = self.slots[id.index()].slot else {
            unreachable!("free_head must always point at a free slot");
        };
        self.free_head = next;
        self.free_count -= 1;
        Some(id)
    }

    /// Free an entity, bumping its slot's generation and returning it to
    /// the free list.
    ///
    /// # Errors
    /// Returns [`crate::ecs::Error::InvalidEntity`] if `entity` is not
    /// currently valid.
    pub fn free(&mut self, entity: Entity) -> crate::ecs::error::Result<()> {
        if !self.valid(entity) {
            return Err(crate::ecs::error::Error::InvalidEntity(entity));
        }
        let container = &mut self.slots[entity.index()];
        container.generation = container.generation.next();
        container.slot = Slot::Free { next: self.free_head };
        self.free_head = entity.id();
        self.free_count += 1;
        Ok(())
    }

    /// Free every entity in `entities`, stopping at the first invalid one.
    pub fn free_many(&mut self, entities: impl IntoIterator<Item = Entity>) -> crate::ecs::error::Result<()> {
        for entity in entities {
            self.free(entity)?;
        }
        Ok(())
    }

    /// Whether `entity`'s generation matches the slot's current generation
    /// and the slot is occupied (`spec.md` §4.5).
    pub fn valid(&self, entity: Entity) -> bool {
        match self.slots.get(entity.index()) {
            Some(container) => {
                container.generation == entity.generation()
                    && matches!(container.slot, Slot::Occupied { .. })
            }
            None => false,
        }
    }

    /// Current storage location of a live entity, if it has been placed.
    ///
    /// # Errors
    /// Returns [`crate::ecs::Error::InvalidEntity`] if `entity` is not
    /// currently valid.
    pub fn locate(&self, entity: Entity) -> crate::ecs::error::Result<Option<Location>> {
        if !self.valid(entity) {
            return Err(crate::ecs::error::Error::InvalidEntity(entity));
        }
        match self.slots[entity.index()].slot {
            Slot::Occupied { location, .. } => Ok(location),
            Slot::Free { .. } => unreachable!("valid() guarantees Occupied"),
        }
    }

    /// Overwrite the storage location of a live entity (after a spawn,
    /// structural migration, or enable/disable move).
    pub fn set_location(&mut self, entity: Entity, location: Location) {
        debug_assert!(self.valid(entity), "set_location on invalid entity");
        if let Slot::Occupied { location: slot_location, .. } = &mut self.slots[entity.index()].slot {
            *slot_location = Some(location);
        }
    }

    /// Whether a live entity is currently stored in its archetype's
    /// disabled-chunk list (`spec.md` §3, Entity container).
    pub fn is_disabled(&self, entity: Entity) -> bool {
        match self.slots.get(entity.index()) {
            Some(Container { slot: Slot::Occupied { disabled, .. }, .. }) => *disabled,
            _ => false,
        }
    }

    /// Set the disabled flag for a live entity.
    pub fn set_disabled(&mut self, entity: Entity, disabled: bool) {
        debug_assert!(self.valid(entity), "set_disabled on invalid entity");
        if let Slot::Occupied { disabled: slot_disabled, .. } = &mut self.slots[entity.index()].slot {
            *slot_disabled = disabled;
        }
    }

    /// Debug-only check of invariant I5: walking the free list from
    /// `free_head` for `free_count` steps ends at `IdBad`.
    #[cfg(debug_assertions)]
    pub fn assert_free_list_integrity(&self) {
        let mut cur = self.free_head;
        let mut steps = 0;
        while !cur.is_bad() {
            steps += 1;
            assert!(steps <= self.free_count, "free list longer than free_count");
            match self.slots[cur.index()].slot {
                Slot::Free { next } => cur = next,
                Slot::Occupied { .. } => panic!("free list passed through an occupied slot"),
            }
        }
        assert_eq!(steps, self.free_count, "free list shorter than free_count");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_assigns_sequential_ids() {
        // Given
        let mut registry = Registry::new();

        // When
        let e0 = registry.alloc().unwrap();
        let e1 = registry.alloc().unwrap();

        // Then
        assert_eq!(e0.id().index(), 0);
        assert_eq!(e1.id().index(), 1);
        assert_eq!(e0.generation(), Generation::FIRST);
    }

    #[test]
    fn free_then_alloc_reuses_id_with_bumped_generation() {
        // Given
        let mut registry = Registry::new();
        let e0 = registry.alloc().unwrap();

        // When
        registry.free(e0).unwrap();
        let reused = registry.alloc().unwrap();

        // Then
        assert_eq!(reused.id(), e0.id());
        assert_eq!(reused.generation(), e0.generation().next());
        assert!(!registry.valid(e0));
        assert!(registry.valid(reused));
    }

    #[test]
    fn double_free_is_rejected() {
        let mut registry = Registry::new();
        let e0 = registry.alloc().unwrap();
        registry.free(e0).unwrap();

        assert_eq!(
            registry.free(e0),
            Err(crate::ecs::error::Error::InvalidEntity(e0))
        );
    }

    #[test]
    fn free_list_is_a_permutation_ending_in_bad() {
        // Given
        let mut registry = Registry::new();
        let entities: Vec<_> = (0..50).map(|_| registry.alloc().unwrap()).collect();

        // When
        for e in &entities[10..30] {
            registry.free(*e).unwrap();
        }

        // Then
        registry.assert_free_list_integrity();
        assert_eq!(registry.free_count, 20);
        assert_eq!(registry.len(), 30);
    }

    #[test]
    fn location_round_trips() {
        // Given
        let mut registry = Registry::new();
        let e = registry.alloc().unwrap();

        // Then - freshly allocated entity has no location yet
        assert_eq!(registry.locate(e).unwrap(), None);

        // When
        let loc = Location { archetype: 0, chunk: 2, row: 7 };
        registry.set_location(e, loc);

        // Then
        assert_eq!(registry.locate(e).unwrap(), Some(loc));
    }

    #[test]
    fn locate_invalid_entity_errors() {
        let registry = Registry::new();
        let bogus = Entity::new(Id::new(0), Generation::FIRST);
        assert_eq!(
            registry.locate(bogus),
            Err(crate::ecs::error::Error::InvalidEntity(bogus))
        );
    }

    #[test]
    fn disabled_flag_defaults_false_and_is_settable() {
        let mut registry = Registry::new();
        let e = registry.alloc().unwrap();

        assert!(!registry.is_disabled(e));
        registry.set_disabled(e, true);
        assert!(registry.is_disabled(e));
    }

    #[test]
    fn alloc_many_reuses_freed_slots_before_growing() {
        // Given
        let mut registry = Registry::new();
        let first = registry.alloc().unwrap();
        registry.free(first).unwrap();

        // When
        let batch = registry.alloc_many(3).unwrap();

        // Then
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].id(), first.id());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn free_many_frees_every_entity() {
        // Given
        let mut registry = Registry::new();
        let batch = registry.alloc_many(3).unwrap();

        // When
        registry.free_many(batch.clone()).unwrap();

        // Then
        assert_eq!(registry.len(), 0);
        assert!(batch.iter().all(|e| !registry.valid(*e)));
    }

    #[test]
    fn exhausting_id_space_errors() {
        // Given - a registry artificially close to the cap.
        let mut registry = Registry::new();
        registry.slots.resize(
            crate::ecs::entity::MAX_ENTITIES as usize,
            Container {
                slot: Slot::Occupied { location: None, disabled: false },
                generation: Generation::FIRST,
            },
        );

        // Then
        assert_eq!(
            registry.alloc(),
            Err(crate::ecs::error::Error::IdSpaceExhausted)
        );
    }
}
