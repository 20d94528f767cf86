//! End-to-end scenarios against the public [`strata_ecs::World`] API.

use strata_ecs::ecs::command::CommandBuffer;
use strata_ecs::ecs::error::Error;
use strata_ecs::{Component, World};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
    z: f32,
}
impl Component for Pos {}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Vel {
    dx: f32,
    dy: f32,
    dz: f32,
}
impl Component for Vel {}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Frozen;
impl Component for Frozen {}

#[test]
fn clone_scenario_copies_every_component() {
    let mut world = World::new();
    let e1 = world.create_entity_with((Pos { x: 1.0, y: 2.0, z: 3.0 }, Vel { dx: 0.0, dy: 0.0, dz: 1.0 })).unwrap();

    let e2 = world.create_entity_like(e1).unwrap();

    assert_eq!(world.get::<Pos>(e2).unwrap(), Some(&Pos { x: 1.0, y: 2.0, z: 3.0 }));
    assert_eq!(world.get::<Vel>(e2).unwrap(), Some(&Vel { dx: 0.0, dy: 0.0, dz: 1.0 }));
    assert_ne!(e1, e2);
}

#[test]
fn add_remove_round_trip_preserves_surviving_component() {
    let mut world = World::new();
    let e = world.create_entity().unwrap();

    world.add(e, Pos { x: 5.0, y: 5.0, z: 5.0 }).unwrap();
    world.add(e, Vel { dx: 0.0, dy: 1.0, dz: 0.0 }).unwrap();
    world.remove::<Vel>(e).unwrap();

    assert!(!world.has::<Vel>(e).unwrap());
    assert_eq!(world.get::<Pos>(e).unwrap(), Some(&Pos { x: 5.0, y: 5.0, z: 5.0 }));
}

#[test]
fn query_all_and_none_visits_only_the_matching_entities() {
    let mut world = World::new();
    for _ in 0..3 {
        world.create_entity_with((Pos { x: 0.0, y: 0.0, z: 0.0 }, Vel { dx: 0.0, dy: 0.0, dz: 0.0 })).unwrap();
    }
    for _ in 0..2 {
        let e = world.create_entity_with((Pos { x: 0.0, y: 0.0, z: 0.0 }, Vel { dx: 0.0, dy: 0.0, dz: 0.0 })).unwrap();
        world.add(e, Frozen).unwrap();
    }
    world.create_entity_with(Pos { x: 0.0, y: 0.0, z: 0.0 }).unwrap();

    let count = world.query::<()>().all::<Pos>().all::<Vel>().none::<Frozen>().count();
    assert_eq!(count, 3);
}

#[test]
fn change_filter_only_visits_chunks_written_since_last_run() {
    let mut world = World::new();
    let a = world.create_entity_with(Pos { x: 0.0, y: 0.0, z: 0.0 }).unwrap();
    world.create_entity_with(Pos { x: 1.0, y: 1.0, z: 1.0 }).unwrap();

    // First run visits both entities, establishing a baseline.
    assert_eq!(world.query::<&Pos>().changed::<Pos>().count(), 2);

    // No writes since: second run finds nothing changed.
    assert_eq!(world.query::<&Pos>().changed::<Pos>().count(), 0);

    // After one write, only that entity's chunk is visited.
    world.set(a, Pos { x: 9.0, y: 9.0, z: 9.0 }).unwrap();
    assert_eq!(world.query::<&Pos>().changed::<Pos>().count(), 1);
}

#[test]
fn structural_lock_rejects_immediate_mutation_but_allows_deferred_commit() {
    let mut world = World::new();
    let e = world.create_entity_with(Pos { x: 0.0, y: 0.0, z: 0.0 }).unwrap();

    // Queued ahead of the iteration below (a system without `&mut World`
    // would do exactly this), then applied once the loop below releases
    // the structural lock.
    let buffer = CommandBuffer::new();
    buffer.set(e, Vel { dx: 1.0, dy: 0.0, dz: 0.0 }, world.cache());

    let mut visited = 0;
    let mut rejected = false;
    world.query::<&Pos>().for_each(|_pos| {
        visited += 1;
        if !rejected {
            rejected = structural_mutation_is_rejected_while_locked();
        }
    });
    assert_eq!(visited, 1);
    assert!(rejected, "mutating a locked archetype's row storage must fail with StructuralLockHeld");

    buffer.commit(&mut world).unwrap();
    assert_eq!(world.get::<Vel>(e).unwrap(), Some(&Vel { dx: 1.0, dy: 0.0, dz: 0.0 }));
}

// `for_each`'s closure already holds `world` mutably borrowed for the
// duration of the loop, so the borrow checker itself refuses a second
// `world.add(..)` from inside it — this exercises the same
// `ensure_unlocked` path that refusal stands in for, directly against a
// standalone archetype. The entities used are real handles pulled from a
// throwaway `World`, since `Entity` has no public constructor.
fn structural_mutation_is_rejected_while_locked() -> bool {
    use strata_ecs::ecs::archetype::Registry;
    use strata_ecs::ecs::component::{Cache, Signature};
    use strata_ecs::ecs::storage::allocator::ChunkAllocator;

    let mut scratch = World::new();
    let first = scratch.create_entity().unwrap();
    let second = scratch.create_entity().unwrap();

    let cache = Cache::new();
    let pos_id = cache.register_generic::<Pos>();
    let mut registry = Registry::new();
    let archetype_id = registry.get_or_create(Signature::new([pos_id]), Signature::default(), &cache).unwrap();
    let mut allocator = ChunkAllocator::new();
    let archetype = registry.get_mut(archetype_id).unwrap();
    archetype.insert(&mut allocator, first).unwrap();

    let _guard = archetype.lock();
    matches!(archetype.insert(&mut allocator, second), Err(Error::StructuralLockHeld))
}

#[test]
fn gc_drains_empty_chunks_after_mass_destroy() {
    let mut world = World::with_lifespan(2);
    let mut entities = Vec::with_capacity(10_000);
    for i in 0..10_000 {
        entities.push(world.create_entity_with(Pos { x: i as f32, y: 0.0, z: 0.0 }).unwrap());
    }
    for e in entities {
        world.destroy(e).unwrap();
    }
    assert_eq!(world.entity_count(), 0);

    // Two ticks exactly drains the lifespan set above.
    world.gc();
    world.gc();

    // The archetype's internal chunk bookkeeping isn't part of the public
    // surface; what's externally observable is that the world is still
    // fully functional afterwards.
    let fresh = world.create_entity_with(Pos { x: 0.0, y: 0.0, z: 0.0 }).unwrap();
    assert_eq!(world.get::<Pos>(fresh).unwrap(), Some(&Pos { x: 0.0, y: 0.0, z: 0.0 }));
}
