//! Declarative queries (`spec.md` §4.7): `all`/`any`/`none`/`changed` rules
//! compiled into a cached archetype match set, then iterated chunk by chunk.
//!
//! Grounded on the teacher's `query::Query`, but the teacher iterates one
//! growable `Table` per archetype; here an archetype holds two chunk lists
//! (enabled/disabled), so matching is list-aware and iteration walks
//! archetype -> list -> chunk -> row instead of archetype -> row. The
//! teacher's lazy `Result` iterator is replaced by
//! closure-driven traversal so that a mutable fetch's write-view version
//! stamp (`spec.md` §4.3: bumped once per chunk, not per row) can be applied
//! before that chunk's rows are visited, rather than on first access to an
//! arbitrary row.

pub mod data;
pub mod param;

use std::marker::PhantomData;

use crate::ecs::archetype::{self, Archetype, ChunkList};
use crate::ecs::component::{self, Cache, Component, Signature};
use crate::ecs::hash;
use crate::ecs::world::World;

pub use data::Data;
pub use param::{Fetch, FetchSpec, Shared};

/// Batch size for chunks visited under one `structural_lock` hold
/// (`spec.md` §4.7: iteration proceeds in bounded batches so a long-running
/// query doesn't starve a waiting structural writer indefinitely).
const BATCH_SIZE: usize = 16;

const ENABLED_ONLY: [ChunkList; 1] = [ChunkList::Enabled];
const DISABLED_ONLY: [ChunkList; 1] = [ChunkList::Disabled];
const BOTH: [ChunkList; 2] = [ChunkList::Enabled, ChunkList::Disabled];

/// Which chunk lists a query considers (`spec.md` §4.5: disabled entities
/// are excluded from queries by default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    EnabledOnly,
    DisabledOnly,
    Both,
}

impl Scope {
    fn lists(self) -> &'static [ChunkList] {
        match self {
            Scope::EnabledOnly => &ENABLED_ONLY,
            Scope::DisabledOnly => &DISABLED_ONLY,
            Scope::Both => &BOTH,
        }
    }
}

#[derive(Default, Clone)]
struct Rules {
    all: Vec<component::Id>,
    any: Vec<component::Id>,
    none: Vec<component::Id>,
    changed: Vec<component::Id>,
}

/// A compiled query plan: sorted/deduped component id sets plus their bloom
/// prefilter hashes (`spec.md` §4.7, `QueryLookupHash`/bloom prefilter).
pub(crate) struct LookupContext {
    all: Signature,
    any: Vec<component::Id>,
    none: Vec<component::Id>,
    all_hash: u64,
    any_hash: u64,
    none_hash: u64,
}

fn matcher_hash_of(cache: &Cache, ids: &[component::Id]) -> u64 {
    ids.iter().filter_map(|&id| cache.get_info_of(id)).fold(0u64, |acc, d| acc | d.matcher_hash())
}

fn build_context(cache: &Cache, rules: &Rules, data_required: &[component::Id]) -> LookupContext {
    let all_ids: Vec<component::Id> = rules.all.iter().chain(data_required.iter()).copied().collect();
    let all = Signature::new(all_ids);

    let mut any = rules.any.clone();
    any.sort_unstable();
    any.dedup();

    let mut none = rules.none.clone();
    none.sort_unstable();
    none.dedup();

    LookupContext {
        all_hash: matcher_hash_of(cache, all.ids()),
        any_hash: matcher_hash_of(cache, &any),
        none_hash: matcher_hash_of(cache, &none),
        all,
        any,
        none,
    }
}

/// A compiled plan's identity: sorted id lists plus scope, folded with
/// [`hash::combine_all`] (`spec.md` §4.7 `QueryLookupHash`).
fn lookup_hash(rules: &Rules, data_required: &[component::Id], scope: Scope) -> u64 {
    let sorted = |ids: &[component::Id]| -> Vec<u64> {
        let mut v: Vec<u64> = ids.iter().map(|id| id.index() as u64).collect();
        v.sort_unstable();
        v
    };

    let mut all: Vec<u64> = rules.all.iter().chain(data_required.iter()).map(|id| id.index() as u64).collect();
    all.sort_unstable();
    all.dedup();

    let h = hash::combine_all(0, all);
    let h = hash::combine_all(h, sorted(&rules.any));
    let h = hash::combine_all(h, sorted(&rules.none));
    let h = hash::combine_all(h, sorted(&rules.changed));
    hash::combine(h, scope as u64)
}

/// Whether `archetype` satisfies a compiled plan: bloom prefilter first
/// (`matcher_hash` bitwise checks, which can only prove absence or "maybe
/// present", never prove presence), falling back to the exact sorted-id
/// check on ambiguity.
fn archetype_matches(ctx: &LookupContext, archetype: &Archetype) -> bool {
    let mh = archetype.matcher_hash();

    if mh & ctx.all_hash != ctx.all_hash {
        return false;
    }
    if !archetype.generic_signature().contains_all(&ctx.all) {
        return false;
    }

    if !ctx.any.is_empty() {
        if ctx.any_hash != 0 && mh & ctx.any_hash == 0 {
            return false;
        }
        if !ctx.any.iter().any(|&id| archetype.generic_signature().contains(id)) {
            return false;
        }
    }

    if !ctx.none.is_empty() && mh & ctx.none_hash != 0 && ctx.none.iter().any(|&id| archetype.generic_signature().contains(id))
    {
        return false;
    }

    true
}

struct CachedQuery {
    ctx: LookupContext,
    matched: Vec<archetype::Id>,
    checked_up_to: usize,
    baseline_version: u32,
}

impl CachedQuery {
    fn new(ctx: LookupContext) -> Self {
        Self { ctx, matched: Vec::new(), checked_up_to: 0, baseline_version: 0 }
    }
}

/// World-owned cache of compiled query plans, keyed by [`lookup_hash`].
/// Matching is incremental: the archetype registry only ever appends, so a
/// cached plan only needs to scan archetypes created since its last check.
#[derive(Default)]
pub(crate) struct PlanCache {
    entries: std::collections::HashMap<u64, CachedQuery>,
}

impl PlanCache {
    pub(crate) fn matches(&mut self, key: u64, ctx: LookupContext, registry: &archetype::Registry) -> (&[archetype::Id], u32) {
        let archetype_count = registry.len();
        let entry = self.entries.entry(key).or_insert_with(|| CachedQuery::new(ctx));
        if entry.checked_up_to < archetype_count {
            for index in entry.checked_up_to..archetype_count {
                let id = archetype::Id::new(index as u32);
                if let Some(archetype) = registry.get(id) {
                    if archetype_matches(&entry.ctx, archetype) {
                        entry.matched.push(id);
                    }
                }
            }
            entry.checked_up_to = archetype_count;
        }
        (&entry.matched, entry.baseline_version)
    }

    pub(crate) fn set_baseline(&mut self, key: u64, version: u32) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.baseline_version = version;
        }
    }
}

/// One chunk's worth of matched rows, handed to a [`Builder::for_each_chunk`]
/// closure. Lets callers batch work (e.g. SIMD-friendly loops) over a whole
/// chunk instead of one row at a time.
pub struct ChunkView<'w, D: Data> {
    archetype: &'w Archetype,
    list: ChunkList,
    chunk: u32,
    cache: &'w Cache,
    len: u32,
    _marker: PhantomData<D>,
}

impl<'w, D: Data> ChunkView<'w, D> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn entity(&self, row: u32) -> crate::ecs::entity::Entity {
        self.archetype.get_entity_in(self.list, self.chunk, row)
    }

    pub fn get(&self, row: u32) -> Option<D::Item<'w>> {
        let entity = self.entity(row);
        // SAFETY: row < self.len, which was read from this same chunk.
        unsafe { D::fetch(entity, self.archetype, self.list, self.chunk, row, self.cache) }
    }

    pub fn iter(&self) -> impl Iterator<Item = D::Item<'w>> + '_ {
        (0..self.len).filter_map(move |row| self.get(row))
    }
}

/// Builds and executes one query (`spec.md` §4.7). Cheap to construct;
/// rule methods consume and return `self` for chaining.
pub struct Builder<'w, D: Data> {
    world: &'w mut World,
    rules: Rules,
    scope: Scope,
    _marker: PhantomData<D>,
}

impl<'w, D: Data> Builder<'w, D> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self { world, rules: Rules::default(), scope: Scope::EnabledOnly, _marker: PhantomData }
    }

    /// Require component `C` to be present, without fetching it.
    pub fn all<C: Component>(mut self) -> Self {
        let id = self.world.cache().register_generic::<C>();
        self.rules.all.push(id);
        self
    }

    /// Require at least one of the components added via successive calls to
    /// `any` to be present.
    pub fn any<C: Component>(mut self) -> Self {
        let id = self.world.cache().register_generic::<C>();
        self.rules.any.push(id);
        self
    }

    /// Exclude archetypes carrying component `C`.
    pub fn none<C: Component>(mut self) -> Self {
        let id = self.world.cache().register_generic::<C>();
        self.rules.none.push(id);
        self
    }

    /// Skip chunks where `C`'s column hasn't changed since this query's
    /// last run (`spec.md` §4.7 change filter).
    pub fn changed<C: Component>(mut self) -> Self {
        let id = self.world.cache().register_generic::<C>();
        self.rules.changed.push(id);
        self
    }

    /// Visit only disabled entities instead of the default enabled-only scope.
    pub fn disabled_only(mut self) -> Self {
        self.scope = Scope::DisabledOnly;
        self
    }

    /// Visit both enabled and disabled entities.
    pub fn including_disabled(mut self) -> Self {
        self.scope = Scope::Both;
        self
    }

    fn data_spec(&self) -> Vec<FetchSpec> {
        D::spec(self.world.cache())
    }

    fn required_ids(spec: &[FetchSpec]) -> Vec<component::Id> {
        spec.iter()
            .filter_map(|p| match p {
                FetchSpec::Component { id, optional: false, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn write_ids(spec: &[FetchSpec]) -> Vec<component::Id> {
        spec.iter()
            .filter_map(|p| match p {
                FetchSpec::Component { id, mutable: true, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Walk every matched chunk in the current scope, invoking `visit` once
    /// per accepted chunk with `(archetype, list, chunk_index, cache)`. When
    /// `mark_writes` is set, every mutable component `D` fetches is
    /// version-stamped for that chunk before `visit` runs, once per chunk
    /// batch rather than once per row (`spec.md` §4.3).
    fn traverse(&mut self, mark_writes: bool, mut visit: impl FnMut(&Archetype, ChunkList, u32, &Cache)) {
        let spec = self.data_spec();
        let data_required = Self::required_ids(&spec);
        let write_ids = if mark_writes { Self::write_ids(&spec) } else { Vec::new() };
        let scope = self.scope;
        let changed_ids = self.rules.changed.clone();

        let ctx = build_context(self.world.cache(), &self.rules, &data_required);
        let key = lookup_hash(&self.rules, &data_required, scope);

        let world = &mut *self.world;
        let (matched_ids, baseline): (Vec<archetype::Id>, u32) = {
            let (matched, baseline) = world.query_plan_matches(key, ctx);
            (matched.to_vec(), baseline)
        };

        for aid in matched_ids {
            for &list in scope.lists() {
                let chunk_count = match world.archetypes().get(aid) {
                    Some(a) => a.chunks(list).len() as u32,
                    None => continue,
                };

                let mut accepted = Vec::new();
                for ci in 0..chunk_count {
                    let archetype = match world.archetypes().get(aid) {
                        Some(a) => a,
                        None => continue,
                    };
                    if archetype.chunks(list)[ci as usize].is_empty() {
                        continue;
                    }
                    if !changed_ids.is_empty() && !changed_ids.iter().any(|&id| archetype.did_change_in(list, ci, id, baseline))
                    {
                        continue;
                    }
                    accepted.push(ci);
                }

                for batch in accepted.chunks(BATCH_SIZE) {
                    if !write_ids.is_empty() {
                        let version = world.bump_version();
                        if let Some(archetype) = world.archetypes_mut().get_mut(aid) {
                            for &ci in batch {
                                for &wid in &write_ids {
                                    archetype.mark_changed_in(list, ci, wid, version);
                                }
                            }
                        }
                    }

                    let Some(archetype) = world.archetypes().get(aid) else { continue };
                    let _guard = archetype.lock();
                    for &ci in batch {
                        visit(archetype, list, ci, world.cache());
                    }
                }
            }
        }

        world.set_query_baseline(key, world.version());
    }

    /// Run `f` once per matched row.
    pub fn for_each<F>(mut self, mut f: F)
    where
        F: FnMut(D::Item<'_>),
    {
        self.traverse(true, |archetype, list, chunk, cache| {
            let len = archetype.chunks(list)[chunk as usize].len();
            for row in 0..len {
                let entity = archetype.get_entity_in(list, chunk, row);
                // SAFETY: row < len, read from the same chunk.
                if let Some(item) = unsafe { D::fetch(entity, archetype, list, chunk, row, cache) } {
                    f(item);
                }
            }
        });
    }

    /// Run `f` once per matched chunk, for callers that want to iterate rows
    /// themselves (e.g. batched/SIMD-friendly processing).
    pub fn for_each_chunk<F>(mut self, mut f: F)
    where
        F: FnMut(ChunkView<'_, D>),
    {
        self.traverse(true, |archetype, list, chunk, cache| {
            let len = archetype.chunks(list)[chunk as usize].len();
            f(ChunkView { archetype, list, chunk, cache, len, _marker: PhantomData });
        });
    }

    /// Total matched row count, without fetching any component data.
    pub fn count(mut self) -> usize {
        let mut total = 0usize;
        self.traverse(false, |archetype, list, chunk, _cache| {
            total += archetype.chunks(list)[chunk as usize].len() as usize;
        });
        total
    }

    /// Whether this query matches zero rows.
    pub fn empty(mut self) -> bool {
        let mut any = false;
        self.traverse(false, |_, _, _, _| any = true);
        !any
    }
}

impl<C: Component> Builder<'_, &C> {
    /// Collect every matched `C` value by clone, in no particular order
    /// (`spec.md` §4.7: a single-component query convenience).
    pub fn to_array(mut self) -> Vec<C> {
        let mut out = Vec::new();
        self.traverse(false, |archetype, list, chunk, cache| {
            let len = archetype.chunks(list)[chunk as usize].len();
            for row in 0..len {
                let entity = archetype.get_entity_in(list, chunk, row);
                // SAFETY: row < len, read from the same chunk.
                if let Some(value) = unsafe { <&C>::fetch(entity, archetype, list, chunk, row, cache) } {
                    out.push(value.clone());
                }
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::entity::Entity;
    use crate::ecs::world::World;

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

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Marker;
    impl Component for Marker {}

    #[test]
    fn for_each_visits_every_matching_entity() {
        let mut world = World::new();
        let a = world.create_entity_with(Position { x: 1.0, y: 1.0 }).unwrap();
        let b = world.create_entity_with(Position { x: 2.0, y: 2.0 }).unwrap();
        world.create_entity().unwrap();

        let mut seen: Vec<Entity> = Vec::new();
        world.query::<(Entity, &Position)>().for_each(|(entity, _pos)| seen.push(entity));

        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&a) && seen.contains(&b));
    }

    #[test]
    fn none_filter_excludes_archetypes_carrying_the_component() {
        let mut world = World::new();
        let tagged = world.create_entity_with(Position { x: 0.0, y: 0.0 }).unwrap();
        world.add(tagged, Marker).unwrap();
        let untagged = world.create_entity_with(Position { x: 1.0, y: 1.0 }).unwrap();

        let mut seen: Vec<Entity> = Vec::new();
        world.query::<Entity>().all::<Position>().none::<Marker>().for_each(|entity| seen.push(entity));

        assert_eq!(seen, vec![untagged]);
    }

    #[test]
    fn count_matches_for_each_visit_count() {
        let mut world = World::new();
        for i in 0..5 {
            world.create_entity_with(Position { x: i as f32, y: 0.0 }).unwrap();
        }

        assert_eq!(world.query::<&Position>().count(), 5);
    }

    #[test]
    fn empty_is_true_when_nothing_matches() {
        let mut world = World::new();
        world.create_entity().unwrap();
        assert!(world.query::<&Position>().empty());
    }

    #[test]
    fn disabled_entities_are_excluded_by_default() {
        let mut world = World::new();
        let entity = world.create_entity_with(Position { x: 0.0, y: 0.0 }).unwrap();
        world.set_enabled(entity, false).unwrap();

        assert!(world.query::<&Position>().empty());
        assert_eq!(world.query::<&Position>().including_disabled().count(), 1);
    }

    #[test]
    fn mutable_fetch_updates_the_value_in_place() {
        let mut world = World::new();
        let entity = world.create_entity_with(Position { x: 0.0, y: 0.0 }).unwrap();

        world.query::<&mut Position>().for_each(|pos| pos.x = 9.0);

        assert_eq!(world.get::<Position>(entity).unwrap(), Some(&Position { x: 9.0, y: 0.0 }));
    }

    #[test]
    fn changed_filter_only_matches_after_a_write() {
        let mut world = World::new();
        world.create_entity_with(Position { x: 0.0, y: 0.0 }).unwrap();

        // First run establishes the baseline; nothing has changed yet since
        // spawning isn't itself a tracked column write.
        assert!(world.query::<&Position>().changed::<Position>().empty());

        world.query::<&mut Position>().for_each(|pos| pos.x += 1.0);
        assert_eq!(world.query::<&Position>().changed::<Position>().count(), 1);
        // Re-running resets the baseline, so a third run with no writes in
        // between finds nothing changed again.
        assert!(world.query::<&Position>().changed::<Position>().empty());
    }

    #[test]
    fn changed_filter_on_multiple_columns_matches_if_any_changed() {
        let mut world = World::new();
        world.create_entity_with((Position { x: 0.0, y: 0.0 }, Velocity { dx: 0.0, dy: 0.0 })).unwrap();

        // Baseline run.
        assert!(world.query::<()>().changed::<Position>().changed::<Velocity>().empty());

        // Only Position is written; a chunk should still be visited since
        // the filter is an OR across its changed<T> columns, not an AND.
        world.query::<&mut Position>().for_each(|pos| pos.x += 1.0);
        assert_eq!(world.query::<()>().changed::<Position>().changed::<Velocity>().count(), 1);
    }

    #[test]
    fn to_array_collects_every_matched_value() {
        let mut world = World::new();
        world.create_entity_with(Position { x: 1.0, y: 1.0 }).unwrap();
        world.create_entity_with(Position { x: 2.0, y: 2.0 }).unwrap();

        let mut values = world.query::<&Position>().to_array();
        values.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap());
        assert_eq!(values, vec![Position { x: 1.0, y: 1.0 }, Position { x: 2.0, y: 2.0 }]);
    }

    #[test]
    fn for_each_chunk_exposes_matched_rows() {
        let mut world = World::new();
        world.create_entity_with(Position { x: 3.0, y: 3.0 }).unwrap();

        let mut total = 0usize;
        world.query::<&Position>().for_each_chunk(|chunk| {
            total += chunk.len();
            for pos in chunk.iter() {
                assert_eq!(pos.x, 3.0);
            }
        });
        assert_eq!(total, 1);
    }
}
