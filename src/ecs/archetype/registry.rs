use std::collections::HashMap;

use crate::ecs::archetype::{Archetype, DEFAULT_CHUNK_LIFESPAN, Id, signature_key};
use crate::ecs::component::{Cache, Signature};
use crate::ecs::error::Result;

/// Owns every archetype in a `World`, keyed by its full signature pair so
/// structural changes can find or create the destination archetype
/// (`spec.md` §3, Archetype graph; §4.4).
pub struct Registry {
    archetypes: Vec<Archetype>,
    by_signature: HashMap<u64, Id>,
    root: Option<Id>,
    /// Chunk lifespan handed to every archetype created from here on
    /// (`spec.md` §6 `World::gc`). Overridden by `World::with_lifespan` so
    /// tests can drain GC deterministically without 4 ticks of padding.
    default_lifespan: u32,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { archetypes: Vec::new(), by_signature: HashMap::new(), root: None, default_lifespan: DEFAULT_CHUNK_LIFESPAN }
    }

    /// Override the chunk lifespan given to archetypes created after this
    /// call. Archetypes created before it keep whatever lifespan they were
    /// built with.
    pub fn set_default_lifespan(&mut self, lifespan: u32) {
        self.default_lifespan = lifespan;
    }

    /// The empty-signature archetype every entity starts in, creating it on
    /// first use.
    pub fn root(&mut self, cache: &Cache) -> Result<Id> {
        if let Some(id) = self.root {
            return Ok(id);
        }
        let id = self.get_or_create(Signature::default(), Signature::default(), cache)?;
        self.root = Some(id);
        Ok(id)
    }

    /// Find the archetype with this exact signature pair, creating it if it
    /// doesn't exist yet.
    pub fn get_or_create(
        &mut self,
        generic_signature: Signature,
        chunk_signature: Signature,
        cache: &Cache,
    ) -> Result<Id> {
        let key = signature_key(&generic_signature, &chunk_signature);
        if let Some(&id) = self.by_signature.get(&key) {
            return Ok(id);
        }

        let id = Id::new(self.archetypes.len() as u32);
        let archetype = Archetype::new(id, generic_signature, chunk_signature, cache, self.default_lifespan)?;
        log::trace!("created archetype {id:?} (generic {:?}, chunk {:?})", archetype.generic_signature(), archetype.chunk_signature());
        self.archetypes.push(archetype);
        self.by_signature.insert(key, id);
        Ok(id)
    }

    #[inline]
    pub fn get(&self, id: Id) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    #[inline]
    pub fn get_mut(&mut self, id: Id) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.index())
    }

    /// Split mutable access to two distinct archetypes, as needed when
    /// migrating a row from one archetype to another.
    ///
    /// # Panics
    /// Panics if `a == b`.
    pub fn get_pair_mut(&mut self, a: Id, b: Id) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "get_pair_mut requires distinct archetypes");
        if a.index() < b.index() {
            let (left, right) = self.archetypes.split_at_mut(b.index());
            (&mut left[a.index()], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a.index());
            (&mut right[0], &mut left[b.index()])
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Archetype> {
        self.archetypes.iter_mut()
    }

    /// Archetypes whose generic signature contains every id in `signature`
    /// (`spec.md` §4.7, the exact post-bloom check run over every archetype
    /// whose OR'd matcher hash passed the bloom prefilter).
    pub fn matching(&self, signature: &Signature) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter().filter(move |a| a.supports(signature))
    }
}
