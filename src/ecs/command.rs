//! Deferred structural mutation (`spec.md` §6, CommandBuffer collaborator).
//!
//! `spec.md` §1 lists the CommandBuffer as an external, out-of-scope
//! collaborator, but §6 gives its wire format normatively, so it is
//! implemented here as a real module. [`CommandBuffer::push`] is lock-free
//! and wait-free for producers (`crossbeam::queue::SegQueue`), matching the
//! teacher's `system::command::CommandBuffer` shape; unlike the teacher's
//! `enum Command` (which stores live boxed component values), each queued
//! entry here is the tagged byte-stream record §6 specifies — an
//! `opcode: u8` followed by a payload built from the component cache's
//! copy thunks. [`CommandBuffer::commit`] drains the queue in FIFO order
//! and resolves temporary ids against the entities it creates along the
//! way.

use crossbeam::queue::SegQueue;

use crate::ecs::component::{self, Cache, Component, Descriptor};
use crate::ecs::entity::Entity;
use crate::ecs::error::Result;
use crate::ecs::world::World;

const OP_CREATE_ENTITY: u8 = 0;
const OP_ADD_COMPONENT: u8 = 1;
const OP_SET_COMPONENT: u8 = 2;
const OP_REMOVE_COMPONENT: u8 = 3;

const REF_TEMPORARY: u8 = 0;
const REF_REAL: u8 = 1;

/// A handle to an entity that will be created when a [`CommandBuffer`] is
/// committed. Monotonic per buffer, starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempEntity(u32);

/// Either a real, already-live entity or a temporary id allocated earlier
/// in the same buffer (`spec.md` §6: "Temporary ids in the buffer are
/// resolved against a map built during commit").
#[derive(Debug, Clone, Copy)]
pub enum Ref {
    Temporary(TempEntity),
    Real(Entity),
}

impl From<TempEntity> for Ref {
    fn from(value: TempEntity) -> Self {
        Ref::Temporary(value)
    }
}

impl From<Entity> for Ref {
    fn from(value: Entity) -> Self {
        Ref::Real(value)
    }
}

fn encode_ref(buf: &mut Vec<u8>, r: Ref) {
    match r {
        Ref::Temporary(TempEntity(id)) => {
            buf.push(REF_TEMPORARY);
            buf.extend_from_slice(&id.to_le_bytes());
        }
        Ref::Real(entity) => {
            buf.push(REF_REAL);
            buf.extend_from_slice(&(entity.id().index() as u32).to_le_bytes());
            buf.extend_from_slice(&entity.generation_raw().to_le_bytes());
        }
    }
}

fn decode_ref(buf: &[u8], cursor: &mut usize) -> Ref {
    let kind = buf[*cursor];
    *cursor += 1;
    match kind {
        REF_TEMPORARY => {
            let id = read_u32(buf, cursor);
            Ref::Temporary(TempEntity(id))
        }
        REF_REAL => {
            let id = read_u32(buf, cursor);
            let generation = read_u16(buf, cursor);
            Ref::Real(Entity::from_raw(id, generation))
        }
        other => unreachable!("unknown ref kind tag {other}"),
    }
}

fn read_u32(buf: &[u8], cursor: &mut usize) -> u32 {
    let bytes = buf[*cursor..*cursor + 4].try_into().unwrap();
    *cursor += 4;
    u32::from_le_bytes(bytes)
}

fn read_u16(buf: &[u8], cursor: &mut usize) -> u16 {
    let bytes = buf[*cursor..*cursor + 2].try_into().unwrap();
    *cursor += 2;
    u16::from_le_bytes(bytes)
}

fn read_u8(buf: &[u8], cursor: &mut usize) -> u8 {
    let byte = buf[*cursor];
    *cursor += 1;
    byte
}

/// Thread-safe deferred-mutation buffer. Entry storage is lock-free
/// (`crossbeam::queue::SegQueue`); `create_entity` alone serializes through a
/// small mutex, since `commit`'s temp-id resolution (`resolve`, below)
/// indexes created entities by the order their `OP_CREATE_ENTITY` records
/// are popped, which must therefore match the order temp ids were handed
/// out.
///
/// `push`-family methods may be called concurrently from any number of
/// producer threads; `commit` must be called from the single orchestrator
/// thread that owns `&mut World` (`spec.md` §5).
pub struct CommandBuffer {
    entries: SegQueue<Vec<u8>>,
    next_temp: std::sync::Mutex<u32>,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self { entries: SegQueue::new(), next_temp: std::sync::Mutex::new(0) }
    }

    /// Queue the creation of a new entity, returning a handle other calls
    /// in this buffer can target before it actually exists.
    ///
    /// Allocating the temp id and enqueueing its record happen under one
    /// lock: if id allocation and the queue push were independent steps, two
    /// racing producer threads could push in the opposite order from the
    /// ids they were handed, and `commit` would resolve temp ids to the
    /// wrong entities.
    pub fn create_entity(&self) -> TempEntity {
        let mut next_temp = self.next_temp.lock().expect("command buffer mutex poisoned");
        let id = *next_temp;
        *next_temp += 1;
        self.entries.push(vec![OP_CREATE_ENTITY]);
        TempEntity(id)
    }

    /// Queue marking a zero-sized component present on `target`, without a
    /// value payload (`spec.md` §6 `AddComponent`: "ids only"). Only valid
    /// for zero-sized component types — `commit` initializes the slot with
    /// zero bytes, which is only sound when there are zero bytes to
    /// initialize.
    pub fn mark<C: Component>(&self, target: impl Into<Ref>, cache: &Cache) {
        assert_eq!(std::mem::size_of::<C>(), 0, "AddComponent payload requires a zero-sized type; use set() otherwise");
        let id = cache.register_generic::<C>();
        let mut buf = vec![OP_ADD_COMPONENT];
        encode_ref(&mut buf, target.into());
        buf.push(1);
        buf.extend_from_slice(&(id.index() as u32).to_le_bytes());
        self.entries.push(buf);
    }

    /// Queue setting `value` on `target`, adding the component if it's not
    /// already present (`spec.md` §6 `SetComponent`).
    pub fn set<C: Component>(&self, target: impl Into<Ref>, value: C, cache: &Cache) {
        let id = cache.register_generic::<C>();
        let descriptor = cache.get_info_of(id).expect("just registered");
        let mut buf = vec![OP_SET_COMPONENT];
        encode_ref(&mut buf, target.into());
        buf.push(1);
        buf.extend_from_slice(&(id.index() as u32).to_le_bytes());
        write_value_bytes(&mut buf, &descriptor, &value);
        std::mem::forget(value);
        self.entries.push(buf);
    }

    /// Queue removing component `C` from `target` (`spec.md` §6
    /// `RemoveComponent`). A no-op at commit time if the entity doesn't
    /// carry it.
    pub fn remove<C: Component>(&self, target: impl Into<Ref>, cache: &Cache) {
        let Some(id) = cache.get::<C>() else { return };
        let mut buf = vec![OP_REMOVE_COMPONENT];
        encode_ref(&mut buf, target.into());
        buf.push(1);
        buf.extend_from_slice(&(id.index() as u32).to_le_bytes());
        self.entries.push(buf);
    }

    /// Apply every queued record to `world` in FIFO order, resolving
    /// temporary ids against the entities created along the way.
    ///
    /// Stops at the first failing record (`spec.md` §7 fail-fast policy),
    /// leaving any records after it still queued for a later `commit` call.
    pub fn commit(&self, world: &mut World) -> Result<()> {
        let mut temp_entities: Vec<Entity> = Vec::new();

        while let Some(buf) = self.entries.pop() {
            let mut cursor = 0;
            let opcode = read_u8(&buf, &mut cursor);
            match opcode {
                OP_CREATE_ENTITY => {
                    let entity = world.create_entity()?;
                    temp_entities.push(entity);
                }
                OP_ADD_COMPONENT => {
                    let target = resolve(decode_ref(&buf, &mut cursor), &temp_entities);
                    let count = read_u8(&buf, &mut cursor);
                    for _ in 0..count {
                        let id = component::Id::from(read_u32(&buf, &mut cursor));
                        world.add_zeroed(target, id)?;
                    }
                }
                OP_SET_COMPONENT => {
                    let target = resolve(decode_ref(&buf, &mut cursor), &temp_entities);
                    let count = read_u8(&buf, &mut cursor);
                    for _ in 0..count {
                        let id = component::Id::from(read_u32(&buf, &mut cursor));
                        let descriptor = world.cache().get_info_of(id).expect("id was registered when queued");
                        let size = descriptor.size();
                        let bytes = &buf[cursor..cursor + size];
                        cursor += size;
                        world.set_raw(target, id, &descriptor, bytes)?;
                    }
                }
                OP_REMOVE_COMPONENT => {
                    let target = resolve(decode_ref(&buf, &mut cursor), &temp_entities);
                    let count = read_u8(&buf, &mut cursor);
                    for _ in 0..count {
                        let id = component::Id::from(read_u32(&buf, &mut cursor));
                        world.remove_raw(target, id)?;
                    }
                }
                other => unreachable!("unknown command opcode {other}"),
            }
        }
        Ok(())
    }

    /// Number of queued records, for diagnostics/tests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve(r: Ref, temp_entities: &[Entity]) -> Entity {
    match r {
        Ref::Real(entity) => entity,
        Ref::Temporary(TempEntity(id)) => temp_entities[id as usize],
    }
}

fn write_value_bytes<C>(buf: &mut Vec<u8>, descriptor: &Descriptor, value: &C) {
    debug_assert_eq!(descriptor.size(), std::mem::size_of::<C>());
    let ptr = (value as *const C).cast::<u8>();
    // SAFETY: ptr points at a live, initialized C for descriptor.size() bytes.
    let bytes = unsafe { std::slice::from_raw_parts(ptr, descriptor.size()) };
    buf.extend_from_slice(bytes);
}
