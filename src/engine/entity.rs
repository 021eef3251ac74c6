//! Entity handles and the shared liveness/location store.

use std::fmt;

use parking_lot::Mutex;

use crate::engine::types::{ArchetypeID, ChunkID, IndexID, RowID, VersionID};

const INDEX_BITS: u32 = 32;
const INDEX_MASK: u64 = (1u64 << INDEX_BITS) - 1;
const GROWTH: usize = 1024;

/// Generational entity handle: `| version (32) | index (32) |`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Entity(u64);

#[inline]
const fn make_id(index: IndexID, version: VersionID) -> u64 {
    ((version as u64) << INDEX_BITS) | (index as u64)
}

impl Entity {
    /// Builds a handle from its parts.
    #[inline] pub const fn new(index: IndexID, version: VersionID) -> Self { Entity(make_id(index, version)) }
    /// Rebuilds a handle from [`Entity::to_bits`].
    #[inline] pub const fn from_raw(bits: u64) -> Self { Entity(bits) }
    /// Packed representation.
    #[inline] pub const fn to_bits(self) -> u64 { self.0 }
    /// Slot index.
    #[inline] pub const fn index(self) -> IndexID { (self.0 & INDEX_MASK) as IndexID }
    /// Slot generation.
    #[inline] pub const fn version(self) -> VersionID { (self.0 >> INDEX_BITS) as VersionID }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.version())
    }
}

/// Where an entity's row lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype holding the row.
    pub archetype: ArchetypeID,
    /// Chunk within the archetype.
    pub chunk: ChunkID,
    /// Row within the chunk.
    pub row: RowID,
}

#[derive(Default)]
struct Entities {
    versions: Vec<VersionID>,
    free_store: Vec<IndexID>,
    alive: Vec<bool>,
    locations: Vec<Option<EntityLocation>>,
    live: usize,
    placed: usize,
}

impl Entities {
    fn ensure_capacity(&mut self) {
        let current = self.versions.len();
        let needed = current + GROWTH;
        assert!(needed as u64 <= INDEX_MASK + 1, "entity index space exhausted");

        self.versions.resize(needed, 0);
        self.alive.resize(needed, false);
        self.locations.resize(needed, None);

        // lowest index is popped first
        for index in (current..needed).rev() {
            self.free_store.push(index as IndexID);
        }
    }

    fn reserve(&mut self) -> Entity {
        let index = match self.free_store.pop() {
            Some(index) => index,
            None => {
                self.ensure_capacity();
                self.free_store.pop().unwrap_or_default()
            }
        };
        let slot = index as usize;
        self.alive[slot] = true;
        self.locations[slot] = None;
        self.live += 1;
        Entity::new(index, self.versions[slot])
    }

    fn slot(&self, entity: Entity) -> Option<usize> {
        let index = entity.index() as usize;
        let alive = index < self.versions.len() && self.alive[index] && self.versions[index] == entity.version();
        alive.then_some(index)
    }

    fn retire(&mut self, slot: usize) {
        self.versions[slot] = self.versions[slot].wrapping_add(1);
        self.alive[slot] = false;
        if self.locations[slot].take().is_some() {
            self.placed -= 1;
        }
        self.live -= 1;
        self.free_store.push(slot as IndexID);
    }
}

/// Source of truth for entity liveness and location.
///
/// Shared (`Arc`) between a world and its [`Commands`] buffers so ids can be
/// reserved from any thread before the buffered spawn is applied. A reserved
/// entity is alive but has no location until it is placed.
///
/// [`Commands`]: crate::engine::commands::Commands
#[derive(Default)]
pub struct EntityStore {
    inner: Mutex<Entities>,
}

impl EntityStore {
    /// Creates an empty store.
    pub fn new() -> Self { Self::default() }

    /// Allocates a live id with no location.
    pub fn reserve(&self) -> Entity {
        self.inner.lock().reserve()
    }

    /// Invalidates `entity`. Returns `false` if it was not alive.
    pub fn despawn(&self, entity: Entity) -> bool {
        let mut inner = self.inner.lock();
        match inner.slot(entity) {
            Some(slot) => {
                inner.retire(slot);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `entity` is live under its version.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.inner.lock().slot(entity).is_some()
    }

    /// Location of a live, placed entity.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        let inner = self.inner.lock();
        inner.slot(entity).and_then(|slot| inner.locations[slot])
    }

    /// Publishes the location of a live entity. Returns `false` for dead ids.
    pub fn set_location(&self, entity: Entity, location: EntityLocation) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slot(entity) else { return false };
        if inner.locations[slot].replace(location).is_none() {
            inner.placed += 1;
        }
        true
    }

    /// Live ids, reserved ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().live
    }

    /// Returns `true` if no id is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live ids that have a location.
    pub fn placed_len(&self) -> usize {
        self.inner.lock().placed
    }

    /// Every live id, in index order.
    pub fn live_entities(&self) -> Vec<Entity> {
        let inner = self.inner.lock();
        inner
            .alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(index, _)| Entity::new(index as IndexID, inner.versions[index]))
            .collect()
    }

    /// Invalidates every live id, reserved ones included.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for slot in 0..inner.alive.len() {
            if inner.alive[slot] {
                inner.retire(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn despawned_ids_are_stale_after_reuse() {
        let store = EntityStore::new();
        let first = store.reserve();
        assert!(store.despawn(first));
        let second = store.reserve();
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(!store.is_alive(first));
        assert!(store.is_alive(second));
        assert!(!store.despawn(first));
    }

    #[test]
    fn placement_counts_follow_locations() {
        let store = EntityStore::new();
        let a = store.reserve();
        let b = store.reserve();
        assert_eq!(store.placed_len(), 0);
        assert!(store.set_location(a, EntityLocation::default()));
        assert_eq!((store.len(), store.placed_len()), (2, 1));
        store.clear();
        assert_eq!((store.len(), store.placed_len()), (0, 0));
        assert!(store.location(a).is_none());
        assert!(!store.set_location(b, EntityLocation::default()));
    }
}
