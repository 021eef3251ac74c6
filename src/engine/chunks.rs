//! # Chunk collections
//!
//! [`Chunks`] is the growable list of [`Chunk`]s that stores every entity of
//! one component set. It owns the entity → `(chunk, row)` map for that set,
//! chooses where new rows go, and moves rows to another collection when an
//! entity's component set changes.
//!
//! ## Placement policy
//! - Removal swap-removes against the tail row of the *same* chunk; rows never
//!   migrate between chunks of one collection.
//! - Every chunk with a vacant row is tracked in an ordered free set. New rows
//!   go to the lowest-indexed chunk with room; a chunk is appended only when
//!   every existing chunk is full. A chunk vacated early is therefore refilled
//!   before any later chunk.
//!
//! ## Invariants
//! - `entities[e] == (c, r)` iff `chunks[c].entities()[r] == e`.
//! - `c ∈ free_chunks` iff `!chunks[c].is_full()`.
//! - `move_entity` validates before mutating: on error nothing has moved.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::engine::component::Component;
use crate::engine::entity::Entity;
use crate::engine::error::{MoveError, SpawnError};
use crate::engine::layout::ComponentLayout;
use crate::engine::storage::{Chunk, ComponentRef};
use crate::engine::types::{ChunkID, ComponentID, RowID, Tick};

/// Position of an entity inside one [`Chunks`] collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLocation {
    /// Chunk index.
    pub chunk: ChunkID,
    /// Row within the chunk.
    pub row: RowID,
}

/// Outcome of [`Chunks::move_entity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveEntityResult {
    /// Where the entity was in the source collection.
    pub old_location: ChunkLocation,
    /// Where the entity now is in the destination collection.
    pub new_location: ChunkLocation,
    /// Source entity that was swapped into `old_location`, if any.
    pub swapped_entity: Option<Entity>,
}

/// All chunks of one component set.
pub struct Chunks {
    layout: Arc<ComponentLayout>,
    chunks: Vec<Chunk>,
    free_chunks: BTreeSet<ChunkID>,
    entities: HashMap<Entity, ChunkLocation>,
}

impl Chunks {
    /// Creates an empty collection. No chunk is allocated until needed.
    pub fn new(layout: Arc<ComponentLayout>) -> Self {
        Self {
            layout,
            chunks: Vec::new(),
            free_chunks: BTreeSet::new(),
            entities: HashMap::new(),
        }
    }

    /// Layout shared by every chunk.
    #[inline]
    pub fn layout(&self) -> &Arc<ComponentLayout> {
        &self.layout
    }

    /// Rows per chunk.
    #[inline]
    pub fn entities_per_chunk(&self) -> usize {
        self.layout.entities_per_chunk()
    }

    /// Number of allocated chunks.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of stored entities.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entity is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Allocated chunks, in index order.
    #[inline]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Chunk at `index`.
    #[inline]
    pub fn chunk(&self, index: ChunkID) -> Option<&Chunk> {
        self.chunks.get(index as usize)
    }

    /// Location of `entity`.
    #[inline]
    pub fn location(&self, entity: Entity) -> Option<ChunkLocation> {
        self.entities.get(&entity).copied()
    }

    /// Returns `true` if `entity` is stored here.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains_key(&entity)
    }

    /// Stored entities in chunk/row order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.entities().iter().copied())
    }

    /// Index of the chunk the next row will go to. Equal to
    /// [`Chunks::chunk_count`] when every chunk is full and the next row
    /// opens a new one.
    pub fn free_chunk_index(&self) -> ChunkID {
        self.free_chunks.iter().next().copied().unwrap_or(self.chunks.len() as ChunkID)
    }

    /// Reserves a row for `entity`. The error is the chunk that refused it,
    /// which means the free set is out of sync with the chunks.
    fn reserve_row(&mut self, entity: Entity) -> Result<ChunkLocation, ChunkID> {
        let chunk = self.free_chunk_index();
        if chunk as usize == self.chunks.len() {
            self.chunks.push(Chunk::new(Arc::clone(&self.layout)));
            self.free_chunks.insert(chunk);
        }
        let chunk_ref = self.chunks.get_mut(chunk as usize).ok_or(chunk)?;
        let row = chunk_ref.add_entity(entity).ok_or(chunk)?;
        if chunk_ref.is_full() {
            self.free_chunks.remove(&chunk);
        }
        let location = ChunkLocation { chunk, row };
        self.entities.insert(entity, location);
        Ok(location)
    }

    fn release_row(&mut self, chunk: ChunkID, swapped: Option<Entity>, old_location: ChunkLocation) {
        self.free_chunks.insert(chunk);
        if let Some(swapped) = swapped {
            self.entities.insert(swapped, old_location);
        }
    }

    fn validate_components(&self, components: &[(ComponentID, Box<dyn Any + Send>)]) -> Result<(), SpawnError> {
        if let Some((component_id, _)) = components.iter().find(|(id, _)| !self.layout.contains(*id)) {
            return Err(SpawnError::UnexpectedComponent { component_id: *component_id });
        }
        for desc in self.layout.components() {
            if !components.iter().any(|(id, _)| *id == desc.component_id) {
                return Err(SpawnError::MissingComponent { component_id: desc.component_id, name: desc.name });
            }
        }
        Ok(())
    }

    /// Places a new entity with exactly the layout's components, stamping
    /// every slot with `tick`.
    pub fn insert_entity(
        &mut self,
        entity: Entity,
        components: Vec<(ComponentID, Box<dyn Any + Send>)>,
        tick: Tick,
    ) -> Result<ChunkLocation, SpawnError> {
        if self.entities.contains_key(&entity) {
            return Err(SpawnError::StaleEntity(entity));
        }
        self.validate_components(&components)?;
        let location = self.reserve_row(entity).map_err(|chunk| SpawnError::ChunkFull { chunk })?;
        self.chunks[location.chunk as usize].insert(location.row, components, tick)?;
        Ok(location)
    }

    /// Overwrites one component of a stored entity in place.
    pub fn write_component(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
        value: Box<dyn Any + Send>,
        tick: Tick,
    ) -> Result<(), SpawnError> {
        let location = self.location(entity).ok_or(SpawnError::StaleEntity(entity))?;
        self.chunks[location.chunk as usize].write_dyn(component_id, location.row, value, tick)
    }

    /// Typed in-place overwrite.
    pub fn insert_component<T: Component>(&mut self, entity: Entity, value: T, tick: Tick) -> Result<(), SpawnError> {
        let location = self.location(entity).ok_or(SpawnError::StaleEntity(entity))?;
        self.chunks[location.chunk as usize].insert_component(location.row, value, tick)
    }

    /// Shared access to `T` of `entity`.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<ComponentRef<'_, T>> {
        let location = self.location(entity)?;
        self.chunks[location.chunk as usize].get::<T>(location.row)
    }

    /// Removes `entity`, dropping its values. Returns the entity swapped into
    /// its row, whose location has already been updated here.
    pub fn remove_entity(&mut self, entity: Entity) -> Result<(ChunkLocation, Option<Entity>), SpawnError> {
        let location = self.entities.remove(&entity).ok_or(SpawnError::StaleEntity(entity))?;
        let swapped = self.chunks[location.chunk as usize].swap_remove_row(location.row)?;
        self.release_row(location.chunk, swapped, location);
        Ok((location, swapped))
    }

    /// Moves `entity` into `destination`.
    ///
    /// Components present in both layouts keep their value and change tick.
    /// Components only in the source are dropped. Components only in the
    /// destination must be supplied in `added` and are stamped with `tick`;
    /// `added` values for shared components overwrite the moved value.
    pub fn move_entity(
        &mut self,
        entity: Entity,
        destination: &mut Chunks,
        added: Vec<(ComponentID, Box<dyn Any + Send>)>,
        tick: Tick,
    ) -> Result<MoveEntityResult, MoveError> {
        let old_location = self.location(entity).ok_or(MoveError::EntityNotFound(entity))?;
        for desc in destination.layout.components() {
            let supplied = self.layout.contains(desc.component_id)
                || added.iter().any(|(id, _)| *id == desc.component_id);
            if !supplied {
                return Err(MoveError::MissingComponent { component_id: desc.component_id, name: desc.name });
            }
        }
        if let Some((component_id, _)) = added.iter().find(|(id, _)| !destination.layout.contains(*id)) {
            return Err(MoveError::UnexpectedComponent { component_id: *component_id });
        }

        let new_location =
            destination.reserve_row(entity).map_err(|chunk| MoveError::DestinationFull { chunk })?;
        self.entities.remove(&entity);
        let source_chunk = &mut self.chunks[old_location.chunk as usize];
        let target_chunk = &mut destination.chunks[new_location.chunk as usize];
        let swapped_entity = source_chunk.move_row_into(old_location.row, target_chunk, new_location.row)?;
        for (component_id, value) in added {
            target_chunk
                .write_dyn(component_id, new_location.row, value, tick)
                .map_err(|error| match error {
                    SpawnError::Storage(source) => MoveError::Storage { component_id, source },
                    _ => MoveError::UnexpectedComponent { component_id },
                })?;
        }
        self.release_row(old_location.chunk, swapped_entity, old_location);

        Ok(MoveEntityResult { old_location, new_location, swapped_entity })
    }

    /// Drops every entity and value. Allocated chunks are kept for reuse.
    pub fn clear(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear();
        }
        self.entities.clear();
        self.free_chunks = (0..self.chunks.len() as ChunkID).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::component::Components;
    use crate::engine::types::Signature;

    struct Level(u8);
    impl Component for Level {}

    fn level_chunks(capacity: usize) -> (Chunks, ComponentID) {
        let mut components = Components::new();
        let id = components.register::<Level>();
        let mut signature = Signature::default();
        signature.set(id);
        (Chunks::new(Arc::new(components.layout_for(&signature, capacity))), id)
    }

    fn level(id: ComponentID, value: u8) -> Vec<(ComponentID, Box<dyn Any + Send>)> {
        vec![(id, Box::new(Level(value)) as Box<dyn Any + Send>)]
    }

    #[test]
    fn free_chunk_index_does_not_allocate() {
        let (mut chunks, id) = level_chunks(2);
        assert_eq!(chunks.free_chunk_index(), 0);
        assert_eq!(chunks.chunk_count(), 0);

        for value in 0..2 {
            chunks.insert_entity(Entity::from_raw(value as u64), level(id, value), 1).unwrap();
        }
        assert_eq!(chunks.free_chunk_index(), 1);
        assert_eq!(chunks.chunk_count(), 1);
    }

    #[test]
    fn out_of_sync_free_set_is_an_error() {
        let (mut chunks, id) = level_chunks(1);
        chunks.insert_entity(Entity::from_raw(1), level(id, 1), 1).unwrap();
        chunks.free_chunks.insert(0);

        let error = chunks.insert_entity(Entity::from_raw(2), level(id, 2), 1).unwrap_err();
        assert_eq!(error, SpawnError::ChunkFull { chunk: 0 });
        assert_eq!(chunks.get::<Level>(Entity::from_raw(1)).map(|level| level.0), Some(1));
    }
}
