//! Column storage and fixed-capacity chunks.
//!
//! This module implements the two lowest storage layers:
//!
//! - **[`Column<T>`]**: a dense, fixed-capacity vector of one component type,
//!   reachable through the object-safe [`TypeErasedColumn`] trait so a chunk
//!   can hold heterogeneous columns without knowing their types.
//! - **[`Chunk`]**: a block of up to `entities_per_chunk` rows for one
//!   [`ComponentLayout`]. It owns one column per component, the dense list of
//!   entities occupying its rows, and a change-tick per `(row, component)`.
//!
//! # Storage model
//!
//! ```text
//! Chunk
//!   entities: [e0, e1, e2, ...]              row r <-> entities[r]
//!   columns[i]: RwLock<Column<T_i>>          values[r] is e_r's T_i
//!   ticks[i]:   [AtomicU64; capacity]        last write tick of (r, T_i)
//! ```
//!
//! Rows are packed: row `r` is valid iff `r < len()`. Removal is a swap-remove
//! against the last row, applied identically to the entity list, every column,
//! and every tick column.
//!
//! # Borrowing
//!
//! Typed reads and writes hand out lock guards scoped to a single access.
//! Guards borrow the chunk, and every structural change (adding or removing
//! rows, clearing) needs `&mut Chunk`, so no reference can outlive a row
//! relocation. Column locks let independent threads write disjoint columns of
//! the same chunk; ticks are atomics so change filters never take a lock.
//!
//! # Type erasure
//!
//! [`TypeErasedColumn`] exposes the element type, downcasting hooks, and
//! mutation APIs that mirror the typed operations (`push_dyn`, `write_dyn`,
//! `swap_remove_dyn`, `move_row_to`). A typed view succeeds only when the
//! requested type matches the column's element type.

use std::{
    any::{type_name, Any, TypeId},
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::engine::component::Component;
use crate::engine::entity::Entity;
use crate::engine::error::{AttributeError, PositionOutOfBoundsError, SpawnError, TypeMismatchError};
use crate::engine::layout::ComponentLayout;
use crate::engine::types::{ComponentID, RowID, Tick, NEVER_TICK};

/// Object-safe interface over a [`Column<T>`].
pub trait TypeErasedColumn: Any + Send + Sync {
    /// Number of initialized rows.
    fn len(&self) -> usize;

    /// Returns `true` if no row is initialized.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed row capacity.
    fn capacity(&self) -> usize;

    /// Returns an immutable `&dyn Any` reference to this column.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable `&mut dyn Any` reference to this column.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// `TypeId` of the element type.
    fn element_type_id(&self) -> TypeId;

    /// Name of the element type.
    fn element_type_name(&self) -> &'static str;

    /// Appends a boxed value.
    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<(), AttributeError>;

    /// Writes a boxed value at `row`: overwrites when `row < len`, appends when
    /// `row == len`.
    fn write_dyn(&mut self, row: RowID, value: Box<dyn Any + Send>) -> Result<(), AttributeError>;

    /// Drops the value at `row` and backfills it with the last row.
    fn swap_remove_dyn(&mut self, row: RowID) -> Result<(), AttributeError>;

    /// Moves the value at `row` to the end of `destination` (same element
    /// type), backfilling `row` with the last row.
    fn move_row_to(&mut self, row: RowID, destination: &mut dyn TypeErasedColumn) -> Result<(), AttributeError>;

    /// Drops every value, keeping the allocation.
    fn clear(&mut self);

    /// Type-erased read of one row.
    fn get_dyn(&self, row: RowID) -> Option<&dyn Any>;
}

/// Dense storage for one component type.
///
/// The backing vector is allocated once with the chunk capacity and never
/// grows past it.
pub struct Column<T> {
    values: Vec<T>,
    capacity: usize,
}

impl<T> Column<T> {
    /// Allocates an empty column with room for `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { values: Vec::with_capacity(capacity), capacity }
    }

    /// Initialized rows.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// Initialized rows, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Appends a value.
    pub fn push(&mut self, value: T) -> Result<(), AttributeError> {
        if self.values.len() >= self.capacity {
            return Err(AttributeError::Full { capacity: self.capacity });
        }
        self.values.push(value);
        Ok(())
    }

    /// Removes the value at `row`, backfilling with the last row.
    pub fn swap_remove(&mut self, row: RowID) -> Result<T, AttributeError> {
        self.check_row(row)?;
        Ok(self.values.swap_remove(row as usize))
    }

    fn check_row(&self, row: RowID) -> Result<(), PositionOutOfBoundsError> {
        if (row as usize) < self.values.len() {
            Ok(())
        } else {
            Err(PositionOutOfBoundsError { row, length: self.values.len(), capacity: self.capacity })
        }
    }
}

impl<T: Component> Column<T> {
    fn downcast_value(value: Box<dyn Any + Send>) -> Result<T, AttributeError> {
        value.downcast::<T>().map(|boxed| *boxed).map_err(|value| {
            AttributeError::TypeMismatch(TypeMismatchError {
                expected: TypeId::of::<T>(),
                expected_name: type_name::<T>(),
                actual: (*value).type_id(),
            })
        })
    }

    /// Overwrites `row` or appends when `row == len`.
    pub fn write(&mut self, row: RowID, value: T) -> Result<(), AttributeError> {
        let row_index = row as usize;
        if row_index < self.values.len() {
            self.values[row_index] = value;
            Ok(())
        } else if row_index == self.values.len() {
            self.push(value)
        } else {
            Err(PositionOutOfBoundsError { row, length: self.values.len(), capacity: self.capacity }.into())
        }
    }
}

impl<T: Component> TypeErasedColumn for Column<T> {
    fn len(&self) -> usize { self.values.len() }
    fn capacity(&self) -> usize { self.capacity }

    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }

    fn element_type_id(&self) -> TypeId { TypeId::of::<T>() }
    fn element_type_name(&self) -> &'static str { type_name::<T>() }

    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<(), AttributeError> {
        let value = Self::downcast_value(value)?;
        self.push(value)
    }

    fn write_dyn(&mut self, row: RowID, value: Box<dyn Any + Send>) -> Result<(), AttributeError> {
        let value = Self::downcast_value(value)?;
        self.write(row, value)
    }

    fn swap_remove_dyn(&mut self, row: RowID) -> Result<(), AttributeError> {
        self.swap_remove(row).map(drop)
    }

    fn move_row_to(&mut self, row: RowID, destination: &mut dyn TypeErasedColumn) -> Result<(), AttributeError> {
        let actual = destination.element_type_id();
        let destination = destination
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .ok_or(TypeMismatchError { expected: TypeId::of::<T>(), expected_name: type_name::<T>(), actual })?;
        if destination.values.len() >= destination.capacity {
            return Err(AttributeError::Full { capacity: destination.capacity });
        }
        let value = self.swap_remove(row)?;
        destination.values.push(value);
        Ok(())
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    fn get_dyn(&self, row: RowID) -> Option<&dyn Any> {
        self.values.get(row as usize).map(|value| value as &dyn Any)
    }
}

/// Shared read access to one component value.
pub type ComponentRef<'a, T> = MappedRwLockReadGuard<'a, T>;

/// Exclusive access to one component value.
///
/// Mutable dereference stamps the slot's change tick.
pub struct ComponentMut<'a, T> {
    value: MappedRwLockWriteGuard<'a, T>,
    tick: &'a AtomicU64,
    change_tick: Tick,
}

impl<'a, T> ComponentMut<'a, T> {
    /// Tick of the last write to this slot.
    pub fn last_changed(&self) -> Tick {
        self.tick.load(Ordering::Acquire)
    }

    /// Returns `true` if the slot was written at the current change tick.
    pub fn is_changed(&self) -> bool {
        self.last_changed() == self.change_tick
    }

    /// Mutable access that leaves the change tick untouched.
    pub fn bypass_change_detection(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Deref for ComponentMut<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for ComponentMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.tick.store(self.change_tick, Ordering::Release);
        &mut self.value
    }
}

fn downcast_column<T: Component>(column: &dyn TypeErasedColumn) -> &Column<T> {
    let name = column.element_type_name();
    column
        .as_any()
        .downcast_ref::<Column<T>>()
        .unwrap_or_else(|| panic!("column type mismatch: column holds {name}, accessed as {}", type_name::<T>()))
}

fn downcast_column_mut<T: Component>(column: &mut dyn TypeErasedColumn) -> &mut Column<T> {
    let name = column.element_type_name();
    column
        .as_any_mut()
        .downcast_mut::<Column<T>>()
        .unwrap_or_else(|| panic!("column type mismatch: column holds {name}, accessed as {}", type_name::<T>()))
}

/// One component column of a chunk plus its change ticks.
struct ChunkColumn {
    data: RwLock<Box<dyn TypeErasedColumn>>,
    ticks: Box<[AtomicU64]>,
}

impl ChunkColumn {
    #[inline]
    fn tick(&self, row: usize) -> Tick {
        self.ticks[row].load(Ordering::Acquire)
    }

    #[inline]
    fn set_tick(&self, row: usize, tick: Tick) {
        self.ticks[row].store(tick, Ordering::Release);
    }
}

/// Fixed-capacity, column-oriented block of entity rows.
pub struct Chunk {
    layout: Arc<ComponentLayout>,
    entities: Vec<Entity>,
    columns: Vec<ChunkColumn>,
}

impl Chunk {
    /// Allocates an empty chunk for `layout`.
    pub fn new(layout: Arc<ComponentLayout>) -> Self {
        let capacity = layout.entities_per_chunk();
        let columns = layout
            .components()
            .iter()
            .map(|desc| ChunkColumn {
                data: RwLock::new(desc.new_column(capacity)),
                ticks: (0..capacity).map(|_| AtomicU64::new(NEVER_TICK)).collect(),
            })
            .collect();
        Self { layout, entities: Vec::with_capacity(capacity), columns }
    }

    /// Layout shared by every chunk of the same archetype.
    #[inline]
    pub fn layout(&self) -> &Arc<ComponentLayout> {
        &self.layout
    }

    /// Occupied rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no row is occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Row capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.entities_per_chunk()
    }

    /// Returns `true` if every row is occupied.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.entities.len() >= self.capacity()
    }

    /// Entities by row.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Row currently holding `entity`.
    pub fn row_of(&self, entity: Entity) -> Option<RowID> {
        self.entities.iter().position(|e| *e == entity).map(|row| row as RowID)
    }

    /// Reserves the next row for `entity`. Returns `None` when full.
    ///
    /// The caller must then write every column of the new row through
    /// [`Chunk::insert`] before the chunk is read.
    pub fn add_entity(&mut self, entity: Entity) -> Option<RowID> {
        if self.is_full() {
            return None;
        }
        self.entities.push(entity);
        Some((self.entities.len() - 1) as RowID)
    }

    /// Writes component values at `row`, stamping each slot with `tick`.
    ///
    /// Values whose component is not in the layout are rejected before
    /// anything is written.
    pub fn insert(
        &mut self,
        row: RowID,
        components: Vec<(ComponentID, Box<dyn Any + Send>)>,
        tick: Tick,
    ) -> Result<(), SpawnError> {
        if row as usize >= self.entities.len() {
            return Err(AttributeError::from(PositionOutOfBoundsError {
                row,
                length: self.entities.len(),
                capacity: self.capacity(),
            })
            .into());
        }
        if let Some((component_id, _)) = components.iter().find(|(id, _)| !self.layout.contains(*id)) {
            return Err(SpawnError::UnexpectedComponent { component_id: *component_id });
        }
        for (component_id, value) in components {
            self.write_dyn(component_id, row, value, tick)?;
        }
        Ok(())
    }

    /// Typed write of one component at `row`, stamping `tick`.
    pub fn insert_component<T: Component>(&mut self, row: RowID, value: T, tick: Tick) -> Result<(), SpawnError> {
        let index = self
            .layout
            .index_of_type(TypeId::of::<T>())
            .ok_or(SpawnError::NotInLayout { name: type_name::<T>() })?;
        let column = &mut self.columns[index];
        downcast_column_mut::<T>(&mut **column.data.get_mut()).write(row, value)?;
        column.set_tick(row as usize, tick);
        Ok(())
    }

    pub(crate) fn write_dyn(
        &mut self,
        component_id: ComponentID,
        row: RowID,
        value: Box<dyn Any + Send>,
        tick: Tick,
    ) -> Result<(), SpawnError> {
        let index = self
            .layout
            .index_of(component_id)
            .ok_or(SpawnError::UnexpectedComponent { component_id })?;
        let column = &mut self.columns[index];
        column.data.get_mut().write_dyn(row, value)?;
        column.set_tick(row as usize, tick);
        Ok(())
    }

    /// Shared access to `T` at `row`.
    pub fn get<T: Component>(&self, row: RowID) -> Option<ComponentRef<'_, T>> {
        let index = self.layout.index_of_type(TypeId::of::<T>())?;
        if row as usize >= self.len() {
            return None;
        }
        let guard = self.columns[index].data.read();
        // a reserved row has no value until `insert` writes it
        RwLockReadGuard::try_map(guard, |column| downcast_column::<T>(&**column).as_slice().get(row as usize)).ok()
    }

    /// Exclusive access to `T` at `row`. Mutation stamps `change_tick`.
    pub fn get_mut<T: Component>(&self, row: RowID, change_tick: Tick) -> Option<ComponentMut<'_, T>> {
        let index = self.layout.index_of_type(TypeId::of::<T>())?;
        if row as usize >= self.len() {
            return None;
        }
        let column = &self.columns[index];
        let guard = column.data.write();
        let value = RwLockWriteGuard::try_map(guard, |column| {
            downcast_column_mut::<T>(&mut **column).as_mut_slice().get_mut(row as usize)
        })
        .ok()?;
        Some(ComponentMut { value, tick: &column.ticks[row as usize], change_tick })
    }

    /// Shared access to `T` for `entity`.
    pub fn get_for<T: Component>(&self, entity: Entity) -> Option<ComponentRef<'_, T>> {
        self.get::<T>(self.row_of(entity)?)
    }

    /// Last write tick of `T` at `row`.
    pub fn change_tick<T: Component>(&self, row: RowID) -> Option<Tick> {
        let index = self.layout.index_of_type(TypeId::of::<T>())?;
        if row as usize >= self.len() {
            return None;
        }
        Some(self.columns[index].tick(row as usize))
    }

    /// Returns `true` if `T` at `row` was written after `since`.
    pub fn is_component_changed<T: Component>(&self, row: RowID, since: Tick) -> bool {
        self.change_tick::<T>(row).is_some_and(|tick| tick > since)
    }

    /// Removes `entity`, returning the entity that moved into its row.
    pub fn remove_entity(&mut self, entity: Entity) -> Result<Option<Entity>, SpawnError> {
        let row = self.row_of(entity).ok_or(SpawnError::StaleEntity(entity))?;
        self.swap_remove_row(row)
    }

    /// Swap-removes `row`, dropping its values. Returns the entity that was
    /// moved from the last row into `row`, if any.
    pub fn swap_remove_row(&mut self, row: RowID) -> Result<Option<Entity>, SpawnError> {
        let row_index = row as usize;
        let len = self.entities.len();
        if row_index >= len {
            return Err(AttributeError::from(PositionOutOfBoundsError { row, length: len, capacity: self.capacity() }).into());
        }
        let last = len - 1;
        for column in &mut self.columns {
            column.data.get_mut().swap_remove_dyn(row)?;
            Self::swap_tick(column, row_index, last);
        }
        Ok(self.finish_swap_remove(row_index))
    }

    fn swap_tick(column: &ChunkColumn, row: usize, last: usize) {
        let moved = column.tick(last);
        column.set_tick(row, moved);
        column.set_tick(last, NEVER_TICK);
    }

    fn finish_swap_remove(&mut self, row: usize) -> Option<Entity> {
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// Moves `row` into `destination` at `destination_row`.
    ///
    /// Columns present in both layouts carry their value and tick over;
    /// columns missing from the destination are dropped. The caller has
    /// already reserved `destination_row` and validated the layouts.
    pub(crate) fn move_row_into(
        &mut self,
        row: RowID,
        destination: &mut Chunk,
        destination_row: RowID,
    ) -> Result<Option<Entity>, crate::engine::error::MoveError> {
        use crate::engine::error::MoveError;

        let row_index = row as usize;
        let last = self.entities.len() - 1;
        for (index, desc) in self.layout.components().iter().enumerate() {
            let column = &mut self.columns[index];
            match destination.layout.index_of(desc.component_id) {
                Some(target) => {
                    let target_column = &mut destination.columns[target];
                    column
                        .data
                        .get_mut()
                        .move_row_to(row, &mut **target_column.data.get_mut())
                        .map_err(|source| MoveError::Storage { component_id: desc.component_id, source })?;
                    target_column.set_tick(destination_row as usize, column.tick(row_index));
                }
                None => {
                    column
                        .data
                        .get_mut()
                        .swap_remove_dyn(row)
                        .map_err(|source| MoveError::Storage { component_id: desc.component_id, source })?;
                }
            }
            Self::swap_tick(column, row_index, last);
        }
        Ok(self.finish_swap_remove(row_index))
    }

    /// Empties the chunk, dropping every value and keeping its allocations.
    pub fn clear(&mut self) {
        for column in &mut self.columns {
            column.data.get_mut().clear();
            for tick in column.ticks.iter() {
                tick.store(NEVER_TICK, Ordering::Relaxed);
            }
        }
        self.entities.clear();
    }

    pub(crate) fn column_index(&self, component_id: ComponentID) -> Option<usize> {
        self.layout.index_of(component_id)
    }

    /// Non-blocking shared borrow of a whole column. `None` while a writer
    /// holds it.
    pub(crate) fn try_read_column<T: Component>(&self, index: usize) -> Option<MappedRwLockReadGuard<'_, [T]>> {
        let guard = self.columns[index].data.try_read()?;
        Some(RwLockReadGuard::map(guard, |column| downcast_column::<T>(&**column).as_slice()))
    }

    /// Non-blocking exclusive borrow of a whole column. `None` while any
    /// other borrow is held.
    pub(crate) fn try_write_column<T: Component>(&self, index: usize) -> Option<MappedRwLockWriteGuard<'_, [T]>> {
        let guard = self.columns[index].data.try_write()?;
        Some(RwLockWriteGuard::map(guard, |column| downcast_column_mut::<T>(&mut **column).as_mut_slice()))
    }

    /// Tick slots of a column for the occupied rows.
    #[inline]
    pub(crate) fn column_ticks(&self, index: usize) -> &[AtomicU64] {
        &self.columns[index].ticks[..self.entities.len()]
    }

    /// Last write tick of `(row, column index)`.
    #[inline]
    pub(crate) fn tick_at(&self, index: usize, row: usize) -> Tick {
        self.columns[index].tick(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::component::Components;

    #[derive(Debug, PartialEq)]
    struct Speed(f32);
    impl Component for Speed {}

    fn layout(capacity: usize) -> Arc<ComponentLayout> {
        let mut components = Components::new();
        let id = components.register::<Speed>();
        let mut signature = crate::engine::types::Signature::default();
        signature.set(id);
        Arc::new(components.layout_for(&signature, capacity))
    }

    #[test]
    fn column_rejects_writes_past_capacity() {
        let mut column = Column::<u8>::with_capacity(1);
        assert!(column.push(1).is_ok());
        assert_eq!(column.push(2), Err(AttributeError::Full { capacity: 1 }));
    }

    #[test]
    fn typed_write_overwrites_in_place() {
        let mut chunk = Chunk::new(layout(4));
        let row = chunk.add_entity(Entity::from_raw(1)).unwrap();
        chunk.insert_component(row, Speed(1.0), 3).unwrap();
        chunk.insert_component(row, Speed(2.0), 5).unwrap();
        assert_eq!(*chunk.get::<Speed>(row).unwrap(), Speed(2.0));
        assert_eq!(chunk.change_tick::<Speed>(row), Some(5));
    }

    #[test]
    fn swap_remove_resets_the_vacated_tick() {
        let mut chunk = Chunk::new(layout(4));
        for (raw, tick) in [(1u64, 1u64), (2, 2)] {
            let row = chunk.add_entity(Entity::from_raw(raw)).unwrap();
            chunk.insert_component(row, Speed(raw as f32), tick).unwrap();
        }
        let moved = chunk.swap_remove_row(0).unwrap();
        assert_eq!(moved, Some(Entity::from_raw(2)));
        assert_eq!(chunk.change_tick::<Speed>(0), Some(2));
        assert_eq!(chunk.tick_at(0, 1), NEVER_TICK);
    }

    #[test]
    fn mutable_access_stamps_the_tick() {
        let mut chunk = Chunk::new(layout(2));
        let row = chunk.add_entity(Entity::from_raw(9)).unwrap();
        chunk.insert_component(row, Speed(0.0), 1).unwrap();
        {
            let mut speed = chunk.get_mut::<Speed>(row, 7).unwrap();
            assert!(!speed.is_changed());
            speed.0 = 4.0;
            assert!(speed.is_changed());
        }
        assert!(chunk.is_component_changed::<Speed>(row, 6));
        assert!(!chunk.is_component_changed::<Speed>(row, 7));
    }

    #[test]
    fn reserved_row_reads_nothing_until_written() {
        let mut chunk = Chunk::new(layout(2));
        let row = chunk.add_entity(Entity::from_raw(3)).unwrap();
        assert!(chunk.get::<Speed>(row).is_none());
        assert!(chunk.get_mut::<Speed>(row, 2).is_none());
        assert!(chunk.get_for::<Speed>(Entity::from_raw(3)).is_none());

        chunk.insert_component(row, Speed(1.5), 2).unwrap();
        assert_eq!(chunk.get::<Speed>(row).map(|speed| speed.0), Some(1.5));
    }
}
