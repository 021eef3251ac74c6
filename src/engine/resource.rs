//! # Resources
//!
//! World-owned singleton values keyed by type.
//!
//! A resource type is registered (assigned a [`ResourceID`]) the first time it
//! is named, either by an insertion or by a system declaring access to it, so
//! access sets can refer to resources that have not been inserted yet.
//!
//! ## Semantics
//! - [`Resources::insert`] never overrides: inserting a type that is already
//!   present is a no-op and returns `false`. Only [`ResMut`] changes a stored
//!   value in place.
//! - Absence is a normal state. Lookups return `Option`.
//! - Each value sits behind its own `RwLock`, so systems reading and writing
//!   different resources never contend.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::engine::types::{ResourceID, Tick};

/// Marker trait for world singletons.
///
/// ```ignore
/// struct Gravity(f32);
/// impl Resource for Gravity {}
/// ```
pub trait Resource: Send + Sync + 'static {}

struct ResourceCell {
    data: RwLock<Box<dyn Any + Send + Sync>>,
    added_tick: Tick,
    changed_tick: AtomicU64,
}

/// Type-keyed singleton storage.
#[derive(Default)]
pub struct Resources {
    by_type: HashMap<TypeId, ResourceID>,
    names: Vec<&'static str>,
    cells: Vec<Option<ResourceCell>>,
}

impl Resources {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `R` and returns its id. Idempotent.
    pub fn register<R: Resource>(&mut self) -> ResourceID {
        let type_id = TypeId::of::<R>();
        if let Some(&id) = self.by_type.get(&type_id) {
            return id;
        }
        let id = self.cells.len() as ResourceID;
        self.by_type.insert(type_id, id);
        self.names.push(type_name::<R>());
        self.cells.push(None);
        id
    }

    /// Id of `R`, if registered.
    #[inline]
    pub fn id_of<R: Resource>(&self) -> Option<ResourceID> {
        self.by_type.get(&TypeId::of::<R>()).copied()
    }

    /// Name recorded for `resource_id`.
    pub fn name(&self, resource_id: ResourceID) -> Option<&'static str> {
        self.names.get(resource_id as usize).copied()
    }

    fn cell<R: Resource>(&self) -> Option<&ResourceCell> {
        let id = self.id_of::<R>()?;
        self.cells[id as usize].as_ref()
    }

    /// Stores `value` unless an `R` is already present.
    ///
    /// Returns `true` if the value was stored.
    pub fn insert<R: Resource>(&mut self, value: R, tick: Tick) -> bool {
        let id = self.register::<R>() as usize;
        if self.cells[id].is_some() {
            trace!(resource = type_name::<R>(), "resource already present, insert ignored");
            return false;
        }
        self.cells[id] = Some(ResourceCell {
            data: RwLock::new(Box::new(value)),
            added_tick: tick,
            changed_tick: AtomicU64::new(tick),
        });
        true
    }

    /// Returns `true` if an `R` is stored.
    pub fn contains<R: Resource>(&self) -> bool {
        self.cell::<R>().is_some()
    }

    /// Shared access to the stored `R`.
    pub fn get<R: Resource>(&self) -> Option<Res<'_, R>> {
        let cell = self.cell::<R>()?;
        let value = RwLockReadGuard::try_map(cell.data.read(), |data| data.downcast_ref::<R>()).ok()?;
        Some(Res { value, added_tick: cell.added_tick, changed_tick: &cell.changed_tick })
    }

    /// Exclusive access to the stored `R`. Mutation stamps `change_tick`.
    pub fn get_mut<R: Resource>(&self, change_tick: Tick) -> Option<ResMut<'_, R>> {
        let cell = self.cell::<R>()?;
        let value = RwLockWriteGuard::try_map(cell.data.write(), |data| data.downcast_mut::<R>()).ok()?;
        Some(ResMut { value, changed_tick: &cell.changed_tick, change_tick })
    }

    /// Removes and returns the stored `R`.
    pub fn remove<R: Resource>(&mut self) -> Option<R> {
        let id = self.id_of::<R>()?;
        let cell = self.cells[id as usize].take()?;
        cell.data.into_inner().downcast::<R>().ok().map(|boxed| *boxed)
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared borrow of a resource.
pub struct Res<'w, R> {
    value: MappedRwLockReadGuard<'w, R>,
    added_tick: Tick,
    changed_tick: &'w AtomicU64,
}

impl<R> Res<'_, R> {
    /// Tick at which the resource was inserted.
    pub fn added_tick(&self) -> Tick {
        self.added_tick
    }

    /// Tick of the last mutable access.
    pub fn last_changed(&self) -> Tick {
        self.changed_tick.load(Ordering::Acquire)
    }

    /// Returns `true` if the resource changed after `since`.
    pub fn is_changed_since(&self, since: Tick) -> bool {
        self.last_changed() > since
    }
}

impl<R> Deref for Res<'_, R> {
    type Target = R;
    fn deref(&self) -> &R {
        &self.value
    }
}

/// Exclusive borrow of a resource.
pub struct ResMut<'w, R> {
    value: MappedRwLockWriteGuard<'w, R>,
    changed_tick: &'w AtomicU64,
    change_tick: Tick,
}

impl<R> ResMut<'_, R> {
    /// Tick of the last mutable access.
    pub fn last_changed(&self) -> Tick {
        self.changed_tick.load(Ordering::Acquire)
    }
}

impl<R> Deref for ResMut<'_, R> {
    type Target = R;
    fn deref(&self) -> &R {
        &self.value
    }
}

impl<R> DerefMut for ResMut<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        self.changed_tick.store(self.change_tick, Ordering::Release);
        &mut self.value
    }
}
