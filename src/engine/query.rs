//! # Queries
//!
//! A [`Query<D, F>`] is a typed, re-resolvable view over a [`World`]. The
//! *data* parameter `D` says what each visited entity yields; the *filter*
//! parameter `F` (see [`filter`](crate::engine::filter)) says which entities
//! are visited.
//!
//! ## Data parameters
//!
//! | `D` | yields | access |
//! |-----|--------|--------|
//! | `&T` | `&T` | read, required |
//! | `&mut T` | [`Mut<T>`] | write, required |
//! | `Option<&T>` | `Option<&T>` | read, optional |
//! | `Option<&mut T>` | `Option<Mut<T>>` | write, optional |
//! | `Entity` | the entity id | none |
//! | `(D1, D2, ...)` | a tuple | union |
//!
//! ## Pull model
//!
//! A query caches the archetypes it matched at its last [`Query::update`].
//! Archetypes created afterwards are not visited until the next update, and a
//! query that was never updated visits nothing. Systems get their queries
//! updated automatically on every run.
//!
//! ## Iteration order
//!
//! Rows in chunk order, chunks in index order within an archetype. The order
//! across archetypes is unspecified.
//!
//! ## Borrowing
//!
//! Iteration borrows every column the query touches, one chunk at a time,
//! through column locks (see [`borrow`](crate::engine::borrow)). Any number
//! of read-only queries may iterate the same world concurrently; a writing
//! query excludes other access to its columns only while it is inside the
//! chunk being visited. Calling `World::get`/`get_mut` on a component the
//! running query writes, from inside its callback, deadlocks.

use std::any::{type_name, TypeId};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};
use rayon::prelude::*;

use crate::engine::borrow::acquire;
use crate::engine::component::{Component, Components};
use crate::engine::entity::Entity;
use crate::engine::error::{ExecutionError, InvalidAccessReason};
use crate::engine::filter::QueryFilter;
use crate::engine::storage::Chunk;
use crate::engine::types::{AccessMode, AccessSets, ArchetypeID, ComponentID, Signature, Tick, NEVER_TICK};
use crate::engine::world::{World, WorldId};

/// Declared access of one data parameter: `(type, name, mode)`.
pub type DeclaredAccess = (TypeId, &'static str, AccessMode);

/// Per-entity data a query yields.
///
/// Implemented for component references, their `Option` forms, [`Entity`],
/// and tuples of up to eight parameters.
pub trait QueryData {
    /// Value yielded for one row.
    type Item<'f>;

    /// Column borrows held while one chunk is visited.
    type Fetch<'c>;

    /// Resolved component ids.
    type State: Copy + Send + Sync + 'static;

    /// Registers every component type the parameter names.
    fn register(components: &mut Components);

    /// Resolves component ids. `None` when a required type is unregistered,
    /// in which case nothing can match.
    fn init_state(components: &Components) -> Option<Self::State>;

    /// Appends the declared access, for aliasing validation.
    fn collect_access(access: &mut Vec<DeclaredAccess>);

    /// Adds required components to `required` and accesses to `access`.
    fn update_access(state: &Self::State, required: &mut Signature, access: &mut AccessSets);

    /// Tries to borrow the columns of `chunk` without blocking. On `None`,
    /// nothing stays borrowed.
    fn try_fetch<'c>(state: &Self::State, chunk: &'c Chunk) -> Option<Self::Fetch<'c>>;

    /// Builds the item of `row`. Writes through it stamp `change_tick`.
    fn fetch_item<'f, 'c: 'f>(fetch: &'f mut Self::Fetch<'c>, row: usize, change_tick: Tick) -> Self::Item<'f>;
}

/// Mutable component access yielded by `&mut T` query parameters.
///
/// Dereferencing mutably stamps the slot's change tick, which is what
/// `Changed<T>` filters observe.
pub struct Mut<'a, T> {
    value: &'a mut T,
    last_changed: &'a AtomicU64,
    change_tick: Tick,
}

impl<'a, T> Mut<'a, T> {
    /// Tick of the last write to this slot.
    pub fn last_changed(&self) -> Tick {
        self.last_changed.load(Ordering::Acquire)
    }

    /// Returns `true` if the slot was written after `since`.
    pub fn is_changed_since(&self, since: Tick) -> bool {
        self.last_changed() > since
    }

    /// Mutable access that leaves the change tick untouched.
    pub fn bypass_change_detection(&mut self) -> &mut T {
        &mut *self.value
    }

    /// Consumes the wrapper, stamping the tick.
    pub fn into_inner(self) -> &'a mut T {
        self.last_changed.store(self.change_tick, Ordering::Release);
        self.value
    }
}

impl<T> Deref for Mut<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &*self.value
    }
}

impl<T> DerefMut for Mut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.last_changed.store(self.change_tick, Ordering::Release);
        &mut *self.value
    }
}

/// Column borrow of a writing parameter.
pub struct WriteFetch<'c, T> {
    values: MappedRwLockWriteGuard<'c, [T]>,
    ticks: &'c [AtomicU64],
}

impl<'c, T: Component> WriteFetch<'c, T> {
    fn try_new(chunk: &'c Chunk, index: usize) -> Option<Self> {
        let values = chunk.try_write_column::<T>(index)?;
        Some(Self { values, ticks: chunk.column_ticks(index) })
    }

    fn item(&mut self, row: usize, change_tick: Tick) -> Mut<'_, T> {
        let ticks = self.ticks;
        Mut { value: &mut self.values[row], last_changed: &ticks[row], change_tick }
    }
}

fn required_column(chunk: &Chunk, component_id: ComponentID, name: &'static str) -> usize {
    chunk
        .column_index(component_id)
        .unwrap_or_else(|| panic!("matched chunk has no column for {name}"))
}

impl<'a, T: Component> QueryData for &'a T {
    type Item<'f> = &'f T;
    type Fetch<'c> = MappedRwLockReadGuard<'c, [T]>;
    type State = ComponentID;

    fn register(components: &mut Components) {
        components.register::<T>();
    }

    fn init_state(components: &Components) -> Option<Self::State> {
        components.id_of::<T>()
    }

    fn collect_access(access: &mut Vec<DeclaredAccess>) {
        access.push((TypeId::of::<T>(), type_name::<T>(), AccessMode::Read));
    }

    fn update_access(state: &Self::State, required: &mut Signature, access: &mut AccessSets) {
        required.set(*state);
        access.add_component(*state, AccessMode::Read);
    }

    fn try_fetch<'c>(state: &Self::State, chunk: &'c Chunk) -> Option<Self::Fetch<'c>> {
        chunk.try_read_column::<T>(required_column(chunk, *state, type_name::<T>()))
    }

    fn fetch_item<'f, 'c: 'f>(fetch: &'f mut Self::Fetch<'c>, row: usize, _change_tick: Tick) -> Self::Item<'f> {
        &fetch[row]
    }
}

impl<'a, T: Component> QueryData for &'a mut T {
    type Item<'f> = Mut<'f, T>;
    type Fetch<'c> = WriteFetch<'c, T>;
    type State = ComponentID;

    fn register(components: &mut Components) {
        components.register::<T>();
    }

    fn init_state(components: &Components) -> Option<Self::State> {
        components.id_of::<T>()
    }

    fn collect_access(access: &mut Vec<DeclaredAccess>) {
        access.push((TypeId::of::<T>(), type_name::<T>(), AccessMode::Write));
    }

    fn update_access(state: &Self::State, required: &mut Signature, access: &mut AccessSets) {
        required.set(*state);
        access.add_component(*state, AccessMode::Write);
    }

    fn try_fetch<'c>(state: &Self::State, chunk: &'c Chunk) -> Option<Self::Fetch<'c>> {
        WriteFetch::try_new(chunk, required_column(chunk, *state, type_name::<T>()))
    }

    fn fetch_item<'f, 'c: 'f>(fetch: &'f mut Self::Fetch<'c>, row: usize, change_tick: Tick) -> Self::Item<'f> {
        fetch.item(row, change_tick)
    }
}

impl<'a, T: Component> QueryData for Option<&'a T> {
    type Item<'f> = Option<&'f T>;
    type Fetch<'c> = Option<MappedRwLockReadGuard<'c, [T]>>;
    type State = Option<ComponentID>;

    fn register(components: &mut Components) {
        components.register::<T>();
    }

    fn init_state(components: &Components) -> Option<Self::State> {
        Some(components.id_of::<T>())
    }

    fn collect_access(access: &mut Vec<DeclaredAccess>) {
        access.push((TypeId::of::<T>(), type_name::<T>(), AccessMode::Read));
    }

    fn update_access(state: &Self::State, _required: &mut Signature, access: &mut AccessSets) {
        if let Some(id) = state {
            access.add_component(*id, AccessMode::Read);
        }
    }

    fn try_fetch<'c>(state: &Self::State, chunk: &'c Chunk) -> Option<Self::Fetch<'c>> {
        match state.and_then(|id| chunk.column_index(id)) {
            Some(index) => Some(Some(chunk.try_read_column::<T>(index)?)),
            None => Some(None),
        }
    }

    fn fetch_item<'f, 'c: 'f>(fetch: &'f mut Self::Fetch<'c>, row: usize, _change_tick: Tick) -> Self::Item<'f> {
        fetch.as_ref().map(|values| &values[row])
    }
}

impl<'a, T: Component> QueryData for Option<&'a mut T> {
    type Item<'f> = Option<Mut<'f, T>>;
    type Fetch<'c> = Option<WriteFetch<'c, T>>;
    type State = Option<ComponentID>;

    fn register(components: &mut Components) {
        components.register::<T>();
    }

    fn init_state(components: &Components) -> Option<Self::State> {
        Some(components.id_of::<T>())
    }

    fn collect_access(access: &mut Vec<DeclaredAccess>) {
        access.push((TypeId::of::<T>(), type_name::<T>(), AccessMode::Write));
    }

    fn update_access(state: &Self::State, _required: &mut Signature, access: &mut AccessSets) {
        if let Some(id) = state {
            access.add_component(*id, AccessMode::Write);
        }
    }

    fn try_fetch<'c>(state: &Self::State, chunk: &'c Chunk) -> Option<Self::Fetch<'c>> {
        match state.and_then(|id| chunk.column_index(id)) {
            Some(index) => Some(Some(WriteFetch::try_new(chunk, index)?)),
            None => Some(None),
        }
    }

    fn fetch_item<'f, 'c: 'f>(fetch: &'f mut Self::Fetch<'c>, row: usize, change_tick: Tick) -> Self::Item<'f> {
        fetch.as_mut().map(|fetch| fetch.item(row, change_tick))
    }
}

impl QueryData for Entity {
    type Item<'f> = Entity;
    type Fetch<'c> = &'c [Entity];
    type State = ();

    fn register(_components: &mut Components) {}

    fn init_state(_components: &Components) -> Option<Self::State> {
        Some(())
    }

    fn collect_access(_access: &mut Vec<DeclaredAccess>) {}

    fn update_access(_state: &Self::State, _required: &mut Signature, _access: &mut AccessSets) {}

    fn try_fetch<'c>(_state: &Self::State, chunk: &'c Chunk) -> Option<Self::Fetch<'c>> {
        Some(chunk.entities())
    }

    fn fetch_item<'f, 'c: 'f>(fetch: &'f mut Self::Fetch<'c>, row: usize, _change_tick: Tick) -> Self::Item<'f> {
        fetch[row]
    }
}

macro_rules! impl_query_data_for_tuple {
    ($(($name:ident, $index:tt)),+) => {
        impl<$($name: QueryData),+> QueryData for ($($name,)+) {
            type Item<'f> = ($($name::Item<'f>,)+);
            type Fetch<'c> = ($($name::Fetch<'c>,)+);
            type State = ($($name::State,)+);

            fn register(components: &mut Components) {
                $($name::register(components);)+
            }

            fn init_state(components: &Components) -> Option<Self::State> {
                Some(($($name::init_state(components)?,)+))
            }

            fn collect_access(access: &mut Vec<DeclaredAccess>) {
                $($name::collect_access(access);)+
            }

            fn update_access(state: &Self::State, required: &mut Signature, access: &mut AccessSets) {
                $($name::update_access(&state.$index, required, access);)+
            }

            fn try_fetch<'c>(state: &Self::State, chunk: &'c Chunk) -> Option<Self::Fetch<'c>> {
                Some(($($name::try_fetch(&state.$index, chunk)?,)+))
            }

            #[allow(non_snake_case)]
            fn fetch_item<'f, 'c: 'f>(fetch: &'f mut Self::Fetch<'c>, row: usize, change_tick: Tick) -> Self::Item<'f> {
                let ($($name,)+) = fetch;
                ($($name::fetch_item($name, row, change_tick),)+)
            }
        }
    };
}

impl_query_data_for_tuple!((A, 0));
impl_query_data_for_tuple!((A, 0), (B, 1));
impl_query_data_for_tuple!((A, 0), (B, 1), (C, 2));
impl_query_data_for_tuple!((A, 0), (B, 1), (C, 2), (D, 3));
impl_query_data_for_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_query_data_for_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
impl_query_data_for_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
impl_query_data_for_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));

/// Checks that no component is written while also read or written again.
pub fn validate_access<D: QueryData>() -> Result<(), ExecutionError> {
    let mut declared = Vec::new();
    D::collect_access(&mut declared);
    for (index, (type_id, name, mode)) in declared.iter().enumerate() {
        for (other_id, _, other_mode) in &declared[index + 1..] {
            if type_id != other_id {
                continue;
            }
            let reason = match (mode, other_mode) {
                (AccessMode::Write, AccessMode::Write) => InvalidAccessReason::DuplicateWrite,
                (AccessMode::Read, AccessMode::Read) => continue,
                _ => InvalidAccessReason::ReadAndWrite,
            };
            return Err(ExecutionError::InvalidQueryAccess { component: name, reason });
        }
    }
    Ok(())
}

/// Typed view over the entities of a world.
///
/// ```ignore
/// let mut query = Query::<(&Position, &mut Velocity), Without<Frozen>>::new();
/// query.update(&world);
/// query.for_each(&world, |(position, mut velocity)| {
///     velocity.dx -= position.x * 0.1;
/// });
/// ```
pub struct Query<D: QueryData, F: QueryFilter = ()> {
    data_state: Option<D::State>,
    filter_state: Option<F::State>,
    required: Signature,
    access: AccessSets,
    matched: Vec<ArchetypeID>,
    world_id: Option<WorldId>,
    last_run: Tick,
    this_run: Option<Tick>,
    _marker: PhantomData<fn() -> (D, F)>,
}

/// A query with a non-trivial filter.
pub type FilterQuery<D, F> = Query<D, F>;

impl<D: QueryData, F: QueryFilter> Default for Query<D, F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: QueryData, F: QueryFilter> Query<D, F> {
    /// Creates an un-updated query.
    ///
    /// ## Panics
    /// Panics if `D` reads and writes, or writes twice, the same component.
    pub fn new() -> Self {
        Self::try_new().unwrap_or_else(|error| panic!("{error}"))
    }

    /// Creates an un-updated query, rejecting aliasing access in `D`.
    pub fn try_new() -> Result<Self, ExecutionError> {
        validate_access::<D>()?;
        Ok(Self {
            data_state: None,
            filter_state: None,
            required: Signature::default(),
            access: AccessSets::default(),
            matched: Vec::new(),
            world_id: None,
            last_run: NEVER_TICK,
            this_run: None,
            _marker: PhantomData,
        })
    }

    /// Re-resolves component ids and the matching archetypes of `world`.
    ///
    /// `Changed` filters compare against the world's last tracker reset.
    pub fn update(&mut self, world: &World) {
        self.resolve(world, world.last_change_tick(), None);
    }

    /// Updates on behalf of a system run: `Changed` compares with the
    /// system's previous run and writes are stamped with `this_run`.
    pub(crate) fn update_for_system(&mut self, world: &World, last_run: Tick, this_run: Tick) {
        self.resolve(world, last_run, Some(this_run));
    }

    fn resolve(&mut self, world: &World, last_run: Tick, this_run: Option<Tick>) {
        let components = world.components();
        self.data_state = D::init_state(components);
        let filter_state = F::init_state(components);
        self.filter_state = Some(filter_state);
        self.required = Signature::default();
        self.access = AccessSets::default();
        self.matched.clear();
        if let Some(data_state) = &self.data_state {
            D::update_access(data_state, &mut self.required, &mut self.access);
            F::update_access(&filter_state, &mut self.access);
            self.matched.extend(
                world
                    .archetypes()
                    .iter()
                    .filter(|archetype| {
                        archetype.matches_all(&self.required)
                            && F::matches_archetype(&filter_state, archetype.signature())
                    })
                    .map(|archetype| archetype.archetype_id()),
            );
        }
        self.world_id = Some(world.id());
        self.last_run = last_run;
        self.this_run = this_run;
    }

    /// Archetypes matched at the last update.
    pub fn matched_archetypes(&self) -> &[ArchetypeID] {
        &self.matched
    }

    /// Component access resolved at the last update.
    pub fn access(&self) -> &AccessSets {
        &self.access
    }

    /// Baseline tick used by `Changed` filters.
    pub fn last_run(&self) -> Tick {
        self.last_run
    }

    fn change_tick(&self, world: &World) -> Tick {
        self.this_run.unwrap_or_else(|| world.read_change_tick())
    }

    fn states(&self, world: &World) -> Option<(&D::State, &F::State)> {
        let world_id = self.world_id?;
        assert_eq!(world_id, world.id(), "query was updated against a different world");
        Some((self.data_state.as_ref()?, self.filter_state.as_ref()?))
    }

    fn matched_chunks<'w>(&'w self, world: &'w World) -> impl Iterator<Item = &'w Chunk> + 'w {
        self.matched
            .iter()
            .filter_map(move |&archetype_id| world.archetypes().get(archetype_id))
            .flat_map(|archetype| archetype.chunks().chunks().iter())
            .filter(|chunk| !chunk.is_empty())
    }

    fn visit_chunk<Func>(
        data: &D::State,
        filter: &F::State,
        chunk: &Chunk,
        last_run: Tick,
        change_tick: Tick,
        mut f: Func,
    ) where
        Func: for<'f> FnMut(D::Item<'f>),
    {
        let mut fetch = acquire(|| D::try_fetch(data, chunk));
        for row in 0..chunk.len() {
            if !F::IS_ARCHETYPAL && !F::matches_row(filter, chunk, row, last_run) {
                continue;
            }
            f(D::fetch_item(&mut fetch, row, change_tick));
        }
    }

    /// Calls `f` for every matching entity.
    pub fn for_each<Func>(&self, world: &World, mut f: Func)
    where
        Func: for<'f> FnMut(D::Item<'f>),
    {
        let Some((data, filter)) = self.states(world) else { return };
        let change_tick = self.change_tick(world);
        for chunk in self.matched_chunks(world) {
            Self::visit_chunk(data, filter, chunk, self.last_run, change_tick, &mut f);
        }
    }

    /// Calls `f` for every matching entity, visiting chunks in parallel on
    /// the rayon pool.
    pub fn par_for_each<Func>(&self, world: &World, f: Func)
    where
        Func: for<'f> Fn(D::Item<'f>) + Send + Sync,
    {
        let Some((data, filter)) = self.states(world) else { return };
        let change_tick = self.change_tick(world);
        let last_run = self.last_run;
        let chunks: Vec<&Chunk> = self.matched_chunks(world).collect();
        chunks
            .par_iter()
            .for_each(|chunk| Self::visit_chunk(data, filter, chunk, last_run, change_tick, &f));
    }

    /// Runs `f` on the item of `entity`, if it matches.
    pub fn get<R, Func>(&self, world: &World, entity: Entity, f: Func) -> Option<R>
    where
        Func: for<'f> FnOnce(D::Item<'f>) -> R,
    {
        let (data, filter) = self.states(world)?;
        let location = world.entity_location(entity)?;
        if !self.matched.contains(&location.archetype) {
            return None;
        }
        let chunk = world.archetypes().get(location.archetype)?.chunks().chunk(location.chunk)?;
        let row = location.row as usize;
        if !F::IS_ARCHETYPAL && !F::matches_row(filter, chunk, row, self.last_run) {
            return None;
        }
        let mut fetch = acquire(|| D::try_fetch(data, chunk));
        Some(f(D::fetch_item(&mut fetch, row, self.change_tick(world))))
    }

    /// Number of matching entities. Takes no column locks.
    pub fn count(&self, world: &World) -> usize {
        let Some((_, filter)) = self.states(world) else { return 0 };
        self.matched_chunks(world)
            .map(|chunk| {
                if F::IS_ARCHETYPAL {
                    chunk.len()
                } else {
                    (0..chunk.len()).filter(|&row| F::matches_row(filter, chunk, row, self.last_run)).count()
                }
            })
            .sum()
    }

    /// Returns `true` if no entity matches.
    pub fn is_empty(&self, world: &World) -> bool {
        self.count(world) == 0
    }

    /// Matching entities in iteration order.
    pub fn entities(&self, world: &World) -> Vec<Entity> {
        let Some((_, filter)) = self.states(world) else { return Vec::new() };
        let mut entities = Vec::new();
        for chunk in self.matched_chunks(world) {
            for (row, entity) in chunk.entities().iter().enumerate() {
                if F::IS_ARCHETYPAL || F::matches_row(filter, chunk, row, self.last_run) {
                    entities.push(*entity);
                }
            }
        }
        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    struct Hunger(u8);
    impl Component for Hunger {}
    #[allow(dead_code)]
    struct Thirst(u8);
    impl Component for Thirst {}

    #[test]
    fn aliasing_access_is_rejected() {
        assert!(validate_access::<(&Hunger, &Thirst, &Hunger)>().is_ok());
        let error = validate_access::<(&Hunger, &mut Hunger)>().unwrap_err();
        assert!(matches!(
            error,
            ExecutionError::InvalidQueryAccess { reason: InvalidAccessReason::ReadAndWrite, .. }
        ));
        let error = validate_access::<(&mut Thirst, Option<&mut Thirst>)>().unwrap_err();
        assert!(matches!(
            error,
            ExecutionError::InvalidQueryAccess { reason: InvalidAccessReason::DuplicateWrite, .. }
        ));
        assert!(Query::<(Entity, &mut Hunger)>::try_new().is_ok());
    }

    #[test]
    fn unregistered_required_component_matches_nothing() {
        let world = World::new();
        let mut query = Query::<(&Hunger, Option<&Thirst>)>::new();
        query.update(&world);
        assert!(query.matched_archetypes().is_empty());
        assert_eq!(query.count(&world), 0);
    }
}
