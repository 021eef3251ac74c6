//! # World
//!
//! The [`World`] owns every piece of ECS state: the component registry, the
//! archetype table and its chunks, the entity store, resources, the deferred
//! command queue, and the named schedules.
//!
//! ## Access model
//!
//! - `&mut World` is exclusive and may change structure directly (`spawn`,
//!   `insert`, `remove`, `despawn`). These calls must not run while a query
//!   is iterating; the borrow checker enforces that for safe code.
//! - `&World` is shared with running systems. It allows component reads and
//!   writes through queries, [`World::get`] and [`World::get_mut`], resource
//!   access, deferred despawns, and queuing [`Commands`]. Column locks are
//!   taken per access, so shared access never changes structure.
//!
//! Structural changes recorded from shared access are applied by
//! [`World::flush`], which the scheduler calls after every batch and after
//! every schedule.
//!
//! ## Change ticks
//!
//! The world keeps a monotonically increasing change tick. Every write stamps
//! the slot with the current tick. A scheduler pass runs entirely at one tick
//! and advances it once when it ends, so the writes and spawns of one pass
//! share a tick, and a system's `Changed` filters see what was written after
//! its previous pass.

use std::any::Any;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace, warn};

use crate::engine::archetype::Archetypes;
use crate::engine::commands::{Command, Commands};
use crate::engine::component::{Bundle, Component, Components, IntoBundle};
use crate::engine::config::WorldConfig;
use crate::engine::entity::{Entity, EntityLocation, EntityStore};
use crate::engine::error::{ECSResult, SpawnError};
use crate::engine::filter::QueryFilter;
use crate::engine::query::{Query, QueryData};
use crate::engine::resource::{Res, ResMut, Resource, Resources};
use crate::engine::scheduler::{ScheduleLabel, Schedules, SystemConfig};
use crate::engine::storage::{ComponentMut, ComponentRef};
use crate::engine::systems::{System, SystemBuilder, SystemKey};
use crate::engine::types::{ArchetypeID, ComponentID, Signature, Tick, FIRST_TICK, NEVER_TICK};

static NEXT_WORLD_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a [`World`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorldId(u64);

impl WorldId {
    fn next() -> Self {
        WorldId(NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Container of all entities, components, resources, and systems.
pub struct World {
    id: WorldId,
    config: WorldConfig,
    components: Components,
    archetypes: Archetypes,
    entities: Arc<EntityStore>,
    resources: Resources,
    change_tick: AtomicU64,
    last_change_tick: Tick,
    deferred: Mutex<Vec<Command>>,
    schedules: Schedules,
    schedule_order: Vec<ScheduleLabel>,
    startup_done: bool,
    thread_pool: Option<ThreadPool>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates a world with the default configuration.
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Creates a world with `config`.
    ///
    /// If a dedicated worker pool is requested but cannot be built, batches
    /// fall back to rayon's global pool.
    pub fn with_config(config: WorldConfig) -> Self {
        let config = config.validated();
        let thread_pool = config.worker_threads.and_then(|threads| {
            match ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|index| format!("ecs-worker-{index}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(error) => {
                    warn!(threads, %error, "failed to build worker pool, using the global pool");
                    None
                }
            }
        });

        let id = WorldId::next();
        debug!(world = id.0, entities_per_chunk = config.entities_per_chunk, executor = ?config.executor, "created world");
        Self {
            id,
            archetypes: Archetypes::new(config.entities_per_chunk),
            config,
            components: Components::new(),
            entities: Arc::new(EntityStore::new()),
            resources: Resources::new(),
            change_tick: AtomicU64::new(FIRST_TICK),
            last_change_tick: NEVER_TICK,
            deferred: Mutex::new(Vec::new()),
            schedules: Schedules::new(),
            schedule_order: vec![ScheduleLabel::PRE_UPDATE, ScheduleLabel::UPDATE, ScheduleLabel::POST_UPDATE],
            startup_done: false,
            thread_pool,
        }
    }

    /// Configuration the world was built with.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Identity of this world.
    pub fn id(&self) -> WorldId {
        self.id
    }

    /// Component registry.
    pub fn components(&self) -> &Components {
        &self.components
    }

    pub(crate) fn components_mut(&mut self) -> &mut Components {
        &mut self.components
    }

    /// Archetype table.
    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    /// Resource store.
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub(crate) fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    pub(crate) fn entity_store(&self) -> &Arc<EntityStore> {
        &self.entities
    }

    pub(crate) fn thread_pool(&self) -> Option<&ThreadPool> {
        self.thread_pool.as_ref()
    }

    /// Where `entity` is stored, if it is alive and placed.
    pub fn entity_location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.location(entity)
    }

    /// Registers `T` and returns its id.
    pub fn register_component<T: Component>(&mut self) -> ComponentID {
        self.components.register::<T>()
    }

    /// Makes every later spawn or insertion of `A` also insert a `B` built by
    /// `constructor`, unless the entity already has one.
    pub fn register_required_component<A, B>(&mut self, constructor: impl Fn() -> B + Send + Sync + 'static)
    where
        A: Component,
        B: Component,
    {
        self.components.register_required::<A, B, _>(constructor);
    }

    // ---- entities ----

    /// Spawns an entity with the components of `bundle`.
    ///
    /// ## Panics
    /// Panics if the storage rejects a bundle the registry resolved, which
    /// means the archetype table is corrupt.
    pub fn spawn(&mut self, bundle: impl IntoBundle) -> Entity {
        let entity = self.entities.reserve();
        if let Err(error) = self.place(entity, bundle.into_bundle()) {
            self.entities.despawn(entity);
            panic!("failed to spawn entity {entity}: {error}");
        }
        trace!(%entity, "spawned entity");
        entity
    }

    /// Spawns an entity with no components.
    pub fn spawn_empty(&mut self) -> Entity {
        self.spawn(())
    }

    /// Places an entity reserved through [`Commands`].
    pub(crate) fn spawn_reserved(&mut self, entity: Entity, bundle: Bundle) -> ECSResult<()> {
        if !self.entities.is_alive(entity) {
            return Err(SpawnError::StaleEntity(entity).into());
        }
        if self.entities.location(entity).is_some() {
            return self.insert_bundle(entity, bundle);
        }
        self.place(entity, bundle)
    }

    fn place(&mut self, entity: Entity, bundle: Bundle) -> ECSResult<()> {
        let tick = self.read_change_tick();
        let values = self.components.resolve_bundle(bundle, &Signature::default());
        let mut signature = Signature::default();
        for (component_id, _) in &values {
            signature.set(*component_id);
        }

        let archetype_id = self.archetypes.get_or_create(signature, &self.components, self.config.entities_per_chunk);
        let archetype = self.archetypes.get_mut(archetype_id).ok_or(SpawnError::StaleEntity(entity))?;
        let location = archetype.chunks_mut().insert_entity(entity, values, tick)?;
        self.entities.set_location(
            entity,
            EntityLocation { archetype: archetype_id, chunk: location.chunk, row: location.row },
        );
        Ok(())
    }

    /// Removes `entity` and drops its components immediately.
    pub fn despawn(&mut self, entity: Entity) -> ECSResult<()> {
        if !self.entities.is_alive(entity) {
            return Err(SpawnError::StaleEntity(entity).into());
        }
        if let Some(location) = self.entities.location(entity) {
            let archetype = self.archetypes.get_mut(location.archetype).ok_or(SpawnError::StaleEntity(entity))?;
            let (vacated, swapped) = archetype.chunks_mut().remove_entity(entity)?;
            if let Some(swapped) = swapped {
                self.entities.set_location(
                    swapped,
                    EntityLocation { archetype: location.archetype, chunk: vacated.chunk, row: vacated.row },
                );
            }
        }
        self.entities.despawn(entity);
        trace!(%entity, "despawned entity");
        Ok(())
    }

    /// Schedules `entity` for removal at the next [`World::flush`].
    ///
    /// The removal joins the command queue, so it is applied in order with
    /// commands finished before and after it. An entity that is already gone
    /// by then is ignored.
    pub fn remove_entity_on_next_tick(&self, entity: Entity) {
        self.deferred.lock().push(Command::DeferredDespawn { entity });
    }

    /// Returns `true` if `entity` is alive (placed or reserved).
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of stored entities. Ids reserved by unflushed commands are not
    /// counted.
    pub fn entity_count(&self) -> usize {
        self.entities.placed_len()
    }

    /// Every stored entity, grouped by archetype.
    pub fn entities(&self) -> Vec<Entity> {
        self.archetypes.iter().flat_map(|archetype| archetype.chunks().entities()).collect()
    }

    // ---- components ----

    /// Adds or overwrites one component.
    pub fn insert<T: Component>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        self.insert_bundle(entity, value)
    }

    /// Adds or overwrites several components, moving the entity to the
    /// archetype of its new component set. Values already on the entity keep
    /// their data unless the bundle overwrites them.
    pub fn insert_bundle(&mut self, entity: Entity, bundle: impl IntoBundle) -> ECSResult<()> {
        if !self.entities.is_alive(entity) {
            return Err(SpawnError::StaleEntity(entity).into());
        }
        let bundle = bundle.into_bundle();
        let Some(location) = self.entities.location(entity) else {
            return self.place(entity, bundle);
        };

        let tick = self.read_change_tick();
        let source = *self
            .archetypes
            .get(location.archetype)
            .ok_or(SpawnError::StaleEntity(entity))?
            .signature();
        let values = self.components.resolve_bundle(bundle, &source);
        let mut target = source;
        for (component_id, _) in &values {
            target.set(*component_id);
        }

        if target == source {
            let chunks = self
                .archetypes
                .get_mut(location.archetype)
                .ok_or(SpawnError::StaleEntity(entity))?
                .chunks_mut();
            for (component_id, value) in values {
                chunks.write_component(entity, component_id, value, tick)?;
            }
            return Ok(());
        }

        let target_id = self.archetypes.get_or_create(target, &self.components, self.config.entities_per_chunk);
        self.relocate(entity, location, target_id, values, tick)
    }

    /// Removes component `T`. Returns `false` if the entity did not have it.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> ECSResult<bool> {
        if !self.entities.is_alive(entity) {
            return Err(SpawnError::StaleEntity(entity).into());
        }
        let (Some(component_id), Some(location)) = (self.components.id_of::<T>(), self.entities.location(entity))
        else {
            return Ok(false);
        };
        let source = *self
            .archetypes
            .get(location.archetype)
            .ok_or(SpawnError::StaleEntity(entity))?
            .signature();
        if !source.has(component_id) {
            return Ok(false);
        }

        let mut target = source;
        target.clear(component_id);
        let target_id = self.archetypes.get_or_create(target, &self.components, self.config.entities_per_chunk);
        let tick = self.read_change_tick();
        self.relocate(entity, location, target_id, Vec::new(), tick)?;
        Ok(true)
    }

    fn relocate(
        &mut self,
        entity: Entity,
        location: EntityLocation,
        target: ArchetypeID,
        added: Vec<(ComponentID, Box<dyn Any + Send>)>,
        tick: Tick,
    ) -> ECSResult<()> {
        let (source, destination) = self.archetypes.get_pair_mut(location.archetype, target);
        let moved = source.chunks_mut().move_entity(entity, destination.chunks_mut(), added, tick)?;
        self.entities.set_location(
            entity,
            EntityLocation { archetype: target, chunk: moved.new_location.chunk, row: moved.new_location.row },
        );
        if let Some(swapped) = moved.swapped_entity {
            self.entities.set_location(
                swapped,
                EntityLocation {
                    archetype: location.archetype,
                    chunk: moved.old_location.chunk,
                    row: moved.old_location.row,
                },
            );
        }
        trace!(%entity, from = location.archetype, to = target, "moved entity");
        Ok(())
    }

    /// Shared access to `T` of `entity`.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<ComponentRef<'_, T>> {
        let location = self.entities.location(entity)?;
        self.archetypes
            .get(location.archetype)?
            .chunks()
            .chunk(location.chunk)?
            .get::<T>(location.row)
    }

    /// Exclusive access to `T` of `entity`. Mutation stamps the current
    /// change tick.
    ///
    /// Blocks while another accessor holds the column; do not call it for a
    /// component the calling thread is already borrowing.
    pub fn get_mut<T: Component>(&self, entity: Entity) -> Option<ComponentMut<'_, T>> {
        let location = self.entities.location(entity)?;
        self.archetypes
            .get(location.archetype)?
            .chunks()
            .chunk(location.chunk)?
            .get_mut::<T>(location.row, self.read_change_tick())
    }

    /// Returns `true` if `entity` has component `T`.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        let (Some(component_id), Some(location)) = (self.components.id_of::<T>(), self.entities.location(entity))
        else {
            return false;
        };
        self.archetypes
            .get(location.archetype)
            .is_some_and(|archetype| archetype.signature().has(component_id))
    }

    // ---- resources ----

    /// Inserts a resource. Returns `false`, leaving the stored value alone,
    /// if one of this type is already present.
    pub fn insert_resource<R: Resource>(&mut self, value: R) -> bool {
        let tick = self.read_change_tick();
        self.resources.insert(value, tick)
    }

    /// Shared access to resource `R`.
    pub fn get_resource<R: Resource>(&self) -> Option<Res<'_, R>> {
        self.resources.get::<R>()
    }

    /// Exclusive access to resource `R`; mutation stamps the current tick.
    pub fn get_resource_mut<R: Resource>(&self) -> Option<ResMut<'_, R>> {
        self.resources.get_mut::<R>(self.read_change_tick())
    }

    /// Removes and returns resource `R`.
    pub fn remove_resource<R: Resource>(&mut self) -> Option<R> {
        self.resources.remove::<R>()
    }

    /// Returns `true` if resource `R` is present.
    pub fn contains_resource<R: Resource>(&self) -> bool {
        self.resources.contains::<R>()
    }

    // ---- queries ----

    /// Builds and updates a query.
    ///
    /// ## Panics
    /// Panics if `D` aliases a component mutably.
    pub fn query<D: QueryData>(&mut self) -> Query<D> {
        self.query_filtered::<D, ()>()
    }

    /// Builds and updates a filtered query.
    ///
    /// ## Panics
    /// Panics if `D` aliases a component mutably.
    pub fn query_filtered<D: QueryData, F: QueryFilter>(&mut self) -> Query<D, F> {
        let mut query = Query::<D, F>::new();
        D::register(&mut self.components);
        F::register(&mut self.components);
        query.update(self);
        query
    }

    // ---- commands ----

    /// A command log bound to this world.
    pub fn commands(&self) -> Commands {
        Commands::new(self)
    }

    pub(crate) fn enqueue_commands(&self, commands: Vec<Command>) {
        if !commands.is_empty() {
            self.deferred.lock().extend(commands);
        }
    }

    pub(crate) fn apply_commands(&mut self, commands: Vec<Command>) -> ECSResult<()> {
        for command in commands {
            let description = format!("{command:?}");
            if let Err(error) = command.apply(self) {
                if !error.is_stale_entity() {
                    return Err(error);
                }
                warn!(command = %description, %error, "skipped command for a dead entity");
            }
        }
        Ok(())
    }

    /// Applies queued commands and deferred despawns in the order they were
    /// queued.
    ///
    /// Commands applied here may queue further commands; those are applied
    /// in the same call.
    pub fn flush(&mut self) -> ECSResult<()> {
        loop {
            let commands = mem::take(self.deferred.get_mut());
            if commands.is_empty() {
                return Ok(());
            }
            trace!(commands = commands.len(), "flushing world");
            self.apply_commands(commands)?;
        }
    }

    /// Removes every entity and drops queued commands and deferred despawns.
    /// Resources, registered components, and systems are kept.
    pub fn clear(&mut self) {
        self.archetypes.clear();
        self.entities.clear();
        self.deferred.get_mut().clear();
        debug!(world = self.id.0, "cleared world");
    }

    // ---- change ticks ----

    /// Current change tick.
    pub fn read_change_tick(&self) -> Tick {
        self.change_tick.load(Ordering::Acquire)
    }

    /// Advances the change tick and returns the new value.
    pub(crate) fn increment_change_tick(&self) -> Tick {
        self.change_tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Baseline tick of ad-hoc queries' `Changed` filters.
    pub fn last_change_tick(&self) -> Tick {
        self.last_change_tick
    }

    /// Starts a new change-detection window for ad-hoc queries: writes made
    /// before this call no longer count as changes.
    pub fn clear_trackers(&mut self) {
        let tick = self.change_tick.get_mut();
        self.last_change_tick = *tick;
        *tick += 1;
    }

    // ---- scheduling ----

    /// Builds `S` and registers it under `label`, creating the schedule if
    /// needed.
    ///
    /// ```ignore
    /// world.add_system::<Integrate>(ScheduleLabel::UPDATE)?.after::<ApplyForces>();
    /// ```
    pub fn add_system<S: System>(&mut self, label: impl Into<ScheduleLabel>) -> ECSResult<SystemConfig<'_>> {
        let label = label.into();
        let mut builder = SystemBuilder::new(self);
        let system = S::init(&mut builder)?;
        let access = builder.into_access();
        debug!(system = system.name(), schedule = %label, "registered system");

        let schedule = self.schedules.entry(label);
        let index = schedule.add_system(SystemKey::of::<S>(), Box::new(system), access, S::dependencies());
        Ok(SystemConfig::new(schedule, index))
    }

    /// Runs every system registered under `label`, then flushes.
    ///
    /// Running a label with no registered systems does nothing.
    pub fn run_schedule(&mut self, label: impl Into<ScheduleLabel>) -> ECSResult<()> {
        let label = label.into();
        let Some(mut schedule) = self.schedules.remove(&label) else {
            debug!(schedule = %label, "no systems registered");
            return Ok(());
        };
        let result = schedule.run(self, &label);
        self.schedules.insert(label, schedule);
        result?;
        self.flush()
    }

    /// Runs [`ScheduleLabel::STARTUP`] on the first call, then every label
    /// of the schedule order.
    pub fn update(&mut self) -> ECSResult<()> {
        if !self.startup_done {
            self.startup_done = true;
            self.run_schedule(ScheduleLabel::STARTUP)?;
        }
        let order = self.schedule_order.clone();
        for label in &order {
            self.run_schedule(label)?;
        }
        Ok(())
    }

    /// Replaces the labels [`World::update`] runs after startup.
    pub fn set_schedule_order<I, L>(&mut self, order: I)
    where
        I: IntoIterator<Item = L>,
        L: Into<ScheduleLabel>,
    {
        self.schedule_order = order.into_iter().map(Into::into).collect();
    }

    /// Labels run by [`World::update`] after startup.
    pub fn schedule_order(&self) -> &[ScheduleLabel] {
        &self.schedule_order
    }

    /// Registered schedules.
    pub fn schedules(&self) -> &Schedules {
        &self.schedules
    }

    /// Registered schedules, mutably.
    pub fn schedules_mut(&mut self) -> &mut Schedules {
        &mut self.schedules
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("entities", &self.entity_count())
            .field("archetypes", &self.archetypes.len())
            .field("components", &self.components.len())
            .field("resources", &self.resources.len())
            .field("change_tick", &self.read_change_tick())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position(f32);
    impl Component for Position {}

    struct Tag;
    impl Component for Tag {}

    #[test]
    fn swapped_entity_location_follows_despawn() {
        let mut world = World::with_config(WorldConfig::default().entities_per_chunk(4));
        let a = world.spawn(Position(1.0));
        let b = world.spawn(Position(2.0));
        let c = world.spawn(Position(3.0));

        world.despawn(a).unwrap();
        assert_eq!(world.entity_location(c).map(|location| location.row), Some(0));
        assert_eq!(world.get::<Position>(c).map(|p| p.0), Some(3.0));
        assert_eq!(world.get::<Position>(b).map(|p| p.0), Some(2.0));
        assert!(world.despawn(a).unwrap_err().is_stale_entity());
    }

    #[test]
    fn clear_trackers_moves_the_baseline() {
        let mut world = World::new();
        let before = world.read_change_tick();
        world.clear_trackers();
        assert_eq!(world.last_change_tick(), before);
        assert_eq!(world.read_change_tick(), before + 1);
    }

    #[test]
    fn flush_applies_commands_queued_by_commands() {
        let mut world = World::new();
        let mut commands = world.commands();
        commands.add(|world: &mut World| {
            let mut nested = world.commands();
            nested.spawn(Tag);
            nested.finish(world);
            Ok(())
        });
        commands.finish(&world);
        world.flush().unwrap();
        assert_eq!(world.entity_count(), 1);
    }
}
