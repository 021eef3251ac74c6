//! # Commands
//!
//! Deferred structural mutations of a [`World`].
//!
//! ## Purpose
//! Spawning, inserting, removing, and despawning move rows between chunks and
//! invalidate row indices that running queries may be iterating over. Systems
//! therefore never mutate structure directly: they record [`Command`]s into a
//! private [`Commands`] log, and the logs are replayed against the world at a
//! single exclusive point (a flush).
//!
//! ## Design
//! - Each system execution owns its own `Commands`. Logs from concurrently
//!   running systems are merged into the world's queue in registration order
//!   ([`Commands::append`], [`Commands::finish`]), never mutated from several
//!   threads at once.
//! - Entity ids are reserved immediately from the shared entity store, so
//!   [`Commands::spawn`] hands back a usable [`Entity`] before the flush.
//! - Replay happens in recording order.
//!
//! ## Invariants
//! - Commands targeting an entity that is gone by the time of the flush are
//!   skipped with a warning; any other failure aborts the flush.
//! - A reserved entity is alive but has no components until its spawn
//!   command is applied.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::engine::component::{Bundle, Component, IntoBundle};
use crate::engine::entity::{Entity, EntityStore};
use crate::engine::error::ECSResult;
use crate::engine::resource::Resource;
use crate::engine::world::World;

type RemoveFn = fn(&mut World, Entity) -> ECSResult<bool>;

fn remove_component<T: Component>(world: &mut World, entity: Entity) -> ECSResult<bool> {
    world.remove::<T>(entity)
}

/// One deferred world mutation.
pub enum Command {
    /// Places a reserved entity with its initial components.
    Spawn {
        /// Reserved entity.
        entity: Entity,
        /// Initial components.
        bundle: Bundle,
    },

    /// Adds or overwrites components of an entity.
    Insert {
        /// Target entity.
        entity: Entity,
        /// Components to insert.
        bundle: Bundle,
    },

    /// Removes one component type from an entity.
    Remove {
        /// Target entity.
        entity: Entity,
        /// Component type name.
        name: &'static str,
        /// Typed removal.
        remove: RemoveFn,
    },

    /// Despawns an entity.
    Despawn {
        /// Entity to remove from the world.
        entity: Entity,
    },

    /// Despawns an entity if it is still alive at the flush.
    DeferredDespawn {
        /// Entity to remove from the world.
        entity: Entity,
    },

    /// Arbitrary exclusive world access.
    Custom(Box<dyn FnOnce(&mut World) -> ECSResult<()> + Send>),
}

impl Command {
    /// Applies the command to `world`.
    pub fn apply(self, world: &mut World) -> ECSResult<()> {
        match self {
            Command::Spawn { entity, bundle } => world.spawn_reserved(entity, bundle),
            Command::Insert { entity, bundle } => world.insert_bundle(entity, bundle),
            Command::Remove { entity, remove, .. } => remove(world, entity).map(drop),
            Command::Despawn { entity } => world.despawn(entity),
            Command::DeferredDespawn { entity } => match world.despawn(entity) {
                Err(error) if error.is_stale_entity() => {
                    debug!(%entity, "deferred despawn of a dead entity");
                    Ok(())
                }
                result => result,
            },
            Command::Custom(command) => command(world),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Spawn { entity, bundle } => write!(f, "Spawn({entity}, {} components)", bundle.len()),
            Command::Insert { entity, bundle } => write!(f, "Insert({entity}, {} components)", bundle.len()),
            Command::Remove { entity, name, .. } => write!(f, "Remove({entity}, {name})"),
            Command::Despawn { entity } => write!(f, "Despawn({entity})"),
            Command::DeferredDespawn { entity } => write!(f, "DeferredDespawn({entity})"),
            Command::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Append-only log of deferred world mutations.
pub struct Commands {
    entities: Arc<EntityStore>,
    queue: Vec<Command>,
}

impl Commands {
    /// Creates an empty log bound to `world`.
    pub fn new(world: &World) -> Self {
        Self { entities: Arc::clone(world.entity_store()), queue: Vec::new() }
    }

    /// Reserves an entity and records its spawn.
    pub fn spawn(&mut self, bundle: impl IntoBundle) -> EntityCommands<'_> {
        let entity = self.entities.reserve();
        self.queue.push(Command::Spawn { entity, bundle: bundle.into_bundle() });
        EntityCommands { commands: self, entity }
    }

    /// Reserves an entity with no components.
    pub fn spawn_empty(&mut self) -> EntityCommands<'_> {
        self.spawn(())
    }

    /// Records commands for an existing entity.
    pub fn entity(&mut self, entity: Entity) -> EntityCommands<'_> {
        EntityCommands { commands: self, entity }
    }

    /// Records a resource insertion (a no-op if the type is present).
    pub fn insert_resource<R: Resource>(&mut self, value: R) {
        self.add(move |world: &mut World| {
            world.insert_resource(value);
            Ok(())
        });
    }

    /// Records a resource removal.
    pub fn remove_resource<R: Resource>(&mut self) {
        self.add(|world: &mut World| {
            world.remove_resource::<R>();
            Ok(())
        });
    }

    /// Records an arbitrary mutation.
    pub fn add<F>(&mut self, command: F)
    where
        F: FnOnce(&mut World) -> ECSResult<()> + Send + 'static,
    {
        self.queue.push(Command::Custom(Box::new(command)));
    }

    /// Records a prepared command.
    pub fn push(&mut self, command: Command) {
        self.queue.push(command);
    }

    /// Moves every command of `other` to the end of this log.
    pub fn append(&mut self, mut other: Commands) {
        self.queue.append(&mut other.queue);
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Hands the log to `world`; it is applied at the next flush.
    ///
    /// ## Panics
    /// Panics if the log was created for another world.
    pub fn finish(self, world: &World) {
        assert!(
            Arc::ptr_eq(&self.entities, world.entity_store()),
            "commands finished on a different world"
        );
        world.enqueue_commands(self.queue);
    }

    /// Applies the log to `world` now.
    pub fn apply(self, world: &mut World) -> ECSResult<()> {
        assert!(
            Arc::ptr_eq(&self.entities, world.entity_store()),
            "commands applied to a different world"
        );
        world.apply_commands(self.queue)
    }
}

impl fmt::Debug for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.queue).finish()
    }
}

/// Commands scoped to one entity.
pub struct EntityCommands<'a> {
    commands: &'a mut Commands,
    entity: Entity,
}

impl EntityCommands<'_> {
    /// Target entity.
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Records the insertion of one component.
    pub fn insert<T: Component>(&mut self, value: T) -> &mut Self {
        self.insert_bundle(value)
    }

    /// Records the insertion of several components.
    pub fn insert_bundle(&mut self, bundle: impl IntoBundle) -> &mut Self {
        self.commands.queue.push(Command::Insert { entity: self.entity, bundle: bundle.into_bundle() });
        self
    }

    /// Records the removal of `T`.
    pub fn remove<T: Component>(&mut self) -> &mut Self {
        self.commands.queue.push(Command::Remove {
            entity: self.entity,
            name: std::any::type_name::<T>(),
            remove: remove_component::<T>,
        });
        self
    }

    /// Records the despawn of the entity.
    pub fn despawn(&mut self) {
        self.commands.queue.push(Command::Despawn { entity: self.entity });
    }
}
