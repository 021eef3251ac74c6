//! # Chunk ECS
//!
//! Archetype-based Entity-Component-System core with chunked column storage,
//! deferred structural commands, and an access-aware parallel scheduler.
//!
//! ## Design Goals
//! - Chunked, type-erased column storage grouped by component set
//! - Deferred structural mutation through command logs
//! - Deterministic scheduling with parallel batches of compatible systems
//! - Safe, explicit data access (no `unsafe`)
//!
//! ## Example
//! ```ignore
//! use chunk_ecs::prelude::*;
//!
//! struct Position(f32);
//! impl Component for Position {}
//!
//! let mut world = World::new();
//! world.spawn(Position(0.0));
//! let query = world.query::<&Position>();
//! assert_eq!(query.count(&world), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::world::{World, WorldId};

pub use engine::config::{ExecutorKind, WorldConfig};

pub use engine::entity::{Entity, EntityLocation, EntityStore};

pub use engine::component::{Bundle, Component, Components, IntoBundle};

pub use engine::layout::ComponentLayout;

pub use engine::storage::{Chunk, ComponentMut, ComponentRef};

pub use engine::chunks::{ChunkLocation, Chunks};

pub use engine::resource::{Res, ResMut, Resource};

pub use engine::commands::{Command, Commands, EntityCommands};

pub use engine::query::{FilterQuery, Mut, Query, QueryData};

pub use engine::filter::{And, Changed, Not, Or, QueryFilter, With, Without};

pub use engine::systems::{
    ResMutParam,
    ResParam,
    System,
    SystemBuilder,
    SystemContext,
    SystemDependency,
    SystemParam,
};

pub use engine::scheduler::{DeltaTime, Schedule, ScheduleLabel, Schedules, SystemConfig};

pub use engine::events::{Event, EventRegistry, EventUpdateSystem, Events};

pub use engine::error::{
    AttributeError,
    ECSError,
    ECSResult,
    ExecutionError,
    MoveError,
    ScheduleError,
    SpawnError,
};

pub use engine::types::{ArchetypeID, ComponentID, Signature, Tick};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used ECS types.
///
/// Import with:
/// ```rust
/// use chunk_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        And,
        Changed,
        Commands,
        Component,
        DeltaTime,
        ECSResult,
        Entity,
        Event,
        Events,
        FilterQuery,
        Mut,
        Not,
        Or,
        Query,
        Res,
        ResMut,
        ResMutParam,
        ResParam,
        Resource,
        ScheduleLabel,
        System,
        SystemBuilder,
        SystemContext,
        With,
        Without,
        World,
        WorldConfig,
    };
}
