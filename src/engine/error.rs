//! Error types for storage, structural changes, queries, and scheduling.
//!
//! Each error type models one layer of the engine. Low-level column
//! operations return [`AttributeError`]; chunk placement returns
//! [`SpawnError`]; archetype migration returns [`MoveError`]; query and system
//! execution return [`ExecutionError`]; schedule construction returns
//! [`ScheduleError`]. All of them convert into the aggregate [`ECSError`] so
//! orchestration code can use `?` throughout.
//!
//! ## Policy
//! * Optional lookups (component or resource reads) return `Option`, never an
//!   error: absence is a valid state.
//! * Operations addressing a dead or unknown entity return
//!   [`SpawnError::StaleEntity`] instead of silently doing nothing.
//! * Configuration mistakes (cyclic ordering, dependencies on unregistered
//!   systems, queries that alias a component mutably) are reported as errors
//!   at first use.
//!
//! ## Display vs. Debug
//! * `Display` is short and suitable for logs.
//! * `Debug` (derived) keeps the full structure for diagnostics.

use std::any::TypeId;

use thiserror::Error;

use crate::engine::entity::Entity;
use crate::engine::types::{ChunkID, ComponentID, RowID};

/// Returned when a column row is addressed outside the valid range.
///
/// ## Invariants
/// - `row <= length` for writes (`row == length` appends)
/// - `row < length` for reads and removals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("position out of bounds: row {row} (length {length}, capacity {capacity})")]
pub struct PositionOutOfBoundsError {
    /// Row index that was addressed.
    pub row: RowID,
    /// Number of initialized rows.
    pub length: usize,
    /// Row capacity of the column.
    pub capacity: usize,
}

/// Returned when a value's dynamic type does not match the column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("type mismatch: expected {expected_name}, actual {actual:?}")]
pub struct TypeMismatchError {
    /// Column's declared element type.
    pub expected: TypeId,
    /// Name of the declared element type.
    pub expected_name: &'static str,
    /// Provided value's dynamic type.
    pub actual: TypeId,
}

/// Aggregate error for column operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttributeError {
    /// A row was addressed outside valid bounds.
    #[error(transparent)]
    Position(#[from] PositionOutOfBoundsError),

    /// The dynamic type of a value did not match the column type.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),

    /// A write would exceed the column's fixed capacity.
    #[error("column full (capacity {capacity})")]
    Full {
        /// Fixed row capacity.
        capacity: usize,
    },
}

/// Errors raised while placing, updating, or removing entity rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// An entity handle was stale, never spawned, or not stored here.
    #[error("stale or dead entity reference {0}")]
    StaleEntity(Entity),

    /// The layout requires a component the caller did not supply.
    #[error("missing component: {name}")]
    MissingComponent {
        /// Component id.
        component_id: ComponentID,
        /// Human-readable component name.
        name: &'static str,
    },

    /// The caller supplied a component that is not part of the layout.
    #[error("component {component_id} is not part of the target layout")]
    UnexpectedComponent {
        /// Component id.
        component_id: ComponentID,
    },

    /// A typed write named a component type the layout does not hold.
    #[error("component {name} is not part of the layout")]
    NotInLayout {
        /// Human-readable component name.
        name: &'static str,
    },

    /// Writing a column failed.
    #[error("failed to write component storage: {0}")]
    Storage(#[from] AttributeError),

    /// A chunk listed as having room was full.
    #[error("chunk {chunk} is listed as free but has no vacant row")]
    ChunkFull {
        /// Chunk index.
        chunk: ChunkID,
    },
}

/// Errors raised while moving an entity between archetypes.
///
/// Moves validate everything before touching storage, so an error means the
/// entity has not moved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    /// The entity is not stored in the source archetype.
    #[error("entity {0} is not stored in the source archetype")]
    EntityNotFound(Entity),

    /// The destination needs a component that is neither shared nor supplied.
    #[error("destination requires component {name} which was not supplied")]
    MissingComponent {
        /// Component id.
        component_id: ComponentID,
        /// Human-readable component name.
        name: &'static str,
    },

    /// A supplied component is not part of the destination layout.
    #[error("component {component_id} is not part of the destination layout")]
    UnexpectedComponent {
        /// Component id.
        component_id: ComponentID,
    },

    /// Column data could not be transferred.
    #[error("failed to move component {component_id}: {source}")]
    Storage {
        /// Component being transferred.
        component_id: ComponentID,
        /// Underlying column error.
        source: AttributeError,
    },

    /// No row could be reserved in the destination.
    #[error("no vacant row in destination chunk {chunk}")]
    DestinationFull {
        /// Destination chunk index.
        chunk: ChunkID,
    },
}

/// Reason a query access declaration was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidAccessReason {
    /// The same component is read and written.
    ReadAndWrite,
    /// The same component is written twice.
    DuplicateWrite,
}

/// Errors raised while building queries or running systems.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A query aliases a component mutably.
    #[error("invalid query access to {component}: {reason:?}")]
    InvalidQueryAccess {
        /// Offending component type.
        component: &'static str,
        /// Why the access was rejected.
        reason: InvalidAccessReason,
    },

    /// A system returned an error.
    #[error("system {system} failed: {source}")]
    SystemFailed {
        /// Name of the failing system.
        system: &'static str,
        /// Error returned by the system.
        source: Box<ECSError>,
    },
}

/// Errors raised while building a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The ordering constraints of a schedule form a cycle.
    #[error("schedule {schedule} has cyclic ordering between {systems:?}")]
    Cycle {
        /// Schedule name.
        schedule: String,
        /// Systems left unordered by the topological sort.
        systems: Vec<&'static str>,
    },

    /// A system is ordered relative to a system that is not registered.
    #[error("system {system} in schedule {schedule} depends on unregistered system {dependency}")]
    UnknownDependency {
        /// Schedule name.
        schedule: String,
        /// System that declared the constraint.
        system: &'static str,
        /// Missing system.
        dependency: &'static str,
    },
}

/// Aggregate ECS error.
#[derive(Debug, Error)]
pub enum ECSError {
    /// Column failure.
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// Placement or removal failure.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Archetype migration failure.
    #[error(transparent)]
    Move(#[from] MoveError),

    /// Query or system failure.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Schedule construction failure.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl ECSError {
    /// Returns `true` if the error reports a dead or unknown entity.
    pub fn is_stale_entity(&self) -> bool {
        matches!(
            self,
            ECSError::Spawn(SpawnError::StaleEntity(_)) | ECSError::Move(MoveError::EntityNotFound(_))
        )
    }
}

/// Result alias used throughout the engine.
pub type ECSResult<T> = Result<T, ECSError>;
