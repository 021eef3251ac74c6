//! ECS System Abstractions
//!
//! This module defines the *system execution model* of the engine.
//!
//! A **system** is a unit of logic that operates over the world. Systems:
//! - are constructed once per world through [`System::init`], where they
//!   declare their parameters (queries, resources) on a [`SystemBuilder`],
//! - are invoked through [`System::update`] once per pass of the schedule
//!   they are registered in,
//! - may declare ordering constraints relative to other systems.
//!
//! ## Access signatures
//!
//! Every parameter requested from the builder records its component and
//! resource access in an [`AccessSets`]. The scheduler runs two systems in
//! the same parallel batch only when their access sets do not conflict, so
//! the declarations must cover everything the system touches.
//!
//! ## Structural changes
//!
//! Systems receive a shared `&World` through [`SystemContext`]. Structural
//! mutation goes through [`SystemContext::commands`] and is applied after the
//! batch completes.
//!
//! ```ignore
//! struct Integrate {
//!     bodies: Query<(&'static mut Position, &'static Velocity)>,
//!     time: ResParam<Time>,
//! }
//!
//! impl System for Integrate {
//!     fn init(builder: &mut SystemBuilder<'_>) -> ECSResult<Self> {
//!         Ok(Self { bodies: builder.query()?, time: builder.resource() })
//!     }
//!
//!     fn update(&mut self, ctx: &mut SystemContext<'_>) -> ECSResult<()> {
//!         let dt = ctx.resource(&self.time).map_or(0.0, |time| time.delta);
//!         ctx.query(&mut self.bodies).for_each(ctx.world(), |(mut position, velocity)| {
//!             position.x += velocity.x * dt;
//!         });
//!         Ok(())
//!     }
//! }
//! ```

use std::any::{type_name, TypeId};
use std::marker::PhantomData;

use crate::engine::commands::Commands;
use crate::engine::error::ECSResult;
use crate::engine::filter::QueryFilter;
use crate::engine::query::{Query, QueryData};
use crate::engine::resource::{Res, ResMut, Resource};
use crate::engine::types::{AccessMode, AccessSets, Signature, Tick};
use crate::engine::world::World;

/// Identity of a system type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SystemKey {
    /// Runtime type identity.
    pub type_id: TypeId,
    /// Type name, for diagnostics.
    pub name: &'static str,
}

impl SystemKey {
    /// Key of `S`.
    pub fn of<S: System>() -> Self {
        Self { type_id: TypeId::of::<S>(), name: type_name::<S>() }
    }
}

/// Ordering constraint relative to another system of the same schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemDependency {
    /// Run before the given system.
    Before(SystemKey),
    /// Run after the given system.
    After(SystemKey),
}

impl SystemDependency {
    /// Run before `S`.
    pub fn before<S: System>() -> Self {
        SystemDependency::Before(SystemKey::of::<S>())
    }

    /// Run after `S`.
    pub fn after<S: System>() -> Self {
        SystemDependency::After(SystemKey::of::<S>())
    }
}

/// A unit of executable logic operating on the world.
///
/// Systems must be `Send + Sync` so the scheduler can run them on worker
/// threads.
pub trait System: Send + Sync + 'static {
    /// Builds the system, declaring its parameters on `builder`.
    fn init(builder: &mut SystemBuilder<'_>) -> ECSResult<Self>
    where
        Self: Sized;

    /// Runs one pass.
    fn update(&mut self, ctx: &mut SystemContext<'_>) -> ECSResult<()>;

    /// Name used in logs and errors.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    /// Ordering constraints carried by the type itself.
    fn dependencies() -> Vec<SystemDependency>
    where
        Self: Sized,
    {
        Vec::new()
    }
}

/// A value a system can request from its [`SystemBuilder`].
pub trait SystemParam: Sized + Send + Sync + 'static {
    /// Registers the parameter's types and records its access.
    fn init(builder: &mut SystemBuilder<'_>) -> ECSResult<Self>;
}

/// Handle to a resource read by a system.
pub struct ResParam<R>(PhantomData<fn() -> R>);

/// Handle to a resource written by a system.
pub struct ResMutParam<R>(PhantomData<fn() -> R>);

/// Construction-time access to the world for [`System::init`].
pub struct SystemBuilder<'w> {
    world: &'w mut World,
    access: AccessSets,
}

impl<'w> SystemBuilder<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self { world, access: AccessSets::default() }
    }

    /// Declares a query.
    pub fn query<D: QueryData>(&mut self) -> ECSResult<Query<D>> {
        self.query_filtered::<D, ()>()
    }

    /// Declares a filtered query.
    pub fn query_filtered<D: QueryData, F: QueryFilter>(&mut self) -> ECSResult<Query<D, F>> {
        let query = Query::<D, F>::try_new()?;
        D::register(self.world.components_mut());
        F::register(self.world.components_mut());

        let components = self.world.components();
        if let Some(state) = D::init_state(components) {
            let mut required = Signature::default();
            D::update_access(&state, &mut required, &mut self.access);
        }
        F::update_access(&F::init_state(components), &mut self.access);
        Ok(query)
    }

    /// Declares read access to resource `R`.
    pub fn resource<R: Resource>(&mut self) -> ResParam<R> {
        let id = self.world.resources_mut().register::<R>();
        self.access.add_resource(id, AccessMode::Read);
        ResParam(PhantomData)
    }

    /// Declares write access to resource `R`.
    pub fn resource_mut<R: Resource>(&mut self) -> ResMutParam<R> {
        let id = self.world.resources_mut().register::<R>();
        self.access.add_resource(id, AccessMode::Write);
        ResMutParam(PhantomData)
    }

    /// Builds any [`SystemParam`].
    pub fn param<P: SystemParam>(&mut self) -> ECSResult<P> {
        P::init(self)
    }

    /// Records access not covered by a parameter.
    pub fn add_access(&mut self, access: &AccessSets) {
        self.access.extend(access);
    }

    /// Exclusive world access during construction.
    pub fn world(&mut self) -> &mut World {
        &mut *self.world
    }

    /// Access recorded so far.
    pub fn access(&self) -> &AccessSets {
        &self.access
    }

    pub(crate) fn into_access(self) -> AccessSets {
        self.access
    }
}

impl<D, F> SystemParam for Query<D, F>
where
    D: QueryData + 'static,
    F: QueryFilter + 'static,
{
    fn init(builder: &mut SystemBuilder<'_>) -> ECSResult<Self> {
        builder.query_filtered::<D, F>()
    }
}

impl<R: Resource> SystemParam for ResParam<R> {
    fn init(builder: &mut SystemBuilder<'_>) -> ECSResult<Self> {
        Ok(builder.resource::<R>())
    }
}

impl<R: Resource> SystemParam for ResMutParam<R> {
    fn init(builder: &mut SystemBuilder<'_>) -> ECSResult<Self> {
        Ok(builder.resource_mut::<R>())
    }
}

macro_rules! impl_system_param_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: SystemParam),+> SystemParam for ($($name,)+) {
            fn init(builder: &mut SystemBuilder<'_>) -> ECSResult<Self> {
                Ok(($($name::init(builder)?,)+))
            }
        }
    };
}

impl_system_param_for_tuple!(A);
impl_system_param_for_tuple!(A, B);
impl_system_param_for_tuple!(A, B, C);
impl_system_param_for_tuple!(A, B, C, D);

/// Run-time view handed to [`System::update`].
pub struct SystemContext<'w> {
    world: &'w World,
    commands: Commands,
    last_run: Tick,
    this_run: Tick,
}

impl<'w> SystemContext<'w> {
    pub(crate) fn new(world: &'w World, last_run: Tick, this_run: Tick) -> Self {
        Self { world, commands: Commands::new(world), last_run, this_run }
    }

    /// Shared world access.
    pub fn world(&self) -> &'w World {
        self.world
    }

    /// This execution's private command log.
    pub fn commands(&mut self) -> &mut Commands {
        &mut self.commands
    }

    /// Updates `query` against the world; `Changed` filters compare with the
    /// previous run of this system, and writes through it carry this run's
    /// tick.
    pub fn query<'s, D: QueryData, F: QueryFilter>(&self, query: &'s mut Query<D, F>) -> &'s Query<D, F> {
        query.update_for_system(self.world, self.last_run, self.this_run);
        query
    }

    /// Reads a declared resource.
    pub fn resource<R: Resource>(&self, _param: &ResParam<R>) -> Option<Res<'w, R>> {
        self.world.get_resource::<R>()
    }

    /// Writes a declared resource.
    pub fn resource_mut<R: Resource>(&self, _param: &ResMutParam<R>) -> Option<ResMut<'w, R>> {
        self.world.get_resource_mut::<R>()
    }

    /// Tick of this system's previous run.
    pub fn last_run(&self) -> Tick {
        self.last_run
    }

    /// Tick of the current run.
    pub fn this_run(&self) -> Tick {
        self.this_run
    }

    pub(crate) fn into_commands(self) -> Commands {
        self.commands
    }
}
