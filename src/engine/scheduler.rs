//! ECS system scheduling and execution.
//!
//! This module is responsible for:
//! * ordering the systems of a named phase by their `before`/`after`
//!   constraints,
//! * grouping ordered systems into batches based on access compatibility,
//! * running each batch (in parallel with Rayon when allowed),
//! * flushing deferred commands between batches.
//!
//! ## Scheduling model
//!
//! Each phase is an independent [`Schedule`] identified by a
//! [`ScheduleLabel`]. Building a schedule:
//!
//! 1. resolves every constraint into an edge `a → b` ("a runs before b"),
//! 2. sorts the graph topologically (Kahn's algorithm; among ready systems
//!    the earliest registered goes first, so the order is deterministic for
//!    a given registration order),
//! 3. walks the sorted systems and places each one into the first batch that
//!    comes after all of its predecessors' batches and holds no system with
//!    conflicting access.
//!
//! Batches run sequentially; the systems of one batch run concurrently.
//!
//! ## Structural synchronization
//!
//! Each system execution records into a private command log. After a batch
//! completes, the logs are merged into the world's queue in registration
//! order and the world is flushed, so every later batch observes the
//! structural changes of earlier ones.
//!
//! ## Ticks and time
//!
//! A run is one pass at a single change tick, advanced once the pass ends.
//! Before the first batch the [`DeltaTime`] resource is set to the time since
//! the schedule's previous run.
//!
//! ## Errors
//!
//! Cycles and constraints naming unregistered systems are reported when the
//! schedule is first run after a change. A failing system does not stop the
//! other systems of its batch; the batch is flushed and the first failure is
//! returned.

use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, debug_span, error};

use crate::engine::commands::Commands;
use crate::engine::config::ExecutorKind;
use crate::engine::error::{ECSError, ECSResult, ExecutionError, ScheduleError};
use crate::engine::resource::Resource;
use crate::engine::systems::{System, SystemContext, SystemDependency, SystemKey};
use crate::engine::types::{AccessSets, Tick, NEVER_TICK};
use crate::engine::world::World;

/// Name of a scheduler phase.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleLabel(Cow<'static, str>);

impl ScheduleLabel {
    /// Runs once, on the first [`World::update`].
    pub const STARTUP: ScheduleLabel = ScheduleLabel(Cow::Borrowed("startup"));
    /// Runs first on every update.
    pub const PRE_UPDATE: ScheduleLabel = ScheduleLabel(Cow::Borrowed("pre_update"));
    /// Main per-update phase.
    pub const UPDATE: ScheduleLabel = ScheduleLabel(Cow::Borrowed("update"));
    /// Fixed-step phase, driven explicitly by the application.
    pub const FIXED_UPDATE: ScheduleLabel = ScheduleLabel(Cow::Borrowed("fixed_update"));
    /// Runs last on every update.
    pub const POST_UPDATE: ScheduleLabel = ScheduleLabel(Cow::Borrowed("post_update"));

    /// Creates a label.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Label text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScheduleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ScheduleLabel {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for ScheduleLabel {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl From<&ScheduleLabel> for ScheduleLabel {
    fn from(label: &ScheduleLabel) -> Self {
        label.clone()
    }
}

/// Time elapsed since the previous run of the schedule being run.
///
/// Replaced at the start of every schedule run; zero on a schedule's first
/// run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeltaTime {
    delta: Duration,
}

impl Resource for DeltaTime {}

impl DeltaTime {
    /// Wraps an elapsed duration.
    pub fn new(delta: Duration) -> Self {
        Self { delta }
    }

    /// Elapsed time.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Elapsed time in seconds.
    pub fn as_secs_f32(&self) -> f32 {
        self.delta.as_secs_f32()
    }
}

/// A registered system and its scheduling metadata.
pub struct SystemNode {
    key: SystemKey,
    system: Box<dyn System>,
    access: AccessSets,
    dependencies: Vec<SystemDependency>,
    last_run: Tick,
}

impl SystemNode {
    /// System name.
    pub fn name(&self) -> &'static str {
        self.system.name()
    }

    /// Declared access.
    pub fn access(&self) -> &AccessSets {
        &self.access
    }

    fn run(&mut self, world: &World, this_run: Tick) -> (Commands, ECSResult<()>) {
        let mut ctx = SystemContext::new(world, self.last_run, this_run);
        let result = self.system.update(&mut ctx);
        self.last_run = this_run;
        (ctx.into_commands(), result)
    }
}

/// The systems of one phase.
#[derive(Default)]
pub struct Schedule {
    nodes: Vec<SystemNode>,
    batches: Vec<Vec<usize>>,
    dirty: bool,
    last_run_at: Option<Instant>,
}

impl Schedule {
    /// Creates an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered systems.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no system is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registers a system; returns its index.
    pub fn add_system(
        &mut self,
        key: SystemKey,
        system: Box<dyn System>,
        access: AccessSets,
        dependencies: Vec<SystemDependency>,
    ) -> usize {
        self.nodes.push(SystemNode { key, system, access, dependencies, last_run: NEVER_TICK });
        self.dirty = true;
        self.nodes.len() - 1
    }

    /// Adds an ordering constraint to the system at `index`.
    pub fn add_dependency(&mut self, index: usize, dependency: SystemDependency) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.dependencies.push(dependency);
            self.dirty = true;
        }
    }

    /// When the schedule last started running.
    pub fn last_run_at(&self) -> Option<Instant> {
        self.last_run_at
    }

    /// Moves the systems of `other` to the end of this schedule.
    pub fn merge(&mut self, other: Schedule) {
        if !other.nodes.is_empty() {
            self.nodes.extend(other.nodes);
            self.dirty = true;
        }
    }

    /// Batches of system indices from the last build.
    pub fn batches(&self) -> &[Vec<usize>] {
        &self.batches
    }

    /// System names in execution order, building the schedule if needed.
    pub fn ordered_names(&mut self, label: &ScheduleLabel, executor: ExecutorKind) -> Result<Vec<&'static str>, ScheduleError> {
        if self.dirty {
            self.build(label, executor)?;
        }
        Ok(self.batches.iter().flatten().map(|&index| self.nodes[index].name()).collect())
    }

    fn edges(&self, label: &ScheduleLabel) -> Result<Vec<Vec<usize>>, ScheduleError> {
        let mut successors = vec![Vec::new(); self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            for dependency in &node.dependencies {
                let (SystemDependency::Before(target) | SystemDependency::After(target)) = dependency;
                let matches: Vec<usize> = self
                    .nodes
                    .iter()
                    .enumerate()
                    .filter(|(other, candidate)| *other != index && candidate.key.type_id == target.type_id)
                    .map(|(other, _)| other)
                    .collect();
                if matches.is_empty() {
                    return Err(ScheduleError::UnknownDependency {
                        schedule: label.to_string(),
                        system: node.name(),
                        dependency: target.name,
                    });
                }
                for other in matches {
                    match dependency {
                        SystemDependency::Before(_) => successors[index].push(other),
                        SystemDependency::After(_) => successors[other].push(index),
                    }
                }
            }
        }
        Ok(successors)
    }

    fn build(&mut self, label: &ScheduleLabel, executor: ExecutorKind) -> Result<(), ScheduleError> {
        let successors = self.edges(label)?;
        let count = self.nodes.len();

        let mut predecessors = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];
        for (from, targets) in successors.iter().enumerate() {
            for &to in targets {
                in_degree[to] += 1;
                predecessors[to].push(from);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> =
            (0..count).filter(|&index| in_degree[index] == 0).map(Reverse).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for &next in &successors[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < count {
            let systems = (0..count)
                .filter(|&index| in_degree[index] > 0)
                .map(|index| self.nodes[index].name())
                .collect();
            return Err(ScheduleError::Cycle { schedule: label.to_string(), systems });
        }

        let mut batches: Vec<Vec<usize>> = Vec::new();
        let mut batch_of = vec![0usize; count];
        for &index in &order {
            let batch = match executor {
                ExecutorKind::SingleThreaded => batches.len(),
                ExecutorKind::MultiThreaded => {
                    let earliest = predecessors[index].iter().map(|&p| batch_of[p] + 1).max().unwrap_or(0);
                    (earliest..batches.len())
                        .find(|&candidate| {
                            batches[candidate]
                                .iter()
                                .all(|&member| !self.nodes[member].access.conflicts_with(&self.nodes[index].access))
                        })
                        .unwrap_or(batches.len())
                }
            };
            if batch == batches.len() {
                batches.push(Vec::new());
            }
            batches[batch].push(index);
            batch_of[index] = batch;
        }
        for batch in &mut batches {
            batch.sort_unstable();
        }

        debug!(schedule = %label, systems = count, batches = batches.len(), "built schedule");
        self.batches = batches;
        self.dirty = false;
        Ok(())
    }

    /// Runs every system once, batch by batch, flushing after each batch.
    ///
    /// The whole pass shares the world's current change tick: every system
    /// sees it as `this_run`, and every write and flushed command of the pass
    /// is stamped with it. The tick advances once when the pass ends, failed
    /// or not.
    pub fn run(&mut self, world: &mut World, label: &ScheduleLabel) -> ECSResult<()> {
        let _span = debug_span!("run_schedule", schedule = %label).entered();
        let executor = world.config().executor;
        if self.dirty {
            self.build(label, executor)?;
        }

        let now = Instant::now();
        let delta = self.last_run_at.map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last_run_at = Some(now);
        let replaced = world.get_resource_mut::<DeltaTime>().map(|mut time| *time = DeltaTime::new(delta)).is_some();
        if !replaced {
            world.insert_resource(DeltaTime::new(delta));
        }

        let this_run = world.read_change_tick();
        let result = self.run_batches(world, executor, this_run);
        world.increment_change_tick();
        result
    }

    fn run_batches(&mut self, world: &mut World, executor: ExecutorKind, this_run: Tick) -> ECSResult<()> {
        let mut failure: Option<ECSError> = None;
        for batch in &self.batches {
            let mut members: Vec<&mut SystemNode> = self
                .nodes
                .iter_mut()
                .enumerate()
                .filter(|(index, _)| batch.binary_search(index).is_ok())
                .map(|(_, node)| node)
                .collect();

            let outcomes = run_batch(&mut members, world, executor, this_run);
            for (node, (commands, result)) in members.iter().zip(outcomes) {
                commands.finish(world);
                if let Err(source) = result {
                    error!(system = node.name(), error = %source, "system failed");
                    if failure.is_none() {
                        failure = Some(ExecutionError::SystemFailed { system: node.name(), source: Box::new(source) }.into());
                    }
                }
            }
            world.flush()?;
            if let Some(error) = failure.take() {
                return Err(error);
            }
        }
        Ok(())
    }
}

fn run_batch(
    members: &mut [&mut SystemNode],
    world: &World,
    executor: ExecutorKind,
    this_run: Tick,
) -> Vec<(Commands, ECSResult<()>)> {
    if executor == ExecutorKind::SingleThreaded || members.len() < 2 {
        return members.iter_mut().map(|node| node.run(world, this_run)).collect();
    }
    let mut run =
        || -> Vec<(Commands, ECSResult<()>)> { members.par_iter_mut().map(|node| node.run(world, this_run)).collect() };
    match world.thread_pool() {
        Some(pool) => pool.install(run),
        None => run(),
    }
}

/// Every phase of a world.
#[derive(Default)]
pub struct Schedules {
    schedules: HashMap<ScheduleLabel, Schedule>,
}

impl Schedules {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule for `label`, created if missing.
    pub fn entry(&mut self, label: ScheduleLabel) -> &mut Schedule {
        self.schedules.entry(label).or_default()
    }

    /// Schedule for `label`.
    pub fn get(&self, label: &ScheduleLabel) -> Option<&Schedule> {
        self.schedules.get(label)
    }

    /// Schedule for `label`, mutably.
    pub fn get_mut(&mut self, label: &ScheduleLabel) -> Option<&mut Schedule> {
        self.schedules.get_mut(label)
    }

    /// Returns `true` if a schedule exists for `label`.
    pub fn contains(&self, label: &ScheduleLabel) -> bool {
        self.schedules.contains_key(label)
    }

    /// Takes the schedule out, e.g. to run it against the owning world.
    pub fn remove(&mut self, label: &ScheduleLabel) -> Option<Schedule> {
        self.schedules.remove(label)
    }

    /// Puts a schedule back, merging systems registered in the meantime.
    pub fn insert(&mut self, label: ScheduleLabel, mut schedule: Schedule) {
        if let Some(added) = self.schedules.remove(&label) {
            schedule.merge(added);
        }
        self.schedules.insert(label, schedule);
    }

    /// Registered labels.
    pub fn labels(&self) -> impl Iterator<Item = &ScheduleLabel> {
        self.schedules.keys()
    }
}

/// Registration handle returned by `World::add_system`.
pub struct SystemConfig<'a> {
    schedule: &'a mut Schedule,
    index: usize,
}

impl<'a> SystemConfig<'a> {
    pub(crate) fn new(schedule: &'a mut Schedule, index: usize) -> Self {
        Self { schedule, index }
    }

    /// Runs the system before `S`.
    pub fn before<S: System>(self) -> Self {
        self.schedule.add_dependency(self.index, SystemDependency::before::<S>());
        self
    }

    /// Runs the system after `S`.
    pub fn after<S: System>(self) -> Self {
        self.schedule.add_dependency(self.index, SystemDependency::after::<S>());
        self
    }
}
