#![allow(dead_code)]

use chunk_ecs::prelude::*;

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;
pub const AGENTS_LARGE: usize = 1_000_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
impl Component for Position {}

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}
impl Component for Wealth {}

#[derive(Clone, Copy)]
pub struct Productivity {
    pub rate: f32,
}
impl Component for Productivity {}

pub fn make_world() -> World {
    World::with_config(WorldConfig::default().entities_per_chunk(1024))
}

/// Spawns `agent_count` agents through one flushed command log.
pub fn populate(world: &mut World, agent_count: usize) -> ECSResult<()> {
    let mut commands = world.commands();
    for _ in 0..agent_count {
        commands.spawn((
            Position { x: 0.0, y: 0.0 },
            Wealth { value: 100.0 },
            Productivity { rate: 1.0 },
        ));
    }
    commands.apply(world)
}

pub fn setup_world(agent_count: usize) -> ECSResult<World> {
    let mut world = make_world();
    populate(&mut world, agent_count)?;
    Ok(world)
}
