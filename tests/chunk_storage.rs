use std::any::Any;
use std::sync::Arc;

use chunk_ecs::engine::chunks::Chunks;
use chunk_ecs::engine::component::Components;
use chunk_ecs::engine::error::{MoveError, SpawnError};
use chunk_ecs::engine::storage::Chunk;
use chunk_ecs::engine::types::{build_signature, ComponentID};
use chunk_ecs::{Component, Entity};

#[derive(Debug, Clone, PartialEq)]
struct Name(String);
impl Component for Name {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health(i32);
impl Component for Health {}

struct Fixture {
    components: Components,
    name: ComponentID,
    health: ComponentID,
}

fn fixture() -> Fixture {
    let mut components = Components::new();
    let name = components.register::<Name>();
    let health = components.register::<Health>();
    Fixture { components, name, health }
}

impl Fixture {
    fn chunks(&self, ids: &[ComponentID], capacity: usize) -> Chunks {
        Chunks::new(Arc::new(self.components.layout_for(&build_signature(ids), capacity)))
    }

    fn values(&self, index: u32) -> Vec<(ComponentID, Box<dyn Any + Send>)> {
        vec![
            (self.name, Box::new(Name(format!("agent-{index}"))) as Box<dyn Any + Send>),
            (self.health, Box::new(Health(index as i32))),
        ]
    }
}

fn entity(index: u32) -> Entity {
    Entity::new(index, 0)
}

#[test]
fn chunk_insert_then_read_round_trips() {
    let f = fixture();
    let layout = Arc::new(f.components.layout_for(&build_signature(&[f.name, f.health]), 4));
    let mut chunk = Chunk::new(layout);

    let row = chunk.add_entity(entity(0)).unwrap();
    chunk.insert(row, f.values(5), 3).unwrap();

    assert_eq!(*chunk.get::<Health>(row).unwrap(), Health(5));
    assert_eq!(chunk.get::<Name>(row).unwrap().0, "agent-5");
    assert_eq!(chunk.change_tick::<Health>(row), Some(3));
    assert_eq!(chunk.row_of(entity(0)), Some(row));
    assert!(chunk.get::<Health>(row + 1).is_none());
}

#[test]
fn chunk_rejects_components_outside_the_layout() {
    let f = fixture();
    let layout = Arc::new(f.components.layout_for(&build_signature(&[f.health]), 4));
    let mut chunk = Chunk::new(layout);
    let row = chunk.add_entity(entity(0)).unwrap();

    let error = chunk.insert(row, f.values(1), 1).unwrap_err();
    assert_eq!(error, SpawnError::UnexpectedComponent { component_id: f.name });

    let error = chunk.insert_component(row, Name("x".into()), 1).unwrap_err();
    assert!(matches!(error, SpawnError::NotInLayout { .. }));
}

#[test]
fn chunk_remove_swaps_the_tail_row_in() {
    let f = fixture();
    let layout = Arc::new(f.components.layout_for(&build_signature(&[f.name, f.health]), 4));
    let mut chunk = Chunk::new(layout);
    for index in 0..3 {
        let row = chunk.add_entity(entity(index)).unwrap();
        chunk.insert(row, f.values(index), 1).unwrap();
    }

    let swapped = chunk.remove_entity(entity(0)).unwrap();
    assert_eq!(swapped, Some(entity(2)));
    assert_eq!(chunk.len(), 2);
    assert_eq!(chunk.entities(), &[entity(2), entity(1)]);
    assert_eq!(*chunk.get::<Health>(0).unwrap(), Health(2));

    // removing the tail swaps nothing
    assert_eq!(chunk.remove_entity(entity(1)).unwrap(), None);
    assert!(chunk.remove_entity(entity(1)).is_err());
}

#[test]
fn free_chunks_are_refilled_before_new_ones() {
    let f = fixture();
    let mut chunks = f.chunks(&[f.name, f.health], 32);

    for index in 0..64 {
        chunks.insert_entity(entity(index), f.values(index), 1).unwrap();
    }
    assert_eq!(chunks.chunk_count(), 2);
    assert!(chunks.chunks().iter().all(|chunk| chunk.is_full()));
    // both chunks are full: the next row would open chunk 2
    assert_eq!(chunks.free_chunk_index(), 2);
    assert_eq!(chunks.chunk_count(), 2);

    for index in 0..32 {
        chunks.remove_entity(entity(index)).unwrap();
    }
    assert_eq!(chunks.free_chunk_index(), 0);

    for index in 64..96 {
        let location = chunks.insert_entity(entity(index), f.values(index), 1).unwrap();
        assert_eq!(location.chunk, 0);
    }

    let counts: Vec<usize> = chunks.chunks().iter().map(Chunk::len).collect();
    assert_eq!(counts, vec![32, 32]);
    assert_eq!(chunks.chunk_count(), 2);
    assert_eq!(chunks.entity_count(), 64);
    assert_eq!(chunks.free_chunk_index(), 2);
}

#[test]
fn the_chunk_watermark_holds_until_the_last_chunk_fills() {
    let f = fixture();
    let mut chunks = f.chunks(&[f.name, f.health], 32);
    for index in 0..40 {
        chunks.insert_entity(entity(index), f.values(index), 1).unwrap();
    }
    for index in 0..10 {
        chunks.remove_entity(entity(index)).unwrap();
    }

    // chunk 0 takes 10 rows back, then chunk 1 fills before chunk 2 opens
    for index in 40..64 {
        chunks.insert_entity(entity(index), f.values(index), 1).unwrap();
        assert_eq!(chunks.chunk_count(), 2);
    }
    let counts: Vec<usize> = chunks.chunks().iter().map(Chunk::len).collect();
    assert_eq!(counts, vec![32, 22]);

    for index in 64..74 {
        chunks.insert_entity(entity(index), f.values(index), 1).unwrap();
    }
    assert_eq!(chunks.chunk_count(), 2);
    assert!(chunks.chunks().iter().all(|chunk| chunk.is_full()));

    let location = chunks.insert_entity(entity(74), f.values(74), 1).unwrap();
    assert_eq!(location.chunk, 2);
    assert_eq!(chunks.chunk_count(), 3);
}

#[test]
fn removal_keeps_the_location_map_consistent() {
    let f = fixture();
    let mut chunks = f.chunks(&[f.name, f.health], 8);
    for index in 0..5 {
        chunks.insert_entity(entity(index), f.values(index), 1).unwrap();
    }

    let (vacated, swapped) = chunks.remove_entity(entity(1)).unwrap();
    assert_eq!(swapped, Some(entity(4)));
    assert_eq!(chunks.location(entity(4)), Some(vacated));
    assert_eq!(chunks.get::<Health>(entity(4)).map(|h| *h), Some(Health(4)));
    assert!(!chunks.contains(entity(1)));

    for stored in chunks.entities().collect::<Vec<_>>() {
        let location = chunks.location(stored).unwrap();
        let chunk = chunks.chunk(location.chunk).unwrap();
        assert_eq!(chunk.entities()[location.row as usize], stored);
    }
}

#[test]
fn insert_rejects_incomplete_rows_and_duplicates() {
    let f = fixture();
    let mut chunks = f.chunks(&[f.name, f.health], 8);

    let partial = vec![(f.health, Box::new(Health(1)) as Box<dyn Any + Send>)];
    let error = chunks.insert_entity(entity(0), partial, 1).unwrap_err();
    assert!(matches!(error, SpawnError::MissingComponent { component_id, .. } if component_id == f.name));
    assert_eq!(chunks.entity_count(), 0);

    chunks.insert_entity(entity(0), f.values(0), 1).unwrap();
    let error = chunks.insert_entity(entity(0), f.values(0), 1).unwrap_err();
    assert_eq!(error, SpawnError::StaleEntity(entity(0)));
}

#[test]
fn overwrite_updates_value_and_tick() {
    let f = fixture();
    let mut chunks = f.chunks(&[f.health], 8);
    let health_only = |value: i32| vec![(f.health, Box::new(Health(value)) as Box<dyn Any + Send>)];

    chunks.insert_entity(entity(0), health_only(1), 1).unwrap();
    chunks.insert_component(entity(0), Health(10), 4).unwrap();
    assert_eq!(chunks.get::<Health>(entity(0)).map(|h| *h), Some(Health(10)));

    chunks.write_component(entity(0), f.health, Box::new(Health(11)), 6).unwrap();
    let location = chunks.location(entity(0)).unwrap();
    let chunk = chunks.chunk(location.chunk).unwrap();
    assert_eq!(chunk.change_tick::<Health>(location.row), Some(6));
    assert_eq!(*chunk.get::<Health>(location.row).unwrap(), Health(11));
}

#[test]
fn move_preserves_shared_data_and_drops_the_rest() {
    let f = fixture();
    let mut both = f.chunks(&[f.name, f.health], 8);
    let mut health_only = f.chunks(&[f.health], 8);

    for index in 0..3 {
        both.insert_entity(entity(index), f.values(index), 2).unwrap();
    }

    let moved = both.move_entity(entity(0), &mut health_only, Vec::new(), 9).unwrap();
    assert_eq!(moved.swapped_entity, Some(entity(2)));
    assert_eq!(both.location(entity(2)), Some(moved.old_location));

    assert_eq!(health_only.get::<Health>(entity(0)).map(|h| *h), Some(Health(0)));
    assert!(health_only.get::<Name>(entity(0)).is_none());
    assert!(!both.contains(entity(0)));

    // moved slots keep their original tick
    let chunk = health_only.chunk(moved.new_location.chunk).unwrap();
    assert_eq!(chunk.change_tick::<Health>(moved.new_location.row), Some(2));
}

#[test]
fn move_requires_missing_destination_components() {
    let f = fixture();
    let mut health_only = f.chunks(&[f.health], 8);
    let mut both = f.chunks(&[f.name, f.health], 8);
    health_only
        .insert_entity(entity(0), vec![(f.health, Box::new(Health(3)) as Box<dyn Any + Send>)], 1)
        .unwrap();

    let error = health_only.move_entity(entity(0), &mut both, Vec::new(), 2).unwrap_err();
    assert!(matches!(error, MoveError::MissingComponent { component_id, .. } if component_id == f.name));
    assert!(health_only.contains(entity(0)));

    let added = vec![(f.name, Box::new(Name("late".into())) as Box<dyn Any + Send>)];
    let moved = health_only.move_entity(entity(0), &mut both, added, 2).unwrap();
    assert_eq!(moved.swapped_entity, None);
    assert_eq!(both.get::<Name>(entity(0)).map(|n| n.0.clone()), Some("late".to_string()));
    assert_eq!(both.get::<Health>(entity(0)).map(|h| *h), Some(Health(3)));

    let error = health_only.move_entity(entity(0), &mut both, Vec::new(), 3).unwrap_err();
    assert_eq!(error, MoveError::EntityNotFound(entity(0)));
}
