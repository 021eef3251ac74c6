use chunk_ecs::prelude::*;
use chunk_ecs::{Bundle, ECSError, SpawnError};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}
impl Component for Position {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}
impl Component for Velocity {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Mass(f32);
impl Component for Mass {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Score(u32);
impl Resource for Score {}

fn position(x: f32) -> Position {
    Position { x, y: 0.0 }
}

#[test]
fn spawn_and_read_components() {
    let mut world = World::new();
    let e = world.spawn((position(1.0), Velocity { dx: 2.0, dy: 0.0 }));

    assert!(world.contains(e));
    assert_eq!(world.entity_count(), 1);
    assert_eq!(world.get::<Position>(e).map(|p| *p), Some(position(1.0)));
    assert_eq!(world.get::<Velocity>(e).map(|v| v.dx), Some(2.0));
    assert!(world.get::<Mass>(e).is_none());
    assert!(world.has::<Velocity>(e));
    assert!(!world.has::<Mass>(e));
}

#[test]
fn empty_entities_are_stored() {
    let mut world = World::new();
    let e = world.spawn_empty();
    assert!(world.contains(e));
    assert_eq!(world.entity_count(), 1);
    assert_eq!(world.entities(), vec![e]);

    world.insert(e, Mass(3.0)).unwrap();
    assert_eq!(world.get::<Mass>(e).map(|m| *m), Some(Mass(3.0)));
}

#[test]
fn insert_moves_entity_and_keeps_existing_data() {
    let mut world = World::new();
    let e = world.spawn(position(4.0));
    let before = world.entity_location(e).unwrap().archetype;

    world.insert(e, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
    assert_ne!(world.entity_location(e).unwrap().archetype, before);
    assert_eq!(world.get::<Position>(e).map(|p| *p), Some(position(4.0)));
    assert_eq!(world.get::<Velocity>(e).map(|v| v.dy), Some(1.0));

    // same component set: overwrite in place
    let archetype = world.entity_location(e).unwrap().archetype;
    world.insert(e, position(9.0)).unwrap();
    assert_eq!(world.entity_location(e).unwrap().archetype, archetype);
    assert_eq!(world.get::<Position>(e).map(|p| p.x), Some(9.0));
}

#[test]
fn remove_moves_entity_to_the_smaller_set() {
    let mut world = World::new();
    let e = world.spawn((position(1.0), Velocity { dx: 0.5, dy: 0.0 }));
    let other = world.spawn((position(2.0), Velocity { dx: 0.0, dy: 0.0 }));

    assert!(world.remove::<Velocity>(e).unwrap());
    assert!(!world.remove::<Velocity>(e).unwrap());
    assert!(!world.remove::<Mass>(e).unwrap());
    assert!(world.get::<Velocity>(e).is_none());
    assert_eq!(world.get::<Position>(e).map(|p| p.x), Some(1.0));

    // the entity swapped into the vacated row is still addressable
    assert_eq!(world.get::<Position>(other).map(|p| p.x), Some(2.0));
    assert_eq!(world.get::<Velocity>(other).map(|v| v.dx), Some(0.0));
}

#[test]
fn stale_entities_are_reported() {
    let mut world = World::new();
    let e = world.spawn(Mass(1.0));
    world.despawn(e).unwrap();

    assert!(!world.contains(e));
    assert!(world.get::<Mass>(e).is_none());
    assert!(matches!(world.despawn(e), Err(ECSError::Spawn(SpawnError::StaleEntity(stale))) if stale == e));
    assert!(world.insert(e, Mass(2.0)).unwrap_err().is_stale_entity());
    assert!(world.remove::<Mass>(e).unwrap_err().is_stale_entity());

    // the index is reused under a new version
    let reused = world.spawn(Mass(5.0));
    assert_eq!(reused.index(), e.index());
    assert_ne!(reused, e);
    assert!(world.get::<Mass>(e).is_none());
}

#[test]
fn bundles_combine_tuples_and_builders() {
    let mut world = World::new();
    let bundle = Bundle::new().with(position(1.0)).with(Mass(2.0));
    let e = world.spawn((bundle, Velocity { dx: 3.0, dy: 0.0 }));
    assert!(world.has::<Position>(e) && world.has::<Mass>(e) && world.has::<Velocity>(e));

    world.insert_bundle(e, (Mass(7.0), position(0.0))).unwrap();
    assert_eq!(world.get::<Mass>(e).map(|m| *m), Some(Mass(7.0)));
}

#[test]
fn required_components_are_added_once() {
    let mut world = World::new();
    world.register_required_component::<Velocity, Mass>(|| Mass(1.0));

    let e = world.spawn(Velocity { dx: 0.0, dy: 0.0 });
    assert_eq!(world.get::<Mass>(e).map(|m| *m), Some(Mass(1.0)));

    let heavy = world.spawn((Velocity { dx: 0.0, dy: 0.0 }, Mass(50.0)));
    assert_eq!(world.get::<Mass>(heavy).map(|m| *m), Some(Mass(50.0)));

    let later = world.spawn((position(0.0), Mass(9.0)));
    world.insert(later, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
    assert_eq!(world.get::<Mass>(later).map(|m| *m), Some(Mass(9.0)));
}

#[test]
fn resources_are_not_overridden_by_insert() {
    let mut world = World::new();
    assert!(world.get_resource::<Score>().is_none());

    assert!(world.insert_resource(Score(1)));
    assert!(!world.insert_resource(Score(2)));
    assert_eq!(world.get_resource::<Score>().map(|s| *s), Some(Score(1)));

    if let Some(mut score) = world.get_resource_mut::<Score>() {
        *score = Score(2);
    }
    assert_eq!(world.get_resource::<Score>().map(|s| *s), Some(Score(2)));

    assert!(world.contains_resource::<Score>());
    assert_eq!(world.remove_resource::<Score>(), Some(Score(2)));
    assert!(!world.contains_resource::<Score>());
}

#[test]
fn get_mut_writes_through() {
    let mut world = World::new();
    let e = world.spawn(position(0.0));
    if let Some(mut p) = world.get_mut::<Position>(e) {
        p.x = 5.0;
    }
    assert_eq!(world.get::<Position>(e).map(|p| p.x), Some(5.0));
}

#[test]
fn commands_spawn_on_flush() {
    let mut world = World::new();
    let mut commands = world.commands();
    let reserved = commands.spawn((position(1.0), Mass(1.0))).id();
    let empty = commands.spawn_empty().insert(Mass(2.0)).id();

    // reserved but not yet placed
    assert!(world.contains(reserved));
    assert_eq!(world.entity_count(), 0);

    commands.finish(&world);
    world.flush().unwrap();
    assert_eq!(world.entity_count(), 2);
    assert_eq!(world.get::<Position>(reserved).map(|p| p.x), Some(1.0));
    assert_eq!(world.get::<Mass>(empty).map(|m| *m), Some(Mass(2.0)));
}

#[test]
fn commands_apply_in_recording_order() {
    let mut world = World::new();
    let e = world.spawn((position(0.0), Mass(1.0)));

    let mut commands = world.commands();
    commands.entity(e).insert(Mass(2.0)).remove::<Position>().insert(Mass(3.0));
    commands.insert_resource(Score(10));
    commands.add(|world: &mut World| {
        let _ = world.spawn(Mass(100.0));
        Ok(())
    });
    assert_eq!(commands.len(), 5);
    commands.apply(&mut world).unwrap();

    assert_eq!(world.get::<Mass>(e).map(|m| *m), Some(Mass(3.0)));
    assert!(!world.has::<Position>(e));
    assert_eq!(world.get_resource::<Score>().map(|s| *s), Some(Score(10)));
    assert_eq!(world.entity_count(), 2);
}

#[test]
fn commands_for_dead_entities_are_skipped() {
    let mut world = World::new();
    let doomed = world.spawn(Mass(1.0));
    let survivor = world.spawn(Mass(1.0));

    let mut commands = world.commands();
    commands.entity(doomed).despawn();
    commands.entity(doomed).insert(Mass(5.0));
    commands.entity(survivor).insert(Mass(6.0));
    commands.finish(&world);
    world.flush().unwrap();

    assert!(!world.contains(doomed));
    assert_eq!(world.get::<Mass>(survivor).map(|m| *m), Some(Mass(6.0)));
}

#[test]
fn merged_command_logs_keep_producer_order() {
    let mut world = World::new();
    let mut main = world.commands();
    let mut first = world.commands();
    let mut second = world.commands();
    let a = first.spawn(Mass(1.0)).id();
    let b = second.spawn(Mass(2.0)).id();
    second.entity(a).insert(Mass(3.0));
    main.append(first);
    main.append(second);
    assert_eq!(main.len(), 3);

    main.finish(&world);
    world.flush().unwrap();
    assert_eq!(world.get::<Mass>(a).map(|m| *m), Some(Mass(3.0)));
    assert_eq!(world.get::<Mass>(b).map(|m| *m), Some(Mass(2.0)));
}

#[test]
fn deferred_despawn_waits_for_flush() {
    let mut world = World::new();
    let e = world.spawn(Mass(1.0));
    world.remove_entity_on_next_tick(e);
    assert!(world.contains(e));

    world.flush().unwrap();
    assert!(!world.contains(e));

    // a second deferred despawn of the same id is harmless
    world.remove_entity_on_next_tick(e);
    world.flush().unwrap();
}

#[test]
fn deferred_despawn_keeps_its_place_in_the_queue() {
    #[derive(Default)]
    struct Sightings(Vec<bool>);
    impl Resource for Sightings {}

    let mut world = World::new();
    world.insert_resource(Sightings::default());
    let e = world.spawn(Mass(1.0));

    let look = move |world: &mut World| -> ECSResult<()> {
        let alive = world.contains(e);
        if let Some(mut sightings) = world.get_resource_mut::<Sightings>() {
            sightings.0.push(alive);
        }
        Ok(())
    };
    let mut before = world.commands();
    before.add(look);
    before.finish(&world);
    world.remove_entity_on_next_tick(e);
    let mut after = world.commands();
    after.add(look);
    after.entity(e).insert(Mass(2.0));
    after.finish(&world);

    world.flush().unwrap();
    assert!(!world.contains(e));
    assert_eq!(world.get_resource::<Sightings>().map(|s| s.0.clone()), Some(vec![true, false]));
}

#[test]
fn clear_removes_entities_and_pending_work() {
    let mut world = World::new();
    world.insert_resource(Score(3));
    for i in 0..10 {
        world.spawn((position(i as f32), Mass(1.0)));
    }
    let mut query = world.query::<(&Position, &Mass)>();
    assert_eq!(query.count(&world), 10);

    let mut commands = world.commands();
    commands.spawn(Mass(1.0));
    commands.finish(&world);
    let victim = world.spawn(Mass(2.0));
    world.remove_entity_on_next_tick(victim);

    world.clear();
    assert_eq!(world.entity_count(), 0);
    world.flush().unwrap();
    assert_eq!(world.entity_count(), 0);

    query.update(&world);
    assert_eq!(query.count(&world), 0);
    assert_eq!(world.get_resource::<Score>().map(|s| *s), Some(Score(3)));
}

#[test]
fn small_chunks_spill_into_new_chunks() {
    let mut world = World::with_config(WorldConfig::default().entities_per_chunk(4));
    let entities: Vec<Entity> = (0..10).map(|i| world.spawn(Mass(i as f32))).collect();

    let location = world.entity_location(entities[9]).unwrap();
    assert_eq!((location.chunk, location.row), (2, 1));
    for (i, e) in entities.iter().enumerate() {
        assert_eq!(world.get::<Mass>(*e).map(|m| m.0), Some(i as f32));
    }
}
